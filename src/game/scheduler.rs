//! Rotation of matches: lobby, countdown, trading, settlement, intermission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::engine::shared::OrderBook;
use crate::game::round::Match;
use crate::game::session::{EcosystemConfig, MatchSession};
use crate::game::types::{MatchConfig, MatchEvent, MatchState};
use crate::lifecycle::{Lifecycle, TaskHandle};
use crate::market_data::day::{generate_synthetic, TradingDay};
use crate::market_data::provider::HistoricalProvider;
use crate::persist::MatchStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub match_config: MatchConfig,
    pub lobby: Duration,
    pub intermission: Duration,
    pub years_back: u32,
    pub synthetic_volatility_bps: u32,
    pub synthetic_seed: Option<u64>,
    pub ecosystem: EcosystemConfig,
    /// Stop on its own after this many completed matches
    pub max_rounds: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            match_config: MatchConfig::default(),
            lobby: Duration::from_secs(30),
            intermission: Duration::from_secs(15),
            years_back: 5,
            synthetic_volatility_bps: 15,
            synthetic_seed: None,
            ecosystem: EcosystemConfig::default(),
            max_rounds: None,
        }
    }
}

struct Running {
    scope: Lifecycle,
    task: TaskHandle,
}

pub struct Scheduler {
    config: SchedulerConfig,
    provider: Option<Arc<dyn HistoricalProvider>>,
    broadcaster: Arc<dyn Broadcaster>,
    store: Arc<dyn MatchStore>,
    running: Mutex<Option<Running>>,
    active: watch::Sender<bool>,
    current: RwLock<Option<Arc<MatchSession>>>,
    completed: AtomicU64,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        provider: Option<Arc<dyn HistoricalProvider>>,
        broadcaster: Arc<dyn Broadcaster>,
        store: Arc<dyn MatchStore>,
    ) -> Arc<Self> {
        let (active, _) = watch::channel(false);
        Arc::new(Self {
            config,
            provider,
            broadcaster,
            store,
            running: Mutex::new(None),
            active,
            current: RwLock::new(None),
            completed: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        *self.active.borrow()
    }

    pub fn current(&self) -> Option<Arc<MatchSession>> {
        self.current.read().clone()
    }

    pub fn completed_matches(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Begin rotating matches in the background.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut running = self.running.lock();
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }
        // a previous run that ended on its own
        running.take();

        let root = Lifecycle::new();
        self.active.send_replace(true);
        let this = Arc::clone(self);
        let task = TaskHandle::spawn("scheduler", &root, move |scope| async move {
            this.rotate(scope).await;
            this.active.send_replace(false);
        });
        *running = Some(Running { scope: root, task });
        info!("Scheduler started");
        Ok(())
    }

    /// Halt rotation and tear down the active match's tasks. Idempotent.
    pub async fn stop(&self) {
        let taken = self.running.lock().take();
        let Some(mut running) = taken else {
            return;
        };
        running.scope.cancel();
        running.task.stop().await;
        self.active.send_replace(false);
        info!(completed = self.completed_matches(), "Scheduler stopped");
    }

    /// Resolves once rotation has ended, by `stop` or by reaching `max_rounds`.
    pub async fn stopped(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|active| !*active).await;
    }

    async fn load_day(&self) -> TradingDay {
        let mc = &self.config.match_config;
        if let Some(provider) = &self.provider {
            match provider.get_random_day(&mc.symbol, self.config.years_back).await {
                Ok(day) => return provider.normalize(&day, mc.target_mark),
                Err(e) => warn!(symbol = %mc.symbol, error = %e, "Historical day unavailable, using synthetic"),
            }
        }
        generate_synthetic(&mc.symbol, mc.target_mark, self.config.synthetic_volatility_bps, self.config.synthetic_seed)
    }

    /// Fresh book, a trading day and a match, wired to the broadcaster,
    /// the ecosystem and the store.
    pub async fn create_new_match(&self, parent: &Lifecycle) -> Arc<MatchSession> {
        let day = self.load_day().await;
        let round = Arc::new(Match::new(self.config.match_config.clone(), day, OrderBook::shared()));
        let session = MatchSession::new(round, Arc::clone(&self.broadcaster), self.config.ecosystem.clone(), parent);

        let events = session.round().subscribe();
        let observer = spawn_observer(Arc::clone(&session), Arc::clone(&self.store), events);
        session.track(observer).await;

        let day = session.round().day();
        info!(
            match_id = %session.round().id(),
            symbol = %day.symbol,
            day = %day.date,
            synthetic = day.synthetic,
            "Created match"
        );
        self.broadcaster.notify(session.round().match_state_event());
        session
    }

    async fn rotate(&self, scope: Lifecycle) {
        loop {
            let session = self.create_new_match(&scope).await;
            *self.current.write() = Some(Arc::clone(&session));

            let finished = self.drive(&session, &scope).await;
            session.shutdown().await;
            if !finished {
                break;
            }
            let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
            if self.config.max_rounds.is_some_and(|max| done >= max) {
                info!(completed = done, "Reached round limit");
                break;
            }

            debug!(secs = self.config.intermission.as_secs(), "Intermission");
            if !scope.sleep(self.config.intermission).await {
                break;
            }
        }
    }

    /// Walk one match through its phases. False if cancelled on the way.
    async fn drive(&self, session: &MatchSession, scope: &Lifecycle) -> bool {
        let round = session.round();

        if !scope.sleep(self.config.lobby).await {
            return false;
        }
        if let Err(e) = round.transition_to_pre_match() {
            warn!(match_id = %round.id(), error = %e, "Could not leave lobby");
        }

        loop {
            let left = round.countdown_remaining();
            if left.is_zero() {
                break;
            }
            self.broadcaster.notify(round.countdown_event());
            if !scope.sleep(left.min(Duration::from_secs(1))).await {
                return false;
            }
        }
        if let Err(e) = round.start() {
            warn!(match_id = %round.id(), error = %e, "Could not start trading");
        }

        // trading may also be ended early from outside
        while round.state() == MatchState::Trading && !round.is_expired() {
            let left = round.remaining_time().min(Duration::from_secs(1));
            if !scope.sleep(left).await {
                return false;
            }
        }
        if round.state() == MatchState::Trading {
            // no bot flow after the closing mark is taken
            session.stop_ecosystem().await;
            if let Err(e) = round.end_trading() {
                warn!(match_id = %round.id(), error = %e, "Could not end trading");
            }
        }

        tokio::select! {
            _ = session.finished() => true,
            _ = scope.cancelled() => false,
        }
    }
}

/// Bridge match events to the ecosystem, the broadcaster and the store.
fn spawn_observer(
    session: Arc<MatchSession>,
    store: Arc<dyn MatchStore>,
    mut events: mpsc::UnboundedReceiver<MatchEvent>,
) -> TaskHandle {
    let parent = session.lifecycle().clone();
    TaskHandle::spawn("match_observer", &parent, move |scope| async move {
        loop {
            let event = tokio::select! {
                ev = events.recv() => ev,
                _ = scope.cancelled() => None,
            };
            let Some(event) = event else { break };
            let round = session.round();

            match event {
                MatchEvent::StateChanged { to, .. } => {
                    session.broadcaster().notify(round.match_state_event_at(to));
                    match to {
                        MatchState::Trading => session.start_ecosystem().await,
                        MatchState::Settlement => {
                            session.stop_ecosystem().await;
                            let ledger = Arc::clone(session.ledger());
                            if let Err(e) = round.settle(ledger.as_ref()) {
                                error!(match_id = %round.id(), error = %e, "Settlement failed");
                            }
                        }
                        _ => {}
                    }
                }
                MatchEvent::Ended { final_mark, results } => {
                    session.broadcaster().notify(round.results_event());
                    let (record, rows) = round.record();
                    match store.save_match(&record, &rows).await {
                        Ok(()) => info!(match_id = %round.id(), final_mark, results = results.len(), "Match saved"),
                        Err(e) => {
                            metrics::counter!("arena_persist_failures_total").increment(1);
                            error!(match_id = %round.id(), error = %e, "Failed to save match");
                        }
                    }
                    session.mark_finished();
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{BroadcastEvent, ChannelBroadcaster, NullBroadcaster};
    use crate::market_data::provider::ProviderError;
    use crate::persist::memory::InMemoryMatchStore;
    use crate::persist::{MatchRecord, PersistError, PersistResult, ResultRow};
    use async_trait::async_trait;
    use uuid::Uuid;

    fn quick_config(max_rounds: Option<u64>) -> SchedulerConfig {
        SchedulerConfig {
            match_config: MatchConfig { duration_secs: 20, pre_match_secs: 3, ..Default::default() },
            lobby: Duration::from_secs(2),
            intermission: Duration::from_secs(1),
            synthetic_seed: Some(11),
            ecosystem: EcosystemConfig { feed_interval: Duration::from_millis(500), seed: Some(3), ..Default::default() },
            max_rounds,
            ..Default::default()
        }
    }

    struct Broken;

    #[async_trait]
    impl HistoricalProvider for Broken {
        async fn get_random_day(&self, _symbol: &str, _years_back: u32) -> Result<TradingDay, ProviderError> {
            Err(ProviderError::Unavailable)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotates_and_persists() {
        let (broadcaster, mut rx) = ChannelBroadcaster::new();
        let store = Arc::new(InMemoryMatchStore::new());
        let scheduler = Scheduler::new(quick_config(Some(2)), None, Arc::new(broadcaster), store.clone());

        scheduler.start().unwrap();
        assert_eq!(scheduler.start(), Err(SchedulerError::AlreadyRunning));
        scheduler.stopped().await;

        assert!(!scheduler.is_running());
        assert_eq!(scheduler.completed_matches(), 2);
        assert_eq!(store.len(), 2);
        for (record, _) in store.all() {
            assert_eq!(record.state, "complete");
            assert!(record.synthetic_day);
        }

        let mut countdowns = 0;
        let mut ticks = 0;
        let mut results = 0;
        let mut states = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            match ev {
                BroadcastEvent::Countdown { .. } => countdowns += 1,
                BroadcastEvent::PriceTick { .. } => ticks += 1,
                BroadcastEvent::MatchResults { .. } => results += 1,
                BroadcastEvent::MatchState { state, .. } => states.push(state),
            }
        }
        assert_eq!(results, 2);
        assert!(countdowns >= 6);
        assert!(ticks > 0);
        // created + four transitions, twice
        assert_eq!(states.len(), 10);
        assert_eq!(states.iter().filter(|s| **s == MatchState::Complete).count(), 2);

        let last = scheduler.current().unwrap();
        assert_eq!(last.round().state(), MatchState::Complete);
        assert!(last.book().is_empty());
    }

    struct FailingStore {
        attempts: AtomicU64,
    }

    #[async_trait]
    impl MatchStore for FailingStore {
        async fn save_match(&self, _record: &MatchRecord, _results: &[ResultRow]) -> PersistResult<()> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(PersistError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }

        async fn load_match(&self, match_id: Uuid) -> PersistResult<(MatchRecord, Vec<ResultRow>)> {
            Err(PersistError::NotFound(match_id))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_does_not_stop_rotation() {
        let (broadcaster, mut rx) = ChannelBroadcaster::new();
        let store = Arc::new(FailingStore { attempts: AtomicU64::new(0) });
        let scheduler = Scheduler::new(quick_config(Some(2)), None, Arc::new(broadcaster), store.clone());

        scheduler.start().unwrap();
        scheduler.stopped().await;

        assert_eq!(scheduler.completed_matches(), 2);
        assert_eq!(store.attempts.load(Ordering::Relaxed), 2);
        let last = scheduler.current().unwrap();
        assert!(last.is_finished());
        assert_eq!(last.round().state(), MatchState::Complete);

        let mut results = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, BroadcastEvent::MatchResults { .. }) {
                results += 1;
            }
        }
        assert_eq!(results, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bots_stop_before_close() {
        let scheduler = Scheduler::new(quick_config(Some(1)), None, Arc::new(NullBroadcaster), Arc::new(InMemoryMatchStore::new()));
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;
        let session = scheduler.current().unwrap();
        assert!(session.is_trading_ecosystem_running());

        let mut events = session.round().subscribe();
        loop {
            match events.recv().await {
                Some(MatchEvent::StateChanged { to: MatchState::Settlement, .. }) => break,
                Some(_) => {}
                None => panic!("match ended without settling"),
            }
        }
        // the driver pulled the bots before freezing the mark
        assert!(!session.is_trading_ecosystem_running());
        assert!(session.book().is_empty());
        scheduler.stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_trading_tears_down() {
        let store = Arc::new(InMemoryMatchStore::new());
        let scheduler = Scheduler::new(quick_config(None), Some(Arc::new(Broken)), Arc::new(NullBroadcaster), store.clone());
        scheduler.start().unwrap();

        // lobby 2s + countdown 3s, then a few seconds of trading
        tokio::time::sleep(Duration::from_secs(8)).await;
        let session = scheduler.current().unwrap();
        assert_eq!(session.round().state(), MatchState::Trading);
        assert!(session.round().day().synthetic);
        assert!(session.is_trading_ecosystem_running());

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(session.lifecycle().is_cancelled());
        assert!(!session.is_trading_ecosystem_running());
        assert!(session.book().is_empty());
        assert!(store.is_empty());
        assert_eq!(scheduler.completed_matches(), 0);

        // can be started again
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_intermission() {
        let mut config = quick_config(None);
        config.intermission = Duration::from_secs(3600);
        let store = Arc::new(InMemoryMatchStore::new());
        let scheduler = Scheduler::new(config, None, Arc::new(NullBroadcaster), store.clone());
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(scheduler.completed_matches(), 1);
        scheduler.stop().await;
        assert_eq!(store.len(), 1);
    }
}
