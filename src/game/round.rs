//! A single round of trading: state machine, participants, mark and clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::broadcast::BroadcastEvent;
use crate::engine::shared::OrderBook;
use crate::game::settlement::{self, PositionFetcher};
use crate::game::timing;
use crate::game::types::{MatchConfig, MatchError, MatchEvent, MatchState, Participant};
use crate::market_data::day::{Bar, TradingDay};
use crate::market_data::price_feed::{derive_nav, MarkSource};
use crate::persist::{MatchRecord, ResultRow};

/// Wall-clock timestamps kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchTimes {
    pub created_at: DateTime<Utc>,
    pub pre_match_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: MatchState,
    times: MatchTimes,
    countdown_started: Option<Instant>,
    trading_started: Option<Instant>,
    // freezes the clock once trading ends
    trading_ended: Option<Instant>,
    nav: i64,
    participants: Vec<Participant>,
    next_join: u32,
    subscribers: Vec<mpsc::UnboundedSender<MatchEvent>>,
}

impl Inner {
    fn emit(&mut self, event: MatchEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn trading_elapsed(&self) -> Option<Duration> {
        let started = self.trading_started?;
        let until = self.trading_ended.unwrap_or_else(Instant::now);
        Some(until.saturating_duration_since(started))
    }
}

/// One match.
///
/// State only moves forward through `Lobby -> PreMatch -> Trading ->
/// Settlement -> Complete`. Reads take the shared side of the lock; every
/// transition and every join/leave takes the exclusive side, and subscribers
/// are notified while it is held so they see transitions in order.
#[derive(Debug)]
pub struct Match {
    id: Uuid,
    config: MatchConfig,
    day: TradingDay,
    book: Arc<OrderBook>,
    inner: RwLock<Inner>,
}

impl Match {
    pub fn new(config: MatchConfig, day: TradingDay, book: Arc<OrderBook>) -> Self {
        let nav = day.first_open().unwrap_or(config.target_mark);
        let inner = Inner {
            state: MatchState::Lobby,
            times: MatchTimes { created_at: Utc::now(), pre_match_at: None, started_at: None, ended_at: None },
            countdown_started: None,
            trading_started: None,
            trading_ended: None,
            nav,
            participants: Vec::new(),
            next_join: 0,
            subscribers: Vec::new(),
        };
        Self { id: Uuid::new_v4(), config, day, book, inner: RwLock::new(inner) }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn day(&self) -> &TradingDay {
        &self.day
    }

    pub fn book(&self) -> &Arc<OrderBook> {
        &self.book
    }

    pub fn state(&self) -> MatchState {
        self.inner.read().state
    }

    pub fn nav(&self) -> i64 {
        self.inner.read().nav
    }

    pub fn times(&self) -> MatchTimes {
        self.inner.read().times
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.inner.read().participants.clone()
    }

    pub fn participant(&self, user_id: &str) -> Option<Participant> {
        self.inner.read().participants.iter().find(|p| p.user_id == user_id).cloned()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().subscribers.push(tx);
        rx
    }

    /// Add a player with a random split of the starting value: 20-80% in
    /// shares at the target mark, the rest in cash.
    #[instrument(skip(self), fields(match_id = %self.id))]
    pub fn join(&self, user_id: &str, account_id: &str) -> Result<Participant, MatchError> {
        let mut inner = self.inner.write();
        if !inner.state.accepts_participants() {
            return Err(MatchError::InvalidTransition { from: inner.state, op: "join" });
        }
        if inner.participants.iter().any(|p| p.user_id == user_id) {
            return Err(MatchError::AlreadyJoined { user_id: user_id.to_string() });
        }

        let target = self.config.target_mark;
        let value = self.config.starting_value;
        let pct: i64 = rand::thread_rng().gen_range(20..=80);
        let shares = match value * pct / 100 {
            _ if target <= 0 => 0,
            // a mark above the 20% slice would round the share leg away
            slice if slice < target && target <= value => 1,
            slice => slice / target,
        };
        let participant = Participant {
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            join_order: inner.next_join,
            starting_cash: value - shares * target,
            starting_shares: shares,
            starting_value: value,
            final_cash: None,
            final_shares: None,
            final_value: None,
            pnl: None,
            rank: None,
        };
        inner.next_join += 1;
        inner.participants.push(participant.clone());
        info!(user_id, shares, cash = participant.starting_cash, "Participant joined");
        Ok(participant)
    }

    #[instrument(skip(self), fields(match_id = %self.id))]
    pub fn leave(&self, user_id: &str) -> Result<Participant, MatchError> {
        let mut inner = self.inner.write();
        if !inner.state.accepts_participants() {
            return Err(MatchError::InvalidTransition { from: inner.state, op: "leave" });
        }
        let Some(pos) = inner.participants.iter().position(|p| p.user_id == user_id) else {
            return Err(MatchError::NotParticipant { user_id: user_id.to_string() });
        };
        info!(user_id, "Participant left");
        Ok(inner.participants.remove(pos))
    }

    fn transition<F>(&self, from: MatchState, to: MatchState, op: &'static str, apply: F) -> Result<(), MatchError>
    where
        F: FnOnce(&mut Inner),
    {
        let mut inner = self.inner.write();
        if inner.state != from {
            return Err(MatchError::InvalidTransition { from: inner.state, op });
        }
        apply(&mut inner);
        inner.state = to;
        inner.emit(MatchEvent::StateChanged { from, to });
        info!(match_id = %self.id, %from, %to, "Match state changed");
        Ok(())
    }

    pub fn transition_to_pre_match(&self) -> Result<(), MatchError> {
        self.transition(MatchState::Lobby, MatchState::PreMatch, "enter pre-match", |inner| {
            inner.times.pre_match_at = Some(Utc::now());
            inner.countdown_started = Some(Instant::now());
        })
    }

    pub fn start(&self) -> Result<(), MatchError> {
        self.transition(MatchState::PreMatch, MatchState::Trading, "start", |inner| {
            inner.times.started_at = Some(Utc::now());
            inner.trading_started = Some(Instant::now());
        })?;
        metrics::counter!("arena_matches_started_total").increment(1);
        Ok(())
    }

    /// Close trading. The mark is refreshed one last time and then frozen.
    pub fn end_trading(&self) -> Result<(), MatchError> {
        if self.state() == MatchState::Trading {
            self.refresh_nav();
        }
        self.transition(MatchState::Trading, MatchState::Settlement, "end trading", |inner| {
            inner.times.ended_at = Some(Utc::now());
            inner.trading_ended = Some(Instant::now());
        })
    }

    /// Value and rank every participant at the frozen mark, then complete.
    pub fn settle(&self, fetcher: &dyn PositionFetcher) -> Result<Vec<Participant>, MatchError> {
        let mut inner = self.inner.write();
        if inner.state != MatchState::Settlement {
            return Err(MatchError::InvalidTransition { from: inner.state, op: "settle" });
        }
        let final_mark = inner.nav;
        let results = settlement::settle(&inner.participants, final_mark, fetcher);
        inner.participants = results.clone();
        inner.state = MatchState::Complete;
        inner.emit(MatchEvent::StateChanged { from: MatchState::Settlement, to: MatchState::Complete });
        inner.emit(MatchEvent::Ended { final_mark, results: results.clone() });
        drop(inner);

        metrics::counter!("arena_matches_completed_total").increment(1);
        info!(match_id = %self.id, final_mark, participants = results.len(), "Match settled");
        Ok(results)
    }

    /// Seconds left on the pre-match countdown; zero outside PreMatch.
    pub fn countdown_remaining(&self) -> Duration {
        let inner = self.inner.read();
        match (inner.state, inner.countdown_started) {
            (MatchState::PreMatch, Some(at)) => {
                Duration::from_secs(self.config.pre_match_secs).saturating_sub(at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    fn duration(&self) -> Duration {
        Duration::from_secs(self.config.duration_secs)
    }

    fn trading_elapsed(&self) -> Option<Duration> {
        self.inner.read().trading_elapsed()
    }

    pub fn remaining_time(&self) -> Duration {
        match self.trading_elapsed() {
            Some(elapsed) => timing::remaining(elapsed, self.duration()),
            None => self.duration(),
        }
    }

    pub fn progress(&self) -> f64 {
        self.trading_elapsed().map_or(0.0, |elapsed| timing::progress(elapsed, self.duration()))
    }

    /// Timestamp of the bar the clock currently maps to; None before trading.
    pub fn market_time(&self) -> Option<NaiveDateTime> {
        let elapsed = self.trading_elapsed()?;
        timing::market_time(&self.day, elapsed, self.duration())
    }

    pub fn is_expired(&self) -> bool {
        self.state() == MatchState::Trading && self.remaining_time().is_zero()
    }

    pub fn current_bar_index(&self) -> Option<usize> {
        let elapsed = self.trading_elapsed()?;
        if self.day.is_empty() {
            return None;
        }
        Some(timing::bar_index(elapsed, self.duration(), self.day.len()))
    }

    pub fn current_bar(&self) -> Option<Bar> {
        self.current_bar_index().and_then(|i| self.day.bar(i).copied())
    }

    /// Bars up to and including the current one. Nothing before trading.
    pub fn revealed_bars(&self) -> Vec<Bar> {
        match self.current_bar_index() {
            Some(i) => self.day.bars[..=i].to_vec(),
            None => Vec::new(),
        }
    }

    fn day_price(&self) -> i64 {
        self.current_bar()
            .map(|b| b.close)
            .or_else(|| self.day.first_open())
            .unwrap_or(self.config.target_mark)
    }

    /// Recompute the mark while trading; otherwise the stored mark stands.
    pub fn refresh_nav(&self) -> i64 {
        if self.state() != MatchState::Trading {
            return self.nav();
        }
        // book lock is released before ours is taken
        let nav = derive_nav(self.book.mid_price(), self.day_price());
        let mut inner = self.inner.write();
        if inner.state == MatchState::Trading {
            inner.nav = nav;
        }
        inner.nav
    }

    pub fn match_state_event(&self) -> BroadcastEvent {
        self.match_state_event_at(self.state())
    }

    /// State snapshot labelled with `state`, for observers that lag behind.
    pub fn match_state_event_at(&self, state: MatchState) -> BroadcastEvent {
        let inner = self.inner.read();
        BroadcastEvent::MatchState {
            match_id: self.id.to_string(),
            state,
            symbol: self.config.symbol.clone(),
            duration_secs: self.config.duration_secs,
            mark: inner.nav,
            participants: inner.participants.clone(),
        }
    }

    pub fn countdown_event(&self) -> BroadcastEvent {
        BroadcastEvent::Countdown {
            match_id: self.id.to_string(),
            seconds_remaining: self.countdown_remaining().as_secs_f64().ceil() as u64,
        }
    }

    pub fn price_tick_event(&self) -> BroadcastEvent {
        BroadcastEvent::PriceTick {
            match_id: self.id.to_string(),
            mark: self.nav(),
            market_time: self.market_time(),
            remaining_secs: self.remaining_time().as_secs(),
            progress: self.progress(),
        }
    }

    pub fn results_event(&self) -> BroadcastEvent {
        let inner = self.inner.read();
        BroadcastEvent::MatchResults {
            match_id: self.id.to_string(),
            final_mark: inner.nav,
            results: inner.participants.clone(),
        }
    }

    /// Persistable summary of this match and its settled participants.
    pub fn record(&self) -> (MatchRecord, Vec<ResultRow>) {
        let inner = self.inner.read();
        let record = MatchRecord {
            match_id: self.id,
            symbol: self.config.symbol.clone(),
            duration_secs: self.config.duration_secs as i64,
            target_mark: self.config.target_mark,
            starting_value: self.config.starting_value,
            day: self.day.date,
            synthetic_day: self.day.synthetic,
            state: inner.state.as_str().to_string(),
            final_mark: inner.nav,
            created_at: inner.times.created_at,
            started_at: inner.times.started_at,
            ended_at: inner.times.ended_at,
        };
        let rows = inner.participants.iter().filter_map(|p| ResultRow::from_participant(self.id, p)).collect();
        (record, rows)
    }
}

impl MarkSource for Match {
    fn mark(&self) -> i64 {
        self.nav()
    }
}
