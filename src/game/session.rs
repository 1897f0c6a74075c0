//! A match wired to everything that trades on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::engine::accounts::AccountLedger;
use crate::engine::shared::OrderBook;
use crate::engine::types::{BookError, Cancelled, OrderId, OrderRequest, Submitted};
use crate::game::round::Match;
use crate::game::types::{MatchError, MatchState, Participant};
use crate::lifecycle::{Lifecycle, TaskHandle};
use crate::market_data::market_maker::{MarketMaker, MarketMakerConfig};
use crate::market_data::noise_trader::{NoiseTrader, NoiseTraderConfig};
use crate::market_data::price_feed::{MarkSource, PriceFeed};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Book(#[from] BookError),
}

/// Feed and bots started for the trading phase.
#[derive(Debug, Clone)]
pub struct EcosystemConfig {
    pub feed_interval: Duration,
    pub market_makers: usize,
    pub noise_traders: usize,
    pub market_maker: MarketMakerConfig,
    pub noise_trader: NoiseTraderConfig,
    pub seed: Option<u64>,
}

impl Default for EcosystemConfig {
    fn default() -> Self {
        Self {
            feed_interval: Duration::from_secs(1),
            market_makers: 1,
            noise_traders: 2,
            market_maker: MarketMakerConfig::default(),
            noise_trader: NoiseTraderConfig::default(),
            seed: None,
        }
    }
}

#[derive(Default)]
struct Tasks {
    feed: Option<TaskHandle>,
    bots: Vec<TaskHandle>,
    observers: Vec<TaskHandle>,
}

/// One match with its book, ledger and supporting tasks.
///
/// Every task the session starts lives under its own lifecycle scope, so
/// `shutdown` (or cancelling the parent) stops all of them.
pub struct MatchSession {
    round: Arc<Match>,
    ledger: Arc<AccountLedger>,
    broadcaster: Arc<dyn Broadcaster>,
    ecosystem: EcosystemConfig,
    scope: Lifecycle,
    tasks: Mutex<Tasks>,
    ecosystem_running: AtomicBool,
    finished: watch::Sender<bool>,
}

impl std::fmt::Debug for MatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSession")
            .field("match_id", &self.round.id())
            .field("state", &self.round.state())
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}

impl MatchSession {
    pub fn new(round: Arc<Match>, broadcaster: Arc<dyn Broadcaster>, ecosystem: EcosystemConfig, parent: &Lifecycle) -> Arc<Self> {
        let ledger = Arc::new(AccountLedger::new());
        ledger.attach(round.book());
        let (finished, _) = watch::channel(false);
        Arc::new(Self {
            round,
            ledger,
            broadcaster,
            ecosystem,
            scope: parent.child(),
            tasks: Mutex::new(Tasks::default()),
            ecosystem_running: AtomicBool::new(false),
            finished,
        })
    }

    pub fn round(&self) -> &Arc<Match> {
        &self.round
    }

    pub fn book(&self) -> &Arc<OrderBook> {
        self.round.book()
    }

    pub fn ledger(&self) -> &Arc<AccountLedger> {
        &self.ledger
    }

    pub fn broadcaster(&self) -> &Arc<dyn Broadcaster> {
        &self.broadcaster
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.scope
    }

    pub fn join(&self, user_id: &str, account_id: &str) -> Result<Participant, SessionError> {
        let p = self.round.join(user_id, account_id)?;
        self.ledger.open(&p.account_id, p.starting_cash, p.starting_shares);
        Ok(p)
    }

    pub fn leave(&self, user_id: &str) -> Result<Participant, SessionError> {
        let p = self.round.leave(user_id)?;
        self.ledger.close(&p.account_id);
        Ok(p)
    }

    /// Reserve margin then submit. Only while trading.
    pub fn submit_order(&self, req: &OrderRequest) -> Result<Submitted, SessionError> {
        let state = self.round.state();
        if state != MatchState::Trading {
            return Err(MatchError::InvalidTransition { from: state, op: "submit order" }.into());
        }
        let hold = self.ledger.reserve(req, self.round.nav())?;
        match self.book().submit(req) {
            Ok(res) => {
                self.ledger.settle_hold(hold, Some(&res));
                Ok(res)
            }
            Err(e) => {
                self.ledger.settle_hold(hold, None);
                Err(e.into())
            }
        }
    }

    /// Cancel one of `account_id`'s own resting orders and free its margin.
    pub fn cancel_order(&self, account_id: &str, order_id: OrderId) -> Result<Cancelled, SessionError> {
        match self.book().order(order_id) {
            Some(o) if o.owner == account_id => {
                let cancelled = self.book().cancel(order_id)?;
                self.ledger.release_cancelled(&cancelled);
                Ok(cancelled)
            }
            _ => Err(BookError::NotFound { order_id }.into()),
        }
    }

    /// Keep a task alive until the session shuts down.
    pub async fn track(&self, task: TaskHandle) {
        self.tasks.lock().await.observers.push(task);
    }

    /// Start the price feed, then the bots quoting off the match mark.
    pub async fn start_ecosystem(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.feed.is_some() || self.scope.is_cancelled() {
            return;
        }
        let eco = &self.ecosystem;
        let feed = PriceFeed::new(Arc::clone(&self.round), Arc::clone(&self.broadcaster), eco.feed_interval);
        tasks.feed = Some(feed.spawn(&self.scope));

        let mark: Arc<dyn MarkSource> = self.round.clone();
        for i in 0..eco.market_makers {
            let account = format!("mm-{i}");
            self.ledger.open_unchecked(&account, 0, 0);
            let mm = MarketMaker::new(account, Arc::clone(self.book()), eco.market_maker.clone());
            tasks.bots.push(mm.spawn(Arc::clone(&mark), &self.scope));
        }
        for i in 0..eco.noise_traders {
            let account = format!("noise-{i}");
            self.ledger.open_unchecked(&account, 0, 0);
            let seed = eco.seed.map(|s| s.wrapping_add(i as u64));
            let bot = NoiseTrader::new(account, Arc::clone(self.book()), eco.noise_trader.clone(), seed);
            tasks.bots.push(bot.spawn(Arc::clone(&mark), &self.scope));
        }
        self.ecosystem_running.store(true, Ordering::Release);
        info!(match_id = %self.round.id(), bots = tasks.bots.len(), "Ecosystem started");
    }

    /// Stop bots first, then the feed they quote from. Safe to call twice.
    pub async fn stop_ecosystem(&self) {
        let mut tasks = self.tasks.lock().await;
        let bots = std::mem::take(&mut tasks.bots);
        let stopped = bots.len();
        for mut bot in bots {
            bot.stop().await;
        }
        if let Some(mut feed) = tasks.feed.take() {
            feed.stop().await;
            self.ecosystem_running.store(false, Ordering::Release);
            info!(match_id = %self.round.id(), bots = stopped, "Ecosystem stopped");
        }
    }

    pub fn is_trading_ecosystem_running(&self) -> bool {
        self.ecosystem_running.load(Ordering::Acquire)
    }

    pub fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Resolves once the match has been settled and reported.
    pub async fn finished(&self) {
        let mut rx = self.finished.subscribe();
        // the sender lives in self
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Stop everything this session started.
    pub async fn shutdown(&self) {
        self.stop_ecosystem().await;
        self.scope.cancel();
        let observers = std::mem::take(&mut self.tasks.lock().await.observers);
        for mut task in observers {
            task.stop().await;
        }
        debug!(match_id = %self.round.id(), "Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::NullBroadcaster;
    use crate::engine::types::Side;
    use crate::game::types::MatchConfig;
    use crate::market_data::day::generate_synthetic;

    fn session(eco: EcosystemConfig) -> Arc<MatchSession> {
        let config = MatchConfig::default();
        let day = generate_synthetic("SPY", config.target_mark, 10, Some(5));
        let round = Arc::new(Match::new(config, day, OrderBook::shared()));
        MatchSession::new(round, Arc::new(NullBroadcaster), eco, &Lifecycle::new())
    }

    fn trading(s: &MatchSession) {
        s.round().transition_to_pre_match().unwrap();
        s.round().start().unwrap();
    }

    #[test]
    fn test_join_opens_account() {
        let s = session(EcosystemConfig::default());
        let p = s.join("alice", "acct-alice").unwrap();
        let acct = s.ledger().get("acct-alice").unwrap();
        assert_eq!((acct.cash, acct.shares), (p.starting_cash, p.starting_shares));
        s.leave("alice").unwrap();
        assert!(s.ledger().get("acct-alice").is_none());
    }

    #[test]
    fn test_orders_need_trading_and_margin() {
        let s = session(EcosystemConfig::default());
        let p = s.join("alice", "a").unwrap();
        let buy_all = OrderRequest::limit("a", Side::BUY, 10_000, 100);
        assert!(matches!(s.submit_order(&buy_all), Err(SessionError::Match(MatchError::InvalidTransition { .. }))));

        trading(&s);
        assert!(matches!(s.submit_order(&buy_all), Err(SessionError::Book(BookError::InsufficientMargin { .. }))));
        let too_many = OrderRequest::limit("a", Side::SELL, 10_000, p.starting_shares as u64 + 1);
        assert!(matches!(s.submit_order(&too_many), Err(SessionError::Book(BookError::InsufficientMargin { .. }))));

        let ok = s.submit_order(&OrderRequest::limit("a", Side::SELL, 10_500, 1)).unwrap();
        assert_eq!(ok.resting, 1);
        assert!(matches!(s.cancel_order("someone-else", ok.order_id), Err(SessionError::Book(BookError::NotFound { .. }))));
        s.cancel_order("a", ok.order_id).unwrap();
    }

    #[test]
    fn test_resting_orders_reserve_margin() {
        let s = session(EcosystemConfig::default());
        let p = s.join("alice", "a").unwrap();
        trading(&s);

        let all_in = OrderRequest::limit("a", Side::BUY, 9_000, (p.starting_cash / 9_000) as u64);
        let first = s.submit_order(&all_in).unwrap();
        for _ in 0..4 {
            assert!(matches!(s.submit_order(&all_in), Err(SessionError::Book(BookError::InsufficientMargin { .. }))));
        }
        let sell_all = OrderRequest::limit("a", Side::SELL, 11_000, p.starting_shares as u64);
        s.submit_order(&sell_all).unwrap();
        assert!(s.submit_order(&OrderRequest::limit("a", Side::SELL, 11_000, 1)).is_err());

        s.cancel_order("a", first.order_id).unwrap();
        assert_eq!(s.ledger().get("a").unwrap().available_cash(), p.starting_cash);
        s.submit_order(&all_in).unwrap();

        // a bot dumps into the bids: alice can only buy what she reserved for
        s.ledger().open_unchecked("bot", 0, 1_000);
        s.book().submit(&OrderRequest::market("bot", Side::SELL, 1_000)).unwrap();
        let acct = s.ledger().get("a").unwrap();
        assert!(acct.cash >= 0);
        assert_eq!(acct.shares, p.starting_shares + all_in.quantity as i64);
        assert_eq!(acct.reserved_cash, 0);
    }

    #[test]
    fn test_oversized_orders_rejected_before_book() {
        let s = session(EcosystemConfig::default());
        s.join("alice", "a").unwrap();
        trading(&s);
        let huge_sell = OrderRequest::limit("a", Side::SELL, 20_000, (1 << 63) + 5);
        assert!(matches!(s.submit_order(&huge_sell), Err(SessionError::Book(BookError::InsufficientMargin { .. }))));
        let huge_buy = OrderRequest::market("a", Side::BUY, u64::MAX / 2);
        assert!(matches!(s.submit_order(&huge_buy), Err(SessionError::Book(BookError::InsufficientMargin { .. }))));
        assert!(s.book().is_empty());
        let acct = s.ledger().get("a").unwrap();
        assert_eq!((acct.reserved_cash, acct.reserved_shares), (0, 0));
    }

    #[test]
    fn test_trades_reach_ledger() {
        let s = session(EcosystemConfig::default());
        s.join("alice", "a").unwrap();
        s.join("bob", "b").unwrap();
        trading(&s);
        let before_a = s.ledger().get("a").unwrap();
        let before_b = s.ledger().get("b").unwrap();
        s.submit_order(&OrderRequest::limit("a", Side::SELL, 10_000, 1)).unwrap();
        s.submit_order(&OrderRequest::limit("b", Side::BUY, 10_000, 1)).unwrap();
        let a = s.ledger().get("a").unwrap();
        let b = s.ledger().get("b").unwrap();
        assert_eq!((a.cash - before_a.cash, a.shares - before_a.shares), (10_000, -1));
        assert_eq!((b.cash - before_b.cash, b.shares - before_b.shares), (-10_000, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ecosystem_start_stop() {
        let eco = EcosystemConfig { feed_interval: Duration::from_millis(100), seed: Some(7), ..Default::default() };
        let s = session(eco);
        trading(&s);
        {
            let _busy = s.tasks.lock().await;
            assert!(!s.is_trading_ecosystem_running());
        }
        s.start_ecosystem().await;
        s.start_ecosystem().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(s.is_trading_ecosystem_running());
        {
            let _busy = s.tasks.lock().await;
            assert!(s.is_trading_ecosystem_running());
        }
        assert!(!s.book().is_empty());

        s.stop_ecosystem().await;
        s.stop_ecosystem().await;
        assert!(!s.is_trading_ecosystem_running());
        // bots pull their quotes on the way out
        assert!(s.book().is_empty());

        s.shutdown().await;
        assert!(s.lifecycle().is_cancelled());
        s.start_ecosystem().await;
        assert!(!s.is_trading_ecosystem_running());
    }
}
