//! Random order flow so the book actually trades during a round.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::shared::OrderBook;
use crate::engine::types::{OrderId, OrderRequest, Side, Submitted};
use crate::lifecycle::{Lifecycle, TaskHandle};
use crate::market_data::price_feed::MarkSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseTraderConfig {
    pub interval_ms: u64,
    pub max_size: u64,
    /// Probability of a market order instead of a limit
    pub market_ratio: f64,
    /// Maximum distance of limit orders from the mark, in bps
    pub max_distance_bps: u32,
    /// Older resting orders beyond this many get cancelled
    pub max_resting: usize,
}

impl Default for NoiseTraderConfig {
    fn default() -> Self {
        Self { interval_ms: 700, max_size: 5, market_ratio: 0.3, max_distance_bps: 30, max_resting: 4 }
    }
}

pub struct NoiseTrader {
    pub account_id: String,
    pub config: NoiseTraderConfig,
    book: Arc<OrderBook>,
    resting: Mutex<VecDeque<OrderId>>,
    rng: Mutex<StdRng>,
}

impl NoiseTrader {
    pub fn new(account_id: impl Into<String>, book: Arc<OrderBook>, config: NoiseTraderConfig, seed: Option<u64>) -> Arc<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Arc::new(Self {
            account_id: account_id.into(),
            config,
            book,
            resting: Mutex::new(VecDeque::new()),
            rng: Mutex::new(rng),
        })
    }

    /// Draw one random order around `mark`.
    pub fn generate_order(&self, mark: i64) -> Option<OrderRequest> {
        if mark <= 0 {
            return None;
        }
        let mut rng = self.rng.lock();
        let side = if rng.gen_bool(0.5) { Side::BUY } else { Side::SELL };
        let size = rng.gen_range(1..=self.config.max_size.max(1));
        if rng.gen_bool(self.config.market_ratio.clamp(0.0, 1.0)) {
            return Some(OrderRequest::market(self.account_id.clone(), side, size));
        }
        let distance = mark * rng.gen_range(0..=self.config.max_distance_bps as i64) / 10_000;
        // lean passive half the time, aggressive otherwise
        let passive = rng.gen_bool(0.5);
        let price = match (side, passive) {
            (Side::BUY, true) | (Side::SELL, false) => mark - distance,
            (Side::BUY, false) | (Side::SELL, true) => mark + distance,
        };
        Some(OrderRequest::limit(self.account_id.clone(), side, price.max(1), size))
    }

    pub fn step(&self, mark: i64) -> Option<Submitted> {
        let req = self.generate_order(mark)?;
        let res = match self.book.submit(&req) {
            Ok(res) => res,
            Err(e) => {
                warn!(account = %self.account_id, error = %e, "Noise order rejected");
                return None;
            }
        };

        let stale: Vec<OrderId> = {
            let mut resting = self.resting.lock();
            if res.resting > 0 {
                resting.push_back(res.order_id);
            }
            let excess = resting.len().saturating_sub(self.config.max_resting);
            resting.drain(..excess).collect()
        };
        for id in stale {
            // may already be filled
            let _ = self.book.cancel(id);
        }
        Some(res)
    }

    pub fn cancel_all(&self) {
        let ids: Vec<OrderId> = self.resting.lock().drain(..).collect();
        for id in ids {
            let _ = self.book.cancel(id);
        }
    }

    pub fn spawn(self: Arc<Self>, mark: Arc<dyn MarkSource>, parent: &Lifecycle) -> TaskHandle {
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        TaskHandle::spawn("noise_trader", parent, move |scope| async move {
            info!(account = %self.account_id, "Noise trader started");
            while scope.sleep(interval).await {
                if let Some(res) = self.step(mark.mark()) {
                    debug!(account = %self.account_id, order_id = res.order_id, fills = res.trades.len(), "Noise order");
                }
            }
            self.cancel_all();
            info!(account = %self.account_id, "Noise trader stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::OrderType;

    #[test]
    fn test_generated_orders_stay_near_mark() {
        let book = OrderBook::shared();
        let config = NoiseTraderConfig { market_ratio: 0.0, max_distance_bps: 50, ..Default::default() };
        let bot = NoiseTrader::new("noise", book, config, Some(9));
        for _ in 0..200 {
            let req = bot.generate_order(10_000).unwrap();
            assert_eq!(req.order_type, OrderType::Limit);
            let price = req.price.unwrap();
            assert!((9_950..=10_050).contains(&price));
            assert!((1..=5).contains(&req.quantity));
        }
        assert!(bot.generate_order(0).is_none());
    }

    #[test]
    fn test_resting_orders_are_capped() {
        let book = OrderBook::shared();
        let config = NoiseTraderConfig { market_ratio: 0.0, max_resting: 2, ..Default::default() };
        let bot = NoiseTrader::new("noise", Arc::clone(&book), config, Some(1));
        for _ in 0..50 {
            bot.step(10_000);
        }
        assert!(book.len() <= 2);
        bot.cancel_all();
        assert!(book.is_empty());
    }
}
