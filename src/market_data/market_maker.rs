use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::engine::shared::OrderBook;
use crate::engine::types::{BookError, OrderId, OrderRequest, Side};
use crate::lifecycle::{Lifecycle, TaskHandle};
use crate::market_data::inventory::Inventory;
use crate::market_data::price_feed::MarkSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketMakerConfig {
    /// Full quoted spread around the mark, in basis points
    pub spread_bps: u32,
    pub quote_levels: usize,
    pub quote_size: u64,
    /// Stop quoting the side that would grow |position| past this
    pub max_inventory: i64,
    /// Cents between successive quote levels
    pub level_step: i64,
    pub requote_interval_ms: u64,
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            spread_bps: 20,
            quote_levels: 3,
            quote_size: 10,
            max_inventory: 200,
            level_step: 5,
            requote_interval_ms: 1000,
        }
    }
}

/// Liquidity bot quoting both sides of the book around the mark.
///
/// It keeps its own weighted-average-cost inventory from every trade where
/// its account is buyer or seller, and skews quotes against that inventory.
#[derive(Debug)]
pub struct MarketMaker {
    pub account_id: String,
    pub config: MarketMakerConfig,
    book: Arc<OrderBook>,
    active_quotes: Mutex<HashMap<String, OrderId>>, // "bid_level_1" -> order_id
    inventory: Arc<Mutex<Inventory>>,
}

impl MarketMaker {
    pub fn new(account_id: impl Into<String>, book: Arc<OrderBook>, config: MarketMakerConfig) -> Arc<Self> {
        let account_id = account_id.into();
        let inventory = Arc::new(Mutex::new(Inventory::new()));

        let ledger = Arc::clone(&inventory);
        let me = account_id.clone();
        book.on_trade(move |t| {
            if t.buyer == me {
                ledger.lock().apply_fill(Side::BUY, t.quantity, t.price);
            }
            if t.seller == me {
                ledger.lock().apply_fill(Side::SELL, t.quantity, t.price);
            }
        });

        Arc::new(Self { account_id, config, book, active_quotes: Mutex::new(HashMap::new()), inventory })
    }

    pub fn inventory(&self) -> Inventory {
        *self.inventory.lock()
    }

    pub fn quote_ids(&self) -> Vec<OrderId> {
        self.active_quotes.lock().values().copied().collect()
    }

    /// Bid and ask for one level, skewed against current inventory.
    pub fn quote_prices(&self, mark: i64, level: usize) -> (i64, i64) {
        let position = self.inventory.lock().position;
        let half_spread = (mark * self.config.spread_bps as i64 / 20_000).max(1);
        let skew = if self.config.max_inventory > 0 {
            position * half_spread / self.config.max_inventory
        } else {
            0
        };
        let offset = level as i64 * self.config.level_step;
        (mark - half_spread - skew - offset, mark + half_spread - skew + offset)
    }

    pub fn cancel_all(&self) -> usize {
        let quotes = std::mem::take(&mut *self.active_quotes.lock());
        let mut cancelled = 0;
        for (name, id) in quotes {
            match self.book.cancel(id) {
                Ok(_) => cancelled += 1,
                // already filled
                Err(BookError::NotFound { .. }) => trace!(quote = %name, id, "Quote gone before cancel"),
                Err(e) => warn!(quote = %name, id, error = %e, "Cancel failed"),
            }
        }
        cancelled
    }

    /// Cancel all existing quotes and post fresh ones around `mark`.
    pub fn update_quotes(&self, mark: i64) -> Vec<String> {
        let mut actions = Vec::new();
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            actions.push(format!("Cancelled {cancelled} quotes"));
        }
        if mark <= 0 {
            return actions;
        }

        let position = self.inventory.lock().position;
        let quote_bids = position < self.config.max_inventory;
        let quote_asks = position > -self.config.max_inventory;

        let mut posted = HashMap::new();
        for i in 0..self.config.quote_levels {
            let level = i + 1;
            let (bid_price, ask_price) = self.quote_prices(mark, i);
            let sides = [(quote_bids, Side::BUY, bid_price, "bid"), (quote_asks, Side::SELL, ask_price, "ask")];
            for (enabled, side, price, name) in sides {
                if !enabled || price <= 0 {
                    continue;
                }
                let req = OrderRequest::limit(self.account_id.clone(), side, price, self.config.quote_size);
                match self.book.submit(&req) {
                    Ok(res) => {
                        if res.resting > 0 {
                            posted.insert(format!("{name}_level_{level}"), res.order_id);
                        }
                        actions.push(format!("Posted {name} level {level}: {} @ {price}", self.config.quote_size));
                    }
                    Err(e) => warn!(account = %self.account_id, error = %e, "Quote rejected"),
                }
            }
        }
        *self.active_quotes.lock() = posted;
        actions
    }

    pub fn spawn(self: Arc<Self>, mark: Arc<dyn MarkSource>, parent: &Lifecycle) -> TaskHandle {
        let interval = Duration::from_millis(self.config.requote_interval_ms.max(1));
        TaskHandle::spawn("market_maker", parent, move |scope| async move {
            info!(account = %self.account_id, "Market maker started");
            loop {
                let actions = self.update_quotes(mark.mark());
                debug!(account = %self.account_id, actions = actions.len(), "Requoted");
                if !scope.sleep(interval).await {
                    break;
                }
            }
            self.cancel_all();
            info!(account = %self.account_id, status = %self.get_status(), "Market maker stopped");
        })
    }

    pub fn get_status(&self) -> String {
        let inv = self.inventory();
        format!("Inventory: {} @ {} (realized {})", inv.position, inv.avg_price, inv.realized_pnl)
    }
}
