use std::collections::BTreeMap;
use std::collections::VecDeque;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace, warn};

use crate::engine::types::{
    BookError, BookSnapshot, Cancelled, LevelView, OrderId, OrderRequest, OrderType, Resting, Side,
    Submitted, Trade, MAX_ORDER_QUANTITY, MAX_PRICE,
};

#[derive(Debug, PartialEq, Eq)]
struct Level {
    price: i64,
    queue: VecDeque<Resting>,
    // sum of `remaining` over the queue
    total: u64,
}

impl Level {
    fn new(price: i64) -> Self {
        Level { price, queue: VecDeque::new(), total: 0 }
    }

    fn view(&self) -> LevelView {
        LevelView { price: self.price, quantity: self.total, orders: self.queue.len() }
    }
}

// Taker state while it walks the opposite side
struct Incoming<'a> {
    id: OrderId,
    owner: &'a str,
    side: Side,
    limit: Option<i64>,
    remaining: u64,
}

/// Single-threaded limit order book with price-time priority.
///
/// Bids and asks are both keyed ascending by price; the best bid is the last
/// bid key and the best ask the first ask key. Levels exist only while they
/// hold at least one resting order.
#[derive(Debug)]
pub struct Book {
    bids: BTreeMap<i64, Level>,
    asks: BTreeMap<i64, Level>,
    id_index: AHashMap<OrderId, (Side, i64)>,
    next_order_id: OrderId,
    next_trade_seq: u64,
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

impl Book {
    pub fn new() -> Self {
        debug!("Initialized new order book");
        Book {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            id_index: AHashMap::new(),
            next_order_id: 1,
            next_trade_seq: 1,
        }
    }

    pub fn best_bid(&self) -> Option<(i64, u64)> {
        self.bids.values().next_back().map(|l| (l.price, l.total))
    }

    pub fn best_ask(&self) -> Option<(i64, u64)> {
        self.asks.values().next().map(|l| (l.price, l.total))
    }

    pub fn spread(&self) -> Option<i64> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some(ask - bid)
    }

    /// Truncating mean of best bid and best ask; needs a two-sided market.
    pub fn mid_price(&self) -> Option<i64> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some((bid + ask) / 2)
    }

    /// Number of resting orders on both sides
    pub fn len(&self) -> usize {
        self.id_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_index.is_empty()
    }

    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid(), self.best_ask()), (Some((b, _)), Some((a, _))) if b >= a)
    }

    pub fn order(&self, id: OrderId) -> Option<&Resting> {
        let (side, price) = self.id_index.get(&id)?;
        self.side(*side).get(price)?.queue.iter().find(|r| r.id == id)
    }

    pub fn resting_quantity(&self) -> u64 {
        self.bids.values().chain(self.asks.values()).map(|l| l.total).sum()
    }

    pub fn snapshot(&self) -> BookSnapshot {
        self.depth(usize::MAX)
    }

    /// Snapshot limited to the best `n` levels per side.
    pub fn depth(&self, n: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self.bids.values().rev().take(n).map(Level::view).collect(),
            asks: self.asks.values().take(n).map(Level::view).collect(),
            last_order_id: self.next_order_id - 1,
            last_trade_seq: self.next_trade_seq - 1,
        }
    }

    fn side(&self, side: Side) -> &BTreeMap<i64, Level> {
        match side {
            Side::BUY => &self.bids,
            Side::SELL => &self.asks,
        }
    }

    fn validate(req: &OrderRequest) -> Result<(), BookError> {
        if req.quantity == 0 {
            return Err(BookError::invalid("quantity must be positive"));
        }
        if req.quantity > MAX_ORDER_QUANTITY {
            return Err(BookError::invalid(format!("quantity {} above limit {MAX_ORDER_QUANTITY}", req.quantity)));
        }
        match (req.order_type, req.price) {
            (OrderType::Limit, None) => Err(BookError::invalid("limit order without price")),
            (OrderType::Limit, Some(p)) if p <= 0 => {
                Err(BookError::invalid(format!("limit price must be positive, got {p}")))
            }
            (OrderType::Limit, Some(p)) if p > MAX_PRICE => {
                Err(BookError::invalid(format!("limit price {p} above limit {MAX_PRICE}")))
            }
            (OrderType::Market, Some(_)) => Err(BookError::invalid("market order must not carry a price")),
            _ => Ok(()),
        }
    }

    #[instrument(level = "debug", skip(self, req), fields(owner = %req.owner, side = ?req.side, kind = ?req.order_type))]
    pub fn submit(&mut self, req: &OrderRequest) -> Result<Submitted, BookError> {
        if let Err(e) = Self::validate(req) {
            warn!(error = %e, price = ?req.price, qty = req.quantity, "Rejecting order");
            return Err(e);
        }

        let id = self.next_order_id;
        self.next_order_id += 1;
        let ts = Utc::now();

        let mut taker = Incoming {
            id,
            owner: &req.owner,
            side: req.side,
            limit: req.price,
            remaining: req.quantity,
        };
        let mut trades = Vec::new();
        self.match_incoming(&mut taker, ts, &mut trades);

        let remaining = taker.remaining;
        let (resting, discarded) = match (req.order_type, req.price) {
            (OrderType::Limit, Some(price)) if remaining > 0 => {
                self.add_resting_order(id, req, price, remaining, ts);
                (remaining, 0)
            }
            _ if remaining > 0 => {
                debug!(id, remaining, "Market order remainder discarded");
                (0, remaining)
            }
            _ => (0, 0),
        };

        debug!(id, fills = trades.len(), resting, discarded, "Order processed");
        Ok(Submitted { order_id: id, trades, resting, discarded })
    }

    fn crosses(side: Side, limit: Option<i64>, level_price: i64) -> bool {
        match (side, limit) {
            (_, None) => true,
            (Side::BUY, Some(p)) => p >= level_price,
            (Side::SELL, Some(p)) => p <= level_price,
        }
    }

    fn match_incoming(&mut self, taker: &mut Incoming<'_>, ts: DateTime<Utc>, trades: &mut Vec<Trade>) {
        while taker.remaining > 0 {
            let best = match taker.side {
                Side::BUY => self.asks.keys().next().copied(),
                Side::SELL => self.bids.keys().next_back().copied(),
            };
            let Some(level_price) = best else {
                trace!(id = taker.id, "Opposite side empty");
                break;
            };
            if !Self::crosses(taker.side, taker.limit, level_price) {
                break;
            }

            let levels = match taker.side {
                Side::BUY => &mut self.asks,
                Side::SELL => &mut self.bids,
            };
            let Some(level) = levels.get_mut(&level_price) else { break };

            let mut done = Vec::new();
            Self::fill_against_level(taker, level, &mut self.next_trade_seq, ts, trades, &mut done);
            if level.queue.is_empty() {
                levels.remove(&level_price);
            }
            for id in done {
                self.id_index.remove(&id);
            }
        }
    }

    fn fill_against_level(
        taker: &mut Incoming<'_>,
        level: &mut Level,
        next_trade_seq: &mut u64,
        ts: DateTime<Utc>,
        trades: &mut Vec<Trade>,
        done: &mut Vec<OrderId>,
    ) {
        while taker.remaining > 0 {
            let Some(maker) = level.queue.front_mut() else { break };
            let fill_qty = std::cmp::min(taker.remaining, maker.remaining);
            maker.remaining -= fill_qty;
            taker.remaining -= fill_qty;
            level.total -= fill_qty;

            let seq = *next_trade_seq;
            *next_trade_seq += 1;

            let (buy_order_id, buyer, sell_order_id, seller) = match taker.side {
                Side::BUY => (taker.id, taker.owner.to_string(), maker.id, maker.owner.clone()),
                Side::SELL => (maker.id, maker.owner.clone(), taker.id, taker.owner.to_string()),
            };
            debug!(taker_id = taker.id, maker_id = maker.id, price = level.price, qty = fill_qty, "Fill executed");
            trades.push(Trade {
                seq,
                buy_order_id,
                sell_order_id,
                buyer,
                seller,
                taker_side: taker.side,
                price: level.price,
                quantity: fill_qty,
                ts,
            });

            if maker.remaining == 0 {
                done.push(maker.id);
                level.queue.pop_front();
            }
        }
    }

    fn add_resting_order(&mut self, id: OrderId, req: &OrderRequest, price: i64, remaining: u64, ts: DateTime<Utc>) {
        let resting = Resting {
            id,
            owner: req.owner.clone(),
            side: req.side,
            price,
            quantity: req.quantity,
            remaining,
            ts,
        };
        let level_map = match req.side {
            Side::BUY => &mut self.bids,
            Side::SELL => &mut self.asks,
        };
        let level = level_map.entry(price).or_insert_with(|| Level::new(price));
        level.total += remaining;
        level.queue.push_back(resting);

        self.id_index.insert(id, (req.side, price));
        debug!(id, price, side = ?req.side, remaining, "Added order to book");
    }

    pub fn cancel(&mut self, id: OrderId) -> Result<Cancelled, BookError> {
        let Some((side, price)) = self.id_index.remove(&id) else {
            trace!(id, "Cancel for unknown or resolved order");
            return Err(BookError::NotFound { order_id: id });
        };
        let level_map = match side {
            Side::BUY => &mut self.bids,
            Side::SELL => &mut self.asks,
        };
        let level = level_map.get_mut(&price).ok_or(BookError::NotFound { order_id: id })?;
        let pos = level
            .queue
            .iter()
            .position(|r| r.id == id)
            .ok_or(BookError::NotFound { order_id: id })?;
        let resting = level.queue.remove(pos).ok_or(BookError::NotFound { order_id: id })?;
        level.total -= resting.remaining;
        if level.queue.is_empty() {
            level_map.remove(&price);
        }

        debug!(id, price, remaining = resting.remaining, "Cancelled resting order");
        Ok(Cancelled {
            order_id: id,
            owner: resting.owner,
            side,
            price,
            remaining: resting.remaining,
        })
    }
}
