use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    BUY,
    SELL
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market
}

/// Largest quantity one order may carry. Keeps level totals and notionals
/// well inside integer range.
pub const MAX_ORDER_QUANTITY: u64 = 1_000_000_000;
/// Largest limit price, in cents
pub const MAX_PRICE: i64 = 1_000_000_000;

/// `price * quantity` in cents, `None` on overflow.
pub fn notional(price: i64, quantity: u64) -> Option<i64> {
    i64::try_from(quantity).ok()?.checked_mul(price)
}

// Order as submitted by a participant or bot. The book assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub owner: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price in cents, `None` for market orders
    pub price: Option<i64>,
    pub quantity: u64,
}

impl OrderRequest {
    pub fn limit(owner: impl Into<String>, side: Side, price: i64, quantity: u64) -> Self {
        Self { owner: owner.into(), side, order_type: OrderType::Limit, price: Some(price), quantity }
    }

    pub fn market(owner: impl Into<String>, side: Side, quantity: u64) -> Self {
        Self { owner: owner.into(), side, order_type: OrderType::Market, price: None, quantity }
    }
}

// Resting order in the book (mutable remaining). `id` doubles as the
// submission sequence number used for time priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resting {
    pub id: OrderId,
    pub owner: String,
    pub side: Side,
    pub price: i64,
    pub quantity: u64,
    pub remaining: u64,
    pub ts: DateTime<Utc>,
}

// Fill (execution) record, immutable once produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub seq: u64,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer: String,
    pub seller: String,
    pub taker_side: Side,
    /// Always the maker's resting price
    pub price: i64,
    pub quantity: u64,
    pub ts: DateTime<Utc>,
}

impl Trade {
    pub fn maker_order_id(&self) -> OrderId {
        match self.taker_side {
            Side::BUY => self.sell_order_id,
            Side::SELL => self.buy_order_id,
        }
    }

    pub fn taker_order_id(&self) -> OrderId {
        match self.taker_side {
            Side::BUY => self.buy_order_id,
            Side::SELL => self.sell_order_id,
        }
    }

    pub fn notional(&self) -> i64 {
        // both factors were bounded when the orders were accepted
        notional(self.price, self.quantity).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub order_id: OrderId,
    pub trades: Vec<Trade>,
    /// Quantity left resting on the book (limit orders only)
    pub resting: u64,
    /// Unmatched remainder of a market order, dropped
    pub discarded: u64,
}

impl Submitted {
    pub fn filled(&self) -> u64 {
        self.trades.iter().map(|t| t.quantity).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancelled {
    pub order_id: OrderId,
    pub owner: String,
    pub side: Side,
    pub price: i64,
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelView {
    pub price: i64,
    pub quantity: u64,
    pub orders: usize,
}

/// Point-in-time view of both sides, best level first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<LevelView>,
    pub asks: Vec<LevelView>,
    pub last_order_id: OrderId,
    pub last_trade_seq: u64,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<LevelView> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<LevelView> {
        self.asks.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },
    #[error("order {order_id} not found")]
    NotFound { order_id: OrderId },
    #[error("insufficient margin for {account}: required {required}, available {available}")]
    InsufficientMargin { account: String, required: i64, available: i64 },
}

impl BookError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        BookError::InvalidOrder { reason: reason.into() }
    }
}
