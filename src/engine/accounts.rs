//! Cash/share ledger for every account trading on one match's book.
//!
//! This is the order-execution side the match core talks to: it applies each
//! trade to both counterparties, pre-checks orders for margin before they
//! reach the book, and answers the settlement-time position fetch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::shared::OrderBook;
use crate::engine::types::{notional, BookError, Cancelled, OrderRequest, Side, Submitted, Trade};
use crate::game::settlement::{FinalPosition, PositionFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Account {
    pub cash: i64,
    pub shares: i64,
    /// Committed to this account's resting buys
    pub reserved_cash: i64,
    /// Committed to this account's resting sells
    pub reserved_shares: i64,
    /// Bots skip the margin check
    pub checked: bool,
}

impl Account {
    pub fn available_cash(&self) -> i64 {
        self.cash - self.reserved_cash.max(0)
    }

    pub fn available_shares(&self) -> i64 {
        self.shares - self.reserved_shares.max(0)
    }

    fn required(&self, owner: &str, req: &OrderRequest, mark: i64) -> Result<i64, BookError> {
        let (required, available) = match req.side {
            Side::BUY => (notional(req.price.unwrap_or(mark), req.quantity), self.available_cash()),
            Side::SELL => (i64::try_from(req.quantity).ok(), self.available_shares()),
        };
        match required {
            Some(required) if required <= available => Ok(required),
            required => {
                let required = required.unwrap_or(i64::MAX);
                warn!(account = owner, required, available, side = ?req.side, "Insufficient margin");
                Err(BookError::InsufficientMargin { account: owner.to_string(), required, available })
            }
        }
    }
}

/// Margin set aside for one order while it is being placed. Hand it back
/// to [`AccountLedger::settle_hold`] with the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Hold {
    account: String,
    side: Side,
    limit: Option<i64>,
    amount: i64,
    tracked: bool,
}

#[derive(Debug, Default)]
pub struct AccountLedger {
    accounts: RwLock<HashMap<String, Account>>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every future trade on `book` to this ledger.
    pub fn attach(self: &Arc<Self>, book: &OrderBook) {
        let ledger = Arc::clone(self);
        book.on_trade(move |t| ledger.apply_trade(t));
    }

    pub fn open(&self, account_id: &str, cash: i64, shares: i64) {
        self.insert(account_id, Account { cash, shares, checked: true, ..Account::default() });
    }

    pub fn open_unchecked(&self, account_id: &str, cash: i64, shares: i64) {
        self.insert(account_id, Account { cash, shares, checked: false, ..Account::default() });
    }

    fn insert(&self, account_id: &str, account: Account) {
        debug!(account_id, cash = account.cash, shares = account.shares, "Opened account");
        self.accounts.write().insert(account_id.to_string(), account);
    }

    pub fn close(&self, account_id: &str) -> Option<Account> {
        self.accounts.write().remove(account_id)
    }

    pub fn get(&self, account_id: &str) -> Option<Account> {
        self.accounts.read().get(account_id).copied()
    }

    /// Move cash and shares between the counterparties. Fills also use up
    /// whatever was reserved for the orders involved.
    pub fn apply_trade(&self, trade: &Trade) {
        let notional = trade.notional();
        let qty = trade.quantity as i64;
        let mut accounts = self.accounts.write();
        if let Some(buyer) = accounts.get_mut(&trade.buyer) {
            buyer.cash -= notional;
            buyer.shares += qty;
            if buyer.checked {
                buyer.reserved_cash -= notional;
            }
        }
        if let Some(seller) = accounts.get_mut(&trade.seller) {
            seller.cash += notional;
            seller.shares -= qty;
            if seller.checked {
                seller.reserved_shares -= qty;
            }
        }
    }

    /// Reject an order the account cannot cover. Market buys are valued at
    /// `mark`. Margin already reserved for resting orders is not available.
    pub fn check_order(&self, req: &OrderRequest, mark: i64) -> Result<(), BookError> {
        let accounts = self.accounts.read();
        let Some(account) = accounts.get(&req.owner) else {
            return Err(BookError::invalid(format!("unknown account {}", req.owner)));
        };
        if account.checked {
            account.required(&req.owner, req, mark)?;
        }
        Ok(())
    }

    /// Check an order and reserve what it needs in one step.
    pub fn reserve(&self, req: &OrderRequest, mark: i64) -> Result<Hold, BookError> {
        let mut accounts = self.accounts.write();
        let Some(account) = accounts.get_mut(&req.owner) else {
            return Err(BookError::invalid(format!("unknown account {}", req.owner)));
        };
        let mut hold = Hold { account: req.owner.clone(), side: req.side, limit: req.price, amount: 0, tracked: false };
        if !account.checked {
            return Ok(hold);
        }
        hold.amount = account.required(&req.owner, req, mark)?;
        hold.tracked = true;
        match req.side {
            Side::BUY => account.reserved_cash += hold.amount,
            Side::SELL => account.reserved_shares += hold.amount,
        }
        Ok(hold)
    }

    /// Keep only what the resting remainder needs. `None` means the book
    /// rejected the order and the whole hold goes back.
    pub fn settle_hold(&self, hold: Hold, outcome: Option<&Submitted>) {
        if !hold.tracked {
            return;
        }
        // fills during submit were already taken off the reservation
        let (used, still_needed) = match (outcome, hold.side) {
            (None, _) => (0, 0),
            (Some(s), Side::BUY) => (
                s.trades.iter().map(Trade::notional).sum::<i64>(),
                hold.limit.and_then(|p| notional(p, s.resting)).unwrap_or(0),
            ),
            (Some(s), Side::SELL) => (s.filled() as i64, s.resting as i64),
        };
        let release = hold.amount - used - still_needed;
        if let Some(account) = self.accounts.write().get_mut(&hold.account) {
            match hold.side {
                Side::BUY => account.reserved_cash -= release,
                Side::SELL => account.reserved_shares -= release,
            }
        }
    }

    /// Give back the margin held by a cancelled order.
    pub fn release_cancelled(&self, cancelled: &Cancelled) {
        let mut accounts = self.accounts.write();
        let Some(account) = accounts.get_mut(&cancelled.owner) else {
            return;
        };
        if !account.checked {
            return;
        }
        match cancelled.side {
            Side::BUY => account.reserved_cash -= notional(cancelled.price, cancelled.remaining).unwrap_or(0),
            Side::SELL => account.reserved_shares -= cancelled.remaining as i64,
        }
    }
}

impl PositionFetcher for AccountLedger {
    fn final_position(&self, account_id: &str) -> Option<FinalPosition> {
        self.get(account_id).map(|a| FinalPosition { cash: a.cash, shares: a.shares })
    }
}
