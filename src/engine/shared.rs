use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

use crate::engine::book::Book;
use crate::engine::types::{BookError, BookSnapshot, Cancelled, OrderId, OrderRequest, Resting, Submitted, Trade};

pub type TradeObserver = Box<dyn Fn(&Trade) + Send + Sync>;

/// Thread-safe order book for one match.
///
/// Every operation takes the same exclusive lock, so submissions are
/// sequenced in a single total order and no caller ever sees a level
/// mid-mutation. Trade observers run while that lock is held, in matching
/// order; an observer must never call back into the same book.
pub struct OrderBook {
    book: Mutex<Book>,
    observers: RwLock<Vec<TradeObserver>>,
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook").field("resting", &self.len()).finish()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self { book: Mutex::new(Book::new()), observers: RwLock::new(Vec::new()) }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a callback invoked synchronously for every trade.
    pub fn on_trade<F>(&self, f: F)
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.observers.write().push(Box::new(f));
    }

    /// Trade stream backed by the observer list. Ends when the book is dropped.
    pub fn subscribe_trades(&self) -> mpsc::UnboundedReceiver<Trade> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_trade(move |t| {
            // receiver gone is fine, the subscriber just stopped listening
            let _ = tx.send(t.clone());
        });
        rx
    }

    pub fn submit(&self, req: &OrderRequest) -> Result<Submitted, BookError> {
        let mut book = self.book.lock();
        let res = match book.submit(req) {
            Ok(res) => res,
            Err(e) => {
                metrics::counter!("arena_orders_rejected_total").increment(1);
                return Err(e);
            }
        };
        metrics::counter!("arena_orders_accepted_total").increment(1);

        if !res.trades.is_empty() {
            metrics::counter!("arena_trades_total").increment(res.trades.len() as u64);
            let observers = self.observers.read();
            for trade in &res.trades {
                for notify in observers.iter() {
                    notify(trade);
                }
            }
        }
        drop(book);
        Ok(res)
    }

    pub fn cancel(&self, id: OrderId) -> Result<Cancelled, BookError> {
        let res = self.book.lock().cancel(id);
        if let Err(BookError::NotFound { .. }) = &res {
            trace!(id, "Cancel raced a fill or a previous cancel");
        }
        res
    }

    pub fn snapshot(&self) -> BookSnapshot {
        self.book.lock().snapshot()
    }

    pub fn depth(&self, n: usize) -> BookSnapshot {
        self.book.lock().depth(n)
    }

    pub fn best_bid(&self) -> Option<(i64, u64)> {
        self.book.lock().best_bid()
    }

    pub fn best_ask(&self) -> Option<(i64, u64)> {
        self.book.lock().best_ask()
    }

    pub fn mid_price(&self) -> Option<i64> {
        self.book.lock().mid_price()
    }

    pub fn spread(&self) -> Option<i64> {
        self.book.lock().spread()
    }

    pub fn order(&self, id: OrderId) -> Option<Resting> {
        self.book.lock().order(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.book.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.book.lock().is_empty()
    }
}
