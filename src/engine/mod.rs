// Matching engine entrypoint
pub mod types;      // orders, trades, snapshots, errors
pub mod book;       // single-threaded price-time matching
pub mod shared;     // locked book + trade observers
pub mod accounts;   // per-account cash/shares ledger and margin check

pub use book::Book;
pub use shared::OrderBook;
pub use types::*;
