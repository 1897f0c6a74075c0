// Market data module entrypoint
pub mod day;            // bars, trading days, synthetic generator
pub mod provider;       // historical day sources (CSV on disk)
pub mod normaliser;     // converts dollar strings -> cents
pub mod price_feed;     // NAV derivation and price ticks
pub mod inventory;      // weighted-average-cost position ledger
pub mod market_maker;   // market-making logic with quote management
pub mod noise_trader;   // random order flow
