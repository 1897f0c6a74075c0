// Match lifecycle entrypoint
pub mod types;       // states, config, participants, errors
pub mod timing;      // pure clock math
pub mod settlement;  // final valuation and ranking
pub mod round;       // the match state machine
pub mod session;     // a match wired to its book, ledger and bots
pub mod scheduler;   // match rotation

pub use round::Match;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError};
pub use session::{EcosystemConfig, MatchSession, SessionError};
pub use types::*;
