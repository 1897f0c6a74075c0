use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::game::round::Match;
use crate::lifecycle::{Lifecycle, TaskHandle};

/// Anything that can report the current mark in cents.
pub trait MarkSource: Send + Sync {
    fn mark(&self) -> i64;
}

/// Book mid when the book is two-sided, otherwise the replayed day's price.
pub fn derive_nav(book_mid: Option<i64>, day_price: i64) -> i64 {
    match book_mid {
        Some(mid) if mid > 0 => mid,
        _ => day_price,
    }
}

/// Periodically refreshes a match's NAV and pushes a `price_tick`.
pub struct PriceFeed {
    round: Arc<Match>,
    broadcaster: Arc<dyn Broadcaster>,
    interval: Duration,
}

impl PriceFeed {
    pub fn new(round: Arc<Match>, broadcaster: Arc<dyn Broadcaster>, interval: Duration) -> Self {
        Self { round, broadcaster, interval }
    }

    /// One refresh + broadcast; returns the new mark.
    pub fn tick(&self) -> i64 {
        let mark = self.round.refresh_nav();
        metrics::gauge!("arena_nav_cents").set(mark as f64);
        self.broadcaster.notify(self.round.price_tick_event());
        mark
    }

    pub fn spawn(self, parent: &Lifecycle) -> TaskHandle {
        TaskHandle::spawn("price_feed", parent, move |scope| async move {
            info!(match_id = %self.round.id(), interval_ms = self.interval.as_millis() as u64, "Price feed started");
            loop {
                let mark = self.tick();
                debug!(match_id = %self.round.id(), mark, "Price tick");
                if !scope.sleep(self.interval).await {
                    break;
                }
            }
            info!(match_id = %self.round.id(), "Price feed stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_nav_prefers_mid() {
        assert_eq!(derive_nav(Some(10_050), 9_900), 10_050);
        assert_eq!(derive_nav(None, 9_900), 9_900);
        assert_eq!(derive_nav(Some(0), 9_900), 9_900);
    }
}
