//! Match clock math. Everything here is a pure function of how long the
//! match has been trading and its configured duration.

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::market_data::day::{TradingDay, BARS_PER_DAY};

pub fn remaining(elapsed: Duration, duration: Duration) -> Duration {
    duration.saturating_sub(elapsed)
}

/// Fraction of the match elapsed, in [0, 1].
pub fn progress(elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
}

/// Bar index the wall clock maps to, clamped to the last bar of the session.
pub fn bar_index(elapsed: Duration, duration: Duration, bars: usize) -> usize {
    let bars = if bars == 0 { BARS_PER_DAY } else { bars };
    if duration.is_zero() {
        return bars - 1;
    }
    let idx = (elapsed.as_nanos() * bars as u128 / duration.as_nanos()) as usize;
    idx.min(bars - 1)
}

pub fn market_time(day: &TradingDay, elapsed: Duration, duration: Duration) -> Option<NaiveDateTime> {
    day.bar(bar_index(elapsed, duration, day.len())).map(|b| b.ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::day::generate_synthetic;

    const FIVE_MIN: Duration = Duration::from_secs(300);

    #[test]
    fn test_bar_index_maps_proportionally() {
        assert_eq!(bar_index(Duration::ZERO, FIVE_MIN, 390), 0);
        assert_eq!(bar_index(Duration::from_secs(150), FIVE_MIN, 390), 195);
        assert_eq!(bar_index(Duration::from_secs(299), FIVE_MIN, 390), 388);
        assert_eq!(bar_index(FIVE_MIN, FIVE_MIN, 390), 389);
        assert_eq!(bar_index(Duration::from_secs(900), FIVE_MIN, 390), 389);
    }

    #[test]
    fn test_remaining_and_progress() {
        assert_eq!(remaining(Duration::from_secs(100), FIVE_MIN), Duration::from_secs(200));
        assert_eq!(remaining(Duration::from_secs(400), FIVE_MIN), Duration::ZERO);
        assert_eq!(progress(Duration::from_secs(75), FIVE_MIN), 0.25);
        assert_eq!(progress(Duration::from_secs(600), FIVE_MIN), 1.0);
        assert_eq!(progress(Duration::ZERO, Duration::ZERO), 1.0);
    }

    #[test]
    fn test_market_time_follows_bars() {
        let day = generate_synthetic("SPY", 10_000, 10, Some(3));
        let t = market_time(&day, Duration::from_secs(150), FIVE_MIN).unwrap();
        assert_eq!(t, day.bars[195].ts);
    }
}
