use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// One regular session of one-minute bars, 09:30 to 15:59.
pub const BARS_PER_DAY: usize = 390;

// One-minute OHLCV bar, prices in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: NaiveDateTime,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingDay {
    pub symbol: String,
    pub date: NaiveDate,
    pub bars: Vec<Bar>,
    pub synthetic: bool,
}

impl TradingDay {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bar(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index.min(self.bars.len().saturating_sub(1)))
    }

    /// Close of the bar at `index`, clamped to the last bar.
    pub fn price_at(&self, index: usize) -> Option<i64> {
        self.bar(index).map(|b| b.close)
    }

    pub fn first_open(&self) -> Option<i64> {
        self.bars.first().map(|b| b.open)
    }
}

pub fn session_open(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default())
}

// most recent weekday strictly before today
fn last_weekday() -> NaiveDate {
    let mut date = Utc::now().date_naive() - Duration::days(1);
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date -= Duration::days(1);
    }
    date
}

/// Rescale every price so the first bar opens at `target_mark`.
pub fn normalize(day: &TradingDay, target_mark: i64) -> TradingDay {
    let Some(first) = day.first_open().filter(|p| *p > 0) else {
        return day.clone();
    };
    let scale = |p: i64| ((p as i128 * target_mark as i128) / first as i128) as i64;
    TradingDay {
        bars: day
            .bars
            .iter()
            .map(|b| Bar {
                ts: b.ts,
                open: scale(b.open),
                high: scale(b.high),
                low: scale(b.low),
                close: scale(b.close),
                volume: b.volume,
            })
            .collect(),
        ..day.clone()
    }
}

/// Random-walk session used when no historical day is available.
///
/// Each bar moves at most `volatility_bps` from its open and the close stays
/// within half to one and a half times `start_mark`.
pub fn generate_synthetic(symbol: &str, start_mark: i64, volatility_bps: u32, seed: Option<u64>) -> TradingDay {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let date = last_weekday();
    let open_ts = session_open(date);
    let start_mark = start_mark.max(1);
    let floor = (start_mark / 2).max(1);
    let ceiling = start_mark + start_mark / 2;
    let vol = volatility_bps.max(1) as i64;

    let mut bars = Vec::with_capacity(BARS_PER_DAY);
    let mut prev_close = start_mark;
    for i in 0..BARS_PER_DAY {
        let open = prev_close;
        let move_bps = rng.gen_range(-vol..=vol);
        let close = (open + open * move_bps / 10_000).clamp(floor, ceiling);
        let wick = |rng: &mut StdRng| open * rng.gen_range(0..=vol / 2) / 10_000;
        let high = open.max(close) + wick(&mut rng);
        let low = (open.min(close) - wick(&mut rng)).max(1);
        bars.push(Bar {
            ts: open_ts + Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume: rng.gen_range(1_000..50_000),
        });
        prev_close = close;
    }

    TradingDay { symbol: symbol.to_string(), date, bars, synthetic: true }
}
