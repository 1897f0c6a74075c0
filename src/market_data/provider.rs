use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::debug;

use crate::market_data::day::{self, Bar, TradingDay, BARS_PER_DAY};
use crate::market_data::normaliser::dollars_to_cents;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("historical data provider unavailable")]
    Unavailable,
    #[error("no historical data for {symbol}")]
    NoData { symbol: String },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed bar data: {0}")]
    Parse(String),
}

/// Source of replayable trading days.
#[async_trait]
pub trait HistoricalProvider: Send + Sync {
    async fn get_random_day(&self, symbol: &str, years_back: u32) -> Result<TradingDay, ProviderError>;

    fn normalize(&self, day: &TradingDay, target_mark: i64) -> TradingDay {
        day::normalize(day, target_mark)
    }
}

#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: u64,
}

/// Reads minute bars from `<dir>/<SYMBOL>/<YYYY-MM-DD>.csv`.
#[derive(Debug, Clone)]
pub struct CsvDayProvider {
    dir: PathBuf,
}

impl CsvDayProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn candidate_days(&self, symbol: &str, years_back: u32) -> Result<Vec<(NaiveDate, PathBuf)>, ProviderError> {
        let symbol_dir = self.dir.join(symbol.to_uppercase());
        let cutoff = Utc::now().date_naive() - Duration::days(365 * years_back.max(1) as i64);
        let mut entries = tokio::fs::read_dir(&symbol_dir).await?;
        let mut days = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(date) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if date >= cutoff {
                days.push((date, path));
            }
        }
        Ok(days)
    }

    fn parse_day(symbol: &str, date: NaiveDate, content: &str) -> Result<TradingDay, ProviderError> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::with_capacity(BARS_PER_DAY);
        for row in reader.deserialize::<CsvBar>() {
            let row = row?;
            let price = |s: &str| dollars_to_cents(s).ok_or_else(|| ProviderError::Parse(format!("bad price {s:?}")));
            bars.push(Bar {
                ts: parse_timestamp(&row.timestamp)?,
                open: price(&row.open)?,
                high: price(&row.high)?,
                low: price(&row.low)?,
                close: price(&row.close)?,
                volume: row.volume,
            });
        }
        if bars.len() != BARS_PER_DAY {
            return Err(ProviderError::Parse(format!("expected {BARS_PER_DAY} bars, found {}", bars.len())));
        }
        bars.sort_by_key(|b| b.ts);
        Ok(TradingDay { symbol: symbol.to_uppercase(), date, bars, synthetic: false })
    }

    pub async fn load_day(&self, symbol: &str, date: NaiveDate, path: &Path) -> Result<TradingDay, ProviderError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_day(symbol, date, &content)
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, ProviderError> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
        .ok_or_else(|| ProviderError::Parse(format!("bad timestamp {s:?}")))
}

#[async_trait]
impl HistoricalProvider for CsvDayProvider {
    async fn get_random_day(&self, symbol: &str, years_back: u32) -> Result<TradingDay, ProviderError> {
        let days = self.candidate_days(symbol, years_back).await?;
        let Some((date, path)) = days.choose(&mut rand::thread_rng()).cloned() else {
            return Err(ProviderError::NoData { symbol: symbol.to_string() });
        };
        debug!(%symbol, %date, path = %path.display(), "Loading historical day");
        self.load_day(symbol, date, &path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn write_day(dir: &Path, date: NaiveDate, bars: usize) {
        let mut out = String::from("timestamp,open,high,low,close,volume\n");
        let open = day::session_open(date);
        for i in 0..bars {
            let ts = open + Duration::minutes(i as i64);
            out.push_str(&format!("{},450.10,450.50,449.90,450.2{},1000\n", ts.format("%Y-%m-%d %H:%M:%S"), i % 10));
        }
        std::fs::write(dir.join(format!("{}.csv", date.format("%Y-%m-%d"))), out).unwrap();
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lobx-arena-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("SPY")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_csv_provider_loads_day() {
        let dir = temp_dir();
        let date = Utc::now().date_naive() - Duration::days(30);
        write_day(&dir.join("SPY"), date, BARS_PER_DAY);

        let provider = CsvDayProvider::new(&dir);
        let day = provider.get_random_day("spy", 1).await.unwrap();
        assert_eq!(day.date, date);
        assert_eq!(day.len(), BARS_PER_DAY);
        assert!(!day.synthetic);
        assert_eq!(day.bars[0].open, 45_010);
        assert_eq!(day.bars[3].close, 45_023);

        let normalized = provider.normalize(&day, 10_000);
        assert_eq!(normalized.first_open(), Some(10_000));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_csv_provider_errors() {
        let dir = temp_dir();
        let provider = CsvDayProvider::new(&dir);
        assert!(matches!(provider.get_random_day("SPY", 1).await, Err(ProviderError::NoData { .. })));
        assert!(matches!(provider.get_random_day("QQQ", 1).await, Err(ProviderError::Io(_))));

        let old = NaiveDate::from_ymd_opt(Utc::now().year() - 10, 3, 2).unwrap();
        write_day(&dir.join("SPY"), old, BARS_PER_DAY);
        assert!(matches!(provider.get_random_day("SPY", 2).await, Err(ProviderError::NoData { .. })));

        let short = Utc::now().date_naive() - Duration::days(3);
        write_day(&dir.join("SPY"), short, 12);
        assert!(matches!(provider.get_random_day("SPY", 2).await, Err(ProviderError::Parse(_))));
        std::fs::remove_dir_all(dir).ok();
    }
}
