//! Runtime settings.
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! environment variables such as `ARENA__MATCH__DURATION_SECS=120`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::game::scheduler::SchedulerConfig;
use crate::game::session::EcosystemConfig;
use crate::game::types::MatchConfig;
use crate::market_data::market_maker::MarketMakerConfig;
use crate::market_data::noise_trader::NoiseTraderConfig;

pub const DEFAULT_CONFIG_FILE: &str = "arena.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    pub symbol: String,
    pub duration_secs: u64,
    pub target_mark_cents: i64,
    pub pre_match_secs: u64,
    pub starting_value_cents: i64,
    pub lobby_secs: u64,
    pub intermission_secs: u64,
    pub years_back: u32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            duration_secs: 300,
            target_mark_cents: 10_000,
            pre_match_secs: 10,
            starting_value_cents: 100_000,
            lobby_secs: 30,
            intermission_secs: 15,
            years_back: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub tick_interval_ms: u64,
    pub synthetic_volatility_bps: u32,
    pub synthetic_seed: Option<u64>,
    /// Directory of `<SYMBOL>/<date>.csv` minute bars
    pub data_dir: Option<PathBuf>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self { tick_interval_ms: 1000, synthetic_volatility_bps: 15, synthetic_seed: None, data_dir: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub market_makers: usize,
    pub noise_traders: usize,
    pub requote_interval_ms: u64,
    pub spread_bps: u32,
    pub quote_levels: usize,
    pub quote_size: u64,
    pub max_inventory: i64,
    pub noise_interval_ms: u64,
    pub noise_max_size: u64,
    pub noise_market_ratio: f64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            market_makers: 1,
            noise_traders: 2,
            requote_interval_ms: 1000,
            spread_bps: 20,
            quote_levels: 3,
            quote_size: 10,
            max_inventory: 200,
            noise_interval_ms: 700,
            noise_max_size: 5,
            noise_market_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistSettings {
    pub database_url: Option<String>,
    /// Used when no database is configured
    pub jsonl_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "match")]
    pub game: MatchSettings,
    pub feed: FeedSettings,
    pub bots: BotSettings,
    pub persist: PersistSettings,
    pub log_filter: String,
    /// Prometheus listener, only with the `metrics-exporter` feature
    pub metrics_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            game: MatchSettings::default(),
            feed: FeedSettings::default(),
            bots: BotSettings::default(),
            persist: PersistSettings::default(),
            log_filter: "info,lobx_arena=debug".to_string(),
            metrics_port: 9000,
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; otherwise
    /// `arena.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("ARENA").prefix_separator("__").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            symbol: self.game.symbol.clone(),
            duration_secs: self.game.duration_secs,
            target_mark: self.game.target_mark_cents,
            pre_match_secs: self.game.pre_match_secs,
            starting_value: self.game.starting_value_cents,
        }
    }

    pub fn ecosystem(&self) -> EcosystemConfig {
        let b = &self.bots;
        EcosystemConfig {
            feed_interval: Duration::from_millis(self.feed.tick_interval_ms),
            market_makers: b.market_makers,
            noise_traders: b.noise_traders,
            market_maker: MarketMakerConfig {
                spread_bps: b.spread_bps,
                quote_levels: b.quote_levels,
                quote_size: b.quote_size,
                max_inventory: b.max_inventory,
                requote_interval_ms: b.requote_interval_ms,
                ..MarketMakerConfig::default()
            },
            noise_trader: NoiseTraderConfig {
                interval_ms: b.noise_interval_ms,
                max_size: b.noise_max_size,
                market_ratio: b.noise_market_ratio,
                ..NoiseTraderConfig::default()
            },
            seed: self.feed.synthetic_seed,
        }
    }

    pub fn scheduler_config(&self, max_rounds: Option<u64>) -> SchedulerConfig {
        SchedulerConfig {
            match_config: self.match_config(),
            lobby: Duration::from_secs(self.game.lobby_secs),
            intermission: Duration::from_secs(self.game.intermission_secs),
            years_back: self.game.years_back,
            synthetic_volatility_bps: self.feed.synthetic_volatility_bps,
            synthetic_seed: self.feed.synthetic_seed,
            ecosystem: self.ecosystem(),
            max_rounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("arena-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "log_filter = \"warn\"\n[match]\nduration_secs = 60\nsymbol = \"QQQ\"\n[bots]\nnoise_traders = 0\n",
        )
        .unwrap();
        let settings = Settings::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.log_filter, "warn");
        assert_eq!(settings.game.duration_secs, 60);
        assert_eq!(settings.game.symbol, "QQQ");
        assert_eq!(settings.game.pre_match_secs, 10);
        assert_eq!(settings.bots.noise_traders, 0);
        assert_eq!(settings.bots.market_makers, 1);

        let sched = settings.scheduler_config(Some(3));
        assert_eq!(sched.match_config.duration_secs, 60);
        assert_eq!(sched.lobby, Duration::from_secs(30));
        assert_eq!(sched.ecosystem.market_maker.quote_levels, 3);
        assert_eq!(sched.max_rounds, Some(3));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let path = std::env::temp_dir().join(format!("missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(Settings::load(Some(path.as_path())).is_err());
    }
}
