use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use lobx_arena::broadcast::LogBroadcaster;
use lobx_arena::config::Settings;
use lobx_arena::game::Scheduler;
use lobx_arena::market_data::provider::{CsvDayProvider, HistoricalProvider};
use lobx_arena::persist::jsonl::JsonlMatchStore;
use lobx_arena::persist::memory::InMemoryMatchStore;
use lobx_arena::persist::postgres::PostgresMatchStore;
use lobx_arena::persist::MatchStore;
use lobx_arena::telemetry;

#[derive(Debug, Parser)]
#[command(name = "lobx-arena", about = "Multiplayer trading rounds on a shared order book")]
struct Cli {
    /// TOML settings file (defaults to ./arena.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured one
    #[arg(long)]
    log: Option<String>,

    /// Exit after this many completed matches
    #[arg(long)]
    rounds: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    telemetry::init_tracing(cli.log.as_deref().unwrap_or(&settings.log_filter));
    telemetry::init_metrics(settings.metrics_port)?;

    let store: Arc<dyn MatchStore> = match (&settings.persist.database_url, &settings.persist.jsonl_path) {
        (Some(url), _) => Arc::new(PostgresMatchStore::connect(url).await?),
        (None, Some(path)) => {
            info!(path = %path.display(), "Saving matches to JSON lines");
            Arc::new(JsonlMatchStore::new(path))
        }
        (None, None) => {
            info!("No persistence configured, keeping matches in memory");
            Arc::new(InMemoryMatchStore::new())
        }
    };

    let provider: Option<Arc<dyn HistoricalProvider>> = match &settings.feed.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Replaying historical days from CSV");
            Some(Arc::new(CsvDayProvider::new(dir)))
        }
        None => None,
    };

    let scheduler = Scheduler::new(settings.scheduler_config(cli.rounds), provider, Arc::new(LogBroadcaster), store);
    scheduler.start()?;
    info!(symbol = %settings.game.symbol, rounds = ?cli.rounds, "Arena running");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down");
        }
        _ = scheduler.stopped() => info!("Round limit reached"),
    }
    scheduler.stop().await;
    info!(completed = scheduler.completed_matches(), "Bye");
    Ok(())
}
