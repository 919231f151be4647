use std::sync::Arc;

use clap::Parser;
use service_observatory::config::PollerConfig;
use service_observatory::poller::scheduler::HealthPollingService;
use service_observatory::store::sqlite::SqliteStore;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value = "./observatory.db")]
    database: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("service_observatory", LevelFilter::TRACE),
        ("observatory", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = PollerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid poller configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }
    info!(
        "poller configuration: cycle {:?}, {} concurrent fetches per host",
        config.poll_cycle, config.max_concurrent_per_host
    );

    let store = Arc::new(SqliteStore::new(&args.database).await?);
    info!("store ready at {}", args.database);

    let scheduler = HealthPollingService::new(store.clone(), config);
    scheduler.start_all().await?;
    info!(
        "polling active for {} services",
        scheduler.active_pollers().len()
    );

    info!("press Ctrl+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal, stopping poller...");
        }
        Err(err) => {
            error!("unable to listen for shutdown signal: {err}");
        }
    }

    scheduler.shutdown().await;
    store.close().await;
    info!("observatory stopped, exiting");

    Ok(())
}
