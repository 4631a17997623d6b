use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod metrics;
mod models;
mod services;

use crate::config::AppConfig;
use crate::db::Database;
use crate::services::exchange::{self, ExchangeOptions};
use crate::services::gen;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lob_exchange=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting lob-exchange v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    metrics::init_metrics(config.metrics_port)?;
    tracing::info!("Metrics exporter listening on :{}", config.metrics_port);

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    tracing::info!("Database connected");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    // Optional deterministic load generator
    if config.gen_enabled {
        let pool = db.pool.clone();
        let gen_config = gen::GenConfig::from_app(&config);
        let gen_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = gen::run(pool, gen_config, gen_cancel).await {
                tracing::error!("Order generator failed: {}", err);
            }
        });
        tracing::info!("Order generator enabled");
    }

    let options = ExchangeOptions {
        base_scale: config.base_scale,
        max_batch: config.max_batch,
        input_capacity: config.input_capacity,
        output_capacity: config.output_capacity,
        snap: None,
    };

    // Runs until shutdown or the first fatal task error; the supervisor
    // restarts us and the matcher replays from the last committed cursor.
    exchange::run(db.pool.clone(), options, cancel).await?;

    Ok(())
}
