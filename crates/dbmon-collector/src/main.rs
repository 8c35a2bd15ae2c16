mod config;
mod runner;
mod sink;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dbmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "collector.toml".to_string());
    let config = config::CollectorConfig::load(&config_path)?;

    tracing::info!(
        "Starting database collector: region={}, mode={:?}",
        config.region,
        config.run_mode
    );

    runner::run(config).await
}
