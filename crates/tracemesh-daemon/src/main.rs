use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracemesh_metrics::MetricsStore;
use tracemesh_runtime::{Handles, Supervisor};
use tracemesh_stream::{RedisStreamClient, StreamClient};
use tracemesh_store::TraceStore;
use tracemesh_types::PipelineConfig;

#[derive(Parser)]
#[command(name = "tracemeshd")]
#[command(about = "Runs the tracemesh fast path, worker pool, and backpressure monitor", long_about = None)]
struct Cli {
    /// Path to a TOML config file, overriding the default `config.toml` in the data dir.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => PipelineConfig::load_from(&path)?.with_env_overrides(),
        None => PipelineConfig::load()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("tracemesh=info".parse()?))
        .json()
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(run(config))
}

async fn run(config: PipelineConfig) -> Result<()> {
    tracing::info!(data_dir = %config.data_dir.display(), "starting tracemesh daemon");

    let stream: Arc<dyn StreamClient> =
        Arc::new(RedisStreamClient::open(&config.redis_host, config.redis_port, config.redis_db).with_context(
            || format!("failed to connect to redis at {}:{}", config.redis_host, config.redis_port),
        )?);

    let traces = TraceStore::open(&config.db_path(), config.compression_level)
        .with_context(|| format!("failed to open trace store at {}", config.db_path().display()))?;

    let metrics = Arc::new(MetricsStore::default());
    let handles = Handles::new(stream, traces, metrics, config);

    let supervisor = Supervisor::start(handles);

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, draining in-flight work");

    supervisor.shutdown().await;
    tracing::info!("tracemesh daemon exited cleanly");
    Ok(())
}
