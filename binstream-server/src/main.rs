use std::sync::Arc;

use anyhow::Context;
use binstream_replication::{FilePositionStore, MySqlSchemaProvider, MySqlSourceFactory};
use binstream_server::{Engine, LogBus, Options, PumpConfig, StandaloneElector};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let options = Options::parse();

    let config = match &options.config {
        Some(path) => PumpConfig::load(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => PumpConfig::default(),
    };

    if options.ha {
        // The distributed election and KV backends are deployment-specific;
        // wire them in by embedding the engine.
        anyhow::bail!(
            "HA mode needs external election and KV collaborators; this binary ships without them"
        );
    }

    let replication = options.replication_config();
    let position_store = Arc::new(FilePositionStore::new(&options.position_file));
    let source_factory = Arc::new(MySqlSourceFactory::new(replication.clone()));
    let schema_provider = Box::new(MySqlSchemaProvider::new(replication.opts()));

    let engine = Engine::new(
        options,
        config,
        Arc::new(LogBus),
        Arc::new(StandaloneElector),
        position_store,
        source_factory,
        schema_provider,
    )
    .await?;

    engine.start().await?;

    tokio::select! {
        _ = engine.stopped() => {}
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    engine.shutdown().await;
    Ok(())
}
