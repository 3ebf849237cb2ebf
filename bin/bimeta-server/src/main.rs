//! bimeta metadata service
//!
//! Serves forward (key to value) and inverse (value to key) lookups over
//! gRPC and REST, backed by an embedded redb database.

use anyhow::Result;
use bimeta_common::Config;
use bimeta_common::config::{LogFormat, LoggingConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bimeta-server")]
#[command(about = "Bidirectional key/value metadata service")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides the configuration file)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging);

    info!("Starting bimeta {}", env!("CARGO_PKG_VERSION"));
    info!("gRPC listen address: {}", config.server.grpc_listen);
    info!("REST listen address: {}", config.server.rest_listen);

    bimeta_server::run(config).await?;

    Ok(())
}
