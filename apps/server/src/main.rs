//! filestream server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use filestream_server::{FileServer, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Serve a storage directory to filestream clients
#[derive(Parser)]
#[command(name = "filestream-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Storage directory, overrides the configuration file
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// Download chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Upper bound for any call, in seconds
    #[arg(long)]
    max_call_secs: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(addr) = cli.listen {
        config.bind_address = addr;
    }
    if let Some(storage) = &cli.storage {
        config.storage_root = storage.clone();
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(secs) = cli.max_call_secs {
        config.max_call_duration_secs = Some(secs);
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        upload_slots = config.limits.upload,
        download_slots = config.limits.download,
        list_slots = config.limits.list,
        "starting filestream server"
    );

    let server = FileServer::new(config)?;
    let runner = Arc::clone(&server);
    let mut serving = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut serving => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    server.shutdown();
    serving.await??;
    tracing::info!("server shut down cleanly");
    Ok(())
}
