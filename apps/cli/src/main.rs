//! filestream command line client.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use filestream_client::{ClientConfig, TransferClient};
use filestream_protocol::FileInfo;
use filestream_protocol::constants::DEFAULT_PORT;
use tracing_subscriber::EnvFilter;

/// Upload, download and list files on a filestream server
#[derive(Parser)]
#[command(name = "filestream")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address (host:port)
    #[arg(short, long, default_value_t = format!("localhost:{DEFAULT_PORT}"))]
    addr: String,

    /// Override every call's time budget, in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Chunk size for uploads in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// File to upload
        path: PathBuf,
    },

    /// Download a stored file
    Download {
        /// Name of the stored file
        name: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// List stored files
    List,
}

impl Commands {
    fn operation(&self) -> &'static str {
        match self {
            Commands::Upload { .. } => "upload",
            Commands::Download { .. } => "download",
            Commands::List => "list",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let operation = cli.command.operation();
    let config = client_config(&cli);
    if let Err(e) = config.validate() {
        tracing::error!(operation, "{e}");
        return ExitCode::FAILURE;
    }
    let client = TransferClient::new(config);

    match run(&client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(operation, "{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn client_config(cli: &Cli) -> ClientConfig {
    let mut config = ClientConfig::new(cli.addr.clone());
    if let Some(secs) = cli.timeout {
        let budget = Duration::from_secs(secs);
        config.upload_timeout = budget;
        config.download_timeout = budget;
        config.list_timeout = budget;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    config
}

async fn run(client: &TransferClient, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Upload { path } => {
            let status = client.upload(&path).await?;
            if !status.success {
                anyhow::bail!("server refused {}: {}", path.display(), status.message);
            }
            println!("{}", status.message);
        }
        Commands::Download { name, output } => {
            let summary = client.download(&name, &output).await?;
            println!(
                "{} ({} bytes, {} chunks)",
                summary.path.display(),
                summary.bytes_written,
                summary.chunks
            );
        }
        Commands::List => {
            let count = client.list_with(|info| println!("{}", render(&info))).await?;
            tracing::debug!(count, "listing done");
        }
    }
    Ok(())
}

fn render(info: &FileInfo) -> String {
    format!(
        "{}\tcreated {}\tupdated {}",
        info.filename,
        info.created_at.to_rfc3339(),
        info.updated_at.to_rfc3339()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_flag_sets_every_budget() {
        let cli = Cli::parse_from(["filestream", "--timeout", "3", "list"]);
        let config = client_config(&cli);
        assert_eq!(config.upload_timeout, Duration::from_secs(3));
        assert_eq!(config.download_timeout, Duration::from_secs(3));
        assert_eq!(config.list_timeout, Duration::from_secs(3));
        assert_eq!(config.server_addr, "localhost:50051");
    }

    #[test]
    fn chunk_size_flag_is_validated() {
        let cli = Cli::parse_from(["filestream", "--chunk-size", "4096", "list"]);
        let config = client_config(&cli);
        assert_eq!(config.chunk_size, 4096);
        config.validate().unwrap();

        for bad in ["0", "1048577"] {
            let cli = Cli::parse_from(["filestream", "--chunk-size", bad, "list"]);
            assert!(client_config(&cli).validate().is_err(), "chunk size {bad}");
        }
    }

    #[test]
    fn download_defaults_to_current_dir() {
        let cli = Cli::parse_from(["filestream", "--addr", "10.0.0.5:7000", "download", "a.txt"]);
        assert_eq!(cli.addr, "10.0.0.5:7000");
        match cli.command {
            Commands::Download { name, output } => {
                assert_eq!(name, "a.txt");
                assert_eq!(output, PathBuf::from("."));
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn render_uses_rfc3339() {
        let ts = "2024-05-01T12:00:00Z".parse().unwrap();
        let line = render(&FileInfo::from_modified("a.txt", ts));
        assert_eq!(
            line,
            "a.txt\tcreated 2024-05-01T12:00:00+00:00\tupdated 2024-05-01T12:00:00+00:00"
        );
    }
}
