mod config;
mod server;
mod status_table;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use efes_core::{Client, StatusReport};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "efes")]
#[command(about = "Distributed blob storage - tracker service and client")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker service
    Tracker,
    /// Write a file under a key ("-" reads from stdin)
    Write { key: String, path: String },
    /// Read a key into a file ("-" writes to stdout)
    Read { key: String, path: String },
    /// Delete a key
    Delete { key: String },
    /// Check whether a key exists
    Exists { key: String },
    /// Show cluster status
    Status {
        /// Sort key: host, device, size, used or free
        #[arg(long, default_value = "host")]
        sort: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "efes=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(error) => {
                tracing::error!("Failed to load config: {}", error);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let result = match cli.command {
        Commands::Tracker => server::run_tracker(cfg).await.map_err(anyhow::Error::from),
        Commands::Write { key, path } => run_write(&cfg, &key, &path).await,
        Commands::Read { key, path } => run_read(&cfg, &key, &path).await,
        Commands::Delete { key } => run_delete(&cfg, &key).await,
        Commands::Exists { key } => run_exists(&cfg, &key).await,
        Commands::Status { sort } => run_status(&cfg, &sort).await,
    };

    if let Err(error) = result {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn run_write(cfg: &Config, key: &str, path: &str) -> anyhow::Result<()> {
    let client = Client::new(cfg.core_client_config())?;
    let sent = if path == "-" {
        let mut stdin = tokio::io::stdin();
        client.write(key, &mut stdin, None).await?
    } else {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path))?;
        let size = file.metadata().await?.len() as i64;
        client.write(key, &mut file, Some(size)).await?
    };
    tracing::info!("wrote {} bytes under key {}", sent, key);
    Ok(())
}

async fn run_read(cfg: &Config, key: &str, path: &str) -> anyhow::Result<()> {
    let client = Client::new(cfg.core_client_config())?;
    if path == "-" {
        let mut stdout = tokio::io::stdout();
        client.read(key, &mut stdout).await?;
    } else {
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("creating {}", path))?;
        client.read(key, &mut file).await?;
    }
    Ok(())
}

async fn run_delete(cfg: &Config, key: &str) -> anyhow::Result<()> {
    let client = Client::new(cfg.core_client_config())?;
    client.delete(key).await?;
    Ok(())
}

async fn run_exists(cfg: &Config, key: &str) -> anyhow::Result<()> {
    let client = Client::new(cfg.core_client_config())?;
    let exists = client.exists(key).await?;
    println!("{}", exists);
    Ok(())
}

async fn run_status(cfg: &Config, sort: &str) -> anyhow::Result<()> {
    let client = Client::new(cfg.core_client_config())?;
    let (hosts, devices) = client.fetch_inventory().await?;
    let mut report = StatusReport::build(&hosts, &devices);
    report.sort_by_key_name(sort);
    print!("{}", status_table::render(&report));
    Ok(())
}
