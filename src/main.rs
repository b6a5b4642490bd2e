//! B3 Market Data
//!
//! Bulk-loads archived B3 trade files into the local trade store and serves
//! daily summaries over HTTP.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use b3_market_data::{api, Config, KvTradeDb, Loader, ProgressCounter, ProgressDisplay, TradeDb};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "b3-market-data")]
#[command(about = "Load B3 trade archives and serve daily summaries", long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Trade store directory (overrides store.path)
    #[arg(long, env = "TRADE_STORE_PATH", value_name = "PATH")]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every archive of a directory into the store
    Load {
        /// Directory holding the zipped trade files
        #[arg(short, long, default_value = "data")]
        directory: PathBuf,

        /// Trades per batch (overrides loader.batch_size)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Archives processed at the same time (overrides loader.concurrent_files)
        #[arg(short = 'j', long)]
        concurrent_files: Option<usize>,
    },

    /// Serve the read API
    Api {
        /// Server port (overrides api.port)
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Config::from_file(path).context("Failed to load configuration")?
        }
        None => Config::default(),
    };
    if let Some(store) = args.store {
        config.store.path = store;
    }

    match args.command {
        Command::Load {
            directory,
            batch_size,
            concurrent_files,
        } => {
            if let Some(batch_size) = batch_size {
                config.loader.batch_size = batch_size;
            }
            if let Some(concurrent_files) = concurrent_files {
                config.loader.concurrent_files = concurrent_files;
            }
            config.validate()?;
            load(&config, directory).await
        }
        Command::Api { port } => {
            if let Some(port) = port {
                config.api.port = port;
            }
            config.validate()?;
            let db = open_store(&config)?;
            api::serve(Arc::new(db), config.api.port).await
        }
    }
}

fn open_store(config: &Config) -> Result<KvTradeDb> {
    info!("Opening trade store at {}", config.store.path);
    KvTradeDb::open(&config.store.path)
        .context(format!("Failed to open trade store: {}", config.store.path))
}

async fn load(config: &Config, directory: PathBuf) -> Result<()> {
    if !directory.is_dir() {
        bail!("{:?} is not a directory", directory);
    }

    let db = open_store(config)?;
    db.create_table().await.context("Failed to create tables")?;

    let progress = ProgressCounter::new();
    let sink: Arc<dyn TradeDb> = Arc::new(db.clone());
    let loader = Loader::new(sink, config.loader.options()?).with_progress(progress.clone());
    let display = ProgressDisplay::start(progress.clone(), config.loader.progress_update_interval());

    let outcome = tokio::select! {
        result = loader.load(&directory) => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("Load interrupted")),
    };

    let summary = match outcome {
        Ok(summary) => {
            display.finish(&progress).await;
            summary
        }
        Err(e) => {
            display.abandon(&e.to_string()).await;
            error!("Load failed after {} records: {:#}", progress.get(), e);
            return Err(e);
        }
    };

    info!(
        "Loaded {} records from {} files ({} skipped), refreshing summaries",
        summary.rows, summary.files, summary.skipped
    );
    let days = db.post_load().await.context("Failed to refresh summaries")?;
    db.flush().await?;

    info!("Load completed successfully! {} daily summaries available", days);
    Ok(())
}
