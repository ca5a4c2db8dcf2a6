use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tsvault_server::db::{BinaryDbConfiguration, Db, DbConfiguration, JsonDbConfiguration};
use tsvault_server::keys::{load_aes_key, load_rsa_private_key};
use tsvault_server::network::{DbPacketHandler, NetworkConfig, NetworkModule, SessionState};
use tsvault_server::service::{BackgroundWorker, FlushRunnable, ServerConfig, StoreConfig};

/// Bucket bound for offline modes: every bucket stays in memory.
const OFFLINE_MAX_ITEMS: usize = 1_000_000;

#[derive(Parser)]
#[command(name = "tsvault")]
#[command(about = "Encrypted time-bucketed ledger database")]
struct Cli {
    /// Database root folder.
    data_folder: PathBuf,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "TSVAULT_LOG_FORMAT")]
    log_format: LogFormat,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the encrypted database over TCP.
    Server {
        #[arg(long, env = "TSVAULT_PORT")]
        port: u16,
        #[arg(long, env = "TSVAULT_RSA_KEY_FILE")]
        rsa_key_file: PathBuf,
        #[arg(long, default_value = "0.0.0.0", env = "TSVAULT_HOST")]
        host: String,
        #[arg(long, default_value_t = StoreConfig::default().max_items, env = "TSVAULT_MAX_ITEMS")]
        max_items: usize,
        #[arg(
            long,
            default_value_t = ServerConfig::default().flush_interval_ms,
            value_parser = clap::value_parser!(u64).range(1..),
            env = "TSVAULT_FLUSH_INTERVAL_MS"
        )]
        flush_interval_ms: u64,
    },
    /// Load the encrypted database and print one day's operations.
    Test {
        #[arg(long, env = "TSVAULT_AES_KEY_FILE")]
        aes_key_file: PathBuf,
        #[arg(long)]
        date: i32,
    },
    /// Load the JSON database and print one day's operations.
    TestJson {
        #[arg(long)]
        date: i32,
    },
    /// Convert a JSON database into the encrypted binary format.
    Migrate {
        #[arg(long)]
        source_folder: PathBuf,
        #[arg(long, env = "TSVAULT_AES_KEY_FILE")]
        aes_key_file: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.mode {
        Mode::Server {
            port,
            rsa_key_file,
            host,
            max_items,
            flush_interval_ms,
        } => {
            let config = ServerConfig {
                network: NetworkConfig {
                    host,
                    port,
                    ..NetworkConfig::default()
                },
                store: StoreConfig { max_items },
                flush_interval_ms,
            };
            serve(cli.data_folder, &rsa_key_file, config).await
        }
        Mode::Test { aes_key_file, date } => {
            let key = load_aes_key(&aes_key_file)?;
            test(&cli.data_folder, &BinaryDbConfiguration::new(key), date)
        }
        Mode::TestJson { date } => test(&cli.data_folder, &JsonDbConfiguration, date),
        Mode::Migrate {
            source_folder,
            aes_key_file,
        } => {
            let key = load_aes_key(&aes_key_file)?;
            migrate(&source_folder, &cli.data_folder, &BinaryDbConfiguration::new(key))
        }
    }
}

async fn serve(data_folder: PathBuf, rsa_key_file: &Path, config: ServerConfig) -> anyhow::Result<()> {
    let private_key = load_rsa_private_key(rsa_key_file)?;
    let session = Arc::new(SessionState::for_folder(
        data_folder,
        config.store.max_items,
    ));
    let handler = Arc::new(DbPacketHandler::new(Arc::clone(&session)));

    let mut network = NetworkModule::new(config.network, handler, private_key);
    let port = network.start().await?;
    info!(port, max_items = config.store.max_items, "server started");

    let mut flusher = BackgroundWorker::start(
        FlushRunnable::new(Arc::clone(&session)),
        config.flush_interval_ms,
    );

    let result = network
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("ctrl-c received, shutting down");
        })
        .await;

    flusher.stop().await;
    info!("server stopped");
    result
}

fn test(data_folder: &Path, config: &dyn DbConfiguration, date: i32) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut db = Db::open(data_folder, config, OFFLINE_MAX_ITEMS)?;
    let buckets = db.load_all()?;
    info!(
        buckets,
        elapsed_ms = started.elapsed().as_millis(),
        "database loaded"
    );

    let ops = db.get_ops(date)?;
    info!(date, count = ops.operations.len(), "operations");
    for (id, op) in &ops.operations {
        info!(
            id,
            account = op.account,
            subcategory = op.subcategory,
            summa = op.summa,
            amount = ?op.amount,
            properties = op.properties.len(),
            "operation"
        );
    }
    info!(active_items = db.active_items(), "alive items");
    Ok(())
}

fn migrate(source: &Path, target: &Path, config: &dyn DbConfiguration) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut db = Db::open(source, &JsonDbConfiguration, OFFLINE_MAX_ITEMS)
        .with_context(|| format!("opening JSON database {}", source.display()))?;
    let buckets = db.load_all()?;
    info!(
        buckets,
        elapsed_ms = started.elapsed().as_millis(),
        "database loaded"
    );

    let started = Instant::now();
    let written = db
        .save_all(config, target)
        .with_context(|| format!("writing binary database {}", target.display()))?;
    info!(
        buckets = written,
        elapsed_ms = started.elapsed().as_millis(),
        "database saved"
    );
    Ok(())
}
