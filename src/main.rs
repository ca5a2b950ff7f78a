use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use transfer_engine::application::publisher::publish_initiated;
use transfer_engine::application::worker::TransferEngine;
use transfer_engine::config::EngineConfig;
use transfer_engine::domain::events::{TOPIC_TRANSACTION_COMPLETED, TOPIC_TRANSACTION_FAILED};
use transfer_engine::domain::ports::{EventLog, LedgerStore, LedgerStoreRef};
use transfer_engine::infrastructure::in_memory::{
    EventLogAuditSink, InMemoryEventLog, InMemoryLedgerStore,
};
use transfer_engine::interfaces::csv::account_reader::AccountReader;
use transfer_engine::interfaces::csv::account_writer::AccountWriter;
use transfer_engine::interfaces::csv::transfer_reader::TransferReader;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input transfers CSV file (transfer_id, from, to, amount)
    input: PathBuf,

    /// Opening balances CSV file (account, balance). Existing accounts are kept.
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON engine configuration file.
    #[arg(long, env = "TRANSFER_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of event-log partitions (overrides the config file).
    #[arg(long)]
    partitions: Option<usize>,

    /// Write every published outcome event to this file, one JSON object per line.
    #[arg(long)]
    outcomes: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    if let Some(partitions) = cli.partitions {
        config.partitions = partitions;
    }
    config.validate().into_diagnostic()?;

    let ledger = open_ledger(cli.db_path)?;

    if let Some(path) = &cli.accounts {
        let file = File::open(path).into_diagnostic()?;
        for row in AccountReader::new(file).accounts() {
            let row = row.into_diagnostic()?;
            if !ledger
                .open_account(row.account.clone(), row.balance)
                .await
                .into_diagnostic()?
            {
                info!(account = %row.account, "Account already exists, keeping stored balance");
            }
        }
    }

    let log = Arc::new(InMemoryEventLog::new(config.partitions));
    let engine = TransferEngine::start(
        config,
        ledger.clone(),
        log.clone(),
        Arc::new(EventLogAuditSink::new(log.clone())),
    )
    .into_diagnostic()?;

    // Act as the upstream initiator: every CSV row becomes a transaction_initiated event.
    let file = File::open(&cli.input).into_diagnostic()?;
    for request in TransferReader::new(file).transfers() {
        match request {
            Ok(request) => {
                if let Err(e) = publish_initiated(log.as_ref(), &request).await {
                    error!(
                        transfer_id = %request.transfer_id,
                        error = %e,
                        "Error publishing transfer"
                    );
                }
            }
            Err(e) => error!(error = %e, "Error reading transfer"),
        }
    }

    engine.drain().await.into_diagnostic()?;
    engine.shutdown().await.into_diagnostic()?;

    if let Some(path) = &cli.outcomes {
        write_outcomes(log.as_ref(), path).await?;
    }

    let accounts = ledger.accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the account CSV, so logs go to stderr.
    if json {
        fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_target(false)
            .init();
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_ledger(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    use transfer_engine::infrastructure::rocksdb::RocksDBLedgerStore;

    let ledger: LedgerStoreRef = match db_path {
        Some(path) => Arc::new(RocksDBLedgerStore::open(path).into_diagnostic()?),
        None => Arc::new(InMemoryLedgerStore::new()),
    };
    Ok(ledger)
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_ledger(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    if db_path.is_some() {
        tracing::warn!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

/// Dumps both outcome topics, partition by partition.
async fn write_outcomes(log: &dyn EventLog, path: &Path) -> Result<()> {
    let mut file = File::create(path).into_diagnostic()?;
    for topic in [TOPIC_TRANSACTION_COMPLETED, TOPIC_TRANSACTION_FAILED] {
        for partition in 0..log.partition_count(topic) {
            let end = log.end_offset(topic, partition).await.into_diagnostic()?;
            let deliveries = log
                .fetch(topic, partition, 0, end as usize, Duration::ZERO)
                .await
                .into_diagnostic()?;
            for delivery in deliveries {
                writeln!(file, "{}", delivery.payload).into_diagnostic()?;
            }
        }
    }
    Ok(())
}
