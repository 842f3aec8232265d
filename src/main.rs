use ajo_ledger::application::engine::LedgerEngine;
use ajo_ledger::config::LedgerConfig;
use ajo_ledger::domain::ports::Stores;
use ajo_ledger::infrastructure::gateway::SandboxGateway;
use ajo_ledger::infrastructure::notifier::TracingNotifier;
use ajo_ledger::interfaces::csv::command_reader::CommandReader;
use ajo_ledger::interfaces::csv::script::ScriptRunner;
use ajo_ledger::interfaces::csv::wallet_writer::WalletWriter;
use ajo_ledger::logging;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input command script CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "AJO_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Shared secret for payment provider webhook signatures.
    #[arg(long, env = "AJO_WEBHOOK_SECRET")]
    webhook_secret: Option<String>,

    /// Deadline for each payment gateway call, in milliseconds.
    #[arg(long, env = "AJO_GATEWAY_TIMEOUT_MS", default_value_t = 30_000)]
    gateway_timeout_ms: u64,

    /// Offset from UTC used for collection deadlines.
    #[arg(long, env = "AJO_UTC_OFFSET_MINUTES", default_value_t = 0, allow_hyphen_values = true)]
    utc_offset_minutes: i32,

    /// Currency code sent with funding requests.
    #[arg(long, env = "AJO_CURRENCY", default_value = "NGN")]
    currency: String,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    use ajo_ledger::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(RocksDBStore::open(path).into_diagnostic()?.into_stores()),
        None => Ok(Stores::in_memory()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Stores::in_memory())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::set_up(cli.verbose);

    let mut config = LedgerConfig::default()
        .with_gateway_timeout(Duration::from_millis(cli.gateway_timeout_ms))
        .with_currency(cli.currency)
        .with_utc_offset_minutes(cli.utc_offset_minutes)
        .into_diagnostic()?;
    if let Some(secret) = cli.webhook_secret {
        config = config.with_webhook_secret(secret);
    }

    let stores = open_stores(cli.db_path)?;
    let engine = LedgerEngine::new(
        stores,
        Box::new(SandboxGateway::new()),
        Box::new(TracingNotifier),
        config,
    );
    let runner = ScriptRunner::new(engine);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = runner.execute(&command).await {
                    eprintln!("Error processing command: {}: {}", e.code(), e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let wallets = runner.balances().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(&wallets).into_diagnostic()?;

    Ok(())
}
