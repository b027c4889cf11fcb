//! schemalock CLI
//!
//! Operator tool for the migration lock table.

use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use schemalock::config::{
    DEFAULT_LOCK_TABLE, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS, LockConfig, LockVariant,
};
use schemalock::dialect::DialectRegistry;
use schemalock::lock_table::LockTable;
use schemalock::session;

/// Row-lock coordination for schema migration runners.
#[derive(Parser)]
#[command(name = "schemalock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (`postgres://`, `yugabytedb:`, `kingbase8:`, `sqlite:`).
    #[arg(short, long, env = "DATABASE_URL")]
    database: String,

    /// Name of the lock table.
    #[arg(long, env = "SCHEMALOCK_LOCK_TABLE", default_value = DEFAULT_LOCK_TABLE)]
    lock_table: String,

    /// Lock row encoding (`token` or `flag`).
    #[arg(long, env = "SCHEMALOCK_VARIANT", default_value = "token")]
    variant: String,

    /// Retries after the first failed attempt; negative means unlimited.
    #[arg(long, env = "SCHEMALOCK_RETRY_COUNT", default_value_t = DEFAULT_RETRY_COUNT, allow_hyphen_values = true)]
    retry_count: i64,

    /// Delay between acquire attempts, in milliseconds.
    #[arg(long, env = "SCHEMALOCK_RETRY_DELAY_MS", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the lock table (upgrading an old flag schema).
    Init,

    /// Show lock rows.
    Status {
        /// Resource to show (all if not specified).
        #[arg(short, long)]
        resource: Option<String>,
    },

    /// Clear a lock regardless of who holds it.
    Release {
        /// Resource to release.
        #[arg(short, long)]
        resource: String,
    },

    /// Acquire the lock, wait for Ctrl-C, then release it.
    Hold {
        /// Resource to lock.
        #[arg(short, long)]
        resource: String,
    },

    /// Print the migration-history table DDL for the detected dialect.
    HistoryDdl {
        /// History table name.
        #[arg(short, long, default_value = "flyway_schema_history")]
        table: String,

        /// Include the baseline marker row.
        #[arg(long)]
        baseline: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = LockConfig::new()
        .lock_table(cli.lock_table.clone())
        .variant(LockVariant::parse(&cli.variant)?)
        .retry_count(cli.retry_count)
        .retry_delay(std::time::Duration::from_millis(cli.retry_delay_ms));
    config.validate()?;

    let registry = DialectRegistry::with_builtins();
    let dialect = registry.detect(&cli.database)?;
    info!(dialect = dialect.name(), "Detected dialect");

    let table = LockTable::new(config.lock_table.clone(), config.variant, dialect.clone());

    match cli.command {
        Commands::Init => {
            let mut session = session::connect(&cli.database).await?;
            info!(lock_table = %config.lock_table, "Initializing lock table...");
            table.ensure(&mut session).await?;
            info!("Lock table ready.");
        }

        Commands::Status { resource } => {
            let mut session = session::connect(&cli.database).await?;
            table.ensure(&mut session).await?;
            let rows = table.status(&mut session, resource.as_deref()).await?;

            if rows.is_empty() {
                info!("No lock rows yet.");
            } else {
                println!("\nLock rows in {}:", config.lock_table);
                println!("{:-<60}", "");
                for row in &rows {
                    let mark = if row.is_held() { "X" } else { " " };
                    match &row.acquired_at {
                        Some(ts) if row.is_held() => {
                            println!(" [{mark}] {} (since {ts})", row.resource);
                        }
                        _ => println!(" [{mark}] {}", row.resource),
                    }
                }
                println!();
            }
        }

        Commands::Release { resource } => {
            let mut session = session::connect(&cli.database).await?;
            if table.force_release(&mut session, &resource).await? {
                warn!(resource = %resource, "Lock forcibly released");
            } else {
                info!(resource = %resource, "No lock row for resource");
            }
        }

        Commands::Hold { resource } => {
            let session = session::connect(&cli.database).await?;
            let mut coordinator =
                schemalock::coordinator::RowLockCoordinator::new(session, dialect, config)?;
            coordinator
                .execute(&resource, || async {
                    info!(resource = %resource, "Holding lock, press Ctrl-C to release");
                    tokio::signal::ctrl_c().await?;
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
        }

        Commands::HistoryDdl { table, baseline } => {
            println!("{}", dialect.history_table_ddl(&table, baseline));
        }
    }

    Ok(())
}
