//! Check-in admin - dashboard operations on an event ledger
//!
//! Usage:
//!   checkin-admin stats
//!   checkin-admin list --filter ana
//!   checkin-admin export --out checkins.csv
//!   checkin-admin reset --confirm resetar
//!
//! Reads the same config file as the station, so it operates on the same
//! ledger directory and event namespace. `stats`, `list` and `export` read
//! the ledger files without locking; `reset` needs the event's ledger lock
//! and fails while a station has the event open.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use qr_checkin::domain::StorageError;
use qr_checkin::infra::Config;
use qr_checkin::io::console::{render_history, render_stats};
use qr_checkin::io::{JsonFileStore, RegistrySource};
use qr_checkin::services::dashboard::{export_csv, history, DashboardStats};
use qr_checkin::services::ledger::RESET_PHRASE;
use qr_checkin::services::{ResetConfirmation, UsageLedger};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "checkin-admin", version, about = "Dashboard operations on a check-in ledger")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Event identifier (overrides [event] id)
    #[arg(long, global = true)]
    event: Option<String>,

    /// Registry URL or file path (overrides [registry] source)
    #[arg(long, global = true)]
    registry: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Registry size, codes used and guests remaining
    Stats,

    /// Check-in history, newest first
    List {
        /// Case-insensitive match on code or name
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Export the check-in log as CSV, oldest first
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Clear consumed codes and the check-in log for this event
    Reset {
        /// Confirmation phrase
        #[arg(long)]
        confirm: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load_from_path(&Config::resolve_config_path(cli.config.as_deref()));
    if let Some(event) = cli.event {
        config = config.with_event_id(event);
    }
    if let Some(registry) = cli.registry {
        config = config.with_registry_source(registry);
    }

    let writable = matches!(cli.command, Command::Reset { .. });
    let store = if writable {
        match JsonFileStore::open(config.ledger_dir(), config.event_id()) {
            Err(StorageError::Locked { path }) => {
                bail!("Ledger for event {} is in use ({}); stop the station first", config.event_id(), path)
            }
            other => other?,
        }
    } else {
        JsonFileStore::open_read_only(config.ledger_dir(), config.event_id())
    };
    let mut ledger = UsageLedger::open(Box::new(store))
        .with_context(|| format!("Failed to open ledger for event {}", config.event_id()))?;

    match cli.command {
        Command::Stats => {
            let source = RegistrySource::parse(config.registry_source())?;
            let registry = source
                .load(Duration::from_millis(config.registry_timeout_ms()))
                .await
                .with_context(|| format!("Failed to load registry from {}", source.display()))?;

            let stats = DashboardStats::compute(&registry, ledger.used_codes());
            println!("event={} {}", config.event_id(), render_stats(&stats));
        }
        Command::List { filter } => {
            let rows = history(ledger.entries(), filter.as_deref());
            print!("{}", render_history(&rows));
        }
        Command::Export { out } => match out {
            Some(path) => {
                let file = File::create(&path).with_context(|| format!("Failed to create {}", path))?;
                export_csv(ledger.entries(), BufWriter::new(file))?;
                info!(file = %path, entries = %ledger.entries().len(), "checkins_exported");
                eprintln!("Exported {} check-ins to {}", ledger.entries().len(), path);
            }
            None => {
                let stdout = io::stdout();
                let mut lock = stdout.lock();
                export_csv(ledger.entries(), &mut lock)?;
                lock.flush()?;
            }
        },
        Command::Reset { confirm } => {
            let Some(confirmation) = ResetConfirmation::from_phrase(&confirm) else {
                bail!("Reset not confirmed: type '{}' to clear the ledger", RESET_PHRASE);
            };
            let cleared = ledger.used_count();
            ledger.reset(confirmation)?;
            println!("Ledger for event {} cleared ({} codes released)", config.event_id(), cleared);
        }
    }

    Ok(())
}
