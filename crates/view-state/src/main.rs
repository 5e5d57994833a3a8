//! Inspect and maintain a file-backed view-state store.
//!
//! # Examples
//!
//! ```sh
//! # Envelope version, store usage and per-view sizes
//! view-state --dir ./state inspect
//!
//! # Print one view's state as JSON
//! view-state --dir ./state show discovery
//!
//! # Full diagnostic dump
//! view-state --dir ./state export > dump.json
//!
//! # Upgrade an old envelope in place
//! view-state --dir ./state migrate
//!
//! # Drop one view, or everything
//! view-state --dir ./state clear --view analysis
//! view-state --dir ./state clear
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use view_state::codec::StateCodec;
use view_state::config::{DEFAULT_STORAGE_KEY, ManagerConfig};
use view_state::envelope::Envelope;
use view_state::events::LoggingHandler;
use view_state::manager::ViewStateManager;
use view_state::migration::MigrationEngine;
use view_state::store::{DEFAULT_QUOTA, FileStore, PersistentStore};

/// Inspect and maintain a file-backed view-state store.
#[derive(Parser)]
#[command(name = "view-state", version)]
struct Cli {
    /// Store directory
    #[arg(long, default_value = "./view-state")]
    dir: PathBuf,

    /// Store quota in bytes
    #[arg(long, default_value_t = DEFAULT_QUOTA)]
    quota: usize,

    /// Key the envelope is stored under
    #[arg(long, default_value = DEFAULT_STORAGE_KEY)]
    key: String,

    /// Log engine decisions at debug level (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show envelope version, store usage and per-view sizes
    Inspect,
    /// Print a view's state as JSON
    Show {
        /// View name
        view: String,
    },
    /// Dump every view with summaries as JSON
    Export,
    /// Remove one view's state, or all state
    Clear {
        /// Only clear this view
        #[arg(long)]
        view: Option<String>,
    },
    /// Upgrade the persisted envelope to the current version
    Migrate,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_store(cli: &Cli) -> Result<Arc<FileStore>, String> {
    FileStore::with_quota(&cli.dir, cli.quota)
        .map(Arc::new)
        .map_err(|e| format!("failed to open store at {}: {e}", cli.dir.display()))
}

fn read_envelope(store: &FileStore, key: &str) -> Result<Option<Envelope>, String> {
    let Some(bytes) = store.read(key).map_err(|e| e.to_string())? else {
        return Ok(None);
    };
    Envelope::from_bytes(&bytes)
        .map(Some)
        .map_err(|e| format!("envelope under '{key}' is unreadable: {e}"))
}

fn pretty(value: &serde_json::Value) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

fn inspect(cli: &Cli, store: &FileStore) -> Result<String, String> {
    let usage = store.estimate_usage().map_err(|e| e.to_string())?;
    let mut out = format!(
        "Store:   {}\nUsage:   {} / {} bytes ({:.1}%)\n",
        store.dir().display(),
        usage.used,
        usage.quota,
        usage.utilization() * 100.0
    );

    let Some(envelope) = read_envelope(store, &cli.key)? else {
        out.push_str("No envelope stored.\n");
        return Ok(out);
    };
    let written = chrono::DateTime::from_timestamp_millis(envelope.timestamp)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| envelope.timestamp.to_string());
    let upgrade = if envelope.is_current() {
        ""
    } else {
        " (needs migration)"
    };
    out.push_str(&format!(
        "Version: {}{upgrade}\nWritten: {written}\nViews:   {}\n",
        envelope.version,
        envelope.states.len()
    ));
    for (view, entry) in &envelope.states {
        out.push_str(&format!(
            "  {view:<16} {:>8} B  (from {:>8} B, ratio {:.2})\n",
            entry.size, entry.original_size, entry.compression_ratio
        ));
    }

    let stale: Vec<String> = store
        .keys()
        .map_err(|e| e.to_string())?
        .into_iter()
        .filter(|k| *k != cli.key)
        .collect();
    if !stale.is_empty() {
        out.push_str(&format!("Other keys: {}\n", stale.join(", ")));
    }
    Ok(out)
}

fn migrate(cli: &Cli, store: &FileStore) -> Result<String, String> {
    let Some(envelope) = read_envelope(store, &cli.key)? else {
        return Ok("No envelope stored.\n".into());
    };
    if envelope.is_current() {
        return Ok(format!("Already at version {}.\n", envelope.version));
    }

    let outcome = MigrationEngine::default().migrate(envelope, &StateCodec::default());
    let mut migrated = outcome.envelope;
    migrated.stamp();
    let bytes = migrated.to_bytes().map_err(|e| e.to_string())?;
    store.write(&cli.key, &bytes).map_err(|e| e.to_string())?;

    let mut out = format!(
        "Migrated {} → {} ({} view(s) kept)\n",
        outcome.from,
        outcome.to,
        migrated.states.len()
    );
    if !outcome.dropped.is_empty() {
        out.push_str(&format!("Dropped: {}\n", outcome.dropped.join(", ")));
    }
    Ok(out)
}

fn run(cli: &Cli) -> Result<String, String> {
    let store = open_store(cli)?;
    let manager = || {
        ViewStateManager::builder(store.clone())
            .with_config(ManagerConfig::default().with_storage_key(cli.key.clone()))
            .with_event_handler(LoggingHandler)
            .build()
    };

    match &cli.command {
        Command::Inspect => inspect(cli, &store),
        Command::Show { view } => match manager().load_state(view) {
            Some(state) => pretty(&serde_json::Value::Object(state)).map(|s| s + "\n"),
            None => Err(format!("no state stored for view '{view}'")),
        },
        Command::Export => pretty(&manager().export_all()).map(|s| s + "\n"),
        Command::Clear { view: Some(view) } => {
            manager().clear_view(view);
            Ok(format!("Cleared view '{view}'.\n"))
        }
        Command::Clear { view: None } => {
            manager().clear_all();
            Ok("Cleared all view state.\n".into())
        }
        Command::Migrate => migrate(cli, &store),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
