//! Alert gate CLI - runs the admission server and inspects stored state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alert_gate::server::{run_server, ServerState};
use alert_gate::{
    AdmissionGate, FileStateStore, GateConfig, GateKey, MemoryStateStore, PolicyTable, StateStore,
    StoreBackend,
};

/// Alert admission gate - threshold, cooldown and lifecycle tracking for inbound alerts
#[derive(Parser)]
#[command(name = "alert-gate")]
#[command(about = "Alert admission gate - threshold, cooldown and lifecycle tracking")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "ALERT_GATE_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP admission server
    Serve {
        /// Listen address
        #[arg(long, env = "ALERT_GATE_LISTEN", default_value = "0.0.0.0:8080")]
        listen: String,

        /// State store backend
        #[arg(long, env = "ALERT_GATE_STORE", value_enum, default_value_t = StoreBackend::Memory)]
        store: StoreBackend,

        /// Data directory for the file store
        #[arg(long, env = "ALERT_GATE_DATA_DIR", default_value = "/data/alert-gate")]
        data_dir: PathBuf,

        /// TOML file with default and per-source policies
        #[arg(long, env = "ALERT_GATE_POLICY_FILE")]
        policy_file: Option<PathBuf>,

        /// Deadline for each admission in milliseconds
        #[arg(long, env = "ALERT_GATE_ADMIT_TIMEOUT_MS", default_value = "5000")]
        admit_timeout_ms: u64,
    },

    /// Print stored gate state and alert record for a key
    Inspect {
        /// Data directory of a file store
        #[arg(long, env = "ALERT_GATE_DATA_DIR", default_value = "/data/alert-gate")]
        data_dir: PathBuf,

        /// Producer integration name
        #[arg(long)]
        source: String,

        /// Alert fingerprint
        #[arg(long)]
        fingerprint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("alert_gate=debug,tower_http=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("alert_gate=info,warn"))
    };

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match cli.command {
        Commands::Serve {
            listen,
            store,
            data_dir,
            policy_file,
            admit_timeout_ms,
        } => {
            let policies = match policy_file {
                Some(path) => PolicyTable::load(&path)
                    .with_context(|| format!("Failed to load policies from {}", path.display()))?,
                None => PolicyTable::default(),
            };
            let config = GateConfig {
                listen,
                store,
                data_dir,
                admit_timeout: Duration::from_millis(admit_timeout_ms),
                policies,
            };
            run_serve(config).await
        }
        Commands::Inspect {
            data_dir,
            source,
            fingerprint,
        } => run_inspect(data_dir, &source, &fingerprint).await,
    }
}

async fn run_serve(config: GateConfig) -> Result<()> {
    tracing::info!(
        listen = %config.listen,
        store = ?config.store,
        data_dir = %config.data_dir.display(),
        admit_timeout_ms = config.admit_timeout.as_millis() as u64,
        sources = config.policies.sources.len(),
        "Starting alert gate"
    );

    let store: Arc<dyn StateStore> = match config.store {
        StoreBackend::Memory => Arc::new(MemoryStateStore::new()),
        StoreBackend::File => Arc::new(
            FileStateStore::open(&config.data_dir)
                .await
                .context("Failed to open file state store")?,
        ),
    };

    let gate = AdmissionGate::builder()
        .store(store)
        .deadline(config.admit_timeout)
        .build()
        .context("Failed to build admission gate")?;

    let state = Arc::new(ServerState::new(gate, config.policies));
    run_server(state, &config.listen).await
}

async fn run_inspect(data_dir: PathBuf, source: &str, fingerprint: &str) -> Result<()> {
    let key = GateKey::new(source, fingerprint)?;
    let store = FileStateStore::open_existing(data_dir).await?;

    println!("{} {}", "Gate".bold(), key.to_string().cyan());
    match store.gate_state(&key).await? {
        Some(state) => {
            println!("  first seen:       {}", state.first_seen.to_rfc3339());
            println!("  last seen:        {}", state.last_seen.to_rfc3339());
            println!("  count:            {}", state.count);
            match state.suppressed_until {
                Some(until) if state.is_suppressed_at(chrono::Utc::now()) => {
                    println!("  suppressed until: {}", until.to_rfc3339().yellow());
                }
                Some(until) => {
                    println!("  suppressed until: {} (expired)", until.to_rfc3339().dimmed());
                }
                None => println!("  suppressed until: {}", "-".dimmed()),
            }
        }
        None => println!("  {}", "no state recorded".dimmed()),
    }

    println!("{} {}", "Alert".bold(), key.fingerprint().cyan());
    match store.alert(key.fingerprint()).await? {
        Some(record) => {
            let status = match record.status {
                alert_gate::AlertStatus::Firing => record.status.as_str().red(),
                alert_gate::AlertStatus::Resolved => record.status.as_str().green(),
            };
            println!("  status:     {status}");
            println!("  started at: {}", record.started_at.to_rfc3339());
            println!("  updated at: {}", record.updated_at.to_rfc3339());
            println!("  payload:    {}", serde_json::to_string(&record.payload)?);
        }
        None => println!("  {}", "no record".dimmed()),
    }

    Ok(())
}
