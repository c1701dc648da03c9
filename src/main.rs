//! evap-replay binary
//!
//! Loads a CSV of evaporator sensor readings and replays it, one row per
//! tick, to a scoring service over WebSocket. Recommended settings coming
//! back are printed to stdout as JSON lines; logs go to stderr.
//!
//! Usage:
//!   evap-replay --dataset data/plant.csv --endpoint ws://localhost:8000/ws
//!
//! Environment:
//!   REPLAY_ENDPOINT - Scoring service URL (default: ws://localhost:8000/ws)
//!   REPLAY_DATASET - CSV file to replay
//!   REPLAY_INTERVAL_MS - Send cadence (default: 1000)
//!   REPLAY_AUTO_START - Start sending once connected (default: true)
//!   REPLAY_SCHEMA_FIELDS - Comma-separated schema override
//!   REPLAY_MAX_MESSAGE_BYTES - Inbound message limit (default: 16 MiB)
//!   REPLAY_EXIT_ON_FINISH - Exit after the last row (default: false)
//!
//! Commands on stdin: start, stop, step, restart, status, quit.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use evap_replay::connection::{MemoryTransport, Transport, WsTransport};
use evap_replay::dataset::Dataset;
use evap_replay::models::SensorSchema;
use evap_replay::replay::ReplayScheduler;
use evap_replay::{Command, ControllerOptions, ReplayConfig, ReplayController, ViewState};

#[derive(Parser, Debug)]
#[command(name = "evap-replay")]
#[command(about = "Replay evaporator sensor data to a scoring service over WebSocket")]
struct Args {
    /// Scoring service WebSocket URL
    #[arg(long)]
    endpoint: Option<String>,

    /// CSV dataset to replay
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Send cadence in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Start sending as soon as the connection opens (true/false)
    #[arg(long, value_parser = clap::builder::BoolishValueParser::new())]
    auto_start: Option<bool>,

    /// Comma-separated sensor field names (default: evaporator schema)
    #[arg(long)]
    schema_fields: Option<String>,

    /// Exit once the dataset is exhausted or the connection is gone
    #[arg(long)]
    exit_on_finish: bool,

    /// Seconds to wait for late predictions after the last row
    #[arg(long, default_value = "2")]
    finish_grace_secs: u64,

    /// Replay against an in-memory link instead of the network
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn apply(&self, mut config: ReplayConfig) -> Result<ReplayConfig> {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(dataset) = &self.dataset {
            config.dataset = Some(dataset.clone());
        }
        if let Some(ms) = self.interval_ms {
            config.interval = Duration::from_millis(ms);
        }
        if let Some(auto_start) = self.auto_start {
            config.auto_start = auto_start;
        }
        if let Some(fields) = &self.schema_fields {
            let schema = SensorSchema::from_fields(fields.split(','));
            anyhow::ensure!(!schema.is_empty(), "--schema-fields names no fields");
            config.schema = schema;
        }
        if self.exit_on_finish {
            config.exit_on_finish = true;
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = args.apply(ReplayConfig::from_env()?)?;

    let dataset_path = config
        .dataset
        .clone()
        .context("no dataset given: pass --dataset or set REPLAY_DATASET")?;
    let dataset = Dataset::load_csv(&dataset_path)
        .with_context(|| format!("failed to load dataset {}", dataset_path.display()))?;

    info!("🚀 Starting evap-replay");
    info!("  Endpoint: {}", config.endpoint);
    info!("  Rows: {}", dataset.len());
    info!("  Interval: {}ms", config.interval.as_millis());
    info!("  Schema fields: {}", config.schema.len());
    if args.dry_run {
        info!("  Dry run: frames stay in memory");
    }

    let scheduler = ReplayScheduler::new(dataset, config.schema.clone(), config.interval);
    let options = ControllerOptions {
        endpoint: config.endpoint.clone(),
        auto_start: config.auto_start,
        exit_on_finish: config.exit_on_finish,
        finish_grace: Duration::from_secs(args.finish_grace_secs),
    };

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    spawn_stdin_commands(cmd_tx.clone())?;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(Command::Shutdown).await;
        }
    });

    if args.dry_run {
        let controller = ReplayController::new(MemoryTransport::auto_open(), scheduler, options);
        run_session(controller, cmd_rx).await;
    } else {
        let transport = WsTransport::new(config.transport_config());
        let controller = ReplayController::new(transport, scheduler, options);
        run_session(controller, cmd_rx).await;
    }

    Ok(())
}

async fn run_session<T: Transport>(
    mut controller: ReplayController<T>,
    commands: mpsc::Receiver<Command>,
) {
    let printer = tokio::spawn(print_predictions(controller.subscribe_view()));
    controller.run(commands).await;
    // Dropping the controller closes the view channel and ends the printer.
    drop(controller);
    let _ = printer.await;
}

/// Print one JSON line per prediction received, repeats included.
async fn print_predictions(mut view: watch::Receiver<ViewState>) {
    let mut printed = 0;
    while view.changed().await.is_ok() {
        let state = view.borrow_and_update().clone();
        if state.predictions_received == printed {
            continue;
        }
        printed = state.predictions_received;
        match serde_json::to_string(&state) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode view"),
        }
    }
}

/// Operator commands from stdin, read on a detached thread.
fn spawn_stdin_commands(tx: mpsc::Sender<Command>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if tx.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e} (try start, stop, step, restart, status, quit)"),
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evap_replay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
