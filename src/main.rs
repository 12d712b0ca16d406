//! Querybot CLI - ClientQuery bridge daemon.
//!
//! This is the binary entry point. See the `querybot` library for the
//! core functionality.

use anyhow::Result;
use clap::{Parser, Subcommand};
use querybot::{Bridge, Config, Job, ModuleId, Responder, Router};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};

#[derive(Parser)]
#[command(name = "querybot")]
#[command(version)]
#[command(about = "ClientQuery bridge daemon for TeamSpeak chat-command automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge daemon.
    Run {
        /// Path to the configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration, then exit.
    Check {
        /// Path to the configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => run(config.as_deref()).await,
        Commands::Check { config } => check(config.as_deref()),
    }
}

/// Validate configuration and routing without touching the network.
fn check(path: Option<&Path>) -> Result<()> {
    let config = Config::load(path)?;
    config.validate()?;
    println!(
        "Configuration OK: {}:{}, {} events, {} commands",
        config.host,
        config.port,
        config.events.len(),
        config.command_routes.len()
    );
    if config.apikey.is_empty() {
        println!("Note: QUERYBOT_APIKEY is not set; `run` will refuse to start.");
    }
    Ok(())
}

/// Wire the queues, workers, and bridge, then run until shutdown.
async fn run(path: Option<&Path>) -> Result<()> {
    let config = Config::load(path)?;
    config.validate()?;
    if config.apikey.is_empty() {
        anyhow::bail!("No API key configured; set QUERYBOT_APIKEY");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown signal received");
            let _ = signal_tx.send(true);
        }
    });

    // Bounded module queues; the router blocks on a full queue rather
    // than dropping jobs.
    let capacity = config.queue_capacity;
    let (control_tx, control_rx) = mpsc::channel(capacity);
    let (chat_tx, chat_rx) = mpsc::channel(capacity);
    let (presence_tx, presence_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

    let queues = HashMap::from([
        (ModuleId::Control, control_tx),
        (ModuleId::Chat, chat_tx),
        (ModuleId::Presence, presence_tx),
    ]);
    let router = Router::new(config.routing_table(), queues, outbound_tx)?;

    // Reply worker with its own command session.
    let responder = Responder::new(config.session_config(), outbound_rx, shutdown_rx.clone());
    let responder_handle = tokio::spawn(responder.run());

    // Module consumers. These stubs log the jobs they receive; real
    // module implementations attach to the same queues.
    spawn_module_worker(ModuleId::Control, control_rx);
    spawn_module_worker(ModuleId::Chat, chat_rx);
    spawn_module_worker(ModuleId::Presence, presence_rx);

    log::info!(
        "Starting bridge to {}:{} ({} events registered for)",
        config.host,
        config.port,
        config.events.len()
    );

    let bridge = Bridge::new(&config, router, shutdown_rx);
    let result = bridge.run().await;

    // Stop the workers whether the bridge ended by shutdown or failure.
    let _ = shutdown_tx.send(true);
    let _ = responder_handle.await;

    result.map_err(Into::into)
}

/// Drain one module queue, logging each job.
///
/// The worker ends when the router (and with it the queue senders) goes
/// away; no explicit shutdown signal is needed.
fn spawn_module_worker(module: ModuleId, mut rx: mpsc::Receiver<Job>) {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Event { name, event, .. } => {
                    log::info!("[{module}] job {name:?} (handle {})", event.handle);
                }
                Job::Response { .. } => {
                    log::warn!("[{module}] unexpected response job");
                }
            }
        }
        log::debug!("[{module}] queue closed; worker exiting");
    });
}
