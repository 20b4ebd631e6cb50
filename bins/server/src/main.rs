//! cmsrx - CMS receiver emulator.
//!
//! Starts one emulated receiver (or all configured ones), the stdin
//! command intake, and the loopback command socket. Runs until Ctrl-C,
//! then drains open connections and exits.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cmsrx::command::CommandStation;
use cmsrx::config::Config;
use cmsrx::logging::{self, LogConfig};
use cmsrx::media::MediaSink;
use cmsrx::mode::ModeRegistry;
use cmsrx::receiver::ReceiverKind;
use cmsrx::server::ReceiverServer;

#[derive(Parser)]
#[command(name = "cmsrx", version, about = "CMS receiver emulator")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Directory for saved media files.
    #[arg(long, default_value = "log_media")]
    media_root: PathBuf,

    /// Directory for rotating log files.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Disable the loopback command socket.
    #[arg(long)]
    no_command_socket: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the SIA-DC09 / ADM-CID receiver.
    #[command(name = "sia-dcs")]
    SiaDcs,

    /// Run the MASXML receiver.
    Masxml,

    /// Run the Manitou MASXML receiver.
    Manitou,

    /// Run the Micro Key receiver.
    Microkey,

    /// Run the Sentinel receiver.
    Sentinel,

    /// Run every receiver with a configured port.
    All,
}

impl Command {
    fn receivers(&self, config: &Config) -> Vec<ReceiverKind> {
        match self {
            Command::SiaDcs => vec![ReceiverKind::SiaDcs],
            Command::Masxml => vec![ReceiverKind::Masxml],
            Command::Manitou => vec![ReceiverKind::Manitou],
            Command::Microkey => vec![ReceiverKind::Microkey],
            Command::Sentinel => vec![ReceiverKind::Sentinel],
            Command::All => config.configured_receivers(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let log = logging::init(&LogConfig::new(&config.logging.level, &cli.log_dir))
        .context("initializing logging")?;

    let receivers = cli.command.receivers(&config);
    anyhow::ensure!(!receivers.is_empty(), "no receivers configured");

    let modes = ModeRegistry::new();
    let media = MediaSink::new(&cli.media_root);
    let cancel = CancellationToken::new();

    // Fail fast on missing ports before binding anything.
    let mut planned = Vec::new();
    for kind in &receivers {
        let port = config.port_for(*kind)?;
        planned.push((*kind, port));
    }

    let mut servers = tokio::task::JoinSet::new();
    for (kind, port) in planned {
        let server = ReceiverServer::bind(kind, port, modes.handle(kind), media.clone())
            .await
            .with_context(|| format!("binding {kind} on port {port}"))?;
        let cancel = cancel.clone();
        servers.spawn(async move {
            if let Err(e) = server.serve(cancel).await {
                error!("({kind}) server failed: {e}");
            }
        });
    }

    let targets = receivers
        .iter()
        .map(|&kind| (kind, modes.handle(kind)))
        .collect();
    let station = CommandStation::new(targets, log);

    tokio::spawn(station.clone().run_stdin(cancel.clone()));
    if !cli.no_command_socket {
        let addr = config.command_addr();
        let station = station.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = station.serve(addr, cancel).await {
                error!("[CMD] command server failed: {e}");
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    cancel.cancel();

    while servers.join_next().await.is_some() {}
    info!("all receivers stopped");
    Ok(())
}
