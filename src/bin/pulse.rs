//! pulse - live activity monitor for coding-agent sessions
//!
//! Discovers running agent sessions, tails their transcripts and reports
//! activity and permission stalls.
//!
//! # Usage
//!
//! ```bash
//! # Follow every session until Ctrl+C
//! pulse watch
//!
//! # One discovery pass, sessions printed as JSON
//! pulse snapshot
//!
//! # Print the effective configuration
//! pulse config
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_core::SessionView;
use pulsed::config::MonitorConfig;
use pulsed::monitor::{spawn_default_monitor, MonitorEvent, MonitorHandle};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// pulse - coding-agent session monitor
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about)]
struct Args {
    /// Configuration file (defaults to ~/.config/pulse/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow sessions and print every status change
    Watch,
    /// Run one discovery pass and print the sessions as JSON
    Snapshot,
    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<PathBuf>) -> Result<MonitorConfig> {
    let path = path.unwrap_or_else(MonitorConfig::default_path);
    MonitorConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config)?;

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => run_watch(config),
        Command::Snapshot => run_snapshot(config),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pulse=info".parse()?)
                .add_directive("pulsed=info".parse()?)
                .add_directive("pulse_transcript=info".parse()?)
                .add_directive("pulse_core=info".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn run_snapshot(config: MonitorConfig) -> Result<()> {
    init_tracing()?;

    let handle = spawn_default_monitor(config);
    handle.refresh().await.context("Discovery failed")?;
    let sessions = handle.get_all_sessions().await?;
    handle.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&sessions)?);
    Ok(())
}

#[tokio::main]
async fn run_watch(config: MonitorConfig) -> Result<()> {
    init_tracing()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        lock_dir = %config.lock_dir.display(),
        projects_dir = %config.projects_dir.display(),
        "pulse starting"
    );

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let handle = spawn_default_monitor(config);
    let mut events = handle.subscribe();

    for session in handle.get_all_sessions().await? {
        print_session("attached", &session);
    }

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&handle, event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => {
                    warn!("Monitor stopped unexpectedly");
                    break;
                }
            },
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Monitor already stopped");
    }

    info!("pulse stopped");
    Ok(())
}

fn print_event(handle: &MonitorHandle, event: MonitorEvent) {
    match event {
        MonitorEvent::Attached { session } => print_session("attached", &session),
        MonitorEvent::Updated { session } => print_session("updated", &session),
        MonitorEvent::Detached { session_id, reason } => {
            println!("{:<8} {:<10} {reason}", session_id.short(), "detached");
        }
        MonitorEvent::ActivityChanged(active) => {
            let alerts = handle.permission_alerts().borrow().len();
            let state = if active { "on" } else { "off" };
            println!("activity {state} ({alerts} awaiting permission)");
        }
    }
}

fn print_session(action: &str, session: &SessionView) {
    let mut line = format!(
        "{:<8} {:<10} {:<20} {}",
        session.id.short(),
        action,
        session.status_label,
        session.ide_name
    );
    if let Some(tool) = &session.pending_permission_tool {
        line.push_str(&format!(" [waiting on {tool}]"));
    } else if let Some(tool) = session.active_tools.first() {
        line.push_str(&format!(" [{}]", tool.name));
    }
    println!("{line}");
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
