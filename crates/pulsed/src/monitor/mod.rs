//! Session monitor using the Actor pattern.
//!
//! The monitor is the single owner of every live session: its descriptor,
//! derived state, transcript tailer and pending permission checks. All
//! mutations happen inside one task, which makes the serialized-context
//! discipline structural.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  FileGrew    ┌─────────────────┐  MonitorEvent  ┌──────────────┐
//! │  notify watcher │─────────────▶│                 │───────────────▶│  broadcast   │
//! └─────────────────┘  (weak tx)   │                 │                └──────────────┘
//! ┌─────────────────┐ DiscoveryTick│  MonitorActor   │  has_activity  ┌──────────────┐
//! │ discovery ticker│─────────────▶│                 │───────────────▶│    watch     │
//! └─────────────────┘              │ sweep / idle /  │                └──────────────┘
//! ┌─────────────────┐   queries    │ grace timers    │  alerts        ┌──────────────┐
//! │  MonitorHandle  │─────────────▶│                 │───────────────▶│    watch     │
//! └─────────────────┘              └─────────────────┘                └──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::{MonitorActor, MAX_SESSIONS};
pub use commands::{DetachReason, MonitorCommand, MonitorError, MonitorEvent, PermissionAlert};
pub use handle::MonitorHandle;

use crate::config::MonitorConfig;
use crate::discovery::{
    LockFileDiscovery, ProjectsDirLocator, SessionDiscovery, SysinfoLiveness, TranscriptLocator,
};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 100;

/// Spawn the monitor actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command, event and watch channels
/// 2. Spawns the MonitorActor on a tokio task
/// 3. Spawns the discovery ticker (first pass runs immediately)
/// 4. Returns a MonitorHandle for client use
///
/// The actor stops when [`MonitorHandle::shutdown`] is called or every
/// handle is dropped; the ticker stops with it.
///
/// # Example
///
/// ```no_run
/// use pulsed::config::MonitorConfig;
/// use pulsed::monitor::spawn_default_monitor;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_default_monitor(MonitorConfig::default());
///     let sessions = handle.get_all_sessions().await;
/// }
/// ```
pub fn spawn_monitor(
    config: MonitorConfig,
    discovery: Box<dyn SessionDiscovery>,
    locator: Box<dyn TranscriptLocator>,
) -> MonitorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (activity_tx, activity_rx) = watch::channel(false);
    let (alerts_tx, alerts_rx) = watch::channel(Vec::new());
    let cancel = CancellationToken::new();

    let discovery_interval = config.discovery_interval();

    let actor = MonitorActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        config,
        discovery,
        locator,
        event_tx.clone(),
        activity_tx,
        alerts_tx,
        cancel.clone(),
    );
    tokio::spawn(actor.run());

    spawn_discovery_ticker(cmd_tx.downgrade(), discovery_interval, cancel);

    MonitorHandle::new(cmd_tx, event_tx, activity_rx, alerts_rx)
}

/// Spawn a monitor wired to lock-file discovery, OS liveness and the
/// projects-directory transcript layout named in `config`.
pub fn spawn_default_monitor(config: MonitorConfig) -> MonitorHandle {
    let discovery = LockFileDiscovery::new(config.lock_dir.clone(), SysinfoLiveness::new());
    let locator = ProjectsDirLocator::new(config.projects_dir.clone());
    spawn_monitor(config, Box::new(discovery), Box::new(locator))
}

/// Spawn a background task that triggers periodic discovery.
///
/// Holds only a weak sender so it never keeps the actor alive.
fn spawn_discovery_ticker(
    sender: mpsc::WeakSender<MonitorCommand>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Discovery ticker stopping: monitor cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let Some(sender) = sender.upgrade() else {
                debug!("Discovery ticker stopping: monitor channel closed");
                break;
            };

            // Fire-and-forget; exit if the actor stopped
            if sender.send(MonitorCommand::DiscoveryTick).await.is_err() {
                debug!("Discovery ticker stopping: monitor channel closed");
                break;
            }
        }
    });
}
