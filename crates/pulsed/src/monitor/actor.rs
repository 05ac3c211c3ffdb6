//! Monitor actor - owns all session state and processes commands.
//!
//! The MonitorActor is the single owner of session state in the system.
//! Client commands, watcher notifications and every timer are serialized
//! through one `select!` loop, so no two handlers ever run concurrently.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::{HashMap, HashSet};

use pulse_core::{SessionDescriptor, SessionId, SessionState, SessionView};
use pulse_transcript::Effect;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::commands::{DetachReason, MonitorCommand, MonitorError, MonitorEvent, PermissionAlert};
use crate::config::MonitorConfig;
use crate::debounce::IdleDebouncer;
use crate::discovery::{DiscoveryResult, SessionDiscovery, TranscriptLocator};
use crate::tailer::SessionTailer;
use crate::watchdog::PermissionWatchdog;

// ============================================================================
// Resource Limits
// ============================================================================

/// Maximum number of sessions monitored at once.
pub const MAX_SESSIONS: usize = 100;

// ============================================================================
// Monitored Session
// ============================================================================

/// Everything the monitor holds for one live session.
struct MonitoredSession {
    descriptor: SessionDescriptor,
    state: SessionState,
    tailer: SessionTailer,
}

impl MonitoredSession {
    fn view(&self) -> SessionView {
        SessionView::from_state(&self.descriptor, &self.state)
    }
}

// ============================================================================
// Monitor Actor
// ============================================================================

/// The monitor actor - owns all session state.
///
/// # Ownership
///
/// The actor owns:
/// - `sessions`: descriptor, derived state and tailer per session id
/// - `watchdog`: pending permission checks
/// - `debouncer`: the shared idle timer and aggregate hysteresis
///
/// Watchers hold only a weak sender, so they never keep the actor alive.
pub struct MonitorActor {
    /// Command receiver
    receiver: mpsc::Receiver<MonitorCommand>,

    /// Weak sender handed to file watchers
    watcher_sender: mpsc::WeakSender<MonitorCommand>,

    config: MonitorConfig,
    discovery: Box<dyn SessionDiscovery>,
    locator: Box<dyn TranscriptLocator>,

    sessions: HashMap<SessionId, MonitoredSession>,
    selected: Option<SessionId>,

    watchdog: PermissionWatchdog,
    debouncer: IdleDebouncer,

    /// Permission sweep, armed only while checks are pending
    sweep: Option<Interval>,

    /// Event publisher for subscribers
    event_publisher: broadcast::Sender<MonitorEvent>,

    /// Aggregated activity signal
    activity: watch::Sender<bool>,

    /// Sessions currently blocked on permission
    alerts: watch::Sender<Vec<PermissionAlert>>,

    /// Cancelled when the actor stops, ending the ticker tasks
    cancel: CancellationToken,
}

impl MonitorActor {
    /// Creates a new monitor actor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: mpsc::Receiver<MonitorCommand>,
        watcher_sender: mpsc::WeakSender<MonitorCommand>,
        config: MonitorConfig,
        discovery: Box<dyn SessionDiscovery>,
        locator: Box<dyn TranscriptLocator>,
        event_publisher: broadcast::Sender<MonitorEvent>,
        activity: watch::Sender<bool>,
        alerts: watch::Sender<Vec<PermissionAlert>>,
        cancel: CancellationToken,
    ) -> Self {
        let watchdog = PermissionWatchdog::new(config.permission_delay());
        let debouncer = IdleDebouncer::new(config.idle_delay(), config.grace_window());

        Self {
            receiver,
            watcher_sender,
            config,
            discovery,
            locator,
            sessions: HashMap::new(),
            selected: None,
            watchdog,
            debouncer,
            sweep: None,
            event_publisher,
            activity,
            alerts,
            cancel,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands and timers until a `Shutdown` command arrives or
    /// every strong sender is dropped.
    pub async fn run(mut self) {
        info!("Session monitor starting");

        loop {
            let idle_at = self.debouncer.idle_deadline();
            let grace_at = self.debouncer.grace_expiry();

            tokio::select! {
                // Commands first: a completion queued in the same tick as a
                // sweep is applied before the sweep looks at the tool.
                biased;

                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                _ = next_sweep(&mut self.sweep) => {
                    self.handle_command(MonitorCommand::PermissionSweepTick);
                }
                _ = sleep_until_some(idle_at) => {
                    self.handle_command(MonitorCommand::IdleTick);
                }
                _ = sleep_until_some(grace_at) => self.refresh_activity(),
            }
        }

        self.teardown_all(DetachReason::Shutdown);
        self.cancel.cancel();
        info!("Session monitor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    ///
    /// Returns `false` when the actor should stop.
    fn handle_command(&mut self, cmd: MonitorCommand) -> bool {
        match cmd {
            MonitorCommand::FileGrew { session_id } => {
                self.handle_file_grew(&session_id);
            }
            MonitorCommand::DiscoveryTick => {
                if let Err(e) = self.handle_discovery() {
                    debug!(error = %e, "Discovery pass failed");
                }
                self.poll_sessions();
            }
            MonitorCommand::PermissionSweepTick => {
                self.handle_permission_sweep();
            }
            MonitorCommand::IdleTick => {
                self.handle_idle();
            }
            MonitorCommand::Refresh { respond_to } => {
                let result = self.handle_discovery();
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            MonitorCommand::SelectSession {
                session_id,
                respond_to,
            } => {
                let result = self.handle_select(session_id);
                let _ = respond_to.send(result);
            }
            MonitorCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.view_of(&session_id));
            }
            MonitorCommand::GetAllSessions { respond_to } => {
                let _ = respond_to.send(self.all_views());
            }
            MonitorCommand::GetSelected { respond_to } => {
                let view = self
                    .selected
                    .clone()
                    .and_then(|session_id| self.view_of(&session_id));
                let _ = respond_to.send(view);
            }
            MonitorCommand::Detach {
                session_id,
                respond_to,
            } => {
                let result = if self.teardown(&session_id, DetachReason::Explicit) {
                    self.publish_alerts();
                    self.refresh_activity();
                    Ok(())
                } else {
                    Err(MonitorError::SessionNotFound(session_id))
                };
                let _ = respond_to.send(result);
            }
            MonitorCommand::Shutdown { respond_to } => {
                info!("Shutdown requested");
                self.teardown_all(DetachReason::Shutdown);
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------------
    // Transcript growth
    // ------------------------------------------------------------------------

    fn handle_file_grew(&mut self, session_id: &SessionId) {
        let now = Instant::now();

        // Stray notifications for torn-down sessions land here.
        let Some(session) = self.sessions.get_mut(session_id) else {
            trace!(session_id = %session_id, "Ignoring growth of unmonitored session");
            return;
        };

        let read = match session.tailer.read_new(&mut session.state) {
            Ok(read) => read,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Transcript read failed");
                return;
            }
        };

        if read.rebootstrapped {
            self.watchdog.cancel_session(session_id);
            // A renamed-over file leaves the old watch on the old inode
            if self.config.watch_transcripts {
                install_watch(&self.watcher_sender, &mut session.tailer);
            }
        } else if !read.has_activity() {
            return;
        }

        for effect in &read.effects {
            match effect {
                Effect::ToolStarted { id, .. } => {
                    self.watchdog.on_tool_started(session_id, id, now);
                }
                Effect::ToolCompleted { id, .. } => {
                    self.watchdog
                        .on_tool_completed(session_id, id, now, &mut session.state);
                }
                _ => {}
            }
        }

        if read.has_activity() {
            self.debouncer.record_activity(now);
        }

        let view = session.view();
        self.publish(MonitorEvent::Updated {
            session: Box::new(view),
        });
        self.sync_sweep_timer();
        self.publish_alerts();
        self.refresh_activity();
    }

    /// Re-reads every session on a discovery tick.
    ///
    /// Covers wakeups the watchers never delivered: a full queue, a write
    /// between attach and watch, a failed watch, or a file replaced by
    /// rename. An unchanged transcript costs two metadata calls.
    fn poll_sessions(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for session_id in ids {
            self.handle_file_grew(&session_id);
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn handle_permission_sweep(&mut self) {
        let now = Instant::now();
        let changes = self.watchdog.sweep(
            now,
            self.sessions
                .iter_mut()
                .map(|(id, session)| (id, &mut session.state)),
        );

        for (session_id, _) in &changes {
            if let Some(view) = self.sessions.get(session_id).map(MonitoredSession::view) {
                self.publish(MonitorEvent::Updated {
                    session: Box::new(view),
                });
            }
        }

        self.sync_sweep_timer();
        if !changes.is_empty() {
            self.publish_alerts();
        }
        self.refresh_activity();
    }

    fn handle_idle(&mut self) {
        let now = Instant::now();

        // Whatever was thinking was active up to this instant.
        let any_active = self.any_active();
        self.debouncer.evaluate(now, any_active);
        self.debouncer.on_idle();

        let mut changed = Vec::new();
        for (session_id, session) in &mut self.sessions {
            if session.state.thinking && !session.state.needs_permission {
                session.state.thinking = false;
                session.state.touch();
                changed.push(session.view());
                debug!(session_id = %session_id, "Session idle");
            }
        }

        for view in changed {
            self.publish(MonitorEvent::Updated {
                session: Box::new(view),
            });
        }
        self.refresh_activity();
    }

    /// Arms the sweep while checks are pending, disarms it otherwise.
    fn sync_sweep_timer(&mut self) {
        match (self.watchdog.has_pending(), self.sweep.is_some()) {
            (true, false) => {
                let period = self.config.permission_check_interval();
                let mut sweep = interval_at(Instant::now() + period, period);
                sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.sweep = Some(sweep);
                debug!("Permission sweep armed");
            }
            (false, true) => {
                self.sweep = None;
                debug!("Permission sweep disarmed");
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Discovery and lifecycle
    // ------------------------------------------------------------------------

    fn handle_discovery(&mut self) -> Result<DiscoveryResult, MonitorError> {
        let descriptors = self
            .discovery
            .discover()
            .map_err(|e| MonitorError::Discovery(e.to_string()))?;

        let mut result = DiscoveryResult::default();
        let live: HashSet<SessionId> = descriptors.iter().map(|d| d.id.clone()).collect();

        let gone: Vec<SessionId> = self
            .sessions
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();
        for session_id in gone {
            if self.teardown(&session_id, DetachReason::Disappeared) {
                result.detached += 1;
            }
        }

        for descriptor in descriptors {
            if self.sessions.contains_key(&descriptor.id) {
                continue;
            }

            if self.sessions.len() >= MAX_SESSIONS {
                warn!(
                    session_id = %descriptor.id,
                    max = MAX_SESSIONS,
                    "Session limit reached, not monitoring"
                );
                result.failed += 1;
                continue;
            }

            match self.attach(descriptor) {
                Ok(()) => result.attached += 1,
                Err(e) => {
                    // Retried on the next pass
                    debug!(error = %e, "Session not attached");
                    result.failed += 1;
                }
            }
        }

        result.live = u32::try_from(self.sessions.len()).unwrap_or(u32::MAX);

        if result.changed() {
            info!(
                attached = result.attached,
                detached = result.detached,
                failed = result.failed,
                live = result.live,
                "Discovery pass applied"
            );
            self.sync_sweep_timer();
            self.publish_alerts();
            self.refresh_activity();
        }

        Ok(result)
    }

    fn attach(&mut self, descriptor: SessionDescriptor) -> Result<(), MonitorError> {
        let session_id = descriptor.id.clone();
        let path = self
            .locator
            .locate(&descriptor)
            .ok_or_else(|| MonitorError::TranscriptNotFound(session_id.clone()))?;

        let mut state = SessionState::new();
        let mut tailer = SessionTailer::attach(
            session_id.clone(),
            path,
            self.config.bootstrap_window_bytes,
            &mut state,
        )
        .map_err(|e| MonitorError::AttachFailed {
            session_id: session_id.clone(),
            message: e.to_string(),
        })?;

        if self.config.watch_transcripts {
            install_watch(&self.watcher_sender, &mut tailer);
        }

        let session = MonitoredSession {
            descriptor,
            state,
            tailer,
        };
        let view = session.view();
        self.sessions.insert(session_id.clone(), session);

        info!(
            session_id = %session_id,
            pid = view.pid,
            ide = %view.ide_name,
            "Session attached"
        );
        self.publish(MonitorEvent::Attached {
            session: Box::new(view),
        });
        Ok(())
    }

    /// Detaches a session and forgets it.
    ///
    /// Returns `false` if the session was not monitored.
    fn teardown(&mut self, session_id: &SessionId, reason: DetachReason) -> bool {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return false;
        };

        session.tailer.detach();
        let cancelled = self.watchdog.cancel_session(session_id);
        if self.selected.as_ref() == Some(session_id) {
            self.selected = None;
        }
        self.sync_sweep_timer();

        info!(
            session_id = %session_id,
            reason = %reason,
            cancelled_checks = cancelled,
            "Session detached"
        );
        self.publish(MonitorEvent::Detached {
            session_id: session_id.clone(),
            reason,
        });
        true
    }

    fn teardown_all(&mut self, reason: DetachReason) {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for session_id in ids {
            self.teardown(&session_id, reason);
        }
        self.debouncer.reset();
        self.publish_alerts();
        self.refresh_activity();
    }

    // ------------------------------------------------------------------------
    // Selection and queries
    // ------------------------------------------------------------------------

    fn handle_select(&mut self, session_id: Option<SessionId>) -> Result<(), MonitorError> {
        match session_id {
            Some(session_id) if !self.sessions.contains_key(&session_id) => {
                Err(MonitorError::SessionNotFound(session_id))
            }
            selection => {
                debug!(selected = ?selection, "Selection changed");
                self.selected = selection;
                Ok(())
            }
        }
    }

    fn view_of(&self, session_id: &SessionId) -> Option<SessionView> {
        let selected = self.selected.as_ref() == Some(session_id);
        self.sessions
            .get(session_id)
            .map(|session| session.view().with_selected(selected))
    }

    fn all_views(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self
            .sessions
            .iter()
            .map(|(id, session)| {
                session
                    .view()
                    .with_selected(self.selected.as_ref() == Some(id))
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    // ------------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------------

    fn any_active(&self) -> bool {
        self.sessions.values().any(|session| session.state.is_active())
    }

    /// Recomputes the aggregate signal and publishes it if it flipped.
    fn refresh_activity(&mut self) {
        let any_active = self.any_active();
        let active = self.debouncer.evaluate(Instant::now(), any_active);

        let flipped = self.activity.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });

        if flipped {
            info!(active, "Aggregate activity changed");
            self.publish(MonitorEvent::ActivityChanged(active));
        }
    }

    /// Republishes the permission list if it changed.
    fn publish_alerts(&mut self) {
        let mut alerts: Vec<PermissionAlert> = self
            .sessions
            .values()
            .filter(|session| session.state.needs_permission)
            .map(|session| PermissionAlert {
                session_id: session.descriptor.id.clone(),
                ide_name: session.descriptor.ide_name.clone(),
                tool_name: session
                    .state
                    .pending_permission_tool
                    .clone()
                    .unwrap_or_default(),
            })
            .collect();
        alerts.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        self.alerts.send_if_modified(move |current| {
            if *current == alerts {
                false
            } else {
                *current = alerts;
                true
            }
        });
    }

    fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.event_publisher.send(event);
    }
}

/// Points the tailer's OS watch at its transcript.
///
/// On failure the session is still read on every discovery tick.
fn install_watch(sender: &mpsc::WeakSender<MonitorCommand>, tailer: &mut SessionTailer) {
    let sender = sender.clone();
    let session_id = tailer.session_id().clone();
    let watched_id = session_id.clone();
    let installed = tailer.watch(move || {
        // Dropped when the actor is gone or the queue is full; the next
        // discovery tick reads the session anyway.
        if let Some(sender) = sender.upgrade() {
            let _ = sender.try_send(MonitorCommand::FileGrew {
                session_id: watched_id.clone(),
            });
        }
    });
    if let Err(e) = installed {
        warn!(
            session_id = %session_id,
            error = %e,
            "Watch failed, polling on discovery ticks"
        );
    }
}

/// Resolves on the next sweep tick, or never while the sweep is disarmed.
async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(sweep) => {
            sweep.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves at `deadline`, or never without one.
async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
