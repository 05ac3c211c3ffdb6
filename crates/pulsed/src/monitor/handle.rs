//! Client interface for interacting with the MonitorActor.
//!
//! The `MonitorHandle` provides a cheap-to-clone interface for sending
//! commands to the monitor actor and observing its published state.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `MonitorError::ChannelClosed`

use pulse_core::{SessionId, SessionView};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::commands::{MonitorCommand, MonitorError, MonitorEvent, PermissionAlert};
use crate::discovery::DiscoveryResult;

// ============================================================================
// Monitor Handle
// ============================================================================

/// Handle for interacting with the monitor actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// Queries communicate with the actor via channels; the aggregated
/// activity signal and the permission list are `watch` channels that can be
/// read without a round trip.
///
/// # Usage
///
/// ```ignore
/// let handle = spawn_monitor(config, discovery, locator);
///
/// // Drive an activity indicator
/// let mut activity = handle.activity();
/// while activity.changed().await.is_ok() {
///     let active = *activity.borrow();
///     // Show or hide the indicator
/// }
/// ```
#[derive(Clone)]
pub struct MonitorHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<MonitorCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<MonitorEvent>,

    activity: watch::Receiver<bool>,
    alerts: watch::Receiver<Vec<PermissionAlert>>,
}

impl MonitorHandle {
    /// Create a new monitor handle.
    pub fn new(
        sender: mpsc::Sender<MonitorCommand>,
        event_sender: broadcast::Sender<MonitorEvent>,
        activity: watch::Receiver<bool>,
        alerts: watch::Receiver<Vec<PermissionAlert>>,
    ) -> Self {
        Self {
            sender,
            event_sender,
            activity,
            alerts,
        }
    }

    /// Subscribe to session events.
    ///
    /// Returns a broadcast receiver that will receive all future events.
    /// Events sent before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_sender.subscribe()
    }

    /// Observable aggregated activity signal.
    pub fn activity(&self) -> watch::Receiver<bool> {
        self.activity.clone()
    }

    /// Current value of the aggregated activity signal.
    pub fn has_activity(&self) -> bool {
        *self.activity.borrow()
    }

    /// Observable list of sessions blocked on permission.
    pub fn permission_alerts(&self) -> watch::Receiver<Vec<PermissionAlert>> {
        self.alerts.clone()
    }

    /// Get a single session by ID.
    ///
    /// # Errors
    ///
    /// - `MonitorError::ChannelClosed` if the actor has shut down
    pub async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionView>, MonitorError> {
        self.request(|respond_to| MonitorCommand::GetSession {
            session_id,
            respond_to,
        })
        .await
    }

    /// Get all sessions, sorted by ID.
    ///
    /// # Errors
    ///
    /// - `MonitorError::ChannelClosed` if the actor has shut down
    pub async fn get_all_sessions(&self) -> Result<Vec<SessionView>, MonitorError> {
        self.request(|respond_to| MonitorCommand::GetAllSessions { respond_to })
            .await
    }

    /// Get the selected session, if any.
    ///
    /// # Errors
    ///
    /// - `MonitorError::ChannelClosed` if the actor has shut down
    pub async fn selected_session(&self) -> Result<Option<SessionView>, MonitorError> {
        self.request(|respond_to| MonitorCommand::GetSelected { respond_to })
            .await
    }

    /// Run a discovery pass now.
    ///
    /// # Errors
    ///
    /// - `MonitorError::Discovery` if the discovery source is unreadable
    /// - `MonitorError::ChannelClosed` if the actor has shut down
    pub async fn refresh(&self) -> Result<DiscoveryResult, MonitorError> {
        self.request(|respond_to| MonitorCommand::Refresh { respond_to })
            .await?
    }

    /// Select a session, or clear the selection with `None`.
    ///
    /// # Errors
    ///
    /// - `MonitorError::SessionNotFound` if the session is not monitored
    /// - `MonitorError::ChannelClosed` if the actor has shut down
    pub async fn select_session(&self, session_id: Option<SessionId>) -> Result<(), MonitorError> {
        self.request(|respond_to| MonitorCommand::SelectSession {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Tell the monitor a session's transcript grew.
    ///
    /// OS watchers do this on their own; this entry point serves setups
    /// without watchers. Unknown session ids are ignored by the actor.
    ///
    /// # Errors
    ///
    /// - `MonitorError::ChannelClosed` if the actor has shut down
    pub async fn notify_file_grew(&self, session_id: SessionId) -> Result<(), MonitorError> {
        self.sender
            .send(MonitorCommand::FileGrew { session_id })
            .await
            .map_err(|_| MonitorError::ChannelClosed)
    }

    /// Detach a session until it next appears in discovery.
    ///
    /// # Errors
    ///
    /// - `MonitorError::SessionNotFound` if the session is not monitored
    /// - `MonitorError::ChannelClosed` if the actor has shut down
    pub async fn detach(&self, session_id: SessionId) -> Result<(), MonitorError> {
        self.request(|respond_to| MonitorCommand::Detach {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Detach every session and stop the actor.
    ///
    /// # Errors
    ///
    /// - `MonitorError::ChannelClosed` if the actor has already shut down
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        self.request(|respond_to| MonitorCommand::Shutdown { respond_to })
            .await
    }

    /// Returns true once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> Result<T, MonitorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;

        rx.await.map_err(|_| MonitorError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_handle() -> (MonitorHandle, mpsc::Receiver<MonitorCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(8);
        let (_activity_tx, activity_rx) = watch::channel(false);
        let (_alerts_tx, alerts_rx) = watch::channel(Vec::new());
        (MonitorHandle::new(tx, event_tx, activity_rx, alerts_rx), rx)
    }

    #[tokio::test]
    async fn test_closed_actor_maps_to_channel_closed() {
        let (handle, rx) = detached_handle();
        drop(rx);

        assert!(handle.is_closed());
        assert!(matches!(
            handle.get_all_sessions().await,
            Err(MonitorError::ChannelClosed)
        ));
        assert!(matches!(
            handle.notify_file_grew(SessionId::new("s")).await,
            Err(MonitorError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_dropped_reply_maps_to_channel_closed() {
        let (handle, mut rx) = detached_handle();

        tokio::spawn(async move {
            // Receive and drop the command without answering
            let _ = rx.recv().await;
        });

        assert!(matches!(
            handle.refresh().await,
            Err(MonitorError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_watch_values_readable_without_actor() {
        let (handle, _rx) = detached_handle();
        assert!(!handle.has_activity());
        assert!(handle.permission_alerts().borrow().is_empty());
    }
}
