//! Monitor actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `MonitorActor`:
//! - `MonitorCommand`: Commands and timer events consumed by the actor
//! - `MonitorError`: Errors that can occur during monitor operations
//! - `MonitorEvent`: Events published by the monitor for subscribers
//! - `PermissionAlert`: Entries of the published permission list

use pulse_core::{SessionId, SessionView};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::discovery::DiscoveryResult;

// ============================================================================
// Monitor Commands
// ============================================================================

/// Commands sent to the monitor actor.
///
/// The first four variants are the actor's typed wake-ups. Queries carry a
/// oneshot channel for the response.
#[derive(Debug)]
pub enum MonitorCommand {
    /// A session's transcript grew. Sent by OS watchers.
    ///
    /// A no-op for sessions that are no longer monitored.
    FileGrew {
        /// Session whose transcript changed
        session_id: SessionId,
    },

    /// Run a discovery pass. Sent by the discovery ticker.
    DiscoveryTick,

    /// Evaluate pending permission checks. Dispatched by the actor's sweep
    /// interval.
    PermissionSweepTick,

    /// The shared idle timer expired. Dispatched by the actor's idle deadline.
    IdleTick,

    /// Run a discovery pass now and report what changed.
    Refresh {
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<DiscoveryResult, MonitorError>>,
    },

    /// Select a session for detail views, or clear the selection.
    ///
    /// # Errors
    /// - `MonitorError::SessionNotFound` if the session is not monitored
    SelectSession {
        /// Session to select, `None` to clear
        session_id: Option<SessionId>,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), MonitorError>>,
    },

    /// Get a single session by ID.
    GetSession {
        /// ID of the session to retrieve
        session_id: SessionId,
        /// Channel to send the result
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Get all sessions as views, sorted by ID.
    GetAllSessions {
        /// Channel to send the results
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Get the selected session.
    GetSelected {
        /// Channel to send the result
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Tear a session down until it next appears in discovery.
    ///
    /// # Errors
    /// - `MonitorError::SessionNotFound` if the session is not monitored
    Detach {
        /// ID of the session to detach
        session_id: SessionId,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), MonitorError>>,
    },

    /// Detach every session and stop the actor.
    Shutdown {
        /// Signalled once all sessions are torn down
        respond_to: oneshot::Sender<()>,
    },
}

// ============================================================================
// Monitor Errors
// ============================================================================

/// Errors that can occur during monitor operations.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    /// The requested session is not monitored.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// No transcript could be located for a session.
    #[error("no transcript found for session {0}")]
    TranscriptNotFound(SessionId),

    /// The transcript could not be attached.
    #[error("failed to attach session {session_id}: {message}")]
    AttachFailed {
        session_id: SessionId,
        message: String,
    },

    /// The discovery source could not be read.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Monitor Events
// ============================================================================

/// Events published by the monitor to subscribers.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A session was attached (after its history replay).
    Attached {
        /// The attached session view (boxed for size optimization)
        session: Box<SessionView>,
    },

    /// A session's state changed.
    Updated {
        /// The updated session view (boxed for size optimization)
        session: Box<SessionView>,
    },

    /// A session was torn down.
    Detached {
        /// ID of the detached session
        session_id: SessionId,
        /// Why the session was detached
        reason: DetachReason,
    },

    /// The aggregated activity signal flipped.
    ActivityChanged(bool),
}

/// Reason why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The session no longer appears in discovery.
    Disappeared,
    /// A client explicitly requested the detach.
    Explicit,
    /// The monitor is shutting down.
    Shutdown,
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disappeared => write!(f, "no longer discovered"),
            Self::Explicit => write!(f, "explicitly detached"),
            Self::Shutdown => write!(f, "monitor shutting down"),
        }
    }
}

// ============================================================================
// Permission Alerts
// ============================================================================

/// A session currently blocked on a permission prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionAlert {
    pub session_id: SessionId,
    pub ide_name: String,
    /// Name of the overdue tool
    pub tool_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{SessionDescriptor, SessionState};

    #[test]
    fn test_monitor_error_display() {
        let err = MonitorError::SessionNotFound(SessionId::new("test-123"));
        assert_eq!(err.to_string(), "session not found: test-123");

        let err = MonitorError::TranscriptNotFound(SessionId::new("test-456"));
        assert_eq!(err.to_string(), "no transcript found for session test-456");

        let err = MonitorError::AttachFailed {
            session_id: SessionId::new("s"),
            message: "permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "failed to attach session s: permission denied");

        let err = MonitorError::Discovery("boom".to_string());
        assert_eq!(err.to_string(), "discovery failed: boom");

        assert_eq!(MonitorError::ChannelClosed.to_string(), "response channel closed");
    }

    #[test]
    fn test_detach_reason_display() {
        assert_eq!(DetachReason::Disappeared.to_string(), "no longer discovered");
        assert_eq!(DetachReason::Explicit.to_string(), "explicitly detached");
        assert_eq!(DetachReason::Shutdown.to_string(), "monitor shutting down");
    }

    #[test]
    fn test_monitor_event_variants() {
        let descriptor = SessionDescriptor::new("test-1", 42, "Zed");
        let view = SessionView::from_state(&descriptor, &SessionState::new());

        let attached = MonitorEvent::Attached {
            session: Box::new(view.clone()),
        };
        let _cloned = attached.clone();

        let updated = MonitorEvent::Updated {
            session: Box::new(view),
        };
        let _cloned = updated.clone();

        let detached = MonitorEvent::Detached {
            session_id: SessionId::new("test-1"),
            reason: DetachReason::Disappeared,
        };
        assert!(matches!(
            detached.clone(),
            MonitorEvent::Detached {
                reason: DetachReason::Disappeared,
                ..
            }
        ));
    }

    #[test]
    fn test_permission_alert_serializes() {
        let alert = PermissionAlert {
            session_id: SessionId::new("s1"),
            ide_name: "VS Code".to_string(),
            tool_name: "Bash".to_string(),
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["tool_name"], "Bash");
    }
}
