//! Permission watchdog.
//!
//! The transcript never says "waiting for permission". The only observable
//! proxy is a tool call that has gone unanswered for longer than a deadline,
//! so the watchdog keeps one [`PendingPermissionCheck`] per outstanding live
//! tool call and flags the owning session once a check is overdue.
//!
//! Every decision is made against the session's active tool set at
//! evaluation time, so a tool that completes in the same tick it would have
//! tripped the deadline is never flagged.

use std::collections::{HashMap, HashSet};

use pulse_core::{SessionId, SessionState, ToolUseId};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// An outstanding tool call being timed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPermissionCheck {
    pub session_id: SessionId,
    pub tool_id: ToolUseId,
    pub started_at: Instant,
}

impl PendingPermissionCheck {
    /// Returns true once `delay` has elapsed since the tool started.
    pub fn is_overdue(&self, now: Instant, delay: Duration) -> bool {
        now.saturating_duration_since(self.started_at) >= delay
    }
}

/// Change applied to a session by the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionChange {
    /// The session was flagged (or re-flagged for a different tool).
    Flagged { tool_name: String },
    /// The flag was cleared.
    Cleared,
}

/// Tracks outstanding tool calls against the permission deadline.
#[derive(Debug)]
pub struct PermissionWatchdog {
    delay: Duration,
    /// Checks per session, oldest first
    checks: HashMap<SessionId, Vec<PendingPermissionCheck>>,
}

impl PermissionWatchdog {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            checks: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Starts timing a live tool call.
    ///
    /// Returns `false` if the call is already being timed.
    pub fn on_tool_started(&mut self, session_id: &SessionId, tool_id: &ToolUseId, now: Instant) -> bool {
        let checks = self.checks.entry(session_id.clone()).or_default();
        if checks.iter().any(|c| &c.tool_id == tool_id) {
            return false;
        }

        checks.push(PendingPermissionCheck {
            session_id: session_id.clone(),
            tool_id: tool_id.clone(),
            started_at: now,
        });
        debug!(session_id = %session_id, tool_use_id = %tool_id, "Permission check scheduled");
        true
    }

    /// Stops timing a completed tool call and re-evaluates the session flag.
    ///
    /// The flag is cleared unless another overdue tool of the same session is
    /// still active, in which case it moves to that tool.
    pub fn on_tool_completed(
        &mut self,
        session_id: &SessionId,
        tool_id: &ToolUseId,
        now: Instant,
        state: &mut SessionState,
    ) -> Option<PermissionChange> {
        if let Some(checks) = self.checks.get_mut(session_id) {
            checks.retain(|c| &c.tool_id != tool_id);
            if checks.is_empty() {
                self.checks.remove(session_id);
            }
        }

        if !state.needs_permission {
            return None;
        }
        self.evaluate(session_id, now, state)
    }

    /// Evaluates every live session against its pending checks.
    ///
    /// `sessions` yields the live session set; checks of sessions it does
    /// not contain are dropped. Returns the sessions whose flag changed.
    pub fn sweep<'a, I>(&mut self, now: Instant, sessions: I) -> Vec<(SessionId, PermissionChange)>
    where
        I: IntoIterator<Item = (&'a SessionId, &'a mut SessionState)>,
    {
        let mut changes = Vec::new();
        let mut seen = HashSet::new();

        for (session_id, state) in sessions {
            if !self.checks.contains_key(session_id) && !state.needs_permission {
                continue;
            }
            seen.insert(session_id.clone());
            if let Some(change) = self.evaluate(session_id, now, state) {
                changes.push((session_id.clone(), change));
            }
        }

        self.checks.retain(|session_id, _| seen.contains(session_id));
        changes
    }

    /// Re-derives one session's flag from its checks and active tools.
    fn evaluate(
        &mut self,
        session_id: &SessionId,
        now: Instant,
        state: &mut SessionState,
    ) -> Option<PermissionChange> {
        let delay = self.delay;
        let mut blocking: Option<String> = None;

        if let Some(checks) = self.checks.get_mut(session_id) {
            // Tools resolved behind our back (replay, teardown) lose their check.
            checks.retain(|c| state.tools.contains(&c.tool_id));

            // One blocking reason is enough to surface.
            blocking = checks
                .iter()
                .filter(|c| c.is_overdue(now, delay))
                .find_map(|c| state.tools.get(&c.tool_id))
                .map(|execution| execution.name.clone());

            if checks.is_empty() {
                self.checks.remove(session_id);
            }
        }

        match blocking {
            Some(tool_name) => {
                if state.needs_permission
                    && state.pending_permission_tool.as_deref() == Some(tool_name.as_str())
                {
                    return None;
                }
                info!(session_id = %session_id, tool = %tool_name, "Session waiting for permission");
                state.flag_permission(&tool_name);
                Some(PermissionChange::Flagged { tool_name })
            }
            None if state.needs_permission => {
                info!(session_id = %session_id, "Permission wait resolved");
                state.clear_permission();
                Some(PermissionChange::Cleared)
            }
            None => None,
        }
    }

    /// Drops every check of a torn-down session.
    pub fn cancel_session(&mut self, session_id: &SessionId) -> usize {
        self.checks.remove(session_id).map_or(0, |checks| checks.len())
    }

    /// Returns true while any check remains across all sessions.
    pub fn has_pending(&self) -> bool {
        !self.checks.is_empty()
    }

    /// Number of checks across all sessions.
    pub fn pending_count(&self) -> usize {
        self.checks.values().map(Vec::len).sum()
    }

    /// Checks of one session, oldest first.
    pub fn checks_for(&self, session_id: &SessionId) -> &[PendingPermissionCheck] {
        self.checks.get(session_id).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(2500);

    fn session_with_tool(tool: &str, name: &str) -> SessionState {
        let mut state = SessionState::new();
        state.tools.start(ToolUseId::new(tool), name, None);
        state
    }

    fn single<'a>(
        id: &'a SessionId,
        state: &'a mut SessionState,
    ) -> std::iter::Once<(&'a SessionId, &'a mut SessionState)> {
        std::iter::once((id, state))
    }

    #[test]
    fn test_flags_only_after_deadline() {
        let t0 = Instant::now();
        let sid = SessionId::new("s");
        let mut state = session_with_tool("xyz", "Bash");
        let mut watchdog = PermissionWatchdog::new(DELAY);
        assert!(watchdog.on_tool_started(&sid, &ToolUseId::new("xyz"), t0));

        let early = watchdog.sweep(t0 + DELAY - Duration::from_millis(1), single(&sid, &mut state));
        assert!(early.is_empty());
        assert!(!state.needs_permission);

        let changes = watchdog.sweep(t0 + DELAY, single(&sid, &mut state));
        assert_eq!(
            changes,
            vec![(
                sid.clone(),
                PermissionChange::Flagged {
                    tool_name: "Bash".to_string()
                }
            )]
        );
        assert!(state.needs_permission);
        assert_eq!(state.pending_permission_tool.as_deref(), Some("Bash"));

        // Re-sweeping an already flagged session is silent
        assert!(watchdog.sweep(t0 + DELAY * 2, single(&sid, &mut state)).is_empty());
    }

    #[test]
    fn test_completed_before_deadline_never_flags() {
        let t0 = Instant::now();
        let sid = SessionId::new("s");
        let tool = ToolUseId::new("fast");
        let mut state = session_with_tool("fast", "Read");
        let mut watchdog = PermissionWatchdog::new(DELAY);
        watchdog.on_tool_started(&sid, &tool, t0);

        state.tools.complete(&tool);
        assert!(watchdog
            .on_tool_completed(&sid, &tool, t0 + Duration::from_millis(100), &mut state)
            .is_none());
        assert!(!watchdog.has_pending());

        assert!(watchdog.sweep(t0 + DELAY * 3, single(&sid, &mut state)).is_empty());
        assert!(!state.needs_permission);
    }

    #[test]
    fn test_tool_gone_at_sweep_time_is_not_flagged() {
        // Completed in the parser, watchdog not yet told
        let t0 = Instant::now();
        let sid = SessionId::new("s");
        let mut state = session_with_tool("racy", "Edit");
        let mut watchdog = PermissionWatchdog::new(DELAY);
        watchdog.on_tool_started(&sid, &ToolUseId::new("racy"), t0);

        state.tools.complete(&ToolUseId::new("racy"));
        assert!(watchdog.sweep(t0 + DELAY, single(&sid, &mut state)).is_empty());
        assert!(!state.needs_permission);
        assert!(!watchdog.has_pending());
    }

    #[test]
    fn test_completion_clears_flag() {
        let t0 = Instant::now();
        let sid = SessionId::new("s");
        let tool = ToolUseId::new("xyz");
        let mut state = session_with_tool("xyz", "Bash");
        let mut watchdog = PermissionWatchdog::new(DELAY);
        watchdog.on_tool_started(&sid, &tool, t0);
        watchdog.sweep(t0 + DELAY, single(&sid, &mut state));
        assert!(state.needs_permission);

        state.tools.complete(&tool);
        let change = watchdog.on_tool_completed(&sid, &tool, t0 + DELAY * 2, &mut state);
        assert_eq!(change, Some(PermissionChange::Cleared));
        assert!(!state.needs_permission);
        assert!(state.pending_permission_tool.is_none());
    }

    #[test]
    fn test_completion_moves_flag_to_other_overdue_tool() {
        let t0 = Instant::now();
        let sid = SessionId::new("s");
        let mut state = session_with_tool("a", "Bash");
        state.tools.start(ToolUseId::new("b"), "WebFetch", None);
        let mut watchdog = PermissionWatchdog::new(DELAY);
        watchdog.on_tool_started(&sid, &ToolUseId::new("a"), t0);
        watchdog.on_tool_started(&sid, &ToolUseId::new("b"), t0 + Duration::from_millis(10));

        watchdog.sweep(t0 + DELAY * 2, single(&sid, &mut state));
        assert_eq!(state.pending_permission_tool.as_deref(), Some("Bash"));

        state.tools.complete(&ToolUseId::new("a"));
        let change = watchdog.on_tool_completed(&sid, &ToolUseId::new("a"), t0 + DELAY * 2, &mut state);
        assert_eq!(
            change,
            Some(PermissionChange::Flagged {
                tool_name: "WebFetch".to_string()
            })
        );
        assert!(state.needs_permission);
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let t0 = Instant::now();
        let sid = SessionId::new("s");
        let tool = ToolUseId::new("t");
        let mut watchdog = PermissionWatchdog::new(DELAY);
        assert!(watchdog.on_tool_started(&sid, &tool, t0));
        assert!(!watchdog.on_tool_started(&sid, &tool, t0 + DELAY));
        assert_eq!(watchdog.pending_count(), 1);
        assert_eq!(watchdog.checks_for(&sid)[0].started_at, t0);
    }

    #[test]
    fn test_unknown_session_checks_are_dropped() {
        let t0 = Instant::now();
        let mut watchdog = PermissionWatchdog::new(DELAY);
        watchdog.on_tool_started(&SessionId::new("gone"), &ToolUseId::new("t"), t0);

        let changes = watchdog.sweep(t0 + DELAY, std::iter::empty());
        assert!(changes.is_empty());
        assert!(!watchdog.has_pending());
    }

    #[test]
    fn test_cancel_session() {
        let t0 = Instant::now();
        let a = SessionId::new("a");
        let b = SessionId::new("b");
        let mut watchdog = PermissionWatchdog::new(DELAY);
        watchdog.on_tool_started(&a, &ToolUseId::new("1"), t0);
        watchdog.on_tool_started(&a, &ToolUseId::new("2"), t0);
        watchdog.on_tool_started(&b, &ToolUseId::new("3"), t0);

        assert_eq!(watchdog.cancel_session(&a), 2);
        assert_eq!(watchdog.cancel_session(&a), 0);
        assert_eq!(watchdog.pending_count(), 1);
        assert!(watchdog.checks_for(&a).is_empty());
    }
}
