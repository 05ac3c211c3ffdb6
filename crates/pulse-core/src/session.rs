//! Session domain entities and value objects.

use crate::tool::{ToolExecution, ToolLedger};
use crate::{TodoItem, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a monitored agent session.
///
/// Opaque string supplied by the discovery collaborator (usually a UUID or
/// the lock-file stem). Never validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a tool invocation.
///
/// Format: "toolu_..." (e.g., "toolu_01ABC123XYZ"). Unique per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolUseId(String);

impl ToolUseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolUseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ToolUseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ToolUseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Path to a session's transcript JSONL file.
///
/// Example: "/home/user/.claude/projects/-home-user-code-app/<session>.jsonl"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranscriptPath(PathBuf);

impl TranscriptPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Returns the filename portion of the path.
    pub fn filename(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }
}

impl fmt::Display for TranscriptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for TranscriptPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// Session Descriptor
// ============================================================================

/// Identity of a live external session, as produced by discovery.
///
/// Immutable once discovered. The monitor drops its state for the session
/// as soon as the descriptor stops appearing in discovery passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Opaque session identifier
    pub id: SessionId,
    /// Process ID of the owning agent process
    pub pid: u32,
    /// Human-readable IDE/editor name (e.g., "Visual Studio Code")
    pub ide_name: String,
    /// Workspace root paths the session was opened with
    pub workspace_folders: Vec<PathBuf>,
    /// Key used to locate the transcript (the transcript file stem)
    pub transcript_key: String,
}

impl SessionDescriptor {
    /// Creates a descriptor whose transcript key equals its session id.
    pub fn new(id: impl Into<String>, pid: u32, ide_name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            transcript_key: id.clone(),
            id: SessionId::new(id),
            pid,
            ide_name: ide_name.into(),
            workspace_folders: Vec::new(),
        }
    }

    /// Adds a workspace root.
    #[must_use]
    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_folders.push(path.into());
        self
    }

    /// Overrides the transcript key.
    #[must_use]
    pub fn with_transcript_key(mut self, key: impl Into<String>) -> Self {
        self.transcript_key = key.into();
        self
    }

    /// Returns the first workspace root, if any.
    pub fn primary_workspace(&self) -> Option<&Path> {
        self.workspace_folders.first().map(PathBuf::as_path)
    }
}

// ============================================================================
// Session Status (4-State Model)
// ============================================================================

/// Derived operational status of a session.
///
/// - **Idle**: nothing written for a while, no outstanding tools
/// - **Thinking**: the agent is producing output
/// - **ToolActive**: at least one tool call has no result yet
/// - **PermissionBlocked**: a tool has been outstanding past the deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Thinking,
    ToolActive,
    PermissionBlocked,
}

impl SessionStatus {
    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::ToolActive => "running tool",
            Self::PermissionBlocked => "needs permission",
        }
    }

    /// Returns the ASCII icon for this status.
    #[must_use]
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Idle => "-",
            Self::Thinking => ">",
            Self::ToolActive => "*",
            Self::PermissionBlocked => "!",
        }
    }

    /// Returns true if the session is doing work without user involvement.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Thinking | Self::ToolActive)
    }

    /// Returns true if user action is needed.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::PermissionBlocked)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Thinking => write!(f, "Thinking"),
            Self::ToolActive => write!(f, "Running Tool"),
            Self::PermissionBlocked => write!(f, "Needs Permission"),
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Live, derived state of one session.
///
/// Owned exclusively by the session monitor. Mutated by the line parser, the
/// permission watchdog and the idle debouncer; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Whether the transcript is currently attached
    pub connected: bool,

    /// Whether the agent is producing output
    pub thinking: bool,

    /// Outstanding and recently completed tool executions
    pub tools: ToolLedger,

    /// Set by the permission watchdog when a tool is overdue
    pub needs_permission: bool,

    /// Name of the tool blocking on permission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_permission_tool: Option<String>,

    /// Last time any record changed this state
    pub last_update: DateTime<Utc>,

    /// Model reported by the most recent assistant record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Cumulative token counters
    pub usage: TokenUsage,

    /// Latest todo list written by the agent
    pub todos: Vec<TodoItem>,
}

impl SessionState {
    /// Creates an idle, disconnected state.
    pub fn new() -> Self {
        Self {
            connected: false,
            thinking: false,
            tools: ToolLedger::new(),
            needs_permission: false,
            pending_permission_tool: None,
            last_update: Utc::now(),
            model: None,
            usage: TokenUsage::default(),
            todos: Vec::new(),
        }
    }

    /// Returns the derived status.
    ///
    /// Permission takes priority over tools, tools over thinking.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        if self.needs_permission {
            SessionStatus::PermissionBlocked
        } else if !self.tools.is_empty() {
            SessionStatus::ToolActive
        } else if self.thinking {
            SessionStatus::Thinking
        } else {
            SessionStatus::Idle
        }
    }

    /// Returns true if this session currently contributes to the aggregate
    /// activity signal.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.thinking || self.needs_permission || !self.tools.is_empty()
    }

    /// Marks the session as touched now.
    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    /// Sets the permission flag with its blocking tool.
    pub fn flag_permission(&mut self, tool_name: &str) {
        self.needs_permission = true;
        self.pending_permission_tool = Some(tool_name.to_string());
        self.touch();
    }

    /// Clears the permission flag.
    pub fn clear_permission(&mut self) {
        self.needs_permission = false;
        self.pending_permission_tool = None;
        self.touch();
    }

    /// Drops transient activity after a history replay.
    ///
    /// Replayed tool calls are already resolved, so neither they nor the
    /// thinking flag may survive the bootstrap pass.
    pub fn settle_after_replay(&mut self) {
        self.thinking = false;
        self.tools.clear_active();
        self.needs_permission = false;
        self.pending_permission_tool = None;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Session View (read-only snapshot)
// ============================================================================

/// Read-only snapshot of a session for observers.
///
/// Pre-computes display fields so consumers need no domain logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub pid: u32,
    pub ide_name: String,
    pub workspace_folders: Vec<PathBuf>,
    pub status: SessionStatus,
    pub status_label: String,
    pub connected: bool,
    pub thinking: bool,
    pub active_tools: Vec<ToolExecution>,
    pub needs_permission: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_permission_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub usage: TokenUsage,
    pub todos: Vec<TodoItem>,
    pub last_update: DateTime<Utc>,
    pub selected: bool,
}

impl SessionView {
    /// Builds a view from a descriptor and its state.
    pub fn from_state(descriptor: &SessionDescriptor, state: &SessionState) -> Self {
        let status = state.status();
        let mut active_tools: Vec<ToolExecution> = state.tools.active().cloned().collect();
        active_tools.sort_by(|a, b| a.started_at.cmp(&b.started_at));

        Self {
            id: descriptor.id.clone(),
            pid: descriptor.pid,
            ide_name: descriptor.ide_name.clone(),
            workspace_folders: descriptor.workspace_folders.clone(),
            status,
            status_label: status.label().to_string(),
            connected: state.connected,
            thinking: state.thinking,
            active_tools,
            needs_permission: state.needs_permission,
            pending_permission_tool: state.pending_permission_tool.clone(),
            model: state.model.clone(),
            usage: state.usage,
            todos: state.todos.clone(),
            last_update: state.last_update,
            selected: false,
        }
    }

    /// Marks the view as the selected session.
    #[must_use]
    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }
}
