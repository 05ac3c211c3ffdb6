//! Tool execution ledger.
//!
//! Per-session mapping of outstanding tool invocations to their metadata,
//! plus a bounded history of completed ones. Pure data, no I/O.

use crate::ToolUseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One outstanding or completed tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecution {
    /// Tool-call id, unique per session
    pub id: ToolUseId,
    /// Name of the tool (e.g., "Bash", "Read", "Edit")
    pub name: String,
    /// Best-effort argument summary (command, file path, query...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// When the tool_use record was parsed
    pub started_at: DateTime<Utc>,
    /// When the matching tool_result was parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ToolExecution {
    pub fn new(id: ToolUseId, name: impl Into<String>, summary: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            summary,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Returns true once the matching result has been seen.
    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Returns how long the tool ran, or has been running so far.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(self.started_at)
    }

    /// Returns "Name: summary" or just the name.
    pub fn display(&self) -> String {
        match &self.summary {
            Some(summary) => format!("{}: {}", self.name, summary),
            None => self.name.clone(),
        }
    }
}

/// Outstanding tool executions of one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolLedger {
    active: HashMap<ToolUseId, ToolExecution>,
    completed: VecDeque<ToolExecution>,
}

impl ToolLedger {
    /// Maximum number of completed executions to keep.
    pub const MAX_HISTORY: usize = 50;

    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
            completed: VecDeque::with_capacity(Self::MAX_HISTORY),
        }
    }

    /// Records a tool start.
    ///
    /// Returns `false` (and changes nothing) if the id is already active.
    pub fn start(&mut self, id: ToolUseId, name: &str, summary: Option<String>) -> bool {
        if self.active.contains_key(&id) {
            return false;
        }
        let execution = ToolExecution::new(id.clone(), name, summary);
        self.active.insert(id, execution);
        true
    }

    /// Completes an active tool, moving it to the history.
    ///
    /// Returns the completed execution, or `None` for an unknown id.
    pub fn complete(&mut self, id: &ToolUseId) -> Option<ToolExecution> {
        let mut execution = self.active.remove(id)?;
        execution.ended_at = Some(Utc::now());

        self.completed.push_back(execution.clone());
        while self.completed.len() > Self::MAX_HISTORY {
            self.completed.pop_front();
        }

        Some(execution)
    }

    pub fn contains(&self, id: &ToolUseId) -> bool {
        self.active.contains_key(id)
    }

    pub fn get(&self, id: &ToolUseId) -> Option<&ToolExecution> {
        self.active.get(id)
    }

    /// Returns true if no tool is outstanding.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Number of outstanding tools.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Iterates outstanding tools in no particular order.
    pub fn active(&self) -> impl Iterator<Item = &ToolExecution> {
        self.active.values()
    }

    /// Iterates completed tools, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &ToolExecution> {
        self.completed.iter()
    }

    /// Forgets every outstanding tool without recording completions.
    pub fn clear_active(&mut self) {
        self.active.clear();
    }
}
