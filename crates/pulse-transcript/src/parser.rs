//! Log line parser.
//!
//! Converts one raw transcript line into mutations of a [`SessionState`] plus
//! a list of [`Effect`]s describing what happened. The parser never touches
//! timers or shared state; the caller forwards tool effects to the
//! permission watchdog.

use pulse_core::{SessionId, SessionState, TodoItem, TodoStatus, TokenUsage, ToolUseId};
use serde_json::Value;
use tracing::{debug, trace};

use crate::record::{ContentBlock, MessageRecord, TranscriptRecord};
use crate::summary::summarize_input;

/// Name of the tool whose input carries the agent's todo list.
pub const TODO_TOOL_NAME: &str = "TodoWrite";

/// Observable consequence of parsing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A user or assistant record was seen; the session is thinking.
    Activity { role: RecordRole },
    /// A new tool call became outstanding.
    ToolStarted { id: ToolUseId, name: String },
    /// An outstanding tool call received its result.
    ToolCompleted { id: ToolUseId, name: String },
    /// The model name changed.
    ModelChanged(String),
    /// Token counters were incremented.
    UsageRecorded(TokenUsage),
    /// The todo list was replaced.
    TodosReplaced { count: usize },
}

/// Which side of the conversation produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRole {
    User,
    Assistant,
}

impl Effect {
    /// Returns true for effects the permission watchdog cares about.
    pub fn is_tool_effect(&self) -> bool {
        matches!(self, Self::ToolStarted { .. } | Self::ToolCompleted { .. })
    }
}

/// Parses one transcript line into `state`.
///
/// Malformed, non-object and unrecognized lines are skipped and yield no
/// effects. Both user and assistant records set `thinking`; the transition
/// back to idle belongs to the idle debouncer.
pub fn parse_line(line: &str, session_id: &SessionId, state: &mut SessionState) -> Vec<Effect> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let record = match TranscriptRecord::decode(line) {
        Ok(record) => record,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "Skipping malformed transcript line");
            return Vec::new();
        }
    };

    let mut effects = Vec::new();
    match record {
        TranscriptRecord::User(message) => {
            apply_user(&message, session_id, state, &mut effects);
        }
        TranscriptRecord::Assistant(message) => {
            apply_assistant(&message, session_id, state, &mut effects);
        }
        TranscriptRecord::Unrecognized => {
            trace!(session_id = %session_id, "Ignoring unrecognized transcript record");
            return effects;
        }
    }

    state.touch();
    effects
}

fn apply_user(
    message: &MessageRecord,
    session_id: &SessionId,
    state: &mut SessionState,
    effects: &mut Vec<Effect>,
) {
    // A prompt or a tool result both precede further agent work.
    state.thinking = true;
    effects.push(Effect::Activity {
        role: RecordRole::User,
    });

    for block in &message.blocks {
        match block {
            ContentBlock::ToolResult { tool_use_id, .. } => {
                let id = ToolUseId::new(tool_use_id.as_str());
                match state.tools.complete(&id) {
                    Some(execution) => {
                        debug!(
                            session_id = %session_id,
                            tool_use_id = %id,
                            tool = %execution.name,
                            "Tool completed"
                        );
                        effects.push(Effect::ToolCompleted {
                            id,
                            name: execution.name,
                        });
                    }
                    None => {
                        trace!(session_id = %session_id, tool_use_id = %id, "Result for unknown tool");
                    }
                }
            }
            ContentBlock::ToolUse { id, name, input } => {
                start_tool(id, name, input.as_ref(), session_id, state, effects);
            }
            ContentBlock::Other => {}
        }
    }
}

fn apply_assistant(
    message: &MessageRecord,
    session_id: &SessionId,
    state: &mut SessionState,
    effects: &mut Vec<Effect>,
) {
    // Stays true between consecutive tool calls to avoid flicker.
    state.thinking = true;
    effects.push(Effect::Activity {
        role: RecordRole::Assistant,
    });

    if let Some(model) = &message.model {
        if state.model.as_deref() != Some(model.as_str()) {
            state.model = Some(model.clone());
            effects.push(Effect::ModelChanged(model.clone()));
        }
    }

    if let Some(usage) = message.usage {
        if !usage.is_empty() {
            state.usage += usage;
            effects.push(Effect::UsageRecorded(usage));
        }
    }

    for block in &message.blocks {
        if let ContentBlock::ToolUse { id, name, input } = block {
            start_tool(id, name, input.as_ref(), session_id, state, effects);
        }
    }
}

fn start_tool(
    id: &str,
    name: &str,
    input: Option<&Value>,
    session_id: &SessionId,
    state: &mut SessionState,
    effects: &mut Vec<Effect>,
) {
    let tool_id = ToolUseId::new(id);

    if name == TODO_TOOL_NAME {
        if let Some(todos) = extract_todos(input) {
            let count = todos.len();
            state.todos = todos;
            effects.push(Effect::TodosReplaced { count });
        }
    }

    if !state.tools.start(tool_id.clone(), name, summarize_input(input)) {
        trace!(session_id = %session_id, tool_use_id = %tool_id, "Tool already active");
        return;
    }

    debug!(session_id = %session_id, tool_use_id = %tool_id, tool = name, "Tool started");
    effects.push(Effect::ToolStarted {
        id: tool_id,
        name: name.to_string(),
    });
}

/// Reads `input.todos[]` of a todo-list tool call.
fn extract_todos(input: Option<&Value>) -> Option<Vec<TodoItem>> {
    let todos = input?.get("todos")?.as_array()?;

    Some(
        todos
            .iter()
            .filter_map(|item| {
                let content = item.get("content").and_then(Value::as_str)?;
                let status = item
                    .get("status")
                    .and_then(Value::as_str)
                    .map(TodoStatus::from_str_lossy)
                    .unwrap_or_default();
                let active_form = item
                    .get("activeForm")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Some(TodoItem {
                    content: content.to_string(),
                    status,
                    active_form,
                })
            })
            .collect(),
    )
}
