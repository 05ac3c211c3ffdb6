//! Schema-on-read decoding of transcript records.
//!
//! Transcripts are newline-delimited JSON written by the agent. The format is
//! versionless, so every field is optional and unknown shapes decode to
//! [`TranscriptRecord::Unrecognized`] instead of failing.

use pulse_core::TokenUsage;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors returned when a line is not a JSON object at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The line is not valid JSON (often a partial write).
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The line is valid JSON but not an object.
    #[error("record is not a JSON object")]
    NotAnObject,
}

// ============================================================================
// Raw serde shapes
// ============================================================================

/// Raw transcript line. Only `message` matters to the monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<RawMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Option<RawContent>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[serde(other)]
    Other,
}

/// Message content: plain text or a list of typed blocks.
///
/// Blocks are kept as raw values and decoded one by one, so a single odd
/// block never discards the rest of the record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Blocks(Vec<Value>),
    Other(Value),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl From<&RawUsage> for TokenUsage {
    fn from(raw: &RawUsage) -> Self {
        TokenUsage::new(
            raw.input_tokens,
            raw.output_tokens,
            raw.cache_creation_input_tokens,
            raw.cache_read_input_tokens,
        )
    }
}

/// A content block the monitor acts on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Option<Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// Text, thinking, images and anything newer.
    #[serde(other)]
    Other,
}

impl ContentBlock {
    /// Decodes one block, treating anything malformed as `Other`.
    pub fn decode(value: &Value) -> Self {
        ContentBlock::deserialize(value).unwrap_or(ContentBlock::Other)
    }
}

// ============================================================================
// Typed records
// ============================================================================

/// Payload shared by user and assistant records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRecord {
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub blocks: Vec<ContentBlock>,
}

/// A decoded transcript line.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptRecord {
    /// `message.role == "user"`: a prompt, or tool results fed back.
    User(MessageRecord),
    /// `message.role == "assistant"`: model output, possibly tool calls.
    Assistant(MessageRecord),
    /// Summaries, system records, snapshots and future record types.
    Unrecognized,
}

impl TranscriptRecord {
    /// Decodes one transcript line.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` for invalid JSON or non-object values. Objects
    /// of unknown shape decode to `Unrecognized`.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(line)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }

        // Fields with the wrong type degrade to Unrecognized.
        let raw = match RawRecord::deserialize(&value) {
            Ok(raw) => raw,
            Err(_) => return Ok(Self::Unrecognized),
        };

        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawRecord) -> Self {
        let Some(message) = raw.message else {
            return Self::Unrecognized;
        };

        let blocks = match &message.content {
            Some(RawContent::Blocks(values)) => values.iter().map(ContentBlock::decode).collect(),
            _ => Vec::new(),
        };

        let record = MessageRecord {
            model: message.model.filter(|m| !m.is_empty()),
            usage: message.usage.as_ref().map(TokenUsage::from),
            blocks,
        };

        match message.role {
            Some(Role::User) => Self::User(record),
            Some(Role::Assistant) => Self::Assistant(record),
            Some(Role::Other) | None => Self::Unrecognized,
        }
    }

    /// Returns the message payload for user/assistant records.
    pub fn message(&self) -> Option<&MessageRecord> {
        match self {
            Self::User(m) | Self::Assistant(m) => Some(m),
            Self::Unrecognized => None,
        }
    }
}
