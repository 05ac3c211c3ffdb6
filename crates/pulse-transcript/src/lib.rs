//! pulse transcript - decoding and parsing of agent transcript lines
//!
//! Transcripts are append-only JSONL files. This crate turns one line at a
//! time into typed records ([`record`]) and applies them to a session's
//! state ([`parser`]). Nothing here performs I/O.

pub mod parser;
pub mod record;
pub mod summary;

pub use parser::{parse_line, Effect, RecordRole, TODO_TOOL_NAME};
pub use record::{ContentBlock, DecodeError, MessageRecord, Role, TranscriptRecord};
pub use summary::{summarize_input, MAX_SUMMARY_CHARS, SUMMARY_FIELDS};
