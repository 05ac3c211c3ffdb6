//! pulse core - shared types for coding-agent session monitoring
//!
//! This crate provides the domain types shared between the transcript
//! parser (pulse-transcript) and the runtime (pulsed).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod session;
pub mod todo;
pub mod tool;
pub mod usage;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use session::{
    SessionDescriptor, SessionId, SessionState, SessionStatus, SessionView, ToolUseId,
    TranscriptPath,
};
pub use todo::{TodoItem, TodoStatus};
pub use tool::{ToolExecution, ToolLedger};
pub use usage::{TokenCount, TokenUsage};
