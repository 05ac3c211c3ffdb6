//! pulsed - multi-session activity monitor runtime
//!
//! This crate tails the transcripts of concurrently running coding-agent
//! sessions and derives, in real time, what each one is doing and whether
//! anything is happening at all:
//! - `tailer` - Incremental, offset-tracking reader for one transcript
//! - `watchdog` - Flags sessions whose tool calls wait suspiciously long
//! - `debounce` - Idle timer and the hysteresis of the aggregate signal
//! - `monitor` - Actor owning every session, plus its client handle
//! - `discovery` - Lock-file discovery, liveness and transcript location
//! - `config` - Tunable timings loaded from TOML
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        MonitorActor                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  SessionTailer  │────▶│  pulse_transcript::parse    │   │
//! │  │  (per session)  │     │  (state + effects)          │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │ effects           │
//! │                                         ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  IdleDebouncer  │◀────│     PermissionWatchdog      │   │
//! │  │  (aggregate)    │     │  (pending checks)           │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod debounce;
pub mod discovery;
pub mod monitor;
pub mod tailer;
pub mod watchdog;
