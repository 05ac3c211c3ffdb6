//! Session tailer - incremental reader for one transcript.
//!
//! Owns the file handle and read offset of a single session's transcript.
//! On attach it replays a bounded window of history with alarms suppressed;
//! afterwards each wake reads only the bytes appended since the last read.
//!
//! # Offsets
//!
//! The offset only moves forward while the file grows. Bytes after the last
//! newline of a read are buffered and completed by the next read, so every
//! line is parsed exactly once. If the file shrinks below the offset, or the
//! path now names a different file (atomic rewrite via rename), the tailer
//! reopens the path and re-runs the bootstrap pass.
//!
//! A torn fragment left by a crashed writer never swallows the record written
//! after it: if fragment plus new bytes is not JSON, the new bytes are parsed
//! on their own.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Slicing uses `get` instead of indexing
//! - I/O failures are returned as `TailerError`, never fatal

use std::fmt;
use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use pulse_core::{SessionId, SessionState, TranscriptPath};
use pulse_transcript::{parse_line, Effect};
use serde::de::IgnoredAny;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound for an unterminated line held between reads (16 MiB).
pub const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while tailing a transcript.
#[derive(Debug, Error)]
pub enum TailerError {
    /// The transcript could not be opened.
    #[error("failed to open transcript {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The transcript could not be read.
    #[error("failed to read transcript {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS watch could not be installed.
    #[error("failed to watch transcript {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

// ============================================================================
// Read Outcome
// ============================================================================

/// Result of one incremental read.
#[derive(Debug, Default)]
pub struct TailRead {
    /// Effects of the live lines parsed by this read
    pub effects: Vec<Effect>,
    /// Number of bytes consumed from the file
    pub bytes: u64,
    /// Number of complete lines parsed
    pub lines: usize,
    /// True if the file shrank or was replaced and history was replayed instead
    pub rebootstrapped: bool,
}

impl TailRead {
    /// Returns true if this read delivered new records.
    pub fn has_activity(&self) -> bool {
        !self.effects.is_empty()
    }
}

// ============================================================================
// Session Tailer
// ============================================================================

/// Incremental reader for one session's transcript.
pub struct SessionTailer {
    session_id: SessionId,
    path: TranscriptPath,
    file: Option<File>,
    offset: u64,
    pending: Vec<u8>,
    bootstrap_window: u64,
    watcher: Option<RecommendedWatcher>,
}

impl SessionTailer {
    /// Opens the transcript and replays its recent history into `state`.
    ///
    /// At most `bootstrap_window` trailing bytes are read. Replayed records
    /// never produce effects for the caller, and any thinking or active-tool
    /// state they leave behind is cleared once the replay completes.
    ///
    /// # Errors
    ///
    /// Returns `TailerError::Open` if the file is missing or unreadable, and
    /// `TailerError::Read` if the history window cannot be read.
    pub fn attach(
        session_id: SessionId,
        path: TranscriptPath,
        bootstrap_window: u64,
        state: &mut SessionState,
    ) -> Result<Self, TailerError> {
        let file = open(&path)?;

        let mut tailer = Self {
            session_id,
            path,
            file: Some(file),
            offset: 0,
            pending: Vec::new(),
            bootstrap_window,
            watcher: None,
        };

        let replayed = tailer.bootstrap(state)?;
        info!(
            session_id = %tailer.session_id,
            path = %tailer.path,
            offset = tailer.offset,
            replayed_lines = replayed,
            "Attached to transcript"
        );

        Ok(tailer)
    }

    /// Replays the last window of the file in history mode.
    ///
    /// Returns the number of lines replayed.
    fn bootstrap(&mut self, state: &mut SessionState) -> Result<usize, TailerError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let path = &self.path;

        let end = file.metadata().map_err(|e| read_error(path, e))?.len();
        let start = end.saturating_sub(self.bootstrap_window);

        file.seek(SeekFrom::Start(start))
            .map_err(|e| read_error(path, e))?;
        let mut window = Vec::new();
        let read = file
            .by_ref()
            .take(end - start)
            .read_to_end(&mut window)
            .map_err(|e| read_error(path, e))?;

        // A window that starts mid-file almost always starts mid-line.
        let mut body: &[u8] = &window;
        if start > 0 {
            body = match body.iter().position(|b| *b == b'\n') {
                Some(newline) => body.get(newline + 1..).unwrap_or(&[]),
                None => &[],
            };
        }

        self.pending.clear();

        // History mode: effects are dropped, so no permission checks are scheduled.
        let (_, lines) = self.feed(body, state);
        state.settle_after_replay();
        state.connected = true;

        // An unterminated tail stays buffered for the first live delta.
        self.offset = start + read as u64;

        debug!(
            session_id = %self.session_id,
            window_start = start,
            window_bytes = read,
            lines,
            "Bootstrap replay complete"
        );

        Ok(lines)
    }

    /// Reads and parses everything appended since the last read.
    ///
    /// A detached tailer reads nothing.
    ///
    /// # Errors
    ///
    /// Returns `TailerError::Read` on transient I/O failures. The offset is
    /// left untouched, so the next call retries the same range.
    pub fn read_new(&mut self, state: &mut SessionState) -> Result<TailRead, TailerError> {
        let Some(file) = self.file.as_ref() else {
            return Ok(TailRead::default());
        };

        let on_disk = match std::fs::metadata(self.path.as_path()) {
            Ok(metadata) => metadata,
            // Mid-rename; the next wake sees the new file
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TailRead::default()),
            Err(e) => return Err(read_error(&self.path, e)),
        };
        let held = file.metadata().map_err(|e| read_error(&self.path, e))?;
        let replaced = !same_file(&held, &on_disk);
        let len = if replaced { on_disk.len() } else { held.len() };

        if replaced || len < self.offset {
            info!(
                session_id = %self.session_id,
                offset = self.offset,
                len,
                replaced,
                "Transcript truncated or replaced, replaying history"
            );
            self.file = Some(open(&self.path)?);
            self.bootstrap(state)?;
            return Ok(TailRead {
                rebootstrapped: true,
                ..TailRead::default()
            });
        }

        if len == self.offset {
            return Ok(TailRead::default());
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(TailRead::default());
        };
        let path = &self.path;

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| read_error(path, e))?;
        let mut delta = Vec::new();
        let read = file
            .by_ref()
            .take(len - self.offset)
            .read_to_end(&mut delta)
            .map_err(|e| read_error(path, e))?;

        self.offset += read as u64;
        let (effects, lines) = self.feed(&delta, state);

        debug!(
            session_id = %self.session_id,
            offset = self.offset,
            bytes = read,
            lines,
            effects = effects.len(),
            "Read transcript delta"
        );

        Ok(TailRead {
            effects,
            bytes: read as u64,
            lines,
            rebootstrapped: false,
        })
    }

    /// Appends bytes to the line buffer and parses every complete line.
    fn feed(&mut self, bytes: &[u8], state: &mut SessionState) -> (Vec<Effect>, usize) {
        let carried = self.pending.len();
        self.pending.extend_from_slice(bytes);

        let mut effects = Vec::new();
        let mut lines = 0;
        let mut start = 0;

        while let Some(newline) = self
            .pending
            .get(start..)
            .and_then(|rest| rest.iter().position(|b| *b == b'\n'))
        {
            let end = start + newline;
            if let Some(mut raw) = self.pending.get(start..end) {
                if start == 0 && carried > 0 && carried < end && !is_json(raw) {
                    debug!(
                        session_id = %self.session_id,
                        fragment_bytes = carried,
                        "Discarding torn fragment"
                    );
                    raw = self.pending.get(carried..end).unwrap_or(raw);
                }
                let line = String::from_utf8_lossy(raw);
                if !line.trim().is_empty() {
                    lines += 1;
                    effects.extend(parse_line(&line, &self.session_id, state));
                }
            }
            start = end + 1;
        }

        self.pending.drain(..start.min(self.pending.len()));

        if self.pending.len() > MAX_PENDING_BYTES {
            debug!(
                session_id = %self.session_id,
                buffered = self.pending.len(),
                "Dropping oversized unterminated line"
            );
            self.pending.clear();
        }

        (effects, lines)
    }

    /// Installs an OS watch that calls `on_change` whenever the file grows.
    ///
    /// Replaces any previous watch, which may still point at a file that was
    /// renamed over. Dropping the tailer or calling [`detach`](Self::detach) removes the
    /// watch.
    ///
    /// # Errors
    ///
    /// Returns `TailerError::Watch` if the platform watcher cannot be created
    /// or cannot watch the path.
    pub fn watch<F>(&mut self, on_change: F) -> Result<(), TailerError>
    where
        F: Fn() + Send + 'static,
    {
        self.watcher = None;
        let session_id = self.session_id.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        on_change();
                    }
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Transcript watcher error");
                }
            })
            .map_err(|source| self.watch_error(source))?;

        watcher
            .watch(self.path.as_path(), RecursiveMode::NonRecursive)
            .map_err(|source| self.watch_error(source))?;

        self.watcher = Some(watcher);
        Ok(())
    }

    fn watch_error(&self, source: notify::Error) -> TailerError {
        TailerError::Watch {
            path: self.path.as_path().to_path_buf(),
            source,
        }
    }

    /// Releases the file handle and cancels the OS watch.
    ///
    /// Returns `false` if the tailer was already detached.
    pub fn detach(&mut self) -> bool {
        let was_attached = self.file.is_some();
        self.watcher = None;
        self.file = None;
        self.pending.clear();

        if was_attached {
            debug!(session_id = %self.session_id, "Detached from transcript");
        }
        was_attached
    }

    pub fn is_attached(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Byte offset of the next read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &TranscriptPath {
        &self.path
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl fmt::Debug for SessionTailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTailer")
            .field("session_id", &self.session_id)
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("pending_bytes", &self.pending.len())
            .field("attached", &self.is_attached())
            .field("watching", &self.is_watching())
            .finish()
    }
}

fn open(path: &TranscriptPath) -> Result<File, TailerError> {
    File::open(path.as_path()).map_err(|source| TailerError::Open {
        path: path.as_path().to_path_buf(),
        source,
    })
}

/// Returns true if both metadata describe the same file on disk.
#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

/// Without inode identity only truncation is detectable.
#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}

fn is_json(raw: &[u8]) -> bool {
    serde_json::from_slice::<IgnoredAny>(raw).is_ok()
}

fn read_error(path: &TranscriptPath, source: io::Error) -> TailerError {
    TailerError::Read {
        path: path.as_path().to_path_buf(),
        source,
    }
}
