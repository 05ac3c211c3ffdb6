//! Session discovery - finds live agent sessions and their transcripts.
//!
//! Three collaborators feed the monitor:
//!
//! - [`SessionDiscovery`] yields the current set of [`SessionDescriptor`]s.
//!   [`LockFileDiscovery`] reads the JSON lock files IDE integrations write
//!   into `~/.claude/ide`.
//! - [`LivenessCheck`] answers whether a pid still exists.
//!   [`SysinfoLiveness`] asks the OS through `sysinfo`.
//! - [`TranscriptLocator`] maps a descriptor to its transcript file.
//!   [`ProjectsDirLocator`] resolves it under `~/.claude/projects`.
//!
//! All three run synchronously inside the monitor actor; each pass is a
//! directory listing plus a handful of small reads.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Unreadable or malformed lock files are skipped, never fatal

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use pulse_core::{SessionDescriptor, TranscriptPath};
use serde::Deserialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;
use tracing::{debug, trace};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The lock directory exists but could not be listed.
    #[error("failed to read lock directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Result Type
// ============================================================================

/// Outcome of one discovery pass as applied by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Sessions newly attached by this pass
    pub attached: u32,
    /// Sessions torn down because they disappeared
    pub detached: u32,
    /// New descriptors that could not be attached
    pub failed: u32,
    /// Sessions monitored after the pass
    pub live: u32,
}

impl DiscoveryResult {
    /// Returns true if the pass changed the monitored set.
    pub fn changed(&self) -> bool {
        self.attached > 0 || self.detached > 0
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Source of live session descriptors.
pub trait SessionDiscovery: Send {
    /// Returns every session that is currently live.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError` if the source cannot be read at all. The
    /// monitor keeps its current set in that case.
    fn discover(&mut self) -> Result<Vec<SessionDescriptor>, DiscoveryError>;
}

/// Process liveness check.
pub trait LivenessCheck: Send {
    /// Returns true if a process with this pid exists.
    fn is_alive(&mut self, pid: u32) -> bool;
}

/// Maps a session to its transcript file.
pub trait TranscriptLocator: Send {
    /// Returns the transcript path, or `None` if it does not exist yet.
    fn locate(&self, descriptor: &SessionDescriptor) -> Option<TranscriptPath>;
}

// ============================================================================
// Liveness
// ============================================================================

/// Liveness via the OS process table.
pub struct SysinfoLiveness {
    system: System,
}

impl SysinfoLiveness {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoLiveness {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessCheck for SysinfoLiveness {
    fn is_alive(&mut self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).is_some()
    }
}

// ============================================================================
// Lock-file Discovery
// ============================================================================

/// On-disk shape of an IDE lock file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFile {
    pid: u32,
    #[serde(default)]
    workspace_folders: Vec<PathBuf>,
    #[serde(default)]
    ide_name: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Discovers sessions from `*.lock` files in a directory.
///
/// The session id is the lock file's `sessionId`, or its file stem when the
/// field is absent. Descriptors whose pid is not alive are dropped.
pub struct LockFileDiscovery<L> {
    lock_dir: PathBuf,
    liveness: L,
}

impl<L: LivenessCheck> LockFileDiscovery<L> {
    pub fn new(lock_dir: impl Into<PathBuf>, liveness: L) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            liveness,
        }
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }
}

impl<L: LivenessCheck> SessionDiscovery for LockFileDiscovery<L> {
    fn discover(&mut self) -> Result<Vec<SessionDescriptor>, DiscoveryError> {
        let entries = match std::fs::read_dir(&self.lock_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %self.lock_dir.display(), "Lock directory does not exist");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(DiscoveryError::ReadDir {
                    path: self.lock_dir.clone(),
                    source,
                })
            }
        };

        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }

            let Some(descriptor) = read_lock_file(&path) else {
                continue;
            };

            if !self.liveness.is_alive(descriptor.pid) {
                trace!(
                    session_id = %descriptor.id,
                    pid = descriptor.pid,
                    "Skipping lock file of dead process"
                );
                continue;
            }

            if seen.insert(descriptor.id.clone()) {
                descriptors.push(descriptor);
            }
        }

        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(descriptors)
    }
}

/// Parses one lock file, logging and skipping anything unusable.
fn read_lock_file(path: &Path) -> Option<SessionDescriptor> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to read lock file");
            return None;
        }
    };

    let lock: LockFile = match serde_json::from_str(&contents) {
        Ok(lock) => lock,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping malformed lock file");
            return None;
        }
    };

    let id = lock
        .session_id
        .filter(|id| !id.is_empty())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))?;
    let ide_name = lock
        .ide_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let mut descriptor = SessionDescriptor::new(id, lock.pid, ide_name);
    for folder in lock.workspace_folders {
        descriptor = descriptor.with_workspace(folder);
    }
    Some(descriptor)
}

// ============================================================================
// Transcript Location
// ============================================================================

/// Resolves transcripts under the agent's per-project directory.
///
/// A workspace root `/home/u/app` maps to `<projects_dir>/-home-u-app/`.
/// Inside it, `<transcript_key>.jsonl` wins; otherwise the most recently
/// modified main-session transcript is used.
#[derive(Debug, Clone)]
pub struct ProjectsDirLocator {
    projects_dir: PathBuf,
}

impl ProjectsDirLocator {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }
}

impl TranscriptLocator for ProjectsDirLocator {
    fn locate(&self, descriptor: &SessionDescriptor) -> Option<TranscriptPath> {
        let file_name = format!("{}.jsonl", descriptor.transcript_key);

        for workspace in &descriptor.workspace_folders {
            let project_dir = workspace_to_project_dir(&self.projects_dir, workspace);

            let exact = project_dir.join(&file_name);
            if exact.is_file() {
                return Some(TranscriptPath::new(exact));
            }

            if let Some(latest) = find_latest_transcript(&project_dir) {
                trace!(
                    session_id = %descriptor.id,
                    path = %latest.display(),
                    "Using most recent transcript in project"
                );
                return Some(TranscriptPath::new(latest));
            }
        }

        None
    }
}

/// Converts a workspace root to its project directory.
///
/// The agent escapes the absolute path by replacing every '/' with '-'.
/// Example: `/home/user/project` -> `<projects_dir>/-home-user-project`
fn workspace_to_project_dir(projects_dir: &Path, workspace: &Path) -> PathBuf {
    let escaped = workspace.to_string_lossy().replace('/', "-");
    projects_dir.join(escaped)
}

/// Finds the most recently modified transcript in a project directory.
///
/// Only considers `.jsonl` files that are not `agent-*` sub-agent
/// transcripts.
fn find_latest_transcript(project_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(project_dir).ok()?;

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                return None;
            }

            let stem = path.file_stem()?.to_string_lossy();
            if stem.starts_with("agent-") {
                return None;
            }

            let mtime: SystemTime = entry.metadata().ok()?.modified().ok()?;
            Some((path, mtime))
        })
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Liveness fake: only the listed pids are alive.
    struct AlivePids(HashSet<u32>);

    impl LivenessCheck for AlivePids {
        fn is_alive(&mut self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn alive(pids: &[u32]) -> AlivePids {
        AlivePids(pids.iter().copied().collect())
    }

    fn write_lock(dir: &Path, name: &str, body: serde_json::Value) {
        std::fs::write(dir.join(name), body.to_string()).unwrap();
    }

    #[test]
    fn test_workspace_to_project_dir() {
        let dir = workspace_to_project_dir(Path::new("/p"), Path::new("/home/user/my-project"));
        assert_eq!(dir, PathBuf::from("/p/-home-user-my-project"));
    }

    #[test]
    fn test_discovers_live_lock_files() {
        let dir = TempDir::new().unwrap();
        write_lock(
            dir.path(),
            "1234.lock",
            json!({"pid": 100, "workspaceFolders": ["/work/app"], "ideName": "VS Code"}),
        );
        write_lock(
            dir.path(),
            "other.lock",
            json!({"pid": 200, "ideName": "Zed", "sessionId": "abc-def"}),
        );

        let mut discovery = LockFileDiscovery::new(dir.path(), alive(&[100, 200]));
        let found = discovery.discover().unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id.as_str(), "1234");
        assert_eq!(found[0].ide_name, "VS Code");
        assert_eq!(found[0].primary_workspace(), Some(Path::new("/work/app")));
        assert_eq!(found[1].id.as_str(), "abc-def");
        assert_eq!(found[1].transcript_key, "abc-def");
    }

    #[test]
    fn test_dead_pids_and_junk_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_lock(dir.path(), "dead.lock", json!({"pid": 9}));
        write_lock(dir.path(), "live.lock", json!({"pid": 10}));
        std::fs::write(dir.path().join("broken.lock"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "{\"pid\": 10}").unwrap();

        let mut discovery = LockFileDiscovery::new(dir.path(), alive(&[10]));
        let found = discovery.discover().unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "live");
        assert_eq!(found[0].ide_name, "unknown");
    }

    #[test]
    fn test_missing_lock_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut discovery = LockFileDiscovery::new(dir.path().join("nope"), alive(&[]));
        assert!(discovery.discover().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_session_ids_are_collapsed() {
        let dir = TempDir::new().unwrap();
        write_lock(dir.path(), "a.lock", json!({"pid": 1, "sessionId": "same"}));
        write_lock(dir.path(), "b.lock", json!({"pid": 2, "sessionId": "same"}));

        let mut discovery = LockFileDiscovery::new(dir.path(), alive(&[1, 2]));
        assert_eq!(discovery.discover().unwrap().len(), 1);
    }

    #[test]
    fn test_locator_prefers_exact_key() {
        let projects = TempDir::new().unwrap();
        let project_dir = projects.path().join("-work-app");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("sess-1.jsonl"), "").unwrap();
        std::fs::write(project_dir.join("other.jsonl"), "").unwrap();

        let locator = ProjectsDirLocator::new(projects.path());
        let descriptor = SessionDescriptor::new("sess-1", 1, "ide").with_workspace("/work/app");

        let path = locator.locate(&descriptor).unwrap();
        assert_eq!(path.as_path(), project_dir.join("sess-1.jsonl"));
    }

    #[test]
    fn test_locator_falls_back_to_latest_main_transcript() {
        let projects = TempDir::new().unwrap();
        let project_dir = projects.path().join("-work-app");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("agent-123.jsonl"), "").unwrap();
        std::fs::write(project_dir.join("main.jsonl"), "").unwrap();

        let locator = ProjectsDirLocator::new(projects.path());
        let descriptor = SessionDescriptor::new("unknown-key", 1, "ide").with_workspace("/work/app");

        let path = locator.locate(&descriptor).unwrap();
        assert_eq!(path.filename(), Some("main.jsonl"));
    }

    #[test]
    fn test_locator_without_transcript() {
        let projects = TempDir::new().unwrap();
        let locator = ProjectsDirLocator::new(projects.path());

        let no_workspace = SessionDescriptor::new("s", 1, "ide");
        assert!(locator.locate(&no_workspace).is_none());

        let empty_project = SessionDescriptor::new("s", 1, "ide").with_workspace("/nothing/here");
        assert!(locator.locate(&empty_project).is_none());
    }

    #[test]
    fn test_sysinfo_liveness_sees_current_process() {
        let mut liveness = SysinfoLiveness::new();
        assert!(liveness.is_alive(std::process::id()));
        assert!(!liveness.is_alive(0));
    }
}
