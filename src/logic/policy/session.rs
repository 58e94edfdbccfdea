//! Session State File
//!
//! `<state_dir>/sessions/<session_id>.json` is the toggle surface: every
//! intercepted command reads it first. Read-modify-write cycles hold an
//! exclusive `fs2` lock on a sibling `.lock` file; the JSON itself is replaced
//! atomically (write to temp, rename) so readers never see a torn file.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SessionError;
use crate::logic::config::TierThresholds;

use super::overrides::OverrideKind;

/// Distinct commands remembered per session
pub const MAX_TRACKED_COMMANDS: usize = 512;

/// Hex chars of the SHA-256 used as command key
const COMMAND_KEY_LEN: usize = 16;

// ============================================================================
// SESSION STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub interceptor_enabled: bool,
    /// `allow` / `deny` override hits
    #[serde(default)]
    pub override_counts: BTreeMap<OverrideKind, u64>,
    /// Per-session thresholds, replacing the configured ones
    #[serde(default)]
    pub threshold_override: Option<TierThresholds>,
    /// Command key -> times seen
    #[serde(default)]
    pub command_counts: BTreeMap<String, u32>,
}

impl SessionState {
    pub fn new(session_id: &str, interceptor_enabled: bool) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at: Utc::now(),
            interceptor_enabled,
            override_counts: BTreeMap::new(),
            threshold_override: None,
            command_counts: BTreeMap::new(),
        }
    }

    pub fn total_overrides(&self) -> u64 {
        self.override_counts.values().sum()
    }

    pub fn prior_occurrences(&self, raw_command: &str) -> u32 {
        self.command_counts.get(&command_key(raw_command)).copied().unwrap_or(0)
    }

    /// Count one more occurrence; evicts the least-seen key when full
    pub fn record_command(&mut self, raw_command: &str) {
        let key = command_key(raw_command);
        if !self.command_counts.contains_key(&key) && self.command_counts.len() >= MAX_TRACKED_COMMANDS {
            let coldest = self
                .command_counts
                .iter()
                .min_by_key(|(_, count)| **count)
                .map(|(k, _)| k.clone());
            if let Some(k) = coldest {
                self.command_counts.remove(&k);
            }
        }
        let count = self.command_counts.entry(key).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn record_override(&mut self, kind: OverrideKind) {
        *self.override_counts.entry(kind).or_insert(0) += 1;
    }

    pub fn thresholds(&self, configured: &TierThresholds) -> TierThresholds {
        self.threshold_override.unwrap_or(*configured)
    }
}

/// Key for session history: SHA-256 prefix of the whitespace-normalised command
pub fn command_key(raw_command: &str) -> String {
    let normalized = raw_command.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(COMMAND_KEY_LEN);
    key
}

/// Per shell context: the parent process of this invocation
pub fn derive_session_id() -> String {
    #[cfg(unix)]
    {
        format!("shell-{}", std::os::unix::process::parent_id())
    }
    #[cfg(not(unix))]
    {
        "default".to_string()
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct SessionStore {
    dir: PathBuf,
    local: Mutex<()>,
}

impl SessionStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("sessions"),
            local: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }

    /// `Ok(None)` when the session has no state file
    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>, SessionError> {
        read_state(&self.path_for(session_id))
    }

    /// Locked read-modify-write. `init` supplies the state when the file is
    /// missing or corrupt; the second element is true in that case.
    pub fn update<F>(
        &self,
        session_id: &str,
        init: impl FnOnce() -> SessionState,
        mutate: F,
    ) -> Result<(SessionState, bool), SessionError>
    where
        F: FnOnce(&mut SessionState),
    {
        let _local = self.local.lock();
        let path = self.path_for(session_id);
        let lock = self.lock_file(session_id)?;

        let result = (|| {
            let (mut state, created) = match read_state(&path) {
                Ok(Some(state)) => (state, false),
                Ok(None) => (init(), true),
                Err(SessionError::Corrupt { path, source }) => {
                    log::warn!("Replacing corrupt session state {:?}: {}", path, source);
                    (init(), true)
                }
                Err(e) => return Err(e),
            };
            mutate(&mut state);
            write_state(&path, &state)?;
            Ok((state, created))
        })();

        if let Err(e) = FileExt::unlock(&lock) {
            log::warn!("Failed to release session lock for {}: {}", session_id, e);
        }
        result
    }

    /// Delete the state file (session end)
    pub fn remove(&self, session_id: &str) -> Result<(), SessionError> {
        let _local = self.local.lock();
        let path = self.path_for(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io { path, source }),
        }
    }

    fn lock_file(&self, session_id: &str) -> Result<std::fs::File, SessionError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| SessionError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(format!(".{}.lock", file_stem(session_id)));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| SessionError::Io {
                path: path.clone(),
                source,
            })?;
        FileExt::lock_exclusive(&file).map_err(|source| SessionError::Io { path, source })?;
        Ok(file)
    }
}

/// Safe file name for an arbitrary session id
fn file_stem(session_id: &str) -> String {
    let clean = !session_id.is_empty()
        && session_id.len() <= 64
        && session_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !session_id.starts_with('.');
    if clean {
        session_id.to_string()
    } else {
        format!("h-{}", &hex::encode(Sha256::digest(session_id.as_bytes()))[..24])
    }
}

fn read_state(path: &Path) -> Result<Option<SessionState>, SessionError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SessionError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&content).map(Some).map_err(|source| SessionError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_state(path: &Path, state: &SessionState) -> Result<(), SessionError> {
    let io_err = |source: std::io::Error| SessionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(state).map_err(|source| SessionError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_command_key_normalises_whitespace() {
        assert_eq!(command_key("git   status"), command_key(" git status "));
        assert_ne!(command_key("git status"), command_key("git push"));
        assert_eq!(command_key("ls").len(), COMMAND_KEY_LEN);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = SessionState::new("s", true);
        state.record_command("keep me");
        state.record_command("keep me");
        for i in 0..(MAX_TRACKED_COMMANDS + 10) {
            state.record_command(&format!("echo {}", i));
        }
        assert_eq!(state.command_counts.len(), MAX_TRACKED_COMMANDS);
        assert_eq!(state.prior_occurrences("keep me"), 2);
    }

    #[test]
    fn test_update_creates_then_persists() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        let (state, created) = store
            .update("abc", || SessionState::new("abc", true), |s| s.record_command("ls"))
            .unwrap();
        assert!(created);
        assert_eq!(state.prior_occurrences("ls"), 1);

        let (state, created) = store
            .update("abc", || SessionState::new("abc", true), |s| s.interceptor_enabled = false)
            .unwrap();
        assert!(!created);
        assert!(!state.interceptor_enabled);

        let loaded = store.load("abc").unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_corrupt_file_reported_then_replaced() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.path_for("bad"), "{ nope").unwrap();

        assert!(matches!(store.load("bad"), Err(SessionError::Corrupt { .. })));

        let (state, created) = store.update("bad", || SessionState::new("bad", true), |_| {}).unwrap();
        assert!(created);
        assert!(state.interceptor_enabled);
    }

    #[test]
    fn test_unsafe_ids_are_hashed() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let path = store.path_for("../../etc/passwd");
        assert_eq!(path.parent().unwrap(), store.dir());
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("h-"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.update("gone", || SessionState::new("gone", true), |_| {}).unwrap();
        store.remove("gone").unwrap();
        store.remove("gone").unwrap();
        assert!(store.load("gone").unwrap().is_none());
    }
}
