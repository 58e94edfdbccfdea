//! Audit Log Writer
//!
//! Append-only JSONL streams under one directory:
//! - `decisions.jsonl` - one `AuditRecord` per intercepted command
//! - `sessions.jsonl` - session start / end
//! - `policy_changes.jsonl` - enable / disable / threshold updates
//!
//! Every append holds an exclusive `fs2` lock on `.audit.lock`, so writers in
//! different shells never interleave. Records are flushed and synced before
//! the lock is released. Decision timestamps are clamped so they never go
//! backwards within a file.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::AuditWriteError;
use crate::logic::config::GuardConfig;

use super::record::{AuditRecord, PolicyChange, SessionRecord};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const SESSIONS_FILE: &str = "sessions.jsonl";
pub const POLICY_CHANGES_FILE: &str = "policy_changes.jsonl";
pub const LOCK_FILE: &str = ".audit.lock";

/// Tail window scanned for the previous timestamp
const TAIL_WINDOW: u64 = 64 * 1024;

// ============================================================================
// AUDIT LOG
// ============================================================================

pub struct AuditLog {
    dir: PathBuf,
    max_file_bytes: u64,
    /// Serialises appends from threads of this process
    local: Mutex<()>,
    records_written: AtomicU64,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_bytes,
            local: Mutex::new(()),
            records_written: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.audit_dir(), config.audit.max_file_bytes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn decisions_path(&self) -> PathBuf {
        self.dir.join(DECISIONS_FILE)
    }

    /// Appends (all streams) made by this instance
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::SeqCst)
    }

    /// Append one decision record; returns it with the write timestamp set
    pub fn append(&self, record: &AuditRecord) -> Result<AuditRecord, AuditWriteError> {
        let path = self.decisions_path();
        self.with_lock(|| {
            // Read before rotating so the clamp carries across files
            let previous = last_timestamp(&path).or_else(|| self.last_rotated_timestamp());
            self.rotate_if_needed(&path, previous.unwrap_or_else(Utc::now))?;

            let mut stamped = record.clone();
            let now = Utc::now();
            stamped.timestamp = match previous {
                Some(last) if last > now => last,
                _ => now,
            };

            let line = serde_json::to_string(&stamped)?;
            append_line(&path, &line)?;
            Ok(stamped)
        })
    }

    pub fn append_session(&self, record: &SessionRecord) -> Result<(), AuditWriteError> {
        self.append_to(SESSIONS_FILE, record)
    }

    pub fn append_policy_change(&self, change: &PolicyChange) -> Result<(), AuditWriteError> {
        self.append_to(POLICY_CHANGES_FILE, change)
    }

    fn append_to<T: Serialize>(&self, file_name: &str, value: &T) -> Result<(), AuditWriteError> {
        let path = self.dir.join(file_name);
        let line = serde_json::to_string(value)?;
        self.with_lock(|| append_line(&path, &line))
    }

    /// Run `f` holding both the in-process and the cross-process lock
    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, AuditWriteError>) -> Result<T, AuditWriteError> {
        let _local = self.local.lock();

        std::fs::create_dir_all(&self.dir).map_err(|source| AuditWriteError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let lock_path = self.dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|source| AuditWriteError::Lock {
                path: lock_path.clone(),
                source,
            })?;
        FileExt::lock_exclusive(&lock_file).map_err(|source| AuditWriteError::Lock {
            path: lock_path.clone(),
            source,
        })?;

        let result = f();
        if result.is_ok() {
            self.records_written.fetch_add(1, Ordering::SeqCst);
        }

        if let Err(e) = FileExt::unlock(&lock_file) {
            log::warn!("Failed to release audit lock {:?}: {}", lock_path, e);
        }
        result
    }

    /// Last timestamp of the newest rotated file, for an empty live file
    fn last_rotated_timestamp(&self) -> Option<DateTime<Utc>> {
        let files = list_decision_files(&self.dir).ok()?;
        files
            .iter()
            .rev()
            .filter(|f| f.file_name().and_then(|n| n.to_str()) != Some(DECISIONS_FILE))
            .find_map(|f| last_timestamp(f))
    }

    /// Rename a full `decisions.jsonl` aside; never deletes.
    ///
    /// The name carries the file's last record time plus a counter, so names
    /// sort in write order even when the wall clock steps back.
    fn rotate_if_needed(&self, path: &Path, last: DateTime<Utc>) -> Result<(), AuditWriteError> {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_file_bytes {
            return Ok(());
        }

        let stamp = last.format("%Y%m%dT%H%M%S%.3fZ");
        let mut n = 0;
        let mut rotated = self.dir.join(format!("decisions-{}-{:04}.jsonl", stamp, n));
        while rotated.exists() {
            n += 1;
            rotated = self.dir.join(format!("decisions-{}-{:04}.jsonl", stamp, n));
        }

        std::fs::rename(path, &rotated).map_err(|source| AuditWriteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Rotated audit log {:?} to {:?}", path, rotated);
        Ok(())
    }
}

// ============================================================================
// FILE HELPERS
// ============================================================================

fn append_line(path: &Path, line: &str) -> Result<(), AuditWriteError> {
    let io_err = |source: std::io::Error| AuditWriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;

    // One write per record keeps the line whole even for readers without the lock
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes()).map_err(io_err)?;
    file.sync_data().map_err(io_err)?;
    Ok(())
}

/// Timestamp of the last complete record in `path`, if any
fn last_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let mut file = File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start)).ok()?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).ok()?;
    let tail = String::from_utf8_lossy(&bytes);

    let last = tail.lines().rev().find(|l| !l.trim().is_empty())?;
    let value: serde_json::Value = serde_json::from_str(last).ok()?;
    let ts = value.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(ts).ok().map(|t| t.with_timezone(&Utc))
}

// ============================================================================
// QUERY API (read-only)
// ============================================================================

/// Records read from one file, with the number of lines that did not parse
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub records: Vec<AuditRecord>,
    pub malformed: usize,
}

/// Read decision records from one file. Malformed lines are skipped and counted.
pub fn read_records(path: &Path) -> std::io::Result<ReadOutcome> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut outcome = ReadOutcome::default();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => outcome.records.push(record),
            Err(_) => outcome.malformed += 1,
        }
    }

    Ok(outcome)
}

/// Rotated decision files (oldest first), then the live file
pub fn list_decision_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut rotated = Vec::new();

    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with("decisions-") && name.ends_with(".jsonl") {
                rotated.push(path);
            }
        }
    }

    // Names embed a sortable UTC timestamp
    rotated.sort();
    let live = dir.join(DECISIONS_FILE);
    if live.exists() {
        rotated.push(live);
    }
    Ok(rotated)
}

// ============================================================================
// TESTS
// ============================================================================
