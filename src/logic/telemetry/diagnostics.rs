//! Operator Diagnostic Channel
//!
//! Where audit failures go when the audit log itself cannot be written:
//! an `error` log line, a stderr notice, and a best-effort line in
//! `<state_dir>/audit-fallback.log`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

pub const FALLBACK_FILE: &str = "audit-fallback.log";

#[derive(Debug, Clone)]
pub struct Diagnostics {
    fallback_path: PathBuf,
    stderr: bool,
}

impl Diagnostics {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            fallback_path: state_dir.join(FALLBACK_FILE),
            stderr: true,
        }
    }

    /// No stderr notice (tests)
    pub fn quiet(state_dir: &Path) -> Self {
        Self {
            stderr: false,
            ..Self::new(state_dir)
        }
    }

    pub fn fallback_path(&self) -> &Path {
        &self.fallback_path
    }

    /// Report an audit failure. Never fails.
    pub fn report(&self, context: &str, error: &dyn std::fmt::Display) {
        log::error!("Audit write failed ({}): {}", context, error);
        if self.stderr {
            eprintln!("agent-guard: audit log write failed ({}): {}", context, error);
        }

        let line = format!("{} {} {}\n", Utc::now().to_rfc3339(), context, error);
        let written = self
            .fallback_path
            .parent()
            .map(std::fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&self.fallback_path))
            .and_then(|mut f| f.write_all(line.as_bytes()));

        if let Err(e) = written {
            log::error!("Fallback diagnostic file {:?} also failed: {}", self.fallback_path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_report_writes_fallback_line() {
        let dir = TempDir::new().unwrap();
        let diag = Diagnostics::quiet(dir.path());
        diag.report("event 42", &"disk full");

        let content = std::fs::read_to_string(diag.fallback_path()).unwrap();
        assert!(content.contains("event 42"));
        assert!(content.contains("disk full"));
    }

    #[test]
    fn test_report_survives_unwritable_path() {
        let diag = Diagnostics::quiet(Path::new("/proc/definitely/not/writable"));
        diag.report("event", &"boom");
    }
}
