//! Command Event Types
//!
//! Immutable record of one intercepted invocation plus the execution context
//! it was issued in. Created once at interception, never mutated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ============================================================================
// HOST REQUEST
// ============================================================================

/// What a host hands to the interceptor
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    pub raw_command: String,
    pub working_directory: PathBuf,
    /// Falls back to `AGENT_GUARD_SESSION`, then a derived id
    pub session_id: Option<String>,
    /// Environment visible to the command (filtered before it is stored)
    pub env: Vec<(String, String)>,
}

impl CommandRequest {
    pub fn new(raw_command: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            raw_command: raw_command.into(),
            working_directory: working_directory.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Capture the current process environment
    pub fn with_process_env(self) -> Self {
        let env = std::env::vars().collect();
        self.with_env(env)
    }
}

// ============================================================================
// ENVIRONMENT FINGERPRINT
// ============================================================================

/// Name fragments that mark a variable as secret regardless of configuration
const SECRET_MARKERS: &[&str] = &["KEY", "TOKEN", "SECRET", "PASSWORD", "PASSWD", "CREDENTIAL", "AUTH"];

/// Selected, non-secret environment values plus a digest of them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub vars: BTreeMap<String, String>,
    pub hostname: Option<String>,
    /// SHA-256 over the retained `name=value` pairs
    pub digest: String,
}

impl EnvironmentFingerprint {
    pub fn capture(env: &[(String, String)], allowed: &[String]) -> Self {
        let mut vars = BTreeMap::new();
        for (name, value) in env {
            if !allowed.iter().any(|a| a == name) || is_secret_name(name) {
                continue;
            }
            vars.insert(name.clone(), value.clone());
        }

        let mut hasher = Sha256::new();
        for (name, value) in &vars {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        Self {
            vars,
            hostname: hostname::get().ok().map(|h| h.to_string_lossy().to_string()),
            digest: hex::encode(hasher.finalize()),
        }
    }
}

fn is_secret_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|m| upper.contains(m))
}

// ============================================================================
// EXECUTION CONTEXT
// ============================================================================

/// Where and on whose behalf a command runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub working_directory: PathBuf,
    pub session_id: String,
    /// Branch checked out in the working directory, if it is a git repo
    pub current_branch: Option<String>,
    pub environment: EnvironmentFingerprint,
}

/// Read the checked-out branch from `.git/HEAD`, walking up from `start`
pub fn detect_git_branch(start: &Path) -> Option<String> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let dot_git = current.join(".git");
        if dot_git.is_dir() {
            return read_head(&dot_git.join("HEAD"));
        }
        if dot_git.is_file() {
            // worktrees and submodules: `gitdir: <path>`
            let content = std::fs::read_to_string(&dot_git).ok()?;
            let gitdir = content.strip_prefix("gitdir:")?.trim();
            let gitdir = current.join(gitdir);
            return read_head(&gitdir.join("HEAD"));
        }
        dir = current.parent();
    }
    None
}

fn read_head(head: &Path) -> Option<String> {
    let content = std::fs::read_to_string(head).ok()?;
    content
        .trim()
        .strip_prefix("ref: refs/heads/")
        .map(|b| b.to_string())
}

// ============================================================================
// COMMAND EVENT
// ============================================================================

/// Immutable record of one intercepted command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub raw_command: String,
    pub argv: Vec<String>,
    pub working_directory: PathBuf,
    pub session_id: String,
    pub environment_fingerprint: EnvironmentFingerprint,
}

impl CommandEvent {
    pub fn new(raw_command: &str, argv: Vec<String>, context: &ExecutionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            raw_command: raw_command.to_string(),
            argv,
            working_directory: context.working_directory.clone(),
            session_id: context.session_id.clone(),
            environment_fingerprint: context.environment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_drops_secrets() {
        let env = vec![
            ("SHELL".to_string(), "/bin/zsh".to_string()),
            ("OPENAI_API_KEY".to_string(), "sk-123".to_string()),
            ("HOME".to_string(), "/home/dev".to_string()),
        ];
        let allowed = vec!["SHELL".to_string(), "OPENAI_API_KEY".to_string()];

        let fp = EnvironmentFingerprint::capture(&env, &allowed);
        assert_eq!(fp.vars.len(), 1);
        assert_eq!(fp.vars.get("SHELL").map(String::as_str), Some("/bin/zsh"));
        assert!(!fp.vars.contains_key("OPENAI_API_KEY"));
        assert_eq!(fp.digest.len(), 64);
    }

    #[test]
    fn test_fingerprint_digest_is_stable() {
        let env = vec![("TERM".to_string(), "xterm".to_string())];
        let allowed = vec!["TERM".to_string()];
        let a = EnvironmentFingerprint::capture(&env, &allowed);
        let b = EnvironmentFingerprint::capture(&env, &allowed);
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn test_detect_git_branch() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/feature/x\n").unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(detect_git_branch(&nested).as_deref(), Some("feature/x"));
    }

    #[test]
    fn test_detached_head_has_no_branch() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "3f2a9c1d\n").unwrap();
        assert_eq!(detect_git_branch(dir.path()), None);
    }
}
