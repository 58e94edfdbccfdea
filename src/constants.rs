//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! `GuardConfig::default()` and the binary both read from here.

use std::path::PathBuf;

/// Default local LLM endpoint (OpenAI-compatible server on loopback)
pub const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:8001";

/// Default model name sent to the local endpoint
pub const DEFAULT_LLM_MODEL: &str = "local-guard";

/// Default LLM timeout (milliseconds)
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 3_000;

/// LLM verdicts below this confidence escalate to a human
pub const DEFAULT_LLM_MIN_CONFIDENCE: f32 = 0.70;

/// Default max tokens requested from the LLM
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 200;

/// Default human approval window (seconds)
pub const DEFAULT_HUMAN_TIMEOUT_SECS: u64 = 60;

/// Audit file size that triggers rotation (50 MB)
pub const DEFAULT_AUDIT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Local classification budget (microseconds)
pub const LOCAL_CLASSIFY_BUDGET_MICROS: u128 = 1_000;

/// Branches treated as protected when none are configured
pub const DEFAULT_PROTECTED_BRANCHES: &[&str] = &["main", "master", "production", "release/*"];

/// Environment variables copied into the environment fingerprint
pub const DEFAULT_FINGERPRINT_VARS: &[&str] = &[
    "SHELL",
    "TERM",
    "USER",
    "LANG",
    "VIRTUAL_ENV",
    "CONDA_DEFAULT_ENV",
    "CI",
    "CLAUDE_CODE_ACTIVE",
];

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "agent-guard";

/// Env var: explicit config file path
pub const ENV_CONFIG_PATH: &str = "AGENT_GUARD_CONFIG";

/// Env var: session id set by the shell integration
pub const ENV_SESSION_ID: &str = "AGENT_GUARD_SESSION";

/// Env var: state directory override
pub const ENV_STATE_DIR: &str = "AGENT_GUARD_STATE_DIR";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Default state directory (`<data_local_dir>/agent-guard`)
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default audit directory (`<state_dir>/audit`)
pub fn default_audit_dir() -> PathBuf {
    default_state_dir().join("audit")
}

/// Default config file location (`<config_dir>/agent-guard/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join("config.toml"))
}

/// Session id from the environment, if the shell integration exported one
pub fn session_id_from_env() -> Option<String> {
    std::env::var(ENV_SESSION_ID)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
