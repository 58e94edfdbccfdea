//! Error types
//!
//! Component errors never cross the pipeline boundary as failures: each one is
//! converted into a safe terminal state where it occurs. The enums below exist
//! so the conversion is explicit and so the cause lands in the audit record.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// FAULT TAXONOMY (recorded in audit records)
// ============================================================================

/// Fault categories that can shape a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Malformed input, resolved to a conservative feature vector
    ExtractionAnomaly,
    /// Internal classifier error, resolved to high / fail_safe
    ClassificationFault,
    /// LLM timeout, connection or parse failure, resolved to escalation
    LlmUnavailable,
    /// No human answer inside the window, resolved to deny / fail_safe
    HumanTimeout,
    /// Audit append failed, surfaced to the operator only
    AuditWriteError,
    /// Panic or invariant break inside the pipeline, resolved to deny / fail_safe
    InternalFault,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::ExtractionAnomaly => "extraction_anomaly",
            FaultKind::ClassificationFault => "classification_fault",
            FaultKind::LlmUnavailable => "llm_unavailable",
            FaultKind::HumanTimeout => "human_timeout",
            FaultKind::AuditWriteError => "audit_write_error",
            FaultKind::InternalFault => "internal_fault",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// COMPONENT ERRORS
// ============================================================================

/// Configuration load / validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Audit log append failure
#[derive(Debug, Error)]
pub enum AuditWriteError {
    #[error("audit I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to lock audit log {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// LLM arbiter failure (always converted into an escalation verdict)
#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("LLM call timed out after {0} ms")]
    Timeout(u64),
    #[error("LLM endpoint unreachable: {0}")]
    Connection(String),
    #[error("LLM endpoint returned HTTP {0}")]
    Status(u16),
    #[error("malformed LLM response: {0}")]
    Malformed(String),
    #[error("LLM confidence {confidence:.2} below threshold {threshold:.2}")]
    LowConfidence { confidence: f32, threshold: f32 },
    #[error("LLM arbiter disabled")]
    Disabled,
    #[error("failed to start LLM client: {0}")]
    Runtime(String),
}

impl ArbiterError {
    /// Timeout, connection and parse failures (not low confidence)
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, ArbiterError::LowConfidence { .. })
    }
}

/// Session state file failure
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session state I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt session state {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid policy update: {0}")]
    InvalidUpdate(String),
}

/// Read-only export failure
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
}
