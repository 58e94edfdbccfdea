//! Risk Types
//!
//! Core types for risk classification. No logic here, only data.

use serde::{Deserialize, Serialize};

// ============================================================================
// RISK TIER
// ============================================================================

/// Totally ordered: `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PINNED RULES
// ============================================================================

/// Destructive patterns that always classify as `High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinnedRule {
    RecursiveDeleteRoot,
    ForcePushProtectedBranch,
    RawDeviceWrite,
    RemoteScriptExecution,
    ForkBomb,
}

impl PinnedRule {
    pub fn id(&self) -> &'static str {
        match self {
            PinnedRule::RecursiveDeleteRoot => "recursive-delete-root",
            PinnedRule::ForcePushProtectedBranch => "force-push-protected-branch",
            PinnedRule::RawDeviceWrite => "raw-device-write",
            PinnedRule::RemoteScriptExecution => "remote-script-execution",
            PinnedRule::ForkBomb => "fork-bomb",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PinnedRule::RecursiveDeleteRoot => "recursive delete of a root, home or system path",
            PinnedRule::ForcePushProtectedBranch => "force-push to a protected branch",
            PinnedRule::RawDeviceWrite => "raw write to a block device",
            PinnedRule::RemoteScriptExecution => "network download piped into an interpreter",
            PinnedRule::ForkBomb => "fork bomb",
        }
    }
}

impl std::fmt::Display for PinnedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

/// Output of the local classifier
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub tier: RiskTier,
    /// Human-readable reasoning chain
    pub reasoning: String,
    /// Individual reasons, most severe first
    pub reasons: Vec<String>,
    /// Pinned rules that matched
    pub pinned: Vec<PinnedRule>,
    /// Final weighted score in [0, 1]
    pub score: f32,
    /// Unparseable input raised the tier to at least `Medium`
    pub floored: bool,
    /// Set when classification could not run; tier is `High`
    pub fault: Option<String>,
    pub ruleset_version: &'static str,
}

impl Classification {
    pub fn is_pinned(&self) -> bool {
        !self.pinned.is_empty()
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}
