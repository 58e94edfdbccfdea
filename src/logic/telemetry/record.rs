//! Audit Record Types
//!
//! Immutable, timestamped records for the audit trail. One `AuditRecord` per
//! intercepted command; `SessionRecord` and `PolicyChange` for the session
//! lifecycle and operator actions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FaultKind;
use crate::logic::command::{CommandEvent, EnvironmentFingerprint};
use crate::logic::escalation::{Decision, DecisionSource, HumanResponse, LlmAssessment, Outcome, Transition};
use crate::logic::features::FeatureVector;
use crate::logic::risk::RiskTier;

// ============================================================================
// DECISION RECORD
// ============================================================================

/// CommandEvent + FeatureVector + Decision, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Event id
    pub id: Uuid,
    /// Write time, non-decreasing within a log file
    pub timestamp: DateTime<Utc>,
    pub intercepted_at: DateTime<Utc>,
    pub session_id: String,
    pub raw_command: String,
    pub argv: Vec<String>,
    pub working_directory: String,
    pub environment_fingerprint: EnvironmentFingerprint,

    pub features: BTreeMap<String, f32>,
    pub feature_version: u8,
    pub layout_hash: u32,

    pub tier: RiskTier,
    pub initial_tier: RiskTier,
    pub decision_source: DecisionSource,
    pub outcome: Outcome,
    pub reasoning: String,
    pub latency_ms: u64,
    pub ruleset_version: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pinned: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<FaultKind>,

    /// LLM verdict with confidence and latency, when the LLM was asked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmAssessment>,
    /// Human answer and response time, when a human was asked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human: Option<HumanResponse>,
}

impl AuditRecord {
    pub fn new(event: &CommandEvent, vector: &FeatureVector, decision: &Decision) -> Self {
        Self {
            id: event.id,
            timestamp: Utc::now(),
            intercepted_at: event.timestamp,
            session_id: event.session_id.clone(),
            raw_command: event.raw_command.clone(),
            argv: event.argv.clone(),
            working_directory: event.working_directory.to_string_lossy().to_string(),
            environment_fingerprint: event.environment_fingerprint.clone(),
            features: vector.named_values(),
            feature_version: vector.version,
            layout_hash: vector.layout_hash,
            tier: decision.tier,
            initial_tier: decision.initial_tier,
            decision_source: decision.source,
            outcome: decision.outcome,
            reasoning: decision.reasoning.clone(),
            latency_ms: decision.latency_ms,
            ruleset_version: decision.ruleset_version.clone(),
            score: decision.score,
            pinned: decision.pinned.clone(),
            transitions: decision.transitions.clone(),
            faults: decision.faults.clone(),
            llm: decision.llm.clone(),
            human: decision.human.clone(),
        }
    }

    pub fn is_fail_safe(&self) -> bool {
        self.decision_source == DecisionSource::FailSafe
    }

    /// A human or fail-safe answer that differs from the LLM/local view is
    /// what training data curation looks for
    pub fn was_escalated(&self) -> bool {
        matches!(self.decision_source, DecisionSource::Human | DecisionSource::FailSafe)
    }
}

// ============================================================================
// SESSION RECORD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Started,
    Ended,
}

/// Line in `sessions.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub kind: SessionEventKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub override_count: u64,
}

// ============================================================================
// POLICY CHANGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChangeKind {
    Enabled,
    Disabled,
    ThresholdsUpdated,
    ThresholdsReset,
}

/// Line in `policy_changes.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChange {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub change: PolicyChangeKind,
    pub previous: String,
    pub current: String,
    /// OS user that issued the change, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl PolicyChange {
    pub fn new(session_id: &str, change: PolicyChangeKind, previous: impl Into<String>, current: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            change,
            previous: previous.into(),
            current: current.into(),
            actor: std::env::var("USER").ok().filter(|u| !u.is_empty()),
        }
    }
}
