//! Escalation Types
//!
//! States, transitions and the terminal `Decision`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FaultKind;
use crate::logic::arbiter::VerdictDecision;
use crate::logic::risk::RiskTier;

// ============================================================================
// STATE MACHINE
// ============================================================================

/// `Received → LocallyClassified → {Finalized | AwaitingLlm} → {Finalized | AwaitingHuman} → Finalized`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Received,
    LocallyClassified,
    AwaitingLlm,
    AwaitingHuman,
    Finalized,
}

impl EscalationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationState::Received => "received",
            EscalationState::LocallyClassified => "locally_classified",
            EscalationState::AwaitingLlm => "awaiting_llm",
            EscalationState::AwaitingHuman => "awaiting_human",
            EscalationState::Finalized => "finalized",
        }
    }

    /// Legal edges; anything may jump to `Finalized`
    pub fn can_transition_to(&self, next: EscalationState) -> bool {
        use EscalationState::*;
        matches!(
            (self, next),
            (_, Finalized)
                | (Received, LocallyClassified)
                | (LocallyClassified, AwaitingLlm)
                | (LocallyClassified, AwaitingHuman)
                | (AwaitingLlm, AwaitingHuman)
        ) && *self != Finalized
    }
}

/// One recorded edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: EscalationState,
    pub to: EscalationState,
    /// Tier on entry to `to`
    pub tier: RiskTier,
    /// Since the event was received
    pub elapsed_ms: u64,
}

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Local,
    Llm,
    Human,
    FailSafe,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Local => "local",
            DecisionSource::Llm => "llm",
            DecisionSource::Human => "human",
            DecisionSource::FailSafe => "fail_safe",
        }
    }
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
        }
    }

    pub fn is_allow(&self) -> bool {
        *self == Outcome::Allow
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STAGE RESULTS
// ============================================================================

/// What the LLM stage answered, whether or not it decided
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmAssessment {
    pub decision: VerdictDecision,
    pub confidence: f32,
    pub reasoning: String,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Arrived after the deadline and was ignored
    #[serde(default)]
    pub discarded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanAnswer {
    Allow,
    Deny,
    Timeout,
    Unavailable,
}

impl HumanAnswer {
    pub fn as_str(&self) -> &'static str {
        match self {
            HumanAnswer::Allow => "allow",
            HumanAnswer::Deny => "deny",
            HumanAnswer::Timeout => "timeout",
            HumanAnswer::Unavailable => "unavailable",
        }
    }
}

/// What the human stage answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanResponse {
    pub answer: HumanAnswer,
    pub latency_ms: u64,
}

/// Terminal result for one `CommandEvent`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub event_id: Uuid,
    /// Tier that triggered the terminal outcome
    pub tier: RiskTier,
    /// Tier assigned by the local classifier
    pub initial_tier: RiskTier,
    pub source: DecisionSource,
    pub outcome: Outcome,
    pub reasoning: String,
    pub latency_ms: u64,
    pub ruleset_version: String,
    /// Local weighted score
    pub score: f32,
    /// Pinned rule ids that matched
    #[serde(default)]
    pub pinned: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub faults: Vec<FaultKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human: Option<HumanResponse>,
}

impl Decision {
    pub fn is_fail_safe(&self) -> bool {
        self.source == DecisionSource::FailSafe
    }
}
