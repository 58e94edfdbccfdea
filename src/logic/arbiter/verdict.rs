//! LLM Verdict
//!
//! Structured answer from the arbiter, and the parser that turns raw model
//! text into one. Anything that does not parse cleanly is an error; the
//! caller converts errors into the escalation sentinel.

use serde::{Deserialize, Serialize};

use crate::error::ArbiterError;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictDecision {
    Allow,
    Deny,
    /// Hand the decision to a human
    Escalate,
}

impl VerdictDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictDecision::Allow => "allow",
            VerdictDecision::Deny => "deny",
            VerdictDecision::Escalate => "escalate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmVerdict {
    pub decision: VerdictDecision,
    pub confidence: f32,
    pub reasoning: String,
    /// Set when the verdict is the sentinel for a failed call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// The endpoint could not produce a usable answer (timeout, connection, parse)
    #[serde(default)]
    pub unavailable: bool,
}

impl LlmVerdict {
    /// Sentinel: escalate to a human
    pub fn escalate(reasoning: impl Into<String>) -> Self {
        Self {
            decision: VerdictDecision::Escalate,
            confidence: 0.0,
            reasoning: reasoning.into(),
            failure: None,
            unavailable: false,
        }
    }

    /// Sentinel built from an arbiter error
    pub fn from_error(err: &ArbiterError) -> Self {
        Self {
            decision: VerdictDecision::Escalate,
            confidence: 0.0,
            reasoning: format!("LLM arbiter could not decide: {}", err),
            failure: Some(err.to_string()),
            unavailable: err.is_unavailable(),
        }
    }

    /// Allow or deny, i.e. the verdict can finalize a decision
    pub fn is_confident(&self) -> bool {
        self.decision != VerdictDecision::Escalate
    }
}

// ============================================================================
// PARSING
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawVerdict {
    decision: String,
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

/// Parse model output into a verdict.
///
/// Accepts a bare JSON object, optionally wrapped in a markdown code fence or
/// surrounded by prose. Confidence under `min_confidence` is an error.
pub fn parse_verdict(text: &str, min_confidence: f32) -> Result<LlmVerdict, ArbiterError> {
    let body = json_object(text).ok_or_else(|| ArbiterError::Malformed(format!("no JSON object in {:?}", preview(text))))?;

    let raw: RawVerdict = serde_json::from_str(body).map_err(|e| ArbiterError::Malformed(e.to_string()))?;

    let decision = match raw.decision.trim().to_ascii_lowercase().as_str() {
        "allow" | "approve" | "approved" => VerdictDecision::Allow,
        "deny" | "denied" | "block" | "reject" => VerdictDecision::Deny,
        "escalate" | "ask" | "uncertain" => VerdictDecision::Escalate,
        other => return Err(ArbiterError::Malformed(format!("unknown decision {:?}", other))),
    };

    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(ArbiterError::Malformed(format!("confidence {} outside [0, 1]", raw.confidence)));
    }
    if raw.confidence < min_confidence {
        return Err(ArbiterError::LowConfidence {
            confidence: raw.confidence,
            threshold: min_confidence,
        });
    }

    let reasoning = raw.reasoning.trim();
    Ok(LlmVerdict {
        decision,
        confidence: raw.confidence,
        reasoning: if reasoning.is_empty() { "no reasoning given".to_string() } else { reasoning.to_string() },
        failure: None,
        unavailable: false,
    })
}

/// Outermost `{ ... }` span
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}

// ============================================================================
// TESTS
// ============================================================================
