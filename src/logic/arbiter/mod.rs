//! Arbiter Module - LLM second opinion for medium-risk commands
//!
//! ## Structure
//! - `verdict`: `LlmVerdict` and response parsing
//! - `prompt`: prompt construction
//! - `client`: bounded HTTP client for the local endpoint
//!
//! An arbiter never fails: every error becomes the escalation sentinel.

pub mod verdict;
pub mod prompt;
pub mod client;

use std::time::Duration;

use crate::error::ArbiterError;
use crate::logic::command::CommandEvent;
use crate::logic::features::FeatureVector;

pub use client::LlmClient;
pub use verdict::{parse_verdict, LlmVerdict, VerdictDecision};

/// Second-opinion stage between the local classifier and a human
pub trait Arbiter: Send + Sync {
    /// Must return within `timeout` (plus scheduling slack)
    fn assess(
        &self,
        event: &CommandEvent,
        vector: &FeatureVector,
        reasoning_context: &str,
        timeout: Duration,
    ) -> LlmVerdict;
}

/// Used when `[llm] enabled = false`: everything escalates
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledArbiter;

impl Arbiter for DisabledArbiter {
    fn assess(&self, _: &CommandEvent, _: &FeatureVector, _: &str, _: Duration) -> LlmVerdict {
        LlmVerdict::from_error(&ArbiterError::Disabled)
    }
}
