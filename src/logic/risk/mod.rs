//! Risk Module
//!
//! Local, deterministic classification of a feature vector into a risk tier.
//! This runs on the hot path of every intercepted command.
//!
//! ## Structure
//! - `types`: RiskTier, PinnedRule, Classification
//! - `rules`: thresholds, weights, pinned rules, ruleset version
//! - `classifier`: classification logic
//!
//! ## Usage
//! ```ignore
//! use crate::logic::risk::{classify, RiskTier};
//!
//! let result = classify(&vector);
//! match result.tier {
//!     RiskTier::Low => allow(),
//!     RiskTier::Medium => ask_llm(),
//!     RiskTier::High => ask_human(),
//! }
//! ```

pub mod types;
pub mod rules;
pub mod classifier;

pub use types::{Classification, PinnedRule, RiskTier};

pub use rules::{HIGH_TIER_MIN, LOW_TIER_MAX, RULESET_VERSION};

pub use classifier::{classify, classify_with_thresholds};
