//! Logic Module - Command interception pipeline
//!
//! interception -> feature extraction -> risk classification -> escalation -> audit
//!
//! ## Structure
//! - `command/` - Command events, execution context, shell parsing
//! - `features/` - Versioned feature layout and extraction
//! - `risk/` - Pinned rules, weighted scoring, tiering
//! - `arbiter/` - Local LLM client and verdict parsing
//! - `escalation/` - State machine, human approval, fail-safe
//! - `telemetry/` - Append-only audit log, export, analytics
//! - `policy/` - Session toggle, thresholds, overrides
//! - `interceptor/` - Host entry point wiring the above

pub mod config;

pub mod command;
pub mod features;
pub mod risk;

pub mod arbiter;
pub mod escalation;

pub mod telemetry;
pub mod policy;

pub mod interceptor;
