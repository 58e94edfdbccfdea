//! Agent Guard Core
//!
//! Intercepts shell commands issued by autonomous agents and decides, per
//! command, whether it may run: locally for low risk, via a local LLM for
//! medium risk, via a human for high risk. Every decision is audited.

pub mod constants;
pub mod error;
pub mod logic;

pub use error::{ArbiterError, AuditWriteError, ConfigError, ExportError, FaultKind, SessionError};
pub use logic::command::CommandRequest;
pub use logic::config::GuardConfig;
pub use logic::escalation::{Decision, DecisionSource, Outcome};
pub use logic::interceptor::{DecisionObserver, InterceptOutcome, Interceptor};
pub use logic::risk::RiskTier;
pub use logic::telemetry::AuditRecord;
