//! Escalation Module - local → LLM → human decision flow
//!
//! ## Structure
//! - `types`: states, transitions, `Decision`
//! - `approval`: the human stage (`Approver`, `TerminalApprover`)
//! - `controller`: the state machine

pub mod types;
pub mod approval;
pub mod controller;

pub use types::{
    Decision, DecisionSource, EscalationState, HumanAnswer, HumanResponse, LlmAssessment, Outcome, Transition,
};
pub use approval::{parse_answer, ApprovalResponse, Approver, PendingApproval, TerminalApprover};
pub use controller::{fail_safe, EscalationController, EscalationSettings};
