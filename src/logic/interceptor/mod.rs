//! Interceptor - single entry point for hosts
//!
//! One call per intercepted command:
//! 1. Read the session toggle (pass through when disabled)
//! 2. Build the `CommandEvent` and extract features
//! 3. Run the escalation controller to a terminal decision
//! 4. Append the audit record, then hand the decision back
//!
//! The audit append happens before the host sees the decision. A failed
//! append is reported to the operator but never changes the outcome.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::constants;
use crate::error::{ConfigError, FaultKind};
use crate::logic::arbiter::Arbiter;
use crate::logic::command::{
    detect_git_branch, parse, CommandEvent, CommandRequest, EnvironmentFingerprint, ExecutionContext,
};
use crate::logic::config::GuardConfig;
use crate::logic::escalation::{
    fail_safe, Approver, Decision, EscalationController, EscalationSettings,
};
use crate::logic::escalation::controller::panic_message;
use crate::logic::features::{extract_parsed, ExtractionContext, FeatureVector};
use crate::logic::policy::{derive_session_id, PolicyState};
use crate::logic::telemetry::{AuditLog, AuditRecord, Diagnostics};

#[cfg(test)]
mod tests;

// ============================================================================
// OUTCOME
// ============================================================================

/// Result of one `evaluate` call
#[derive(Debug, Clone)]
pub enum InterceptOutcome {
    /// Interceptor disabled for the session; the command runs unchecked
    PassThrough { session_id: String },
    /// Terminal decision, plus the audit error if the append failed
    Decided {
        decision: Decision,
        record: AuditRecord,
        audit_error: Option<String>,
    },
}

impl InterceptOutcome {
    pub fn is_allowed(&self) -> bool {
        match self {
            InterceptOutcome::PassThrough { .. } => true,
            InterceptOutcome::Decided { decision, .. } => decision.outcome.is_allow(),
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match self {
            InterceptOutcome::PassThrough { .. } => None,
            InterceptOutcome::Decided { decision, .. } => Some(decision),
        }
    }
}

/// Host callback for every finalized command
pub trait DecisionObserver: Send + Sync {
    /// `persisted` is false when the audit append failed
    fn on_decision(&self, record: &AuditRecord, persisted: bool);
}

// ============================================================================
// INTERCEPTOR
// ============================================================================

pub struct Interceptor {
    policy: PolicyState,
    controller: EscalationController,
    audit: Arc<AuditLog>,
    diagnostics: Diagnostics,
    observers: Vec<Box<dyn DecisionObserver>>,
    home_dir: Option<PathBuf>,
}

impl Interceptor {
    /// Production wiring: local LLM (if enabled) and the terminal approver
    pub fn from_config(config: GuardConfig) -> Result<Self, ConfigError> {
        let controller = EscalationController::from_config(&config);
        Self::assemble(config, controller)
    }

    /// Custom arbiter and approver (embedding hosts, tests)
    pub fn new(config: GuardConfig, arbiter: Box<dyn Arbiter>, approver: Box<dyn Approver>) -> Result<Self, ConfigError> {
        let settings = EscalationSettings::from_config(&config);
        let controller = EscalationController::new(arbiter, approver, settings);
        Self::assemble(config, controller)
    }

    fn assemble(config: GuardConfig, controller: EscalationController) -> Result<Self, ConfigError> {
        let state_dir = config.state_dir();
        let audit = Arc::new(AuditLog::from_config(&config));
        let diagnostics = Diagnostics::new(&state_dir);
        let policy = PolicyState::new(config, Arc::clone(&audit), diagnostics.clone())?;

        Ok(Self {
            policy,
            controller,
            audit,
            diagnostics,
            observers: Vec::new(),
            home_dir: dirs::home_dir(),
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn DecisionObserver>) {
        self.observers.push(observer);
    }

    pub fn policy(&self) -> &PolicyState {
        &self.policy
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn config(&self) -> &GuardConfig {
        self.policy.config()
    }

    /// Decide one command. Always returns; never panics out.
    pub fn evaluate(&self, request: CommandRequest) -> InterceptOutcome {
        let started = Instant::now();
        let session_id = request
            .session_id
            .clone()
            .or_else(constants::session_id_from_env)
            .unwrap_or_else(derive_session_id);

        let policy = self.policy.begin_command(&session_id, &request.raw_command);
        if !policy.enabled {
            log::debug!("Interceptor disabled for {}, passing through", session_id);
            return InterceptOutcome::PassThrough { session_id };
        }

        let config = self.policy.config();
        let context = ExecutionContext {
            working_directory: request.working_directory.clone(),
            session_id: session_id.clone(),
            current_branch: detect_git_branch(&request.working_directory),
            environment: EnvironmentFingerprint::capture(&request.env, &config.features.env_fingerprint_vars),
        };
        let extraction = ExtractionContext {
            working_directory: request.working_directory.clone(),
            home_dir: self.home_dir.clone(),
            current_branch: context.current_branch.clone(),
            protected_branches: config.vcs.protected_branches.clone(),
            aliases: config.features.aliases.clone(),
            prior_occurrences: policy.prior_occurrences,
        };

        let raw = request.raw_command.as_str();
        let analysed = catch_unwind(AssertUnwindSafe(|| {
            let parsed = parse(raw);
            let vector = extract_parsed(raw, &parsed, &extraction);
            (parsed.argv(), vector)
        }));

        let (event, vector, mut decision) = match analysed {
            Ok((argv, vector)) => {
                let event = CommandEvent::new(raw, argv, &context);
                let decision = self.controller.run_from(
                    started,
                    &event,
                    &vector,
                    &policy.thresholds,
                    policy.override_hit.as_ref(),
                );
                (event, vector, decision)
            }
            Err(panic) => {
                let event = CommandEvent::new(raw, Vec::new(), &context);
                let mut vector = FeatureVector::new();
                vector.set_flag("unparseable", true);
                let reasoning = format!("internal fault during analysis: {}", panic_message(panic.as_ref()));
                let decision = fail_safe(event.id, reasoning, FaultKind::InternalFault, started);
                (event, vector, decision)
            }
        };

        let (record, audit_error) = match self.audit.append(&AuditRecord::new(&event, &vector, &decision)) {
            Ok(record) => (record, None),
            Err(e) => {
                self.diagnostics.report(&format!("decision {}", event.id), &e);
                decision.faults.push(FaultKind::AuditWriteError);
                (AuditRecord::new(&event, &vector, &decision), Some(e.to_string()))
            }
        };

        for observer in &self.observers {
            observer.on_decision(&record, audit_error.is_none());
        }

        self.policy.finish_command(&session_id, raw, policy.override_hit.as_ref());

        log::info!(
            "{} [{}] tier={} source={} outcome={} {}ms",
            event.id,
            session_id,
            decision.tier.as_str(),
            decision.source.as_str(),
            decision.outcome.as_str(),
            decision.latency_ms
        );

        InterceptOutcome::Decided {
            decision,
            record,
            audit_error,
        }
    }
}
