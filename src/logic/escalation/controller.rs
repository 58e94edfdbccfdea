//! Escalation Controller
//!
//! Drives one command from `Received` to `Finalized`:
//! - `low` finalizes locally as allow
//! - `medium` asks the LLM arbiter; a confident verdict finalizes, anything
//!   else goes to a human
//! - `high` (and every pinned match) goes straight to a human
//! - a human timeout, an unavailable approver, a classifier fault or a panic
//!   anywhere in the flow finalizes as `deny` / `fail_safe`
//!
//! The panic guard is unconditional; no configuration can disable it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::FaultKind;
use crate::logic::arbiter::{Arbiter, DisabledArbiter, LlmClient, VerdictDecision};
use crate::logic::command::CommandEvent;
use crate::logic::config::{GuardConfig, TierThresholds};
use crate::logic::features::FeatureVector;
use crate::logic::policy::{OverrideHit, OverrideKind};
use crate::logic::risk::{classify_with_thresholds, Classification, RiskTier, RULESET_VERSION};

use super::approval::{ApprovalResponse, Approver, PendingApproval, TerminalApprover};
use super::types::{
    Decision, DecisionSource, EscalationState, HumanAnswer, HumanResponse, LlmAssessment, Outcome, Transition,
};

/// Slack on top of the LLM timeout before a verdict counts as late
const LLM_LATE_GRACE: Duration = Duration::from_millis(250);

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct EscalationSettings {
    pub llm_timeout: Duration,
    pub human_timeout: Duration,
}

impl EscalationSettings {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            llm_timeout: config.llm.timeout(),
            human_timeout: config.human.timeout(),
        }
    }
}

// ============================================================================
// FLOW TRACKING
// ============================================================================

struct Flow {
    started: Instant,
    state: EscalationState,
    transitions: Vec<Transition>,
    faults: Vec<FaultKind>,
    llm: Option<LlmAssessment>,
    human: Option<HumanResponse>,
}

impl Flow {
    fn new(started: Instant) -> Self {
        Self {
            started,
            state: EscalationState::Received,
            transitions: Vec::new(),
            faults: Vec::new(),
            llm: None,
            human: None,
        }
    }

    fn advance(&mut self, to: EscalationState, tier: RiskTier) {
        debug_assert!(self.state.can_transition_to(to), "{:?} -> {:?}", self.state, to);
        self.transitions.push(Transition {
            from: self.state,
            to,
            tier,
            elapsed_ms: self.elapsed_ms(),
        });
        self.state = to;
    }

    fn fault(&mut self, kind: FaultKind) {
        if !self.faults.contains(&kind) {
            self.faults.push(kind);
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct EscalationController {
    arbiter: Box<dyn Arbiter>,
    approver: Box<dyn Approver>,
    settings: EscalationSettings,
}

impl EscalationController {
    pub fn new(arbiter: Box<dyn Arbiter>, approver: Box<dyn Approver>, settings: EscalationSettings) -> Self {
        Self {
            arbiter,
            approver,
            settings,
        }
    }

    /// LLM client (or the disabled arbiter) plus the terminal approver
    pub fn from_config(config: &GuardConfig) -> Self {
        let arbiter: Box<dyn Arbiter> = if config.llm.enabled {
            match LlmClient::new(&config.llm) {
                Ok(client) => Box::new(client),
                Err(e) => {
                    log::warn!("LLM arbiter unavailable, medium risk goes to a human: {}", e);
                    Box::new(DisabledArbiter)
                }
            }
        } else {
            Box::new(DisabledArbiter)
        };
        Self::new(arbiter, Box::new(TerminalApprover::default()), EscalationSettings::from_config(config))
    }

    pub fn settings(&self) -> &EscalationSettings {
        &self.settings
    }

    /// Produce exactly one terminal decision for `event`
    pub fn run(
        &self,
        event: &CommandEvent,
        vector: &FeatureVector,
        thresholds: &TierThresholds,
        override_hit: Option<&OverrideHit>,
    ) -> Decision {
        self.run_from(Instant::now(), event, vector, thresholds, override_hit)
    }

    /// As `run`, with latency measured from `started` (interception time)
    pub fn run_from(
        &self,
        started: Instant,
        event: &CommandEvent,
        vector: &FeatureVector,
        thresholds: &TierThresholds,
        override_hit: Option<&OverrideHit>,
    ) -> Decision {
        let guarded = catch_unwind(AssertUnwindSafe(|| self.drive(event, vector, thresholds, override_hit, started)));

        match guarded {
            Ok(decision) => decision,
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                fail_safe(event.id, format!("internal fault: {}", detail), FaultKind::InternalFault, started)
            }
        }
    }

    fn drive(
        &self,
        event: &CommandEvent,
        vector: &FeatureVector,
        thresholds: &TierThresholds,
        override_hit: Option<&OverrideHit>,
        started: Instant,
    ) -> Decision {
        let mut flow = Flow::new(started);
        if vector.flag("unparseable") {
            flow.fault(FaultKind::ExtractionAnomaly);
        }

        let classification = classify_with_thresholds(vector, thresholds);
        let initial = classification.tier;
        flow.advance(EscalationState::LocallyClassified, initial);

        if classification.is_fault() {
            flow.fault(FaultKind::ClassificationFault);
            return finalize(
                event,
                &classification,
                flow,
                RiskTier::High,
                DecisionSource::FailSafe,
                Outcome::Deny,
                classification.reasoning.clone(),
            );
        }

        // Overrides
        let mut notes: Vec<String> = Vec::new();
        if let Some(hit) = override_hit {
            match hit.kind {
                OverrideKind::Deny => {
                    let reasoning = format!("deny override `{}` matched; {}", hit.pattern, classification.reasoning);
                    return finalize(event, &classification, flow, RiskTier::High, DecisionSource::Local, Outcome::Deny, reasoning);
                }
                OverrideKind::Allow if classification.is_pinned() => {
                    notes.push(format!("allow override `{}` ignored for a pinned rule", hit.pattern));
                }
                OverrideKind::Allow if initial == RiskTier::High => {
                    notes.push(format!("allow override `{}` ignored for a high risk command", hit.pattern));
                }
                OverrideKind::Allow => {
                    let reasoning = format!("allow override `{}` matched; {}", hit.pattern, classification.reasoning);
                    return finalize(event, &classification, flow, RiskTier::Low, DecisionSource::Local, Outcome::Allow, reasoning);
                }
            }
        }

        let mut chain: Vec<String> = classification.reasons.clone();
        chain.extend(notes);

        let human_tier = match initial {
            RiskTier::Low => {
                return finalize(
                    event,
                    &classification,
                    flow,
                    RiskTier::Low,
                    DecisionSource::Local,
                    Outcome::Allow,
                    classification.reasoning.clone(),
                );
            }
            RiskTier::Medium => {
                flow.advance(EscalationState::AwaitingLlm, RiskTier::Medium);
                let asked = Instant::now();
                let verdict = self
                    .arbiter
                    .assess(event, vector, &classification.reasoning, self.settings.llm_timeout);
                let waited = asked.elapsed();
                let late = waited > self.settings.llm_timeout + LLM_LATE_GRACE;
                flow.llm = Some(LlmAssessment {
                    decision: verdict.decision,
                    confidence: verdict.confidence,
                    reasoning: verdict.reasoning.clone(),
                    latency_ms: waited.as_millis() as u64,
                    failure: verdict.failure.clone(),
                    discarded: late,
                });

                if late {
                    flow.fault(FaultKind::LlmUnavailable);
                    chain.push(format!(
                        "LLM answer arrived after the {} ms timeout and was discarded",
                        self.settings.llm_timeout.as_millis()
                    ));
                } else if verdict.is_confident() {
                    let outcome = if verdict.decision == VerdictDecision::Allow { Outcome::Allow } else { Outcome::Deny };
                    let reasoning = format!(
                        "LLM {} ({:.2} confidence): {}; {}",
                        outcome, verdict.confidence, verdict.reasoning, classification.reasoning
                    );
                    return finalize(event, &classification, flow, RiskTier::Medium, DecisionSource::Llm, outcome, reasoning);
                } else {
                    if verdict.unavailable {
                        flow.fault(FaultKind::LlmUnavailable);
                    }
                    chain.push(verdict.reasoning.clone());
                }
                RiskTier::Medium
            }
            RiskTier::High => RiskTier::High,
        };

        // AwaitingHuman
        flow.advance(EscalationState::AwaitingHuman, human_tier);
        let pending = PendingApproval::new(event, human_tier, chain.clone(), self.settings.human_timeout);
        let asked = Instant::now();
        let response = self.approver.request(&pending, self.settings.human_timeout);
        let answer = match &response {
            ApprovalResponse::Allow => HumanAnswer::Allow,
            ApprovalResponse::Deny => HumanAnswer::Deny,
            ApprovalResponse::Timeout => HumanAnswer::Timeout,
            ApprovalResponse::Unavailable(_) => HumanAnswer::Unavailable,
        };
        flow.human = Some(HumanResponse {
            answer,
            latency_ms: asked.elapsed().as_millis() as u64,
        });
        let summary = chain.join("; ");

        match response {
            ApprovalResponse::Allow => {
                let reasoning = format!("approved by human; {}", summary);
                finalize(event, &classification, flow, human_tier, DecisionSource::Human, Outcome::Allow, reasoning)
            }
            ApprovalResponse::Deny => {
                let reasoning = format!("denied by human; {}", summary);
                finalize(event, &classification, flow, human_tier, DecisionSource::Human, Outcome::Deny, reasoning)
            }
            ApprovalResponse::Timeout => {
                flow.fault(FaultKind::HumanTimeout);
                let reasoning = format!(
                    "no human response within {}s, denied; {}",
                    self.settings.human_timeout.as_secs(),
                    summary
                );
                finalize(event, &classification, flow, human_tier, DecisionSource::FailSafe, Outcome::Deny, reasoning)
            }
            ApprovalResponse::Unavailable(why) => {
                flow.fault(FaultKind::HumanTimeout);
                let reasoning = format!("no human approver available ({}), denied; {}", why, summary);
                finalize(event, &classification, flow, human_tier, DecisionSource::FailSafe, Outcome::Deny, reasoning)
            }
        }
    }
}

// ============================================================================
// TERMINAL STATES
// ============================================================================

fn finalize(
    event: &CommandEvent,
    classification: &Classification,
    mut flow: Flow,
    tier: RiskTier,
    source: DecisionSource,
    outcome: Outcome,
    reasoning: String,
) -> Decision {
    flow.advance(EscalationState::Finalized, tier);
    if source == DecisionSource::FailSafe {
        log::error!("Fail-safe deny for {}: {}", event.id, reasoning);
    }
    Decision {
        event_id: event.id,
        tier,
        initial_tier: classification.tier,
        source,
        outcome,
        reasoning,
        latency_ms: flow.elapsed_ms(),
        ruleset_version: classification.ruleset_version.to_string(),
        score: classification.score,
        pinned: classification.pinned.iter().map(|r| r.id().to_string()).collect(),
        transitions: flow.transitions,
        faults: flow.faults,
        llm: flow.llm,
        human: flow.human,
    }
}

/// `Finalized(deny, fail_safe)` with no classification available
pub fn fail_safe(event_id: Uuid, reasoning: String, fault: FaultKind, started: Instant) -> Decision {
    log::error!("Fail-safe deny for {}: {}", event_id, reasoning);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    Decision {
        event_id,
        tier: RiskTier::High,
        initial_tier: RiskTier::High,
        source: DecisionSource::FailSafe,
        outcome: Outcome::Deny,
        reasoning,
        latency_ms: elapsed_ms,
        ruleset_version: RULESET_VERSION.to_string(),
        score: 1.0,
        pinned: Vec::new(),
        transitions: vec![Transition {
            from: EscalationState::Received,
            to: EscalationState::Finalized,
            tier: RiskTier::High,
            elapsed_ms,
        }],
        faults: vec![fault],
        llm: None,
        human: None,
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::arbiter::LlmVerdict;
    use crate::logic::command::{EnvironmentFingerprint, ExecutionContext};
    use crate::logic::features::{extract, ExtractionContext, FeatureVectorBuilder};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct ScriptedArbiter {
        verdict: LlmVerdict,
        calls: Arc<Mutex<u32>>,
    }

    impl Arbiter for ScriptedArbiter {
        fn assess(&self, _: &CommandEvent, _: &FeatureVector, _: &str, _: Duration) -> LlmVerdict {
            *self.calls.lock() += 1;
            self.verdict.clone()
        }
    }

    struct SlowArbiter {
        delay: Duration,
    }

    impl Arbiter for SlowArbiter {
        fn assess(&self, _: &CommandEvent, _: &FeatureVector, _: &str, _: Duration) -> LlmVerdict {
            std::thread::sleep(self.delay);
            confident(VerdictDecision::Allow)
        }
    }

    struct PanickingArbiter;

    impl Arbiter for PanickingArbiter {
        fn assess(&self, _: &CommandEvent, _: &FeatureVector, _: &str, _: Duration) -> LlmVerdict {
            panic!("arbiter exploded");
        }
    }

    struct ScriptedApprover {
        response: ApprovalResponse,
        seen: Arc<Mutex<Vec<PendingApproval>>>,
    }

    impl Approver for ScriptedApprover {
        fn request(&self, pending: &PendingApproval, _: Duration) -> ApprovalResponse {
            self.seen.lock().push(pending.clone());
            self.response.clone()
        }
    }

    fn settings() -> EscalationSettings {
        EscalationSettings {
            llm_timeout: Duration::from_millis(500),
            human_timeout: Duration::from_secs(1),
        }
    }

    fn confident(decision: VerdictDecision) -> LlmVerdict {
        LlmVerdict {
            decision,
            confidence: 0.9,
            reasoning: "looks routine".to_string(),
            failure: None,
            unavailable: false,
        }
    }

    fn event(cmd: &str) -> CommandEvent {
        let ctx = ExecutionContext {
            working_directory: "/home/dev/project".into(),
            session_id: "test".to_string(),
            current_branch: None,
            environment: EnvironmentFingerprint::capture(&[], &[]),
        };
        CommandEvent::new(cmd, cmd.split_whitespace().map(String::from).collect(), &ctx)
    }

    fn vector(cmd: &str) -> FeatureVector {
        extract(cmd, &ExtractionContext::new("/home/dev/project").with_home("/home/dev"))
    }

    struct Harness {
        controller: EscalationController,
        llm_calls: Arc<Mutex<u32>>,
        approvals: Arc<Mutex<Vec<PendingApproval>>>,
    }

    fn harness(verdict: LlmVerdict, response: ApprovalResponse) -> Harness {
        let llm_calls = Arc::new(Mutex::new(0));
        let approvals = Arc::new(Mutex::new(Vec::new()));
        let controller = EscalationController::new(
            Box::new(ScriptedArbiter {
                verdict,
                calls: llm_calls.clone(),
            }),
            Box::new(ScriptedApprover {
                response,
                seen: approvals.clone(),
            }),
            settings(),
        );
        Harness {
            controller,
            llm_calls,
            approvals,
        }
    }

    fn run(h: &Harness, cmd: &str) -> Decision {
        h.controller.run(&event(cmd), &vector(cmd), &TierThresholds::default(), None)
    }

    #[test]
    fn test_low_finalizes_locally() {
        let h = harness(confident(VerdictDecision::Deny), ApprovalResponse::Deny);
        let d = run(&h, "ls -la");
        assert_eq!(d.outcome, Outcome::Allow);
        assert_eq!(d.source, DecisionSource::Local);
        assert_eq!(d.tier, RiskTier::Low);
        assert_eq!(*h.llm_calls.lock(), 0);
        assert!(h.approvals.lock().is_empty());
        let states: Vec<_> = d.transitions.iter().map(|t| t.to).collect();
        assert_eq!(states, vec![EscalationState::LocallyClassified, EscalationState::Finalized]);
    }

    #[test]
    fn test_medium_confident_llm_finalizes() {
        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Deny);
        let d = run(&h, "rm -rf build");
        assert_eq!(d.initial_tier, RiskTier::Medium);
        assert_eq!(d.source, DecisionSource::Llm);
        assert_eq!(d.outcome, Outcome::Allow);
        assert_eq!(*h.llm_calls.lock(), 1);
        assert!(h.approvals.lock().is_empty());
    }

    #[test]
    fn test_medium_llm_deny() {
        let h = harness(confident(VerdictDecision::Deny), ApprovalResponse::Allow);
        let d = run(&h, "rm -rf build");
        assert_eq!(d.source, DecisionSource::Llm);
        assert_eq!(d.outcome, Outcome::Deny);
        assert!(d.reasoning.starts_with("LLM deny"));
    }

    #[test]
    fn test_medium_uncertain_llm_goes_to_human() {
        let h = harness(LlmVerdict::escalate("not sure"), ApprovalResponse::Allow);
        let d = run(&h, "rm -rf build");
        assert_eq!(d.source, DecisionSource::Human);
        assert_eq!(d.outcome, Outcome::Allow);
        assert_eq!(d.tier, RiskTier::Medium);
        assert!(d.faults.is_empty());
        let states: Vec<_> = d.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                EscalationState::LocallyClassified,
                EscalationState::AwaitingLlm,
                EscalationState::AwaitingHuman,
                EscalationState::Finalized
            ]
        );
        assert!(h.approvals.lock()[0].reasons.iter().any(|r| r == "not sure"));
    }

    #[test]
    fn test_llm_down_and_human_timeout_denies() {
        let down = LlmVerdict::from_error(&crate::error::ArbiterError::Connection("refused".to_string()));
        let h = harness(down, ApprovalResponse::Timeout);
        let d = run(&h, "rm -rf build");
        assert_eq!(d.outcome, Outcome::Deny);
        assert_eq!(d.source, DecisionSource::FailSafe);
        assert!(d.faults.contains(&FaultKind::LlmUnavailable));
        assert!(d.faults.contains(&FaultKind::HumanTimeout));
    }

    #[test]
    fn test_high_bypasses_llm() {
        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Deny);
        let d = run(&h, "rm -rf /");
        assert_eq!(*h.llm_calls.lock(), 0);
        assert_eq!(d.source, DecisionSource::Human);
        assert_eq!(d.outcome, Outcome::Deny);
        assert_eq!(d.tier, RiskTier::High);
        assert_eq!(d.pinned, vec!["recursive-delete-root".to_string()]);
    }

    #[test]
    fn test_missing_approver_is_fail_safe() {
        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Unavailable("no tty".to_string()));
        let d = run(&h, "rm -rf /");
        assert_eq!(d.source, DecisionSource::FailSafe);
        assert_eq!(d.outcome, Outcome::Deny);
        assert!(d.reasoning.contains("no tty"));
    }

    #[test]
    fn test_overrides() {
        let h = harness(confident(VerdictDecision::Deny), ApprovalResponse::Deny);
        let allow = OverrideHit {
            kind: OverrideKind::Allow,
            pattern: "^rm -rf build$".to_string(),
        };
        let d = h.controller.run(&event("rm -rf build"), &vector("rm -rf build"), &TierThresholds::default(), Some(&allow));
        assert_eq!(d.outcome, Outcome::Allow);
        assert_eq!(d.source, DecisionSource::Local);

        let deny = OverrideHit {
            kind: OverrideKind::Deny,
            pattern: "^ls".to_string(),
        };
        let d = h.controller.run(&event("ls"), &vector("ls"), &TierThresholds::default(), Some(&deny));
        assert_eq!(d.outcome, Outcome::Deny);
        assert_eq!(d.tier, RiskTier::High);
    }

    #[test]
    fn test_allow_override_cannot_bypass_pinned() {
        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Deny);
        let allow = OverrideHit {
            kind: OverrideKind::Allow,
            pattern: ".*".to_string(),
        };
        let d = h.controller.run(&event("rm -rf /"), &vector("rm -rf /"), &TierThresholds::default(), Some(&allow));
        assert_eq!(d.source, DecisionSource::Human);
        assert_eq!(d.outcome, Outcome::Deny);
        assert!(d.reasoning.contains("ignored for a pinned rule"));
    }

    #[test]
    fn test_allow_override_cannot_finalize_high() {
        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Deny);
        let cmd = "git status && sudo rm -rf ~/work";
        let allow = OverrideHit {
            kind: OverrideKind::Allow,
            pattern: "^git status".to_string(),
        };
        let d = h.controller.run(&event(cmd), &vector(cmd), &TierThresholds::default(), Some(&allow));
        assert_eq!(d.initial_tier, RiskTier::High);
        assert_eq!(d.tier, RiskTier::High);
        assert_eq!(d.source, DecisionSource::Human);
        assert_eq!(d.outcome, Outcome::Deny);
        assert_eq!(*h.llm_calls.lock(), 0);
        assert!(h.approvals.lock()[0].reasons.iter().any(|r| r.contains("ignored for a high risk command")));
    }

    #[test]
    fn test_late_llm_answer_is_discarded() {
        let approvals = Arc::new(Mutex::new(Vec::new()));
        let settings = EscalationSettings {
            llm_timeout: Duration::from_millis(100),
            human_timeout: Duration::from_secs(1),
        };
        let controller = EscalationController::new(
            Box::new(SlowArbiter {
                delay: settings.llm_timeout + LLM_LATE_GRACE + Duration::from_millis(200),
            }),
            Box::new(ScriptedApprover {
                response: ApprovalResponse::Deny,
                seen: approvals.clone(),
            }),
            settings,
        );

        let d = controller.run(&event("rm -rf build"), &vector("rm -rf build"), &TierThresholds::default(), None);
        assert_eq!(d.initial_tier, RiskTier::Medium);
        assert_eq!(d.source, DecisionSource::Human);
        assert_eq!(d.outcome, Outcome::Deny);
        assert!(d.faults.contains(&FaultKind::LlmUnavailable));
        assert_eq!(approvals.lock().len(), 1);
        assert!(approvals.lock()[0].reasons.iter().any(|r| r.contains("discarded")));

        let llm = d.llm.unwrap();
        assert!(llm.discarded);
        assert_eq!(llm.decision, VerdictDecision::Allow);
    }

    #[test]
    fn test_stage_answers_are_recorded() {
        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Deny);
        let d = run(&h, "rm -rf build");
        let llm = d.llm.clone().unwrap();
        assert_eq!(llm.decision, VerdictDecision::Allow);
        assert!((llm.confidence - 0.9).abs() < 1e-6);
        assert_eq!(llm.reasoning, "looks routine");
        assert!(!llm.discarded);
        assert!(d.human.is_none());

        let h = harness(LlmVerdict::escalate("not sure"), ApprovalResponse::Timeout);
        let d = run(&h, "rm -rf build");
        assert_eq!(d.llm.unwrap().decision, VerdictDecision::Escalate);
        assert_eq!(d.human.unwrap().answer, HumanAnswer::Timeout);

        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Allow);
        let d = run(&h, "ls -la");
        assert!(d.llm.is_none());
        assert!(d.human.is_none());

        let d = run(&h, "rm -rf /");
        assert!(d.llm.is_none());
        assert_eq!(d.human.unwrap().answer, HumanAnswer::Allow);
    }

    #[test]
    fn test_classifier_fault_is_fail_safe() {
        let h = harness(confident(VerdictDecision::Allow), ApprovalResponse::Allow);
        let mut bad = FeatureVectorBuilder::new().build();
        bad.layout_hash ^= 1;
        let d = h.controller.run(&event("ls"), &bad, &TierThresholds::default(), None);
        assert_eq!(d.source, DecisionSource::FailSafe);
        assert_eq!(d.outcome, Outcome::Deny);
        assert_eq!(d.tier, RiskTier::High);
        assert!(d.faults.contains(&FaultKind::ClassificationFault));
    }

    #[test]
    fn test_panic_is_fail_safe() {
        let controller = EscalationController::new(
            Box::new(PanickingArbiter),
            Box::new(ScriptedApprover {
                response: ApprovalResponse::Allow,
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
            settings(),
        );
        let d = controller.run(&event("rm -rf build"), &vector("rm -rf build"), &TierThresholds::default(), None);
        assert_eq!(d.outcome, Outcome::Deny);
        assert_eq!(d.source, DecisionSource::FailSafe);
        assert!(d.reasoning.contains("arbiter exploded"));
        assert_eq!(d.faults, vec![FaultKind::InternalFault]);
    }

    #[test]
    fn test_unparseable_never_low() {
        let h = harness(LlmVerdict::escalate("?"), ApprovalResponse::Timeout);
        let d = run(&h, "echo 'open");
        assert!(d.initial_tier >= RiskTier::Medium);
        assert_eq!(d.outcome, Outcome::Deny);
        assert!(d.faults.contains(&FaultKind::ExtractionAnomaly));
    }
}
