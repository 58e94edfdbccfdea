use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use super::*;
use crate::logic::arbiter::{LlmClient, LlmVerdict};
use crate::logic::escalation::{ApprovalResponse, DecisionSource, Outcome, PendingApproval};
use crate::logic::features::FeatureVector as Vector;
use crate::logic::risk::RiskTier;
use crate::logic::telemetry::{read_records, DECISIONS_FILE};

struct NeverCalled;

impl Arbiter for NeverCalled {
    fn assess(&self, _: &CommandEvent, _: &Vector, _: &str, _: Duration) -> LlmVerdict {
        panic!("arbiter must not be consulted");
    }
}

#[derive(Clone)]
struct Recorded(Arc<Mutex<Vec<PendingApproval>>>);

struct Scripted {
    response: ApprovalResponse,
    seen: Recorded,
}

impl Approver for Scripted {
    fn request(&self, pending: &PendingApproval, _: Duration) -> ApprovalResponse {
        self.seen.0.lock().push(pending.clone());
        self.response.clone()
    }
}

#[derive(Default)]
struct Collect(Arc<Mutex<Vec<(AuditRecord, bool)>>>);

impl DecisionObserver for Collect {
    fn on_decision(&self, record: &AuditRecord, persisted: bool) {
        self.0.lock().push((record.clone(), persisted));
    }
}

fn config(dir: &TempDir) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.interceptor.state_dir = Some(dir.path().to_path_buf());
    config.llm.enabled = true;
    config.llm.endpoint = "http://127.0.0.1:1".to_string();
    config.llm.timeout_ms = 300;
    config.human.timeout_secs = 1;
    config
}

fn interceptor(
    dir: &TempDir,
    config: GuardConfig,
    arbiter: Box<dyn Arbiter>,
    response: ApprovalResponse,
) -> (Interceptor, Recorded) {
    let seen = Recorded(Arc::new(Mutex::new(Vec::new())));
    let approver = Scripted {
        response,
        seen: seen.clone(),
    };
    let interceptor = Interceptor::new(config, arbiter, Box::new(approver))
        .unwrap()
        .with_diagnostics(Diagnostics::quiet(dir.path()));
    (interceptor, seen)
}

fn request(dir: &TempDir, cmd: &str) -> CommandRequest {
    CommandRequest::new(cmd, dir.path()).with_session("test-session")
}

fn decided(outcome: InterceptOutcome) -> (Decision, AuditRecord, Option<String>) {
    match outcome {
        InterceptOutcome::Decided {
            decision,
            record,
            audit_error,
        } => (decision, record, audit_error),
        other => panic!("expected a decision, got {:?}", other),
    }
}

fn persisted(dir: &TempDir) -> Vec<AuditRecord> {
    let path = dir.path().join("audit").join(DECISIONS_FILE);
    read_records(&path).map(|o| o.records).unwrap_or_default()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_listing_is_allowed_locally() {
    let dir = TempDir::new().unwrap();
    let (guard, seen) = interceptor(&dir, config(&dir), Box::new(NeverCalled), ApprovalResponse::Deny);

    let (decision, record, audit_error) = decided(guard.evaluate(request(&dir, "ls -la")));
    assert_eq!(decision.tier, RiskTier::Low);
    assert_eq!(decision.source, DecisionSource::Local);
    assert_eq!(decision.outcome, Outcome::Allow);
    assert!(audit_error.is_none());
    assert!(seen.0.lock().is_empty());
    assert_eq!(record.features["verb_risk_class"], 0.0);
}

#[test]
fn test_root_delete_denied_by_human() {
    let dir = TempDir::new().unwrap();
    let (guard, seen) = interceptor(&dir, config(&dir), Box::new(NeverCalled), ApprovalResponse::Deny);

    let (decision, _, _) = decided(guard.evaluate(request(&dir, "rm -rf /")));
    assert_eq!(decision.tier, RiskTier::High);
    assert_eq!(decision.source, DecisionSource::Human);
    assert_eq!(decision.outcome, Outcome::Deny);
    assert!(!decision.pinned.is_empty());
    assert_eq!(seen.0.lock().len(), 1);
}

#[test]
fn test_force_push_approved_by_human() {
    let dir = TempDir::new().unwrap();
    let (guard, _) = interceptor(&dir, config(&dir), Box::new(NeverCalled), ApprovalResponse::Allow);

    let (decision, _, _) = decided(guard.evaluate(request(&dir, "git push --force origin main")));
    assert_eq!(decision.tier, RiskTier::High);
    assert_eq!(decision.source, DecisionSource::Human);
    assert_eq!(decision.outcome, Outcome::Allow);
    assert!(decision.reasoning.contains("force-push"), "{}", decision.reasoning);
}

#[test]
fn test_medium_with_llm_down_and_no_human_fails_safe() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let client = LlmClient::new(&config.llm).unwrap();
    let (guard, seen) = interceptor(&dir, config, Box::new(client), ApprovalResponse::Timeout);

    let (decision, _, _) = decided(guard.evaluate(request(&dir, "rm -rf build")));
    assert_eq!(decision.initial_tier, RiskTier::Medium);
    assert_eq!(decision.source, DecisionSource::FailSafe);
    assert_eq!(decision.outcome, Outcome::Deny);
    assert!(decision.faults.contains(&FaultKind::LlmUnavailable));
    assert!(decision.faults.contains(&FaultKind::HumanTimeout));
    assert_eq!(seen.0.lock().len(), 1);
}

// ============================================================================
// PIPELINE PROPERTIES
// ============================================================================

#[test]
fn test_one_audit_record_per_decision() {
    let dir = TempDir::new().unwrap();
    let (guard, _) = interceptor(&dir, config(&dir), Box::new(NeverCalled), ApprovalResponse::Deny);

    let (first, _, _) = decided(guard.evaluate(request(&dir, "ls")));
    let (second, _, _) = decided(guard.evaluate(request(&dir, "rm -rf /")));

    let records = persisted(&dir);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, first.event_id);
    assert_eq!(records[1].id, second.event_id);
    assert_eq!(records[1].outcome, Outcome::Deny);
    assert!(records[0].timestamp <= records[1].timestamp);
    // session start + two decisions
    assert_eq!(guard.audit().records_written(), 3);
}

#[test]
fn test_disabled_session_passes_through_unaudited() {
    let dir = TempDir::new().unwrap();
    let (guard, _) = interceptor(&dir, config(&dir), Box::new(NeverCalled), ApprovalResponse::Deny);
    guard.policy().disable("test-session").unwrap();

    let outcome = guard.evaluate(request(&dir, "rm -rf /"));
    assert!(matches!(outcome, InterceptOutcome::PassThrough { .. }));
    assert!(outcome.is_allowed());
    assert!(persisted(&dir).is_empty());

    guard.policy().enable("test-session").unwrap();
    assert!(!guard.evaluate(request(&dir, "rm -rf /")).is_allowed());
}

#[test]
fn test_audit_failure_keeps_decision() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let mut config = config(&dir);
    config.audit.dir = Some(blocker.join("audit"));

    let (guard, _) = interceptor(&dir, config, Box::new(NeverCalled), ApprovalResponse::Deny);
    let observed = Collect::default();
    let log = Arc::clone(&observed.0);
    let mut guard = guard;
    guard.add_observer(Box::new(observed));

    let (decision, record, audit_error) = decided(guard.evaluate(request(&dir, "ls -la")));
    assert_eq!(decision.outcome, Outcome::Allow);
    assert!(audit_error.is_some());
    assert!(record.faults.contains(&FaultKind::AuditWriteError));

    let calls = log.lock();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].1);

    let fallback = std::fs::read_to_string(Diagnostics::quiet(dir.path()).fallback_path()).unwrap();
    assert!(fallback.contains(&decision.event_id.to_string()));
}

#[test]
fn test_observer_sees_persisted_record() {
    let dir = TempDir::new().unwrap();
    let (mut guard, _) = interceptor(&dir, config(&dir), Box::new(NeverCalled), ApprovalResponse::Deny);
    let observed = Collect::default();
    let log = Arc::clone(&observed.0);
    guard.add_observer(Box::new(observed));

    let (decision, _, _) = decided(guard.evaluate(request(&dir, "git status")));
    let calls = log.lock();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1);
    assert_eq!(calls[0].0.id, decision.event_id);
    assert_eq!(calls[0].0, persisted(&dir)[0]);
}

#[test]
fn test_deny_override_short_circuits() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.overrides.deny = vec!["^npm publish".to_string()];
    let (guard, seen) = interceptor(&dir, config, Box::new(NeverCalled), ApprovalResponse::Allow);

    let (decision, _, _) = decided(guard.evaluate(request(&dir, "npm publish --access public")));
    assert_eq!(decision.outcome, Outcome::Deny);
    assert_eq!(decision.source, DecisionSource::Local);
    assert!(seen.0.lock().is_empty());
    assert_eq!(guard.policy().status("test-session").unwrap().unwrap().total_overrides(), 1);
}

#[test]
fn test_allow_override_does_not_cover_chained_command() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.overrides.allow = vec!["^git status".to_string()];
    let (guard, seen) = interceptor(&dir, config, Box::new(NeverCalled), ApprovalResponse::Deny);

    let (decision, _, _) = decided(guard.evaluate(request(&dir, "git status")));
    assert_eq!(decision.source, DecisionSource::Local);
    assert_eq!(decision.outcome, Outcome::Allow);

    let (decision, record, _) = decided(guard.evaluate(request(&dir, "git status && sudo rm -rf ~/work")));
    assert_eq!(decision.initial_tier, RiskTier::High);
    assert_eq!(decision.source, DecisionSource::Human);
    assert_eq!(decision.outcome, Outcome::Deny);
    assert_eq!(seen.0.lock().len(), 1);
    assert_eq!(record.human.unwrap().answer, crate::logic::escalation::HumanAnswer::Deny);
}

#[test]
fn test_secret_env_never_reaches_audit() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.features.env_fingerprint_vars.push("API_TOKEN".to_string());
    let (guard, _) = interceptor(&dir, config, Box::new(NeverCalled), ApprovalResponse::Deny);

    let req = request(&dir, "ls").with_env(vec![
        ("SHELL".to_string(), "/bin/zsh".to_string()),
        ("API_TOKEN".to_string(), "sk-very-secret".to_string()),
    ]);
    decided(guard.evaluate(req));

    let raw = std::fs::read_to_string(dir.path().join("audit").join(DECISIONS_FILE)).unwrap();
    assert!(raw.contains("/bin/zsh"));
    assert!(!raw.contains("sk-very-secret"));
}

#[test]
fn test_session_history_updates_after_decision() {
    let dir = TempDir::new().unwrap();
    let (guard, _) = interceptor(&dir, config(&dir), Box::new(NeverCalled), ApprovalResponse::Deny);

    decided(guard.evaluate(request(&dir, "cargo build")));
    decided(guard.evaluate(request(&dir, "cargo  build")));
    let (_, record, _) = decided(guard.evaluate(request(&dir, "cargo build")));
    assert_eq!(record.features["session_frequency"], 2.0);
}
