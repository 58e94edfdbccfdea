//! Policy State
//!
//! Process-wide view of configuration plus per-session state. All operator
//! mutations (enable, disable, thresholds, session start/end) go through here
//! and are written to the audit log.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{ConfigError, SessionError};
use crate::logic::config::{GuardConfig, TierThresholds};
use crate::logic::telemetry::{AuditLog, Diagnostics, PolicyChange, PolicyChangeKind, SessionEventKind, SessionRecord};

use super::overrides::{OverrideHit, OverrideList};
use super::session::{SessionState, SessionStore};

/// What the interceptor needs before handling one command
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    pub session_id: String,
    pub enabled: bool,
    pub thresholds: TierThresholds,
    pub prior_occurrences: u32,
    pub override_hit: Option<OverrideHit>,
}

pub struct PolicyState {
    config: GuardConfig,
    overrides: OverrideList,
    store: SessionStore,
    audit: Arc<AuditLog>,
    diagnostics: Diagnostics,
}

impl PolicyState {
    pub fn new(config: GuardConfig, audit: Arc<AuditLog>, diagnostics: Diagnostics) -> Result<Self, ConfigError> {
        config.validate()?;
        let overrides = OverrideList::compile(&config.overrides)?;
        let store = SessionStore::new(&config.state_dir());
        Ok(Self {
            config,
            overrides,
            store,
            audit,
            diagnostics,
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn overrides(&self) -> &OverrideList {
        &self.overrides
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // ========================================================================
    // HOT PATH
    // ========================================================================

    /// Read the toggle surface for `session_id`.
    ///
    /// Missing state auto-starts the session with the configured default.
    /// Unreadable or corrupt state fails closed: interception stays on.
    pub fn begin_command(&self, session_id: &str, raw_command: &str) -> CommandPolicy {
        let configured = self.config.thresholds;
        let override_hit = self.overrides.check(raw_command);

        let state = match self.store.load(session_id) {
            Ok(Some(state)) => Some(state),
            Ok(None) => self.auto_start(session_id),
            Err(e) => {
                log::warn!("Session state unreadable, interceptor stays enabled: {}", e);
                None
            }
        };

        match state {
            Some(state) => CommandPolicy {
                session_id: session_id.to_string(),
                enabled: state.interceptor_enabled,
                thresholds: state.thresholds(&configured),
                prior_occurrences: state.prior_occurrences(raw_command),
                override_hit,
            },
            None => CommandPolicy {
                session_id: session_id.to_string(),
                enabled: true,
                thresholds: configured,
                prior_occurrences: 0,
                override_hit,
            },
        }
    }

    /// Update session history after a decision
    pub fn finish_command(&self, session_id: &str, raw_command: &str, override_hit: Option<&OverrideHit>) {
        let enabled = self.config.interceptor.enabled_by_default;
        let result = self.store.update(
            session_id,
            || SessionState::new(session_id, enabled),
            |state| {
                state.record_command(raw_command);
                if let Some(hit) = override_hit {
                    state.record_override(hit.kind);
                }
            },
        );
        if let Err(e) = result {
            log::warn!("Failed to update session history for {}: {}", session_id, e);
        }
    }

    fn auto_start(&self, session_id: &str) -> Option<SessionState> {
        match self.start_session(session_id) {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!("Failed to auto-start session {}: {}", session_id, e);
                None
            }
        }
    }

    // ========================================================================
    // OPERATOR ACTIONS
    // ========================================================================

    /// Create (or keep) the session state and log the start
    pub fn start_session(&self, session_id: &str) -> Result<SessionState, SessionError> {
        let enabled = self.config.interceptor.enabled_by_default;
        let (state, created) = self.store.update(session_id, || SessionState::new(session_id, enabled), |_| {})?;

        if created {
            log::info!("Session {} started (interceptor {})", session_id, if enabled { "on" } else { "off" });
            self.record_session(SessionEventKind::Started, &state);
        }
        Ok(state)
    }

    /// Log the end and tear the state down. `Ok(None)` if there was none.
    pub fn end_session(&self, session_id: &str) -> Result<Option<SessionState>, SessionError> {
        let state = match self.store.load(session_id) {
            Ok(state) => state,
            Err(SessionError::Corrupt { .. }) => None,
            Err(e) => return Err(e),
        };
        self.store.remove(session_id)?;

        if let Some(state) = &state {
            log::info!("Session {} ended", session_id);
            self.record_session(SessionEventKind::Ended, state);
        }
        Ok(state)
    }

    pub fn enable(&self, session_id: &str) -> Result<SessionState, SessionError> {
        self.set_enabled(session_id, true)
    }

    pub fn disable(&self, session_id: &str) -> Result<SessionState, SessionError> {
        self.set_enabled(session_id, false)
    }

    fn set_enabled(&self, session_id: &str, enabled: bool) -> Result<SessionState, SessionError> {
        let default = self.config.interceptor.enabled_by_default;
        let mut previous = default;
        let (state, created) = self.store.update(
            session_id,
            || SessionState::new(session_id, default),
            |state| {
                previous = state.interceptor_enabled;
                state.interceptor_enabled = enabled;
            },
        )?;

        if created {
            self.record_session(SessionEventKind::Started, &state);
        }
        let kind = if enabled { PolicyChangeKind::Enabled } else { PolicyChangeKind::Disabled };
        self.record_change(PolicyChange::new(session_id, kind, on_off(previous), on_off(enabled)));
        log::info!("Interceptor {} for session {}", on_off(enabled), session_id);
        Ok(state)
    }

    /// Per-session thresholds; `None` restores the configured ones
    pub fn set_thresholds(&self, session_id: &str, thresholds: Option<TierThresholds>) -> Result<SessionState, SessionError> {
        if let Some(t) = &thresholds {
            t.validate().map_err(|e| SessionError::InvalidUpdate(e.to_string()))?;
        }

        let configured = self.config.thresholds;
        let default = self.config.interceptor.enabled_by_default;
        let mut previous = configured;
        let (state, created) = self.store.update(
            session_id,
            || SessionState::new(session_id, default),
            |state| {
                previous = state.thresholds(&configured);
                state.threshold_override = thresholds;
            },
        )?;

        if created {
            self.record_session(SessionEventKind::Started, &state);
        }
        let kind = if thresholds.is_some() {
            PolicyChangeKind::ThresholdsUpdated
        } else {
            PolicyChangeKind::ThresholdsReset
        };
        let current = state.thresholds(&configured);
        self.record_change(PolicyChange::new(session_id, kind, describe(&previous), describe(&current)));
        Ok(state)
    }

    pub fn status(&self, session_id: &str) -> Result<Option<SessionState>, SessionError> {
        self.store.load(session_id)
    }

    // ========================================================================
    // AUDIT
    // ========================================================================

    fn record_session(&self, kind: SessionEventKind, state: &SessionState) {
        let now = Utc::now();
        let record = SessionRecord {
            kind,
            timestamp: now,
            session_id: state.session_id.clone(),
            started_at: state.started_at,
            ended_at: (kind == SessionEventKind::Ended).then_some(now),
            enabled: state.interceptor_enabled,
            override_count: state.total_overrides(),
        };
        if let Err(e) = self.audit.append_session(&record) {
            self.diagnostics.report(&format!("session {}", state.session_id), &e);
        }
    }

    fn record_change(&self, change: PolicyChange) {
        if let Err(e) = self.audit.append_policy_change(&change) {
            self.diagnostics.report(&format!("policy change in {}", change.session_id), &e);
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn describe(t: &TierThresholds) -> String {
    format!("low_max={:.2} high_min={:.2}", t.low_max, t.high_min)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::telemetry::{POLICY_CHANGES_FILE, SESSIONS_FILE};
    use tempfile::TempDir;

    fn policy(dir: &TempDir, tweak: impl FnOnce(&mut GuardConfig)) -> PolicyState {
        let mut config = GuardConfig::default();
        config.interceptor.state_dir = Some(dir.path().to_path_buf());
        tweak(&mut config);
        let audit = Arc::new(AuditLog::from_config(&config));
        PolicyState::new(config, audit, Diagnostics::quiet(dir.path())).unwrap()
    }

    fn audit_file(dir: &TempDir, name: &str) -> String {
        std::fs::read_to_string(dir.path().join("audit").join(name)).unwrap_or_default()
    }

    #[test]
    fn test_missing_session_auto_starts() {
        let dir = TempDir::new().unwrap();
        let p = policy(&dir, |_| {});
        let cp = p.begin_command("s1", "ls");
        assert!(cp.enabled);
        assert!(p.status("s1").unwrap().is_some());
        assert!(audit_file(&dir, SESSIONS_FILE).contains("\"started\""));
    }

    #[test]
    fn test_default_disabled_session() {
        let dir = TempDir::new().unwrap();
        let p = policy(&dir, |c| c.interceptor.enabled_by_default = false);
        assert!(!p.begin_command("s1", "ls").enabled);
    }

    #[test]
    fn test_toggle_is_read_per_command_and_audited() {
        let dir = TempDir::new().unwrap();
        let p = policy(&dir, |_| {});
        p.disable("s1").unwrap();
        assert!(!p.begin_command("s1", "ls").enabled);
        p.enable("s1").unwrap();
        assert!(p.begin_command("s1", "ls").enabled);

        let changes = audit_file(&dir, POLICY_CHANGES_FILE);
        assert_eq!(changes.lines().count(), 2);
        assert!(changes.contains("\"disabled\""));
    }

    #[test]
    fn test_corrupt_state_fails_closed() {
        let dir = TempDir::new().unwrap();
        let p = policy(&dir, |c| c.interceptor.enabled_by_default = false);
        std::fs::create_dir_all(p.store().dir()).unwrap();
        std::fs::write(p.store().path_for("s1"), "garbage").unwrap();
        assert!(p.begin_command("s1", "ls").enabled);
    }

    #[test]
    fn test_threshold_override() {
        let dir = TempDir::new().unwrap();
        let p = policy(&dir, |_| {});
        let custom = TierThresholds {
            low_max: 0.1,
            high_min: 0.5,
        };
        p.set_thresholds("s1", Some(custom)).unwrap();
        assert_eq!(p.begin_command("s1", "ls").thresholds, custom);

        let bad = TierThresholds {
            low_max: 0.9,
            high_min: 0.5,
        };
        assert!(matches!(p.set_thresholds("s1", Some(bad)), Err(SessionError::InvalidUpdate(_))));

        p.set_thresholds("s1", None).unwrap();
        assert_eq!(p.begin_command("s1", "ls").thresholds, TierThresholds::default());
    }

    #[test]
    fn test_history_feeds_prior_occurrences() {
        let dir = TempDir::new().unwrap();
        let p = policy(&dir, |c| c.overrides.allow = vec!["^cargo ".to_string()]);
        for _ in 0..3 {
            let cp = p.begin_command("s1", "cargo test");
            p.finish_command("s1", "cargo test", cp.override_hit.as_ref());
        }
        let cp = p.begin_command("s1", "cargo test");
        assert_eq!(cp.prior_occurrences, 3);
        assert_eq!(p.status("s1").unwrap().unwrap().total_overrides(), 3);
    }

    #[test]
    fn test_end_session_tears_down() {
        let dir = TempDir::new().unwrap();
        let p = policy(&dir, |_| {});
        p.start_session("s1").unwrap();
        assert!(p.end_session("s1").unwrap().is_some());
        assert!(p.status("s1").unwrap().is_none());
        assert!(p.end_session("s1").unwrap().is_none());
        assert!(audit_file(&dir, SESSIONS_FILE).contains("\"ended\""));
    }
}
