//! Risk Rules & Weights
//!
//! The ruleset is a fixed, versioned scoring function. Any change to a weight,
//! threshold or pinned rule bumps `RULESET_VERSION`.

use super::types::PinnedRule;
use crate::logic::features::FeatureVector;

/// Version stamped on every decision
pub const RULESET_VERSION: &str = "1.0.0";

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Score below this = Low
pub const LOW_TIER_MAX: f32 = 0.25;

/// Score at or above this = High, between = Medium
pub const HIGH_TIER_MIN: f32 = 0.70;

// ============================================================================
// FAMILIARITY
// ============================================================================

/// Prior occurrences in the session before the discount applies
pub const FAMILIARITY_MIN_OCCURRENCES: f32 = 3.0;

/// Score multiplier for familiar commands (never applied to pinned or floored)
pub const FAMILIARITY_DISCOUNT: f32 = 0.9;

// ============================================================================
// WEIGHTS (boolean features)
// ============================================================================

/// `(feature, weight, reason)`, applied when the flag is set
pub const FLAG_WEIGHTS: &[(&str, f32, &str)] = &[
    ("privilege_escalation", 0.45, "privilege escalation"),
    ("credential_access", 0.35, "touches credential files"),
    ("vcs_force_push", 0.35, "force-push rewrites remote history"),
    ("recursive_delete", 0.30, "recursive delete"),
    ("root_path_target", 0.30, "targets a root-like path"),
    ("vcs_hard_reset", 0.30, "discards uncommitted work"),
    ("network_egress", 0.30, "network egress"),
    ("pipe_to_shell", 0.30, "output piped into an interpreter"),
    ("process_kill", 0.30, "kills processes"),
    ("unparseable", 0.30, "command could not be parsed"),
    ("truncate_or_overwrite", 0.25, "truncates or overwrites files"),
    ("system_path_target", 0.25, "targets a system path"),
    ("vcs_branch_delete", 0.25, "deletes a branch"),
    ("disk_device_write", 0.60, "writes to a block device"),
    ("fork_bomb", 1.00, "fork bomb"),
    ("permission_change", 0.20, "changes permissions or ownership"),
    ("vcs_history_rewrite", 0.20, "rewrites history"),
    ("vcs_protected_branch", 0.15, "touches a protected branch"),
    ("has_command_substitution", 0.15, "command substitution"),
    ("force_flag", 0.10, "force flag"),
    ("outside_cwd_target", 0.10, "targets paths outside the working directory"),
    ("has_redirect_overwrite", 0.10, "overwrites a file via redirection"),
    ("wildcard_usage", 0.10, "wildcard arguments"),
    ("has_pipe", 0.05, "pipeline"),
    ("has_chain", 0.05, "chained commands"),
];

/// Verb class weights, indexed by `verb_risk_class`
pub const VERB_CLASS_WEIGHTS: [f32; 4] = [0.0, 0.10, 0.25, 0.30];

pub const VERB_CLASS_REASONS: [&str; 4] = [
    "read-only command",
    "modifying command",
    "destructive command",
    "system administration command",
];

/// Unrecognised verb
pub const UNKNOWN_VERB_WEIGHT: f32 = 0.20;

/// Per path target, capped
pub const PATH_TARGET_WEIGHT: f32 = 0.01;
pub const PATH_TARGET_CAP: f32 = 0.10;

/// Arguments above this entropy (bits/char) look encoded
pub const HIGH_ENTROPY_BITS: f32 = 4.5;
pub const HIGH_ENTROPY_WEIGHT: f32 = 0.10;

/// Very long argument lists
pub const MANY_ARGS: f32 = 20.0;
pub const MANY_ARGS_WEIGHT: f32 = 0.05;

// ============================================================================
// PINNED RULES
// ============================================================================

/// Hard-high rules, evaluated before scoring, in severity order
pub fn pinned_matches(v: &FeatureVector) -> Vec<PinnedRule> {
    let mut matched = Vec::new();
    if v.flag("fork_bomb") {
        matched.push(PinnedRule::ForkBomb);
    }
    if v.flag("recursive_delete") && (v.flag("root_path_target") || v.flag("system_path_target")) {
        matched.push(PinnedRule::RecursiveDeleteRoot);
    }
    if v.flag("disk_device_write") {
        matched.push(PinnedRule::RawDeviceWrite);
    }
    if v.flag("network_egress") && v.flag("pipe_to_shell") {
        matched.push(PinnedRule::RemoteScriptExecution);
    }
    if v.flag("vcs_force_push") && v.flag("vcs_protected_branch") {
        matched.push(PinnedRule::ForcePushProtectedBranch);
    }
    matched
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::{layout::feature_index, FeatureVectorBuilder};

    #[test]
    fn test_weights_name_real_features() {
        for (name, weight, _) in FLAG_WEIGHTS {
            assert!(feature_index(name).is_some(), "unknown feature {}", name);
            assert!(*weight > 0.0 && *weight <= 1.0);
        }
    }

    #[test]
    fn test_thresholds_ordered() {
        assert!(LOW_TIER_MAX < HIGH_TIER_MIN);
    }

    #[test]
    fn test_pinned_force_push_needs_protected_branch() {
        let unprotected = FeatureVectorBuilder::new().flag("vcs_force_push").build();
        assert!(pinned_matches(&unprotected).is_empty());

        let protected = FeatureVectorBuilder::new()
            .flag("vcs_force_push")
            .flag("vcs_protected_branch")
            .build();
        assert_eq!(pinned_matches(&protected), vec![PinnedRule::ForcePushProtectedBranch]);
    }

    #[test]
    fn test_pinned_recursive_delete_system_path() {
        let v = FeatureVectorBuilder::new()
            .flag("recursive_delete")
            .flag("system_path_target")
            .build();
        assert_eq!(pinned_matches(&v), vec![PinnedRule::RecursiveDeleteRoot]);
    }
}
