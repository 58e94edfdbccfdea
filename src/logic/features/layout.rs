//! Feature Layout - Centralized Feature Definition
//!
//! **This file controls the feature schema**
//!
//! ## Rules:
//! 1. Add feature → increment FEATURE_VERSION
//! 2. Change order → increment FEATURE_VERSION
//! 3. Remove feature → increment FEATURE_VERSION
//!
//! Audit records carry the version and hash so training data stays
//! interpretable across schema changes.

use crc32fast::Hasher;
use once_cell::sync::Lazy;

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// FEATURE LAYOUT (Authoritative source)
// ============================================================================

/// Feature names in exact order they appear in the vector
pub const FEATURE_LAYOUT: &[&str] = &[
    // === Verb (0-2) ===
    "verb_known",                // 0: every segment verb is in the verb tables
    "verb_risk_class",           // 1: max class over segments (0 read, 1 modify, 2 destructive, 3 system)
    "unparseable",               // 2: parser reported an anomaly

    // === Shell structure (3-7) ===
    "segment_count",             // 3: simple commands, nested scripts included
    "has_pipe",                  // 4
    "has_chain",                 // 5: ; && || &
    "has_command_substitution",  // 6: $() or backticks
    "has_redirect_overwrite",    // 7: > to a real file

    // === Filesystem (8-15) ===
    "recursive_delete",          // 8
    "force_flag",                // 9: -f / --force on a modifying verb
    "truncate_or_overwrite",     // 10
    "root_path_target",          // 11: /, /*, ~, $HOME
    "system_path_target",        // 12: /etc, /usr, /boot, ...
    "target_path_count",         // 13
    "outside_cwd_target",        // 14
    "credential_access",         // 15: ssh keys, cloud credentials, .env

    // === VCS (16-20) ===
    "vcs_force_push",            // 16
    "vcs_protected_branch",      // 17
    "vcs_hard_reset",            // 18: reset --hard, clean -f
    "vcs_branch_delete",         // 19
    "vcs_history_rewrite",       // 20: rebase, amend, filter-branch

    // === Privilege / system (21-27) ===
    "privilege_escalation",      // 21
    "permission_change",         // 22
    "network_egress",            // 23
    "pipe_to_shell",             // 24
    "process_kill",              // 25
    "disk_device_write",         // 26
    "fork_bomb",                 // 27

    // === Arguments / history (28-31) ===
    "wildcard_usage",            // 28
    "argument_entropy",          // 29: Shannon entropy, bits per char
    "arg_count",                 // 30
    "session_frequency",         // 31: prior occurrences in this session
];

/// Total number of features
pub const FEATURE_COUNT: usize = 32;

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 over version + ordered names
fn compute_layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);
    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

static LAYOUT_HASH: Lazy<u32> = Lazy::new(compute_layout_hash);

/// Cached layout hash
pub fn layout_hash() -> u32 {
    *LAYOUT_HASH
}

// ============================================================================
// LAYOUT VALIDATION
// ============================================================================

/// Vector was built against a different schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutMismatchError {
    pub expected_version: u8,
    pub expected_hash: u32,
    pub actual_version: u8,
    pub actual_hash: u32,
}

impl std::fmt::Display for LayoutMismatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Feature layout mismatch: expected v{} (hash: {:08x}), got v{} (hash: {:08x})",
            self.expected_version, self.expected_hash, self.actual_version, self.actual_hash
        )
    }
}

impl std::error::Error for LayoutMismatchError {}

pub fn validate_layout(incoming_version: u8, incoming_hash: u32) -> Result<(), LayoutMismatchError> {
    let current_hash = layout_hash();
    if incoming_version != FEATURE_VERSION || incoming_hash != current_hash {
        return Err(LayoutMismatchError {
            expected_version: FEATURE_VERSION,
            expected_hash: current_hash,
            actual_version: incoming_version,
            actual_hash: incoming_hash,
        });
    }
    Ok(())
}

// ============================================================================
// FEATURE INDEX LOOKUP
// ============================================================================

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

// ============================================================================
// TESTS
// ============================================================================
