//! Guard Configuration
//!
//! Statically validated configuration. Every recognised option is a typed
//! field; unknown keys and out-of-range values are rejected at load time so
//! nothing is interpreted ad hoc on the hot path.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::ConfigError;

// ============================================================================
// SECTIONS
// ============================================================================

/// `[interceptor]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterceptorSection {
    /// Interceptor state for a session that has no state file yet
    pub enabled_by_default: bool,
    /// Directory for session state files and the fallback diagnostic log
    pub state_dir: Option<PathBuf>,
}

impl Default for InterceptorSection {
    fn default() -> Self {
        Self {
            enabled_by_default: true,
            state_dir: None,
        }
    }
}

/// `[thresholds]` - score cut points between tiers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierThresholds {
    /// Score below this = low
    pub low_max: f32,
    /// Score at or above this = high, between = medium
    pub high_min: f32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            low_max: crate::logic::risk::LOW_TIER_MAX,
            high_min: crate::logic::risk::HIGH_TIER_MIN,
        }
    }
}

impl TierThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("thresholds.low_max", self.low_max), ("thresholds.high_min", self.high_min)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} is outside [0, 1]", value),
                });
            }
        }
        if self.low_max >= self.high_min {
            return Err(ConfigError::Invalid {
                field: "thresholds",
                reason: format!("low_max {} must be below high_min {}", self.low_max, self.high_min),
            });
        }
        Ok(())
    }
}

/// `[llm]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmSection {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    pub min_confidence: f32,
    /// Accept private-network endpoints in addition to loopback
    pub allow_lan_endpoint: bool,
    pub max_tokens: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: constants::DEFAULT_LLM_ENDPOINT.to_string(),
            model: constants::DEFAULT_LLM_MODEL.to_string(),
            timeout_ms: constants::DEFAULT_LLM_TIMEOUT_MS,
            min_confidence: constants::DEFAULT_LLM_MIN_CONFIDENCE,
            allow_lan_endpoint: false,
            max_tokens: constants::DEFAULT_LLM_MAX_TOKENS,
        }
    }
}

impl LlmSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `[human]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HumanSection {
    pub timeout_secs: u64,
}

impl Default for HumanSection {
    fn default() -> Self {
        Self {
            timeout_secs: constants::DEFAULT_HUMAN_TIMEOUT_SECS,
        }
    }
}

impl HumanSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[overrides]` - regex patterns matched against the raw command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverridesSection {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// `[vcs]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VcsSection {
    /// Exact names or `prefix/*` globs
    pub protected_branches: Vec<String>,
}

impl Default for VcsSection {
    fn default() -> Self {
        Self {
            protected_branches: constants::DEFAULT_PROTECTED_BRANCHES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// `[features]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturesSection {
    pub env_fingerprint_vars: Vec<String>,
    /// Extra verb aliases (`alias -> verb`)
    pub aliases: BTreeMap<String, String>,
}

impl Default for FeaturesSection {
    fn default() -> Self {
        Self {
            env_fingerprint_vars: constants::DEFAULT_FINGERPRINT_VARS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            aliases: BTreeMap::new(),
        }
    }
}

/// `[audit]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditSection {
    pub dir: Option<PathBuf>,
    pub max_file_bytes: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            dir: None,
            max_file_bytes: constants::DEFAULT_AUDIT_MAX_FILE_BYTES,
        }
    }
}

// ============================================================================
// GUARD CONFIG
// ============================================================================

/// Complete guard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    pub interceptor: InterceptorSection,
    pub thresholds: TierThresholds,
    pub llm: LlmSection,
    pub human: HumanSection,
    pub overrides: OverridesSection,
    pub vcs: VcsSection,
    pub features: FeaturesSection,
    pub audit: AuditSection,
}

impl GuardConfig {
    /// Load from an explicit path, `AGENT_GUARD_CONFIG`, or the default location.
    /// A missing default file yields the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(constants::ENV_CONFIG_PATH) {
            if !path.trim().is_empty() {
                return Self::from_file(Path::new(&path));
            }
        }
        match constants::default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GuardConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GuardConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything the pipeline could not honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        if self.llm.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "llm.timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.llm.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.llm.min_confidence) {
            return Err(ConfigError::Invalid {
                field: "llm.min_confidence",
                reason: format!("{} is outside [0, 1]", self.llm.min_confidence),
            });
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "llm.model",
                reason: "must not be empty".to_string(),
            });
        }
        validate_endpoint(&self.llm.endpoint, self.llm.allow_lan_endpoint)?;

        if self.human.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "human.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        for pattern in self.overrides.allow.iter().chain(self.overrides.deny.iter()) {
            Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                field: "overrides",
                reason: format!("invalid pattern `{}`: {}", pattern, e),
            })?;
        }

        if self.vcs.protected_branches.iter().any(|b| b.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "vcs.protected_branches",
                reason: "empty branch name".to_string(),
            });
        }

        if self.audit.max_file_bytes < 1024 {
            return Err(ConfigError::Invalid {
                field: "audit.max_file_bytes",
                reason: format!("{} is below the 1 KiB minimum", self.audit.max_file_bytes),
            });
        }

        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.interceptor
            .state_dir
            .clone()
            .unwrap_or_else(constants::default_state_dir)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.audit
            .dir
            .clone()
            .unwrap_or_else(|| self.state_dir().join("audit"))
    }
}

// ============================================================================
// ENDPOINT VALIDATION
// ============================================================================

/// Command content must never leave the machine (or the LAN, if allowed)
fn validate_endpoint(endpoint: &str, allow_lan: bool) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(endpoint).map_err(|e| ConfigError::Invalid {
        field: "llm.endpoint",
        reason: format!("`{}` is not a URL: {}", endpoint, e),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Invalid {
            field: "llm.endpoint",
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }

    let host = url.host_str().unwrap_or("");
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.eq_ignore_ascii_case("localhost") {
        return Ok(());
    }

    match host.parse::<IpAddr>() {
        Ok(ip) if ip.is_loopback() => Ok(()),
        Ok(ip) if allow_lan && is_private_network(&ip) => Ok(()),
        _ => Err(ConfigError::Invalid {
            field: "llm.endpoint",
            reason: format!(
                "`{}` is not a local endpoint (loopback{} only)",
                host,
                if allow_lan { " or private network" } else { "" }
            ),
        }),
    }
}

fn is_private_network(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            // 100.64.0.0/10 (carrier-grade NAT, used by mesh VPNs)
            let cgnat = octets[0] == 100 && (octets[1] & 0xC0) == 64;
            v4.is_private() || v4.is_link_local() || cgnat
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            (first & 0xFE00) == 0xFC00 || (first & 0xFFC0) == 0xFE80
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.interceptor.enabled_by_default);
        assert_eq!(config.llm.timeout_ms, constants::DEFAULT_LLM_TIMEOUT_MS);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = GuardConfig::from_toml_str(
            r#"
            [thresholds]
            low_max = 0.2
            high_min = 0.8

            [llm]
            endpoint = "http://localhost:9000"
            timeout_ms = 1500

            [overrides]
            allow = ["^make test$"]
            deny = ["terraform destroy"]

            [vcs]
            protected_branches = ["main", "deploy/*"]
            "#,
        )
        .unwrap();

        assert_eq!(config.thresholds.low_max, 0.2);
        assert_eq!(config.llm.timeout(), Duration::from_millis(1500));
        assert_eq!(config.overrides.deny.len(), 1);
        assert_eq!(config.vcs.protected_branches[1], "deploy/*");
        // untouched sections keep defaults
        assert_eq!(config.human.timeout_secs, constants::DEFAULT_HUMAN_TIMEOUT_SECS);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = GuardConfig::from_toml_str("[llm]\nendpont = \"http://127.0.0.1:1\"\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let result = GuardConfig::from_toml_str("[thresholds]\nlow_max = 0.8\nhigh_min = 0.3\n");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "thresholds", .. })));
    }

    #[test]
    fn test_remote_endpoint_rejected() {
        let result = GuardConfig::from_toml_str("[llm]\nendpoint = \"https://api.example.com\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "llm.endpoint", .. })));
    }

    #[test]
    fn test_lan_endpoint_requires_opt_in() {
        let denied = GuardConfig::from_toml_str("[llm]\nendpoint = \"http://100.94.250.88:8001\"\n");
        assert!(denied.is_err());

        let allowed = GuardConfig::from_toml_str(
            "[llm]\nendpoint = \"http://100.94.250.88:8001\"\nallow_lan_endpoint = true\n",
        );
        assert!(allowed.is_ok());
    }

    #[test]
    fn test_ipv6_loopback_accepted() {
        assert!(validate_endpoint("http://[::1]:8001", false).is_ok());
    }

    #[test]
    fn test_bad_override_regex_rejected() {
        let result = GuardConfig::from_toml_str("[overrides]\ndeny = [\"(unclosed\"]\n");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "overrides", .. })));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(GuardConfig::from_toml_str("[llm]\ntimeout_ms = 0\n").is_err());
        assert!(GuardConfig::from_toml_str("[human]\ntimeout_secs = 0\n").is_err());
    }
}
