use crate::error::{AuditError, AuditResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied to one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Base server used to qualify root-relative upstream paths.
    #[serde(default)]
    pub api_server: Option<String>,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_rule_fetch_timeout_secs")]
    pub rule_fetch_timeout_secs: u64,
    #[serde(default = "default_rules_phase_timeout_secs")]
    pub rules_phase_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_rule_fetch_timeout_secs() -> u64 {
    15
}

fn default_rules_phase_timeout_secs() -> u64 {
    120
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            api_server: None,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            rule_fetch_timeout_secs: default_rule_fetch_timeout_secs(),
            rules_phase_timeout_secs: default_rules_phase_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs()
        }
    }
}

impl AuditConfig {
    pub fn from_env() -> AuditResult<Self> {
        let defaults = Self::default();
        let config = Self {
            api_server: std::env::var("OKTA_API_SERVER")
                .ok()
                .filter(|s| !s.is_empty()),
            max_concurrent_fetches: env_number(
                "AUDIT_MAX_CONCURRENT_FETCHES",
                defaults.max_concurrent_fetches
            )?,
            rule_fetch_timeout_secs: env_number(
                "AUDIT_RULE_FETCH_TIMEOUT_SECS",
                defaults.rule_fetch_timeout_secs
            )?,
            rules_phase_timeout_secs: env_number(
                "AUDIT_RULES_PHASE_TIMEOUT_SECS",
                defaults.rules_phase_timeout_secs
            )?,
            http_timeout_secs: env_number("AUDIT_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::default()
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(AuditError::ConfigError(
                "max_concurrent_fetches must be at least 1".to_string()
            ));
        }
        if self.rule_fetch_timeout_secs == 0 || self.rules_phase_timeout_secs == 0 {
            return Err(AuditError::ConfigError(
                "rule fetch timeouts must be non-zero".to_string()
            ));
        }
        Ok(())
    }

    pub fn rule_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.rule_fetch_timeout_secs)
    }

    pub fn rules_phase_timeout(&self) -> Duration {
        Duration::from_secs(self.rules_phase_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> AuditResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AuditError::ConfigError(format!("{key} is not a valid number: {raw}"))),
        Err(_) => Ok(default)
    }
}

/// Builder for `AuditConfig`.
#[derive(Default)]
pub struct AuditConfigBuilder {
    api_server: Option<String>,
    max_concurrent_fetches: Option<usize>,
    rule_fetch_timeout_secs: Option<u64>,
    rules_phase_timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>
}

impl AuditConfigBuilder {
    pub fn api_server(mut self, server: impl Into<String>) -> Self {
        self.api_server = Some(server.into());
        self
    }

    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = Some(max);
        self
    }

    pub fn rule_fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.rule_fetch_timeout_secs = Some(secs);
        self
    }

    pub fn rules_phase_timeout_secs(mut self, secs: u64) -> Self {
        self.rules_phase_timeout_secs = Some(secs);
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.http_timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> AuditResult<AuditConfig> {
        let defaults = AuditConfig::default();
        let config = AuditConfig {
            api_server: self.api_server,
            max_concurrent_fetches: self
                .max_concurrent_fetches
                .unwrap_or(defaults.max_concurrent_fetches),
            rule_fetch_timeout_secs: self
                .rule_fetch_timeout_secs
                .unwrap_or(defaults.rule_fetch_timeout_secs),
            rules_phase_timeout_secs: self
                .rules_phase_timeout_secs
                .unwrap_or(defaults.rules_phase_timeout_secs),
            http_timeout_secs: self.http_timeout_secs.unwrap_or(defaults.http_timeout_secs)
        };
        config.validate()?;
        Ok(config)
    }
}
