//! Per-domain pacing rules.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pacing rule applied to a single domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRule {
    /// Minimum delay between consecutive requests to this domain
    pub delay_secs: u64,
    /// Maximum in-flight requests to this domain
    pub max_concurrent: usize,
    /// Optional extraction strategy tag for this domain.
    ///
    /// Lets a processor pick a domain-specific handler (e.g. an API-backed
    /// client for a known platform) without the gate caring what it means.
    #[serde(default)]
    pub handler: Option<String>,
}

impl Default for DomainRule {
    fn default() -> Self {
        Self {
            delay_secs: 1,
            max_concurrent: 2,
            handler: None,
        }
    }
}

impl DomainRule {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Configuration for a [`crate::DomainGate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Rule applied to domains without an explicit override
    pub default_rule: DomainRule,
    /// Minimum delay between consecutive requests across *different* domains
    pub inter_domain_delay_ms: u64,
    /// Per-domain overrides, keyed by normalized hostname
    #[serde(default)]
    pub rules: HashMap<String, DomainRule>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_rule: DomainRule::default(),
            inter_domain_delay_ms: 200,
            rules: HashMap::new(),
        }
    }
}

impl GateConfig {
    pub fn inter_domain_delay(&self) -> Duration {
        Duration::from_millis(self.inter_domain_delay_ms)
    }

    /// Look up the rule for a normalized domain, falling back to the default.
    pub fn rule_for(&self, domain: &str) -> &DomainRule {
        self.rules.get(domain).unwrap_or(&self.default_rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_takes_precedence_over_default() {
        let mut config = GateConfig::default();
        config.rules.insert(
            "reddit.com".to_string(),
            DomainRule {
                delay_secs: 10,
                max_concurrent: 1,
                handler: Some("reddit-api".to_string()),
            },
        );

        assert_eq!(config.rule_for("reddit.com").delay_secs, 10);
        assert_eq!(
            config.rule_for("reddit.com").handler.as_deref(),
            Some("reddit-api")
        );
        assert_eq!(
            config.rule_for("example.com").delay_secs,
            config.default_rule.delay_secs
        );
    }

    #[test]
    fn config_deserializes_from_json() {
        let json = r#"{
            "default_rule": { "delay_secs": 2, "max_concurrent": 3 },
            "inter_domain_delay_ms": 500,
            "rules": {
                "reddit.com": { "delay_secs": 10, "max_concurrent": 1, "handler": "reddit-api" }
            }
        }"#;

        let config: GateConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.default_rule.max_concurrent, 3);
        assert_eq!(config.rule_for("reddit.com").delay_secs, 10);
    }
}
