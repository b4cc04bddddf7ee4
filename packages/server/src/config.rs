use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use admission::{normalize_domain, DomainRule, GateConfig};

use crate::kernel::jobs::BackendKind;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub port: u16,
    /// Required for the poll backend only
    pub database_url: Option<String>,
    pub worker_concurrency: usize,
    pub heartbeat_interval: Duration,
    pub claim_wait: Duration,
    pub gate: GateConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let backend: BackendKind = env::var("DISPATCH_BACKEND")
            .unwrap_or_else(|_| "broker".to_string())
            .parse()
            .map_err(|e: anyhow::Error| e.context("DISPATCH_BACKEND must be broker or poll"))?;

        let database_url = env::var("DATABASE_URL").ok();
        if backend == BackendKind::Poll && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set for the poll backend");
        }

        let gate = GateConfig {
            default_rule: DomainRule {
                delay_secs: parse_var("DOMAIN_DEFAULT_DELAY_SECS", 1)?,
                max_concurrent: parse_var("DOMAIN_DEFAULT_MAX_CONCURRENT", 2)?,
                handler: None,
            },
            inter_domain_delay_ms: parse_var("INTER_DOMAIN_DELAY_MS", 200)?,
            rules: match env::var("DOMAIN_RULES") {
                Ok(json) => parse_domain_rules(&json)?,
                Err(_) => Default::default(),
            },
        };

        Ok(Self {
            backend,
            port: parse_var("PORT", 8080)?,
            database_url,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 2)?,
            heartbeat_interval: Duration::from_secs(parse_var("HEARTBEAT_INTERVAL_SECS", 60)?),
            claim_wait: Duration::from_millis(parse_var("CLAIM_WAIT_TIMEOUT_MS", 30_000)?),
            gate,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} must be a valid value")),
        Err(_) => Ok(default),
    }
}

/// Parse `DOMAIN_RULES`, re-keying each rule by its normalized hostname so
/// overrides match the keys the gate looks up.
fn parse_domain_rules(json: &str) -> Result<HashMap<String, DomainRule>> {
    let raw: HashMap<String, DomainRule> =
        serde_json::from_str(json).context("DOMAIN_RULES must be a JSON map")?;

    let mut rules = HashMap::with_capacity(raw.len());
    for (key, rule) in raw {
        let domain = normalize_domain(&key)
            .with_context(|| format!("DOMAIN_RULES key {key:?} is not a valid domain"))?;
        rules.insert(domain, rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_rule_keys_are_normalized() {
        let rules = parse_domain_rules(
            r#"{ "https://www.Reddit.com": { "delay_secs": 10, "max_concurrent": 1 } }"#,
        )
        .unwrap();

        assert!(rules.contains_key("reddit.com"));
        assert_eq!(rules["reddit.com"].delay_secs, 10);
    }

    #[test]
    fn invalid_domain_rule_key_is_rejected() {
        let err = parse_domain_rules(r#"{ "   ": { "delay_secs": 1, "max_concurrent": 1 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("DOMAIN_RULES"));
    }
}
