//! The domain gate: one owned table of per-domain rate state.
//!
//! All counters live behind a single mutex; waiters park on a [`Notify`]
//! and/or a deadline sleep and re-check on wakeup. Pacing stamps use
//! `tokio::time::Instant` so paused-time tests see exact delays.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::AdmissionError;
use crate::normalize::normalize_domain;
use crate::rules::{DomainRule, GateConfig};

#[derive(Debug, Default)]
struct DomainState {
    active: usize,
    last_request: Option<Instant>,
    blocked_until: Option<DateTime<Utc>>,
    total_admitted: u64,
}

#[derive(Debug, Default)]
struct GateState {
    domains: HashMap<String, DomainState>,
    /// Last admission across all domains, for the inter-domain gap
    last_request: Option<Instant>,
}

/// Introspection snapshot for one domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainStats {
    pub domain: String,
    pub active: usize,
    pub total_admitted: u64,
    pub last_request_ago_ms: Option<u64>,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Gates outbound requests by domain.
///
/// Admission requires, simultaneously:
/// - the domain's in-flight count is below its `max_concurrent`
/// - at least `delay` has elapsed since the domain's previous admission
/// - at least `inter_domain_delay` has elapsed since *any* admission
pub struct DomainGate {
    config: GateConfig,
    state: Mutex<GateState>,
    released: Notify,
}

enum Decision {
    Admit,
    /// Pacing window not yet open; wake at this deadline
    WaitUntil(Instant),
    /// Concurrency slot unavailable; wake on the next release
    WaitForRelease,
}

impl DomainGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GateState::default()),
            released: Notify::new(),
        }
    }

    /// The rule that applies to a (not necessarily normalized) domain.
    pub fn rule_for(&self, domain: &str) -> Result<DomainRule, AdmissionError> {
        let domain = normalize_domain(domain)?;
        Ok(self.config.rule_for(&domain).clone())
    }

    /// Acquire admission for one outbound request to `domain`.
    ///
    /// Blocks until the domain's concurrency and pacing windows open.
    /// Fails fast with [`AdmissionError::DomainBlocked`] when the domain is
    /// administratively blocked.
    pub async fn acquire(
        self: &Arc<Self>,
        domain: &str,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let domain = normalize_domain(domain)?;
        let rule = self.config.rule_for(&domain).clone();

        loop {
            // Register interest before deciding, so a release that lands
            // between unlock and await still wakes us.
            let mut notified = pin!(self.released.notified());
            notified.as_mut().enable();

            let decision = self.try_admit(&domain, &rule)?;
            match decision {
                Decision::Admit => {
                    debug!(domain = %domain, "admission granted");
                    return Ok(AdmissionPermit {
                        gate: Arc::clone(self),
                        domain,
                        handler: rule.handler.clone(),
                    });
                }
                Decision::WaitUntil(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = &mut notified => {}
                    }
                }
                Decision::WaitForRelease => {
                    notified.await;
                }
            }
        }
    }

    fn try_admit(&self, domain: &str, rule: &DomainRule) -> Result<Decision, AdmissionError> {
        let mut state = self.lock_state();
        let now = Instant::now();
        let global_last = state.last_request;
        let inter_delay = self.config.inter_domain_delay();

        let entry = state.domains.entry(domain.to_string()).or_default();

        if let Some(until) = entry.blocked_until {
            if until > Utc::now() {
                return Err(AdmissionError::DomainBlocked {
                    domain: domain.to_string(),
                    until,
                });
            }
            // Block expired; clear it lazily.
            entry.blocked_until = None;
        }

        let domain_gate = entry.last_request.map(|t| t + rule.delay());
        let global_gate = global_last.map(|t| t + inter_delay);
        let pacing_gate = match (domain_gate, global_gate) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if let Some(gate) = pacing_gate {
            if now < gate {
                return Ok(Decision::WaitUntil(gate));
            }
        }

        if entry.active >= rule.max_concurrent {
            return Ok(Decision::WaitForRelease);
        }

        entry.active += 1;
        entry.last_request = Some(now);
        entry.total_admitted += 1;
        state.last_request = Some(now);

        Ok(Decision::Admit)
    }

    fn release(&self, domain: &str) {
        let mut state = self.lock_state();
        if let Some(entry) = state.domains.get_mut(domain) {
            entry.active = entry.active.saturating_sub(1);
        }
        drop(state);
        self.released.notify_waiters();
    }

    /// Administratively block a domain for `duration`.
    ///
    /// In-flight requests are unaffected; new acquisitions fail fast.
    pub fn block_domain(
        &self,
        domain: &str,
        duration: Duration,
    ) -> Result<DateTime<Utc>, AdmissionError> {
        let domain = normalize_domain(domain)?;
        let until = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut state = self.lock_state();
        state.domains.entry(domain.clone()).or_default().blocked_until = Some(until);
        drop(state);

        // Wake parked waiters so they observe the block and fail fast.
        self.released.notify_waiters();
        info!(domain = %domain, until = %until, "domain blocked");
        Ok(until)
    }

    /// Clear an administrative block. Returns true if one was set.
    pub fn unblock_domain(&self, domain: &str) -> Result<bool, AdmissionError> {
        let domain = normalize_domain(domain)?;
        let mut state = self.lock_state();
        let was_blocked = state
            .domains
            .get_mut(&domain)
            .and_then(|entry| entry.blocked_until.take())
            .is_some();
        drop(state);

        if was_blocked {
            self.released.notify_waiters();
            info!(domain = %domain, "domain unblocked");
        }
        Ok(was_blocked)
    }

    /// Snapshot of every domain the gate has seen.
    pub fn stats(&self) -> Vec<DomainStats> {
        let state = self.lock_state();
        let now = Instant::now();
        let mut stats: Vec<DomainStats> = state
            .domains
            .iter()
            .map(|(domain, entry)| DomainStats {
                domain: domain.clone(),
                active: entry.active,
                total_admitted: entry.total_admitted,
                last_request_ago_ms: entry
                    .last_request
                    .map(|t| now.saturating_duration_since(t).as_millis() as u64),
                blocked_until: entry.blocked_until,
            })
            .collect();
        stats.sort_by(|a, b| a.domain.cmp(&b.domain));
        stats
    }

    /// Domains currently under an administrative block.
    pub fn blocked_domains(&self) -> Vec<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let state = self.lock_state();
        state
            .domains
            .iter()
            .filter_map(|(domain, entry)| {
                entry
                    .blocked_until
                    .filter(|until| *until > now)
                    .map(|until| (domain.clone(), until))
            })
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        // Recover rather than propagate poisoning; counters stay consistent
        // because every mutation is a single-field update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// RAII admission slot. Dropping it releases the domain's concurrency slot.
pub struct AdmissionPermit {
    gate: Arc<DomainGate>,
    domain: String,
    handler: Option<String>,
}

impl AdmissionPermit {
    /// The normalized domain this permit admits.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The extraction strategy tag from the matched rule, if any.
    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    /// Release explicitly (equivalent to dropping).
    pub fn release(self) {}
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release(&self.domain);
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("domain", &self.domain)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}
