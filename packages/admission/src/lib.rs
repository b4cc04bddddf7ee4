//! Per-domain admission control for outbound requests.
//!
//! Background processors that fetch remote content must not hammer the
//! domains they talk to. This crate gates every outbound request behind a
//! [`DomainGate`]: callers acquire a permit for a hostname, the gate blocks
//! them until the domain's concurrency and pacing windows open, and dropping
//! the permit releases the slot.
//!
//! # Usage
//!
//! ```ignore
//! let gate = Arc::new(DomainGate::new(GateConfig::default()));
//!
//! let permit = gate.acquire("https://www.reddit.com/r/rust").await?;
//! // ... issue the request ...
//! drop(permit); // releases the concurrency slot
//! ```
//!
//! Pacing is enforced on three axes:
//! - per-domain concurrency (`max_concurrent`)
//! - per-domain minimum delay between consecutive requests
//! - a global minimum delay between requests to *any* domain

mod error;
mod gate;
mod normalize;
mod rules;

pub use error::AdmissionError;
pub use gate::{AdmissionPermit, DomainGate, DomainStats};
pub use normalize::normalize_domain;
pub use rules::{DomainRule, GateConfig};
