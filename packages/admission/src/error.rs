//! Typed errors for admission control.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while acquiring admission for a domain.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The input could not be reduced to a hostname
    #[error("invalid domain: {input}")]
    InvalidDomain { input: String },

    /// The domain is administratively blocked
    #[error("domain {domain} is blocked until {until}")]
    DomainBlocked {
        domain: String,
        until: DateTime<Utc>,
    },
}
