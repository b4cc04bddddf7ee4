//! Hostname normalization.
//!
//! Rate state is keyed by bare hostname: `https://www.Reddit.com/r/rust`
//! and `reddit.com` must map to the same bucket.

use url::Url;

use crate::error::AdmissionError;

/// Reduce a URL or hostname to its canonical rate-limiting key.
///
/// Strips scheme, port, path, and a leading `www.`; lowercases the rest.
pub fn normalize_domain(input: &str) -> Result<String, AdmissionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AdmissionError::InvalidDomain {
            input: input.to_string(),
        });
    }

    // `Url::parse` rejects bare hostnames, so give those a scheme first.
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let host = Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .ok_or_else(|| AdmissionError::InvalidDomain {
            input: input.to_string(),
        })?;

    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.is_empty() {
        return Err(AdmissionError::InvalidDomain {
            input: input.to_string(),
        });
    }

    Ok(host)
}
