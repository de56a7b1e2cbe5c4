//! Latest-version lookup against the npm registry.

use std::time::Duration;

use serde::Deserialize;

use mcphost_common::{Error, Result};

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RegistryLatest {
    version: String,
}

#[must_use]
pub fn registry_latest_url(package: &str) -> String {
    format!("https://registry.npmjs.org/{package}/latest")
}

/// Resolve the latest published version of a package.
pub async fn latest_version(client: &reqwest::Client, package: &str) -> Result<String> {
    let response = client
        .get(registry_latest_url(package))
        .timeout(REGISTRY_TIMEOUT)
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(format!("registry lookup failed: {e}")))?
        .error_for_status()
        .map_err(|e| Error::UpstreamUnavailable(format!("registry lookup failed: {e}")))?;
    let latest: RegistryLatest = response
        .json()
        .await
        .map_err(|e| Error::UpstreamUnavailable(format!("bad registry response: {e}")))?;
    Ok(latest.version)
}

/// Strip a leading `v` so tag-style versions compare cleanly.
#[must_use]
pub fn normalize_version(version: &str) -> String {
    version.trim().trim_start_matches('v').to_string()
}

/// Numeric-aware dotted version comparison: true when `latest` is newer
/// than `current`. Non-numeric components fall back to string order.
#[must_use]
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let latest = normalize_version(latest);
    let current = normalize_version(current);
    if latest == current {
        return false;
    }

    let mut latest_parts = latest.split('.');
    let mut current_parts = current.split('.');
    loop {
        match (latest_parts.next(), current_parts.next()) {
            (None, None) => return false,
            (Some(_), None) => return true,
            (None, Some(_)) => return false,
            (Some(l), Some(c)) => match (l.parse::<u64>(), c.parse::<u64>()) {
                (Ok(l), Ok(c)) if l != c => return l > c,
                (Ok(_), Ok(_)) => {},
                _ => {
                    if l != c {
                        return l > c;
                    }
                },
            },
        }
    }
}
