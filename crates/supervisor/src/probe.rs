//! Readiness and health probing over the instance's loopback HTTP
//! endpoint.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use {
    mcphost_common::{Error, Result},
    mcphost_config::SupervisorTimings,
};

use crate::instance::InstanceMetadata;

#[must_use]
pub fn health_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/health")
}

#[must_use]
pub fn metadata_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/metadata")
}

/// Poll `/health` until it answers 2xx or the deadline passes. The poll
/// interval starts small and doubles up to the configured maximum.
pub async fn wait_ready(
    client: &reqwest::Client,
    port: u16,
    timings: &SupervisorTimings,
) -> Result<()> {
    let deadline = Instant::now() + timings.readiness_deadline;
    let mut interval = timings.readiness_initial_interval;
    let url = health_url(port);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::ReadinessTimeout(format!(
                "no healthy response on port {port} within {:?}",
                timings.readiness_deadline
            )));
        }

        let attempt = client
            .get(&url)
            .timeout(remaining.min(timings.health_timeout))
            .send()
            .await;
        match attempt {
            Ok(response) if response.status().is_success() => {
                debug!(port, "instance ready");
                return Ok(());
            },
            Ok(response) => {
                trace!(port, status = %response.status(), "readiness probe rejected");
            },
            Err(e) => {
                trace!(port, error = %e, "readiness probe failed");
            },
        }

        tokio::time::sleep(interval.min(remaining)).await;
        interval = (interval * 2).min(timings.readiness_max_interval);
    }
}

/// Fetch `/metadata` once the instance is ready. A missing or malformed
/// metadata endpoint is not fatal; the instance just carries no metadata.
pub async fn fetch_metadata(
    client: &reqwest::Client,
    port: u16,
    timeout: Duration,
) -> Option<InstanceMetadata> {
    let response = client
        .get(metadata_url(port))
        .timeout(timeout)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json::<InstanceMetadata>().await.ok()
}

/// One health-watch probe. True when the instance answered 2xx in time.
pub async fn check_health(client: &reqwest::Client, port: u16, timeout: Duration) -> bool {
    match client
        .get(health_url(port))
        .timeout(timeout)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}
