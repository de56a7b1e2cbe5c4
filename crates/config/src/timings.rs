use std::time::Duration;

/// Timing and budget knobs for the process supervisor. Defaults are the
/// production values; tests shrink them.
#[derive(Debug, Clone)]
pub struct SupervisorTimings {
    /// Total deadline for the readiness probe after spawn.
    pub readiness_deadline: Duration,
    /// First readiness poll interval; doubles up to `readiness_max_interval`.
    pub readiness_initial_interval: Duration,
    pub readiness_max_interval: Duration,
    /// Interval between health-watch probes on a running instance.
    pub health_interval: Duration,
    /// Per-probe timeout for the health watch.
    pub health_timeout: Duration,
    /// Consecutive health failures before an instance is declared dead.
    pub health_strikes: u32,
    /// Grace period between the polite stop signal and the forced kill.
    pub stop_grace: Duration,
    /// Global deadline for `stop_all` before remaining children are killed.
    pub stop_all_deadline: Duration,
    /// Auto-retry backoff: base delay, doubling per attempt, capped.
    pub retry_base: Duration,
    pub retry_cap: Duration,
    /// Maximum auto-retry attempts within `retry_window`.
    pub retry_max_attempts: u32,
    pub retry_window: Duration,
    /// How long a public operation waits for the per-key lock before
    /// failing with `InstanceBusy`.
    pub key_lock_timeout: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            readiness_deadline: Duration::from_secs(30),
            readiness_initial_interval: Duration::from_millis(250),
            readiness_max_interval: Duration::from_secs(2),
            health_interval: Duration::from_secs(15),
            health_timeout: Duration::from_secs(5),
            health_strikes: 3,
            stop_grace: Duration::from_secs(5),
            stop_all_deadline: Duration::from_secs(15),
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            retry_max_attempts: 5,
            retry_window: Duration::from_secs(600),
            key_lock_timeout: Duration::from_secs(30),
        }
    }
}

impl SupervisorTimings {
    /// Backoff delay before retry attempt `attempt` (zero-based).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        std::cmp::min(self.retry_base * 2u32.saturating_pow(attempt), self.retry_cap)
    }
}

/// Timing knobs for the session store sweep.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
    /// Idle TTL for sessions in workspaces without an override.
    pub default_ttl: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            default_ttl: Duration::from_secs(30 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_caps() {
        let t = SupervisorTimings::default();
        assert_eq!(t.retry_delay(0), Duration::from_secs(1));
        assert_eq!(t.retry_delay(1), Duration::from_secs(2));
        assert_eq!(t.retry_delay(4), Duration::from_secs(16));
        assert_eq!(t.retry_delay(5), Duration::from_secs(30));
        assert_eq!(t.retry_delay(12), Duration::from_secs(30));
    }
}
