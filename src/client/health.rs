use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Failed probes in a row before the pool is rebuilt
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Connectivity bookkeeping. Always mutated under one lock so a probe can
/// never interleave with a reconnect.
#[derive(Debug, Default)]
pub(crate) struct HealthState {
    pub connected: bool,
    pub last_check: Option<Instant>,
    pub consecutive_failures: u32,
}

impl HealthState {
    /// True when the cached flag is stale and the store must be probed.
    pub fn probe_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_check {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }

    pub fn record_success(&mut self) {
        self.connected = true;
        self.consecutive_failures = 0;
    }

    /// Returns whether the failure count has reached the reconnect threshold.
    pub fn record_failure(&mut self) -> bool {
        self.connected = false;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
    }

    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        HealthSnapshot {
            connected: self.connected,
            consecutive_failures: self.consecutive_failures,
            seconds_since_check: self
                .last_check
                .map(|last| now.saturating_duration_since(last).as_secs_f64()),
        }
    }
}

/// Read-only view of the client's connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub connected: bool,
    pub consecutive_failures: u32,
    pub seconds_since_check: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_is_always_due() {
        let state = HealthState::default();
        assert!(state.probe_due(Instant::now(), Duration::from_secs(30)));
    }

    #[test]
    fn test_probe_throttled_within_interval() {
        let now = Instant::now();
        let state = HealthState {
            last_check: Some(now),
            ..HealthState::default()
        };
        assert!(!state.probe_due(now + Duration::from_secs(29), Duration::from_secs(30)));
        assert!(state.probe_due(now + Duration::from_secs(30), Duration::from_secs(30)));
    }

    #[test]
    fn test_failures_reach_threshold_on_third() {
        let mut state = HealthState::default();
        assert!(!state.record_failure());
        assert!(!state.record_failure());
        assert!(state.record_failure());
        assert!(!state.connected);

        state.record_success();
        assert!(state.connected);
        assert_eq!(state.consecutive_failures, 0);
    }
}
