use caph_domain::HostName;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Tracks consecutive liveness-probe failures per host, in process memory
/// only. Rederivable from the next three probes after a restart, so it is
/// deliberately never written to the store.
#[derive(Default)]
pub struct LivenessTracker {
    failures: DashMap<HostName, Vec<DateTime<Utc>>>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed probe at `now` and report whether this is the third
    /// (or later) failure within the trailing minute.
    pub fn record_failure(&self, host: &HostName, now: DateTime<Utc>) -> bool {
        let mut entry = self.failures.entry(host.clone()).or_default();
        entry.retain(|t| now.signed_duration_since(*t) < Duration::minutes(1));
        entry.push(now);
        entry.len() >= 3
    }

    /// A successful probe resets the window.
    pub fn clear(&self, host: &HostName) {
        self.failures.remove(host);
    }
}
