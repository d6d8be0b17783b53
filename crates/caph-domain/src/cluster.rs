use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClusterName, NamespacedName};

/// Reference to the credentials secret a cluster points its hosts/machines
/// at. This is the only slice of the full `HetznerCluster` surface the core
/// reads — region lists, load-balancer spec, and network spec belong to the
/// out-of-scope cloud-VM reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCredentialsRef(pub NamespacedName);

/// A cluster-scoped timestamp after which throttled Robot/HCloud calls may
/// resume. Shared by every reconciler that talks to the vendor APIs; a lost
/// concurrent update is acceptable because rate-limit windows only ever
/// extend, so the later write always wins in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub expires_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    pub fn is_limited(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now < expiry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: ClusterName,
    pub namespace: String,
    pub credentials_ref: ClusterCredentialsRef,
    pub rate_limit: RateLimitState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rate_limit_state_reports_limited_before_expiry() {
        let now = Utc::now();
        let state = RateLimitState { expires_at: Some(now + Duration::seconds(60)) };
        assert!(state.is_limited(now));
        assert!(!state.is_limited(now + Duration::seconds(61)));
    }

    #[test]
    fn unset_rate_limit_never_limited() {
        assert!(!RateLimitState::default().is_limited(Utc::now()));
    }
}
