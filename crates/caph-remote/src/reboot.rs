use std::time::Duration;

use caph_domain::{ErrorType, HostStatus, RebootType};
use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tracing::debug;

/// What the reconciler should do next for a host mid-reboot. Pure decision
/// logic over `HostStatus` — issuing the reboot itself (an SSH exec or a
/// Robot API call) and checking reachability are the caller's job.
#[derive(Debug, Clone, PartialEq)]
pub enum RebootDecision {
    /// No reboot in flight; start one at `RebootType::Ssh` if the host
    /// advertises it, else the cheapest vendor-reported mechanism.
    Start(RebootType),
    /// A reboot is in flight and still within its timeout budget; poll again
    /// next reconcile.
    KeepWaiting,
    /// The post-reboot signal was observed; clear `rebooted` and proceed.
    Completed,
    /// The in-flight mechanism exceeded its timeout budget; record the
    /// matching error and move to the next rung of the ladder.
    Escalate { from: RebootType, to: RebootType, error: ErrorType },
    /// `Manual` itself timed out — there is nowhere left to escalate to.
    /// The host needs a human.
    ExhaustedLadder,
}

/// Pick the cheapest available mechanism to start with: `Ssh` if advertised,
/// else the first of the vendor-reported `reboot_types` in ladder order.
fn cheapest_available(status: &HostStatus) -> Option<RebootType> {
    const LADDER: [RebootType; 5] =
        [RebootType::Ssh, RebootType::Software, RebootType::Hardware, RebootType::Power, RebootType::Manual];
    LADDER.into_iter().find(|m| status.reboot_types.contains(m))
}

/// Decide the next reboot action given the host's persisted status and the
/// current time. `reboot_started_at` is the `last_updated` timestamp from
/// the reconcile that set `reboot_in_progress` — callers track this
/// alongside status since `HostStatus` itself only records `last_updated`
/// for the most recent write.
pub fn decide(now: DateTime<Utc>, reboot_started_at: DateTime<Utc>, status: &HostStatus) -> RebootDecision {
    let Some(current) = status.reboot_in_progress else {
        return match cheapest_available(status) {
            Some(m) => RebootDecision::Start(m),
            None => RebootDecision::ExhaustedLadder,
        };
    };

    if !status.rebooted {
        return RebootDecision::Completed;
    }

    let elapsed = now.signed_duration_since(reboot_started_at);
    let budget = chrono::Duration::from_std(current.timeout_budget()).unwrap_or(chrono::Duration::zero());
    if elapsed < budget {
        return RebootDecision::KeepWaiting;
    }

    match current.escalate() {
        Some(next) => {
            let error = current.too_slow_error().unwrap_or(ErrorType::Provisioning);
            RebootDecision::Escalate { from: current, to: next, error }
        }
        None => RebootDecision::ExhaustedLadder,
    }
}

/// TCP-connect reachability check used to detect the post-reboot signal —
/// a successful connect on the expected port means the host came back far
/// enough to accept SSH. Mirrors a plain TCP-dial liveness probe; no SSH
/// handshake is attempted here since the caller may not yet have working
/// host keys (e.g. during rescue-image boot).
pub async fn is_reachable(ip: &str, port: u16, connect_timeout: Duration) -> bool {
    let addr = format!("{ip}:{port}");
    match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(addr, error = %e, "reboot: host not yet reachable");
            false
        }
        Err(_) => {
            debug!(addr, "reboot: reachability probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_with(reboot_types: Vec<RebootType>, in_progress: Option<RebootType>, rebooted: bool) -> HostStatus {
        HostStatus { reboot_types, reboot_in_progress: in_progress, rebooted, ..HostStatus::default() }
    }

    #[test]
    fn no_reboot_in_flight_starts_cheapest_available() {
        let status = status_with(vec![RebootType::Hardware, RebootType::Power], None, false);
        assert_eq!(decide(Utc::now(), Utc::now(), &status), RebootDecision::Start(RebootType::Hardware));
    }

    #[test]
    fn prefers_ssh_when_advertised() {
        let status = status_with(vec![RebootType::Ssh, RebootType::Hardware], None, false);
        assert_eq!(decide(Utc::now(), Utc::now(), &status), RebootDecision::Start(RebootType::Ssh));
    }

    #[test]
    fn no_mechanisms_available_is_exhausted() {
        let status = status_with(vec![], None, false);
        assert_eq!(decide(Utc::now(), Utc::now(), &status), RebootDecision::ExhaustedLadder);
    }

    #[test]
    fn within_budget_keeps_waiting() {
        let status = status_with(vec![], Some(RebootType::Ssh), true);
        let now = Utc::now();
        assert_eq!(decide(now, now, &status), RebootDecision::KeepWaiting);
    }

    #[test]
    fn past_budget_escalates_with_matching_error() {
        let status = status_with(vec![], Some(RebootType::Ssh), true);
        let started = Utc::now() - chrono::Duration::seconds(91);
        let decision = decide(Utc::now(), started, &status);
        assert_eq!(
            decision,
            RebootDecision::Escalate {
                from: RebootType::Ssh,
                to: RebootType::Software,
                error: ErrorType::SshRebootTooSlow,
            }
        );
    }

    #[test]
    fn manual_timeout_has_nowhere_to_escalate() {
        let status = status_with(vec![], Some(RebootType::Manual), true);
        let started = Utc::now() - chrono::Duration::minutes(31);
        assert_eq!(decide(Utc::now(), started, &status), RebootDecision::ExhaustedLadder);
    }

    #[test]
    fn rebooted_cleared_means_completed() {
        let status = status_with(vec![], Some(RebootType::Ssh), false);
        assert_eq!(decide(Utc::now(), Utc::now(), &status), RebootDecision::Completed);
    }
}
