use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::fingerprint::Fingerprint;
use crate::ids::NamespacedName;

/// A claim on a host by a machine. Resolved by name+namespace every
/// reconcile, never held as a pointer.
pub type ConsumerRef = NamespacedName;

// ── Provisioning state ───────────────────────────────────────────────────────

/// The bare-metal host's provisioning state.
///
/// Monotone within a cycle: `Registering → Available → ImageInstalling →
/// Provisioning → EnsureProvisioned → Provisioned`. `Deprovisioning` is
/// reachable from any state on consumer release or maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    #[default]
    None,
    Registering,
    Available,
    ImageInstalling,
    Provisioning,
    EnsureProvisioned,
    Provisioned,
    Deprovisioning,
}

impl ProvisioningState {
    /// `Available` (unclaimed) and `Provisioned` (claimed, live) are the two
    /// terminal states a reconcile may idle in without a pending action.
    pub fn is_stable(&self) -> bool {
        matches!(self, ProvisioningState::Available | ProvisioningState::Provisioned)
    }

    /// The state this one normally advances to on a successful step, if any.
    /// `Deprovisioning`'s forward exit (`Available`) and `Provisioned`'s lack
    /// of one (it only leaves via `Deprovisioning`) are handled by the state
    /// machine directly, not this table.
    pub fn next_on_success(&self) -> Option<ProvisioningState> {
        match self {
            ProvisioningState::None => Some(ProvisioningState::Registering),
            ProvisioningState::Registering => Some(ProvisioningState::Available),
            ProvisioningState::Available => Some(ProvisioningState::ImageInstalling),
            ProvisioningState::ImageInstalling => Some(ProvisioningState::Provisioning),
            ProvisioningState::Provisioning => Some(ProvisioningState::EnsureProvisioned),
            ProvisioningState::EnsureProvisioned => Some(ProvisioningState::Provisioned),
            ProvisioningState::Provisioned => None,
            ProvisioningState::Deprovisioning => Some(ProvisioningState::Available),
        }
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisioningState::None => "none",
            ProvisioningState::Registering => "registering",
            ProvisioningState::Available => "available",
            ProvisioningState::ImageInstalling => "image-installing",
            ProvisioningState::Provisioning => "provisioning",
            ProvisioningState::EnsureProvisioned => "ensure-provisioned",
            ProvisioningState::Provisioned => "provisioned",
            ProvisioningState::Deprovisioning => "deprovisioning",
        };
        write!(f, "{}", s)
    }
}

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Registration,
    Preparation,
    Provisioning,
    SshRebootTooSlow,
    SshRebootNotStarted,
    SoftwareRebootTooSlow,
    SoftwareRebootNotStarted,
    HardwareRebootTooSlow,
    HardwareRebootFailed,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorType::Registration => "registration error",
            ErrorType::Preparation => "preparation error",
            ErrorType::Provisioning => "provisioning error",
            ErrorType::SshRebootTooSlow => "ssh reboot too slow",
            ErrorType::SshRebootNotStarted => "ssh reboot not started",
            ErrorType::SoftwareRebootTooSlow => "software reboot too slow",
            ErrorType::SoftwareRebootNotStarted => "software reboot not started",
            ErrorType::HardwareRebootTooSlow => "hardware reboot too slow",
            ErrorType::HardwareRebootFailed => "hardware reboot failed",
        };
        write!(f, "{}", s)
    }
}

// ── Reboot type ───────────────────────────────────────────────────────────────

/// A mechanism by which a host can be rebooted, ordered cheapest-to-most-
/// invasive. `Ssh` is preferred-when-available; the vendor-discovered
/// mechanisms are `Software`, `Hardware`, `Power`, `Manual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootType {
    Ssh,
    Software,
    Hardware,
    Power,
    Manual,
}

impl RebootType {
    const LADDER: [RebootType; 5] = [
        RebootType::Ssh,
        RebootType::Software,
        RebootType::Hardware,
        RebootType::Power,
        RebootType::Manual,
    ];

    /// The next, more invasive mechanism in the escalation ladder, or `None`
    /// if `self` is already `Manual`.
    pub fn escalate(&self) -> Option<RebootType> {
        let idx = Self::LADDER.iter().position(|m| m == self)?;
        Self::LADDER.get(idx + 1).copied()
    }

    /// How long the reboot engine waits for the post-reboot signal before
    /// declaring this mechanism too slow and escalating.
    pub fn timeout_budget(&self) -> Duration {
        match self {
            RebootType::Ssh => Duration::from_secs(90),
            RebootType::Software => Duration::from_secs(3 * 60),
            RebootType::Hardware => Duration::from_secs(5 * 60),
            RebootType::Power => Duration::from_secs(8 * 60),
            RebootType::Manual => Duration::from_secs(30 * 60),
        }
    }

    /// The `*-too-slow` / `*-not-started` error this mechanism records when
    /// it exceeds its timeout budget. `Power` and `Manual` have no dedicated
    /// `ErrorType` variant — their failure is surfaced only via escalation
    /// to the next mechanism (or, for `Manual`, a fatal host condition
    /// requiring human intervention).
    pub fn too_slow_error(&self) -> Option<ErrorType> {
        match self {
            RebootType::Ssh => Some(ErrorType::SshRebootTooSlow),
            RebootType::Software => Some(ErrorType::SoftwareRebootTooSlow),
            RebootType::Hardware => Some(ErrorType::HardwareRebootTooSlow),
            RebootType::Power | RebootType::Manual => None,
        }
    }
}

impl std::fmt::Display for RebootType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RebootType::Ssh => "ssh",
            RebootType::Software => "software",
            RebootType::Hardware => "hardware",
            RebootType::Power => "power",
            RebootType::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

// ── Root device hints ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RootDeviceHints {
    pub wwn: Option<String>,
    #[serde(default)]
    pub raid: Vec<String>,
}

impl RootDeviceHints {
    /// `wwn != "" xor len(raid) > 0` — exactly one form may be set.
    pub fn is_valid(&self) -> bool {
        let has_wwn = self.wwn.as_deref().is_some_and(|w| !w.is_empty());
        let has_raid = !self.raid.is_empty();
        has_wwn ^ has_raid
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DomainError::InvalidRootDeviceHints(format!("{:?}", self)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub wwn: String,
    pub size_bytes: u64,
}

// ── SSH status ────────────────────────────────────────────────────────────────

/// A digest of a secret's contents plus the namespaced reference it was read
/// from. The sole mechanism by which key rotation is detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretStatus {
    pub secret_ref: NamespacedName,
    pub data_hash: String,
}

impl SecretStatus {
    /// `status.Match(secret)` — true iff name, namespace, and digest all
    /// match the currently-referenced secret.
    pub fn matches(&self, secret_ref: &NamespacedName, data_hash: &str) -> bool {
        &self.secret_ref == secret_ref && self.data_hash == data_hash
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshStatus {
    pub current_rescue: Option<SecretStatus>,
    pub current_os: Option<SecretStatus>,
    pub rescue_key: Option<Fingerprint>,
    pub os_key: Option<Fingerprint>,
}

// ── Install image / SSH spec ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallImage {
    pub name: String,
    pub url: String,
    /// Partition label under which post-install cloud-init user-data is
    /// delivered.
    pub post_install_user_data_partition_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshSpec {
    pub secret_ref: NamespacedName,
    /// Valid after image installation but before cloud-init runs.
    pub port_after_install_image: u16,
    /// Valid after cloud-init completes; often re-hardened from the default.
    pub port_after_cloud_init: u16,
}

// ── Host ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    pub provisioning_state: ProvisioningState,
    pub error_type: Option<ErrorType>,
    pub error_count: u32,
    pub error_message: Option<String>,
    /// Frozen by a human after manual inspection; the state machine performs
    /// no work while set, regardless of `error_count`.
    pub permanent_error: bool,
    /// Reboot mechanisms discovered from the vendor for this server.
    pub reboot_types: Vec<RebootType>,
    pub ssh_status: SshStatus,
    pub install_image: Option<InstallImage>,
    pub ssh_spec: Option<SshSpec>,
    /// Copied from the binding machine's `user_data_secret_ref` at bind time;
    /// cleared on release. The `provisioning` state delivers the bytes this
    /// resolves to over SSH.
    pub user_data_secret_ref: Option<NamespacedName>,
    pub hardware_inventory: Vec<Disk>,
    pub last_updated: DateTime<Utc>,
    pub ip_address: Option<String>,
    /// Set when a reboot has been requested, cleared when the post-reboot
    /// signal is observed. Persists across reconciles so a level-triggered
    /// loop can operate step-by-step.
    pub rebooted: bool,
    /// The mechanism currently in flight, if `rebooted` is true.
    pub reboot_in_progress: Option<RebootType>,
    /// Set by the remediation controller; consumed and cleared by the host
    /// state machine on its next reconcile, which then starts a reboot.
    pub reboot_requested: bool,
    /// When the in-flight mechanism was issued. Distinct from `last_updated`
    /// (which moves on every persisted write): the reboot engine's timeout
    /// budget is measured from here, not from the most recent reconcile.
    pub reboot_started_at: Option<DateTime<Utc>>,
    /// When this host last completed `image-installing`. Used by the binder
    /// to prefer least-recently-provisioned hosts when several match.
    pub last_provisioned_at: Option<DateTime<Utc>>,
    /// Set as `ensure-provisioned`'s terminal action, once cloud-init is
    /// confirmed over SSH. The manager layer copies this onto the bound
    /// machine's `providerID` — it is never set any earlier, so a non-null
    /// `providerID` on a machine is trustworthy evidence its infrastructure
    /// is actually ready.
    #[serde(default)]
    pub provider_id: Option<String>,
}

impl Default for HostStatus {
    fn default() -> Self {
        Self {
            provisioning_state: ProvisioningState::None,
            error_type: None,
            error_count: 0,
            error_message: None,
            permanent_error: false,
            reboot_types: Vec::new(),
            ssh_status: SshStatus::default(),
            install_image: None,
            ssh_spec: None,
            user_data_secret_ref: None,
            hardware_inventory: Vec::new(),
            last_updated: DateTime::<Utc>::MIN_UTC,
            ip_address: None,
            rebooted: false,
            reboot_in_progress: None,
            reboot_requested: false,
            reboot_started_at: None,
            last_provisioned_at: None,
            provider_id: None,
        }
    }
}

impl HostStatus {
    /// A reconcile that fails with the same error kind as last time bumps
    /// the counter; a different kind resets it to 1 and rewrites the type.
    pub fn record_error(&mut self, now: DateTime<Utc>, kind: ErrorType, message: String) {
        if self.error_type == Some(kind) {
            self.error_count += 1;
        } else {
            self.error_type = Some(kind);
            self.error_count = 1;
        }
        self.error_message = Some(message);
        self.last_updated = now;
    }

    /// A successful transition clears both `error_type` and `error_count`.
    pub fn clear_error(&mut self, now: DateTime<Utc>) {
        self.error_type = None;
        self.error_count = 0;
        self.error_message = None;
        self.last_updated = now;
    }

    /// Mark a reboot as requested. Invariant: no new reboot may be issued
    /// while one is already in flight — callers must check `rebooted` first.
    pub fn start_reboot(&mut self, kind: RebootType, now: DateTime<Utc>) {
        self.rebooted = true;
        self.reboot_in_progress = Some(kind);
        self.reboot_started_at = Some(now);
        self.last_updated = now;
    }

    /// The in-flight mechanism's post-reboot signal was observed.
    pub fn clear_reboot(&mut self, now: DateTime<Utc>) {
        self.rebooted = false;
        self.reboot_in_progress = None;
        self.reboot_started_at = None;
        self.last_updated = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: crate::ids::HostName,
    pub server_id: u64,
    pub description: Option<String>,
    pub cluster_ref: NamespacedName,
    /// The rescue-system SSH key secret, set once by the operator who
    /// leases the host — unlike the OS key (carried on `SshSpec`, which
    /// arrives from whichever machine is currently bound), the rescue key
    /// is a property of the physical host itself and outlives any single
    /// binding.
    pub rescue_secret_ref: NamespacedName,
    pub root_device_hints: RootDeviceHints,
    pub consumer_ref: Option<ConsumerRef>,
    pub maintenance: bool,
    /// Operator opt-in: wipe disk headers during `deprovisioning` before the
    /// host returns to `available`. Off by default since it destroys data
    /// the next consumer might have wanted recovered.
    #[serde(default)]
    pub wipe_disk_on_release: bool,
    pub labels: HashMap<String, String>,
    pub status: HostStatus,
}

impl Host {
    /// Every legal `provisioned` host must carry a consumer and an install
    /// image — a bound invariant the reconciler asserts, not just hopes for.
    pub fn invariant_provisioned_has_consumer_and_image(&self) -> bool {
        if self.status.provisioning_state != ProvisioningState::Provisioned {
            return true;
        }
        self.consumer_ref.is_some() && self.status.install_image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_device_hints_rejects_both_set() {
        let hints = RootDeviceHints { wwn: Some("0x1".into()), raid: vec!["0x2".into()] };
        assert!(!hints.is_valid());
        assert!(hints.validate().is_err());
    }

    #[test]
    fn root_device_hints_rejects_neither_set() {
        let hints = RootDeviceHints::default();
        assert!(!hints.is_valid());
    }

    #[test]
    fn root_device_hints_accepts_bare_wwn() {
        let hints = RootDeviceHints { wwn: Some("0x5000c500".into()), raid: vec![] };
        assert!(hints.is_valid());
    }

    #[test]
    fn root_device_hints_accepts_raid_tuple() {
        let hints = RootDeviceHints { wwn: None, raid: vec!["0x1".into(), "0x2".into()] };
        assert!(hints.is_valid());
    }

    #[test]
    fn reboot_ladder_escalates_in_order() {
        assert_eq!(RebootType::Ssh.escalate(), Some(RebootType::Software));
        assert_eq!(RebootType::Software.escalate(), Some(RebootType::Hardware));
        assert_eq!(RebootType::Hardware.escalate(), Some(RebootType::Power));
        assert_eq!(RebootType::Power.escalate(), Some(RebootType::Manual));
        assert_eq!(RebootType::Manual.escalate(), None);
    }

    #[test]
    fn error_tracking_resets_on_different_kind() {
        let mut status = HostStatus::default();
        let now = Utc::now();
        status.record_error(now, ErrorType::Registration, "boom".into());
        status.record_error(now, ErrorType::Registration, "boom again".into());
        assert_eq!(status.error_count, 2);

        status.record_error(now, ErrorType::Preparation, "different".into());
        assert_eq!(status.error_count, 1);
        assert_eq!(status.error_type, Some(ErrorType::Preparation));
    }

    #[test]
    fn clear_error_resets_count_to_zero() {
        let mut status = HostStatus::default();
        let now = Utc::now();
        status.record_error(now, ErrorType::Provisioning, "x".into());
        status.clear_error(now);
        assert_eq!(status.error_count, 0);
        assert!(status.error_type.is_none());
    }

    #[test]
    fn provisioned_without_consumer_violates_invariant() {
        let host = Host {
            name: crate::ids::HostName::new("h1"),
            server_id: 1,
            description: None,
            cluster_ref: NamespacedName::new("ns", "c1"),
            rescue_secret_ref: NamespacedName::new("ns", "rescue-key"),
            root_device_hints: RootDeviceHints { wwn: Some("0x1".into()), raid: vec![] },
            consumer_ref: None,
            maintenance: false,
            wipe_disk_on_release: false,
            labels: HashMap::new(),
            status: HostStatus { provisioning_state: ProvisioningState::Provisioned, ..HostStatus::default() },
        };
        assert!(!host.invariant_provisioned_has_consumer_and_image());
    }
}
