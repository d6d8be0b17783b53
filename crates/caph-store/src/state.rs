use caph_domain::{ErrorType, HostName, MachineName, ProvisioningState, RebootType, RemediationName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored value plus the version the compare-and-swap binder races on.
/// `resource_version` starts at 1 on first write and increments on every
/// successful put; it never resets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub resource_version: u64,
    pub value: T,
}

/// A record of a state transition or notable action, kept for operator
/// visibility. Unlike host/machine/remediation state this is append-only
/// and never compacted by the store itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AuditEvent {
    HostStateChanged {
        id: Uuid,
        at: DateTime<Utc>,
        host: HostName,
        from: ProvisioningState,
        to: ProvisioningState,
    },
    HostErrorRecorded {
        id: Uuid,
        at: DateTime<Utc>,
        host: HostName,
        error_type: ErrorType,
        error_count: u32,
    },
    RebootRequested {
        id: Uuid,
        at: DateTime<Utc>,
        host: HostName,
        reboot_type: RebootType,
    },
    RebootCompleted {
        id: Uuid,
        at: DateTime<Utc>,
        host: HostName,
        reboot_type: RebootType,
    },
    MachineBound {
        id: Uuid,
        at: DateTime<Utc>,
        machine: MachineName,
        host: HostName,
    },
    MachineReleased {
        id: Uuid,
        at: DateTime<Utc>,
        machine: MachineName,
        host: HostName,
    },
    RemediationPhaseChanged {
        id: Uuid,
        at: DateTime<Utc>,
        remediation: RemediationName,
        phase: String,
    },
}

impl AuditEvent {
    /// The host this event concerns, if any — used to filter `list_events`.
    pub fn host(&self) -> Option<&HostName> {
        match self {
            AuditEvent::HostStateChanged { host, .. } => Some(host),
            AuditEvent::HostErrorRecorded { host, .. } => Some(host),
            AuditEvent::RebootRequested { host, .. } => Some(host),
            AuditEvent::RebootCompleted { host, .. } => Some(host),
            AuditEvent::MachineBound { host, .. } => Some(host),
            AuditEvent::MachineReleased { host, .. } => Some(host),
            AuditEvent::RemediationPhaseChanged { .. } => None,
        }
    }
}
