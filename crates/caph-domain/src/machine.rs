use serde::{Deserialize, Serialize};

use crate::host::{InstallImage, SshSpec};
use crate::ids::{MachineName, NamespacedName};
use crate::selector::HostSelector;

/// The tenant-facing object. Carries everything the binder copies onto a
/// bound host's status and the host state machine needs to drive
/// provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub name: MachineName,
    pub cluster_ref: NamespacedName,
    /// Copied from the bound host's own `providerID` once `ensure-provisioned`
    /// confirms cloud-init completed — not at bind time. A non-null value
    /// here is a caller-trustworthy signal that infrastructure is ready.
    pub provider_id: Option<String>,
    pub install_image: InstallImage,
    pub ssh_spec: SshSpec,
    pub selector: HostSelector,
    /// Reference to the secret holding the cloud-init-compatible user-data a
    /// bootstrap collaborator produced. The core only delivers these bytes
    /// over SSH in the `provisioning` state; it never generates them.
    pub user_data_secret_ref: NamespacedName,
    /// Set when the machine object is marked for deletion; triggers host
    /// release on the next binder pass.
    pub deletion_requested: bool,
}

impl Machine {
    pub fn provider_id_for_server(server_id: u64) -> String {
        format!("hcloud-bm://{}", server_id)
    }
}
