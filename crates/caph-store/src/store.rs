use async_trait::async_trait;
use caph_domain::{Cluster, ClusterName, Host, HostName, Machine, MachineName, Remediation, RemediationName};

use crate::error::StoreError;
use crate::state::{AuditEvent, Versioned};

/// Persistence surface for host/machine/remediation/cluster state and the
/// audit trail. Every reconcile is the sole writer of the record it holds;
/// `put_*` takes an `expected_version` so a writer racing another loses
/// cleanly instead of silently clobbering.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get_host(&self, name: &HostName) -> Result<Option<Versioned<Host>>, StoreError>;
    async fn list_hosts(&self) -> Result<Vec<Versioned<Host>>, StoreError>;
    /// Write `host`. `expected_version` must match the stored
    /// `resource_version`, or `None` to create a brand new record. Returns
    /// the new version on success.
    async fn put_host(&self, host: &Host, expected_version: Option<u64>) -> Result<u64, StoreError>;
    async fn delete_host(&self, name: &HostName) -> Result<(), StoreError>;

    async fn get_machine(&self, name: &MachineName) -> Result<Option<Versioned<Machine>>, StoreError>;
    async fn list_machines(&self) -> Result<Vec<Versioned<Machine>>, StoreError>;
    async fn put_machine(&self, machine: &Machine, expected_version: Option<u64>) -> Result<u64, StoreError>;
    async fn delete_machine(&self, name: &MachineName) -> Result<(), StoreError>;

    async fn get_remediation(&self, name: &RemediationName) -> Result<Option<Versioned<Remediation>>, StoreError>;
    async fn list_remediations(&self) -> Result<Vec<Versioned<Remediation>>, StoreError>;
    async fn put_remediation(
        &self,
        remediation: &Remediation,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;
    async fn delete_remediation(&self, name: &RemediationName) -> Result<(), StoreError>;

    async fn get_cluster(&self, name: &ClusterName) -> Result<Option<Versioned<Cluster>>, StoreError>;
    async fn list_clusters(&self) -> Result<Vec<Versioned<Cluster>>, StoreError>;
    async fn put_cluster(&self, cluster: &Cluster, expected_version: Option<u64>) -> Result<u64, StoreError>;

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError>;
    async fn list_events(&self, host: Option<&HostName>, limit: u32) -> Result<Vec<AuditEvent>, StoreError>;
}
