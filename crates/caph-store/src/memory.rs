use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use caph_domain::{Cluster, ClusterName, Host, HostName, Machine, MachineName, Remediation, RemediationName};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::state::{AuditEvent, Versioned};
use crate::store::StateStore;

fn cas_put<K: Eq + Hash + Clone, V: Clone>(
    map: &mut HashMap<K, Versioned<V>>,
    key: K,
    value: V,
    expected_version: Option<u64>,
) -> Result<u64, StoreError> {
    let new_version = match (map.get(&key), expected_version) {
        (Some(existing), Some(expected)) if existing.resource_version != expected => {
            return Err(StoreError::Conflict { expected, actual: existing.resource_version });
        }
        (Some(existing), _) => existing.resource_version + 1,
        (None, Some(expected)) => {
            return Err(StoreError::Conflict { expected, actual: 0 });
        }
        (None, None) => 1,
    };
    map.insert(key, Versioned { resource_version: new_version, value });
    Ok(new_version)
}

#[derive(Debug, Default)]
struct Inner {
    hosts: HashMap<HostName, Versioned<Host>>,
    machines: HashMap<MachineName, Versioned<Machine>>,
    remediations: HashMap<RemediationName, Versioned<Remediation>>,
    clusters: HashMap<ClusterName, Versioned<Cluster>>,
    events: Vec<AuditEvent>,
}

/// In-memory [`StateStore`]. All data is lost on process exit; used for
/// tests and as the default store when no persistence path is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get_host(&self, name: &HostName) -> Result<Option<Versioned<Host>>, StoreError> {
        Ok(self.inner.read().await.hosts.get(name).cloned())
    }

    async fn list_hosts(&self) -> Result<Vec<Versioned<Host>>, StoreError> {
        Ok(self.inner.read().await.hosts.values().cloned().collect())
    }

    async fn put_host(&self, host: &Host, expected_version: Option<u64>) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        cas_put(&mut guard.hosts, host.name.clone(), host.clone(), expected_version)
    }

    async fn delete_host(&self, name: &HostName) -> Result<(), StoreError> {
        self.inner.write().await.hosts.remove(name);
        Ok(())
    }

    async fn get_machine(&self, name: &MachineName) -> Result<Option<Versioned<Machine>>, StoreError> {
        Ok(self.inner.read().await.machines.get(name).cloned())
    }

    async fn list_machines(&self) -> Result<Vec<Versioned<Machine>>, StoreError> {
        Ok(self.inner.read().await.machines.values().cloned().collect())
    }

    async fn put_machine(&self, machine: &Machine, expected_version: Option<u64>) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        cas_put(&mut guard.machines, machine.name.clone(), machine.clone(), expected_version)
    }

    async fn delete_machine(&self, name: &MachineName) -> Result<(), StoreError> {
        self.inner.write().await.machines.remove(name);
        Ok(())
    }

    async fn get_remediation(&self, name: &RemediationName) -> Result<Option<Versioned<Remediation>>, StoreError> {
        Ok(self.inner.read().await.remediations.get(name).cloned())
    }

    async fn list_remediations(&self) -> Result<Vec<Versioned<Remediation>>, StoreError> {
        Ok(self.inner.read().await.remediations.values().cloned().collect())
    }

    async fn put_remediation(
        &self,
        remediation: &Remediation,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        cas_put(&mut guard.remediations, remediation.name.clone(), remediation.clone(), expected_version)
    }

    async fn delete_remediation(&self, name: &RemediationName) -> Result<(), StoreError> {
        self.inner.write().await.remediations.remove(name);
        Ok(())
    }

    async fn get_cluster(&self, name: &ClusterName) -> Result<Option<Versioned<Cluster>>, StoreError> {
        Ok(self.inner.read().await.clusters.get(name).cloned())
    }

    async fn list_clusters(&self) -> Result<Vec<Versioned<Cluster>>, StoreError> {
        Ok(self.inner.read().await.clusters.values().cloned().collect())
    }

    async fn put_cluster(&self, cluster: &Cluster, expected_version: Option<u64>) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        cas_put(&mut guard.clusters, cluster.name.clone(), cluster.clone(), expected_version)
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.inner.write().await.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, host: Option<&HostName>, limit: u32) -> Result<Vec<AuditEvent>, StoreError> {
        let guard = self.inner.read().await;
        let filtered: Vec<AuditEvent> = guard
            .events
            .iter()
            .filter(|ev| host.map_or(true, |h| ev.host() == Some(h)))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit as usize);
        Ok(filtered[start..].to_vec())
    }
}
