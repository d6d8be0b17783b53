use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use caph_domain::{Cluster, ClusterName, Host, HostName, Machine, MachineName, Remediation, RemediationName};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::state::{AuditEvent, Versioned};
use crate::store::StateStore;

const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");
const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");
const REMEDIATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("remediations");
const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");
const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

fn internal<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// Persistent [`StateStore`] backed by a single redb file. Every entity
/// kind gets its own table, keyed by name; values are the JSON-serialized
/// [`Versioned`] envelope so the stored `resource_version` is always next
/// to the data it guards.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;
        {
            let wtxn = db.begin_write().map_err(internal)?;
            wtxn.open_table(HOSTS).map_err(internal)?;
            wtxn.open_table(MACHINES).map_err(internal)?;
            wtxn.open_table(REMEDIATIONS).map_err(internal)?;
            wtxn.open_table(CLUSTERS).map_err(internal)?;
            wtxn.open_table(EVENTS).map_err(internal)?;
            wtxn.open_table(META).map_err(internal)?;
            wtxn.commit().map_err(internal)?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    fn get_versioned<V: serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<Versioned<V>>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let t = rtxn.open_table(table).map_err(internal)?;
        match t.get(key).map_err(internal)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_versioned<V: serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> Result<Vec<Versioned<V>>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let t = rtxn.open_table(table).map_err(internal)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    fn cas_put<V: Clone + serde::Serialize + serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: V,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let new_version;
        {
            let mut t = wtxn.open_table(table).map_err(internal)?;
            let existing: Option<Versioned<V>> = match t.get(key).map_err(internal)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };
            new_version = match (&existing, expected_version) {
                (Some(e), Some(expected)) if e.resource_version != expected => {
                    return Err(StoreError::Conflict { expected, actual: e.resource_version });
                }
                (Some(e), _) => e.resource_version + 1,
                (None, Some(expected)) => return Err(StoreError::Conflict { expected, actual: 0 }),
                (None, None) => 1,
            };
            let bytes = serde_json::to_vec(&Versioned { resource_version: new_version, value })?;
            t.insert(key, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(new_version)
    }

    fn delete(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut t = wtxn.open_table(table).map_err(internal)?;
            t.remove(key).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for RedbStore {
    async fn get_host(&self, name: &HostName) -> Result<Option<Versioned<Host>>, StoreError> {
        self.get_versioned(HOSTS, name.as_str())
    }

    async fn list_hosts(&self) -> Result<Vec<Versioned<Host>>, StoreError> {
        self.list_versioned(HOSTS)
    }

    async fn put_host(&self, host: &Host, expected_version: Option<u64>) -> Result<u64, StoreError> {
        self.cas_put(HOSTS, host.name.as_str(), host.clone(), expected_version)
    }

    async fn delete_host(&self, name: &HostName) -> Result<(), StoreError> {
        self.delete(HOSTS, name.as_str())
    }

    async fn get_machine(&self, name: &MachineName) -> Result<Option<Versioned<Machine>>, StoreError> {
        self.get_versioned(MACHINES, name.as_str())
    }

    async fn list_machines(&self) -> Result<Vec<Versioned<Machine>>, StoreError> {
        self.list_versioned(MACHINES)
    }

    async fn put_machine(&self, machine: &Machine, expected_version: Option<u64>) -> Result<u64, StoreError> {
        self.cas_put(MACHINES, machine.name.as_str(), machine.clone(), expected_version)
    }

    async fn delete_machine(&self, name: &MachineName) -> Result<(), StoreError> {
        self.delete(MACHINES, name.as_str())
    }

    async fn get_remediation(&self, name: &RemediationName) -> Result<Option<Versioned<Remediation>>, StoreError> {
        self.get_versioned(REMEDIATIONS, name.as_str())
    }

    async fn list_remediations(&self) -> Result<Vec<Versioned<Remediation>>, StoreError> {
        self.list_versioned(REMEDIATIONS)
    }

    async fn put_remediation(
        &self,
        remediation: &Remediation,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.cas_put(REMEDIATIONS, remediation.name.as_str(), remediation.clone(), expected_version)
    }

    async fn delete_remediation(&self, name: &RemediationName) -> Result<(), StoreError> {
        self.delete(REMEDIATIONS, name.as_str())
    }

    async fn get_cluster(&self, name: &ClusterName) -> Result<Option<Versioned<Cluster>>, StoreError> {
        self.get_versioned(CLUSTERS, name.as_str())
    }

    async fn list_clusters(&self) -> Result<Vec<Versioned<Cluster>>, StoreError> {
        self.list_versioned(CLUSTERS)
    }

    async fn put_cluster(&self, cluster: &Cluster, expected_version: Option<u64>) -> Result<u64, StoreError> {
        self.cas_put(CLUSTERS, cluster.name.as_str(), cluster.clone(), expected_version)
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(event)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut meta = wtxn.open_table(META).map_err(internal)?;
            let seq = meta.get("event_seq").map_err(internal)?.map(|g| g.value()).unwrap_or(0);
            let new_seq = seq + 1;
            meta.insert("event_seq", new_seq).map_err(internal)?;

            let mut events = wtxn.open_table(EVENTS).map_err(internal)?;
            events.insert(new_seq, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_events(&self, host: Option<&HostName>, limit: u32) -> Result<Vec<AuditEvent>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(EVENTS).map_err(internal)?;
        let mut all = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let event: AuditEvent = serde_json::from_slice(v.value())?;
            if host.map_or(true, |h| event.host() == Some(h)) {
                all.push(event);
            }
        }
        let start = all.len().saturating_sub(limit as usize);
        Ok(all[start..].to_vec())
    }
}
