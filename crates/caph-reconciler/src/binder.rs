use caph_domain::{ConsumerRef, Host, Machine, MachineName};
use caph_store::{AuditEvent, StateStore};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ReconcileError;

/// Claim a host for `machine` via compare-and-swap, retrying against a fresh
/// host list on a version conflict. A conflict means another worker won the
/// race for the same host — re-picking rather than failing outright lets a
/// machine bind to the next-best candidate instead of erroring for an
/// instant that a list refresh would have resolved.
pub async fn bind(
    store: &dyn StateStore,
    machine: &Machine,
    now: DateTime<Utc>,
) -> Result<Host, ReconcileError> {
    const MAX_ATTEMPTS: u32 = 5;

    for _ in 0..MAX_ATTEMPTS {
        let hosts: Vec<Host> = store.list_hosts().await?.into_iter().map(|v| v.value).collect();
        let Some(candidate) = caph_select::pick_host(&hosts, machine) else {
            return Err(ReconcileError::NoAvailableHost);
        };

        let versioned = store
            .get_host(&candidate.name)
            .await?
            .ok_or_else(|| caph_store::StoreError::HostNotFound(candidate.name.as_str().to_string()))?;

        let mut bound = versioned.value;
        bound.consumer_ref = Some(ConsumerRef::new(machine.cluster_ref.namespace.clone(), machine.name.as_str()));
        bound.status.user_data_secret_ref = Some(machine.user_data_secret_ref.clone());
        bound.status.ssh_spec = Some(machine.ssh_spec.clone());
        bound.status.install_image = Some(machine.install_image.clone());
        bound.status.last_updated = now;

        match store.put_host(&bound, Some(versioned.resource_version)).await {
            Ok(_) => {
                store
                    .append_event(&AuditEvent::MachineBound {
                        id: Uuid::new_v4(),
                        at: now,
                        machine: machine.name.clone(),
                        host: bound.name.clone(),
                    })
                    .await?;
                return Ok(bound);
            }
            Err(caph_store::StoreError::Conflict { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(ReconcileError::NoAvailableHost)
}

/// Release the host bound to `machine_name`, if any. A no-op if the machine
/// holds no binding — callers invoke this unconditionally on machine
/// deletion, so idempotency here keeps the caller simple.
pub async fn release(
    store: &dyn StateStore,
    machine_name: &MachineName,
    now: DateTime<Utc>,
) -> Result<(), ReconcileError> {
    let hosts = store.list_hosts().await?;
    let Some(versioned) = hosts
        .into_iter()
        .find(|v| v.value.consumer_ref.as_ref().is_some_and(|c| c.name == machine_name.as_str()))
    else {
        return Ok(());
    };

    let mut host = versioned.value;
    host.consumer_ref = None;
    host.status.user_data_secret_ref = None;
    host.status.last_updated = now;

    match store.put_host(&host, Some(versioned.resource_version)).await {
        Ok(_) | Err(caph_store::StoreError::Conflict { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    store
        .append_event(&AuditEvent::MachineReleased {
            id: Uuid::new_v4(),
            at: now,
            machine: machine_name.clone(),
            host: host.name.clone(),
        })
        .await?;
    Ok(())
}
