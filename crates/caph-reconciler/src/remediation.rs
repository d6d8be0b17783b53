use caph_domain::{MachineName, Remediation, RemediationPhase};
use caph_store::{AuditEvent, StateStore};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::ReconcileError;
use crate::report::StepOutcome;

/// A single remediation-controller step. The remediation never touches the
/// host directly — the reboot it requests lands on `HostStatus` via the
/// store, and the host state machine is the only thing that clears it and
/// actually drives the reboot. This keeps "who writes host status" to one
/// answer even though two reconcilers participate in a remediation cycle.
pub async fn reconcile_remediation(
    remediation: &mut Remediation,
    store: &dyn StateStore,
    machine_healthy: bool,
    now: DateTime<Utc>,
) -> Result<StepOutcome, ReconcileError> {
    if remediation.strategy.validate().is_err() {
        if remediation.phase != RemediationPhase::Failed {
            remediation.phase = RemediationPhase::Failed;
            emit_phase_change(store, remediation, now).await?;
        }
        return Ok(StepOutcome::Idle);
    }

    match remediation.phase {
        RemediationPhase::Running => {
            if remediation.retries_exhausted() {
                remediation.phase = RemediationPhase::DeletingMachine;
                emit_phase_change(store, remediation, now).await?;
                return Ok(StepOutcome::requeue_now());
            }

            request_host_reboot(store, remediation, now).await?;
            remediation.phase = RemediationPhase::Waiting;
            emit_phase_change(store, remediation, now).await?;
            Ok(StepOutcome::Requeue(remediation.strategy.timeout))
        }

        RemediationPhase::Waiting => {
            if machine_healthy {
                info!(remediation = %remediation.name, "machine healthy again, remediation resolved");
                return Ok(StepOutcome::Idle);
            }

            remediation.retry_count += 1;
            if remediation.retries_exhausted() {
                remediation.phase = RemediationPhase::DeletingMachine;
            } else {
                remediation.phase = RemediationPhase::Running;
            }
            emit_phase_change(store, remediation, now).await?;
            Ok(StepOutcome::requeue_now())
        }

        RemediationPhase::DeletingMachine => {
            request_machine_deletion(store, &remediation.machine_ref).await?;
            crate::binder::release(store, &remediation.machine_ref, now).await?;
            Ok(StepOutcome::Idle)
        }

        RemediationPhase::Failed => Ok(StepOutcome::Idle),
    }
}

async fn request_host_reboot(
    store: &dyn StateStore,
    remediation: &Remediation,
    now: DateTime<Utc>,
) -> Result<(), ReconcileError> {
    let hosts = store.list_hosts().await?;
    let Some(versioned) = hosts
        .into_iter()
        .find(|v| v.value.consumer_ref.as_ref().is_some_and(|c| c.name == remediation.machine_ref.as_str()))
    else {
        return Ok(());
    };

    let mut host = versioned.value;
    host.status.reboot_requested = true;
    host.status.last_updated = now;

    match store.put_host(&host, Some(versioned.resource_version)).await {
        Ok(_) | Err(caph_store::StoreError::Conflict { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Mark the machine as condemned and remove its record. Retries exhausted
/// means the controller gave up salvaging the underlying host, so the
/// machine object itself — not just the host binding — must go, or it sits
/// in the store forever pointing at nothing.
async fn request_machine_deletion(store: &dyn StateStore, machine_ref: &MachineName) -> Result<(), ReconcileError> {
    let Some(versioned) = store.get_machine(machine_ref).await? else {
        return Ok(());
    };

    let mut machine = versioned.value;
    machine.deletion_requested = true;
    match store.put_machine(&machine, Some(versioned.resource_version)).await {
        Ok(_) | Err(caph_store::StoreError::Conflict { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    match store.delete_machine(machine_ref).await {
        Ok(()) | Err(caph_store::StoreError::MachineNotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn emit_phase_change(
    store: &dyn StateStore,
    remediation: &Remediation,
    now: DateTime<Utc>,
) -> Result<(), ReconcileError> {
    store
        .append_event(&AuditEvent::RemediationPhaseChanged {
            id: Uuid::new_v4(),
            at: now,
            remediation: remediation.name.clone(),
            phase: remediation.phase.to_string(),
        })
        .await?;
    Ok(())
}
