//! Glue between `caph-scheduler`'s opaque work queues and the reconcile
//! functions in `caph-reconciler`: resolving a dequeued name to a stored
//! object, assembling the per-call context (credentials, SSH secrets,
//! autosetup/user-data payloads), running one reconcile step, and writing
//! the result back under the object's compare-and-swap version.

use std::sync::Arc;
use std::time::Duration;

use caph_config::{Flags, SecretResolver};
use caph_domain::{
    ClusterName, Host, HostName, InstallImage, MachineName, RemediationName,
};
use caph_reconciler::{HostStepCtx, HostTransport, LivenessTracker, ResolvedSshSecret};
use caph_remote::RobotCredentials;
use caph_scheduler::WorkOutcome;
use caph_store::StateStore;
use chrono::Utc;
use tracing::{debug, error, info, warn};

/// Everything a dequeued key needs resolved fresh: storage, secret
/// resolution, the transport to the vendor, and the process-memory
/// liveness window. Cheap to clone — every field is an `Arc`.
#[derive(Clone)]
pub struct ManagerContext {
    pub store: Arc<dyn StateStore>,
    pub secrets: Arc<SecretResolver>,
    pub transport: Arc<dyn HostTransport>,
    pub liveness: Arc<LivenessTracker>,
    pub flags: Arc<Flags>,
}

const CLOUD_INIT_SENTINEL_PATH: &str = "/var/lib/cloud/instance/boot-finished";
const USER_DATA_KEY: &str = "userData";
const OS_SSH_USER: &str = "root";

/// Render the Hetzner `installimage` autosetup file for one install-image
/// spec. Minimal by design — the core's job is to deliver this file and
/// run `installimage` against it, not to template a full partition layout
/// (a real autosetup file is operator/image-specific and out of scope for
/// this reconciler, see spec.md §1 "does not provision Kubernetes itself").
fn render_autosetup(image: &InstallImage) -> Vec<u8> {
    format!(
        "IMAGE {}\nHOSTNAME caph-host\n# source: {}\n",
        image.name, image.url
    )
    .into_bytes()
}

async fn resolve_ssh_secret(
    secrets: &SecretResolver,
    secret_ref: &caph_domain::NamespacedName,
) -> Option<ResolvedSshSecret> {
    match secrets.ssh_secret(secret_ref) {
        Ok(secret) => Some(ResolvedSshSecret {
            secret_ref: secret_ref.clone(),
            data_hash: secret.digest(),
            private_key_pem: secret.private_key,
            public_key: secret.public_key,
        }),
        Err(e) => {
            debug!(secret = %secret_ref, error = %e, "ssh secret not resolvable yet");
            None
        }
    }
}

pub async fn reconcile_host_key(ctx: ManagerContext, key: String) -> WorkOutcome {
    let name = HostName::new(key);
    match reconcile_one_host(&ctx, &name).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(host = %name, error = %e, "host reconcile step failed, backing off");
            WorkOutcome::RequeueAfter(Duration::from_secs(30))
        }
    }
}

async fn reconcile_one_host(ctx: &ManagerContext, name: &HostName) -> anyhow::Result<WorkOutcome> {
    let Some(versioned) = ctx.store.get_host(name).await? else {
        return Ok(WorkOutcome::Idle);
    };
    let mut host = versioned.value;
    let now = Utc::now();

    let cluster_name = ClusterName::new(host.cluster_ref.name.clone());
    let Some(cluster_versioned) = ctx.store.get_cluster(&cluster_name).await? else {
        error!(host = %name, cluster = %host.cluster_ref, "host's cluster not found, cannot resolve credentials");
        return Ok(WorkOutcome::RequeueAfter(Duration::from_secs(60)));
    };
    let cluster = cluster_versioned.value;

    if cluster.rate_limit.is_limited(now) {
        return Ok(WorkOutcome::RateLimitedUntil(cluster.rate_limit.expires_at.unwrap()));
    }

    let credentials_secret = match ctx.secrets.credentials(&cluster.credentials_ref.0) {
        Ok(c) => c,
        Err(e) => {
            error!(host = %name, error = %e, "credentials secret unavailable");
            return Ok(WorkOutcome::RequeueAfter(Duration::from_secs(60)));
        }
    };
    let Some((user, password)) = credentials_secret.robot_credentials() else {
        error!(host = %name, "credentials secret has no robot user/password");
        return Ok(WorkOutcome::RequeueAfter(ctx.flags.rate_limit_wait));
    };

    let rescue_secret = resolve_ssh_secret(&ctx.secrets, &host.rescue_secret_ref).await;
    let os_secret = match host.status.ssh_spec.as_ref() {
        Some(spec) => resolve_ssh_secret(&ctx.secrets, &spec.secret_ref).await,
        None => None,
    };

    let autosetup_config = host
        .status
        .install_image
        .as_ref()
        .map(render_autosetup)
        .unwrap_or_default();
    let user_data = match host.status.user_data_secret_ref.as_ref() {
        Some(secret_ref) => ctx.secrets.raw_key(secret_ref, USER_DATA_KEY).unwrap_or_default(),
        None => Vec::new(),
    };

    let step_ctx = HostStepCtx {
        now,
        credentials: RobotCredentials { user: user.to_string(), password: password.to_string() },
        ssh_user: OS_SSH_USER.to_string(),
        rescue_secret,
        os_secret,
        autosetup_config,
        user_data,
        cloud_init_sentinel_path: CLOUD_INIT_SENTINEL_PATH.to_string(),
        reachability_timeout: Duration::from_secs(15),
        liveness: Arc::clone(&ctx.liveness),
    };

    let result = caph_reconciler::reconcile_host(&mut host, ctx.transport.as_ref(), &step_ctx).await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(caph_reconciler::HostStepError::Recoverable { kind, message }) => {
            warn!(host = %name, %kind, %message, "host step recorded a recoverable error");
            host.status.record_error(now, kind, message);
            caph_reconciler::StepOutcome::Requeue(Duration::from_secs(20))
        }
        Err(caph_reconciler::HostStepError::Fatal { reason, message }) => {
            error!(host = %name, %reason, %message, "host step hit a fatal error, freezing");
            host.status.permanent_error = true;
            host.status.error_message = Some(format!("{reason}: {message}"));
            caph_reconciler::StepOutcome::Idle
        }
        Err(caph_reconciler::HostStepError::RateLimited { retry_after_secs }) => {
            warn!(host = %name, retry_after_secs, "robot rate limit hit, recording cluster-scoped expiry");
            let expires_at = record_rate_limit(ctx, &cluster_name, now, retry_after_secs).await?;
            // The robot call already happened; nothing on the host itself
            // changed, so there is nothing to persist here beyond the
            // cluster-scoped expiry every reconciler now honors.
            return Ok(WorkOutcome::RateLimitedUntil(expires_at));
        }
    };

    let consumer = host.consumer_ref.clone();
    let provider_id = host.status.provider_id.clone();

    match ctx.store.put_host(&host, Some(versioned.resource_version)).await {
        Ok(_) => {}
        Err(caph_store::StoreError::Conflict { .. }) => {
            debug!(host = %name, "lost the race to another writer, will re-reconcile");
            return Ok(WorkOutcome::RequeueAfter(Duration::ZERO));
        }
        Err(e) => return Err(e.into()),
    }

    if let (Some(consumer), Some(provider_id)) = (consumer, provider_id) {
        propagate_provider_id(ctx, &MachineName::new(consumer.name), &provider_id).await?;
    }

    Ok(match outcome {
        caph_reconciler::StepOutcome::Idle => WorkOutcome::Idle,
        caph_reconciler::StepOutcome::Requeue(delay) => WorkOutcome::RequeueAfter(delay),
        caph_reconciler::StepOutcome::RateLimited => {
            WorkOutcome::RateLimitedUntil(now + chrono::Duration::from_std(ctx.flags.rate_limit_wait).unwrap_or_default())
        }
    })
}

/// Record a cluster-scoped rate-limit expiry (spec.md §4.3, §5): re-reads the
/// cluster fresh rather than trusting a version captured earlier in this
/// call, since any reconciler on any object kind may race to write the same
/// field. A lost CAS update is fine — the later expiry always wins because
/// rate-limit windows only ever extend, never shrink.
async fn record_rate_limit(
    ctx: &ManagerContext,
    cluster_name: &ClusterName,
    now: chrono::DateTime<Utc>,
    retry_after_secs: u64,
) -> anyhow::Result<chrono::DateTime<Utc>> {
    let candidate = now + chrono::Duration::seconds(retry_after_secs as i64);
    let Some(versioned) = ctx.store.get_cluster(cluster_name).await? else {
        return Ok(candidate);
    };
    let mut cluster = versioned.value;
    let expires_at = match cluster.rate_limit.expires_at {
        Some(existing) if existing >= candidate => existing,
        _ => candidate,
    };
    cluster.rate_limit.expires_at = Some(expires_at);
    match ctx.store.put_cluster(&cluster, Some(versioned.resource_version)).await {
        Ok(_) | Err(caph_store::StoreError::Conflict { .. }) => Ok(expires_at),
        Err(e) => Err(e.into()),
    }
}

/// Copy a freshly `ensure-provisioned` host's `providerID` onto the machine
/// it is bound to. Best-effort: a lost CAS race just means the machine
/// reconciler (or the next host reconcile) picks it up next pass, and a
/// machine that already carries the value is left untouched.
async fn propagate_provider_id(
    ctx: &ManagerContext,
    machine_name: &MachineName,
    provider_id: &str,
) -> anyhow::Result<()> {
    let Some(versioned) = ctx.store.get_machine(machine_name).await? else {
        return Ok(());
    };
    if versioned.value.provider_id.is_some() {
        return Ok(());
    }
    let mut machine = versioned.value;
    machine.provider_id = Some(provider_id.to_string());
    match ctx.store.put_machine(&machine, Some(versioned.resource_version)).await {
        Ok(_) | Err(caph_store::StoreError::Conflict { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn reconcile_machine_key(ctx: ManagerContext, key: String) -> WorkOutcome {
    let name = MachineName::new(key);
    match reconcile_one_machine(&ctx, &name).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(machine = %name, error = %e, "machine binder step failed, backing off");
            WorkOutcome::RequeueAfter(Duration::from_secs(60))
        }
    }
}

async fn reconcile_one_machine(ctx: &ManagerContext, name: &MachineName) -> anyhow::Result<WorkOutcome> {
    let Some(versioned) = ctx.store.get_machine(name).await? else {
        return Ok(WorkOutcome::Idle);
    };
    let machine = versioned.value;
    let now = Utc::now();

    if machine.deletion_requested {
        caph_reconciler::release(ctx.store.as_ref(), &machine.name, now).await?;
        ctx.store.delete_machine(&machine.name).await?;
        return Ok(WorkOutcome::Idle);
    }

    // `provider_id` is no longer a reliable "already bound" signal — it is
    // only set once `ensure-provisioned` completes, long after the bind.
    // The consumer_ref on the host itself is the only authoritative record
    // of a binding.
    if host_backing(ctx.store.as_ref(), &machine).await.is_some() {
        return Ok(WorkOutcome::Idle);
    }

    match caph_reconciler::bind(ctx.store.as_ref(), &machine, now).await {
        Ok(host) => {
            info!(machine = %machine.name, host = %host.name, "bound to host");
            Ok(WorkOutcome::Idle)
        }
        Err(caph_reconciler::ReconcileError::NoAvailableHost) => {
            debug!(machine = %name, "no available host, waiting");
            Ok(WorkOutcome::RequeueAfter(Duration::from_secs(60)))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn reconcile_remediation_key(ctx: ManagerContext, key: String) -> WorkOutcome {
    let name = RemediationName::new(key);
    match reconcile_one_remediation(&ctx, &name).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(remediation = %name, error = %e, "remediation step failed, backing off");
            WorkOutcome::RequeueAfter(Duration::from_secs(30))
        }
    }
}

async fn reconcile_one_remediation(ctx: &ManagerContext, name: &RemediationName) -> anyhow::Result<WorkOutcome> {
    let Some(versioned) = ctx.store.get_remediation(name).await? else {
        return Ok(WorkOutcome::Idle);
    };
    let mut remediation = versioned.value;
    let now = Utc::now();

    // Node-level health isn't modeled by this core (no kubelet/node-status
    // watch, see spec.md §1 scope) — a host reconciled all the way to
    // `Provisioned` with no pending reboot stands in for "healthy".
    let machine_healthy = match ctx.store.get_machine(&remediation.machine_ref).await? {
        Some(m) => host_backing(ctx.store.as_ref(), &m.value).await.is_some_and(|h| {
            h.status.provisioning_state == caph_domain::ProvisioningState::Provisioned && !h.status.rebooted
        }),
        None => false,
    };

    let outcome = caph_reconciler::reconcile_remediation(&mut remediation, ctx.store.as_ref(), machine_healthy, now).await?;

    if remediation.phase == caph_domain::RemediationPhase::DeletingMachine {
        ctx.store.delete_remediation(&remediation.name).await?;
        return Ok(WorkOutcome::Idle);
    }

    ctx.store.put_remediation(&remediation, Some(versioned.resource_version)).await?;

    Ok(match outcome {
        caph_reconciler::StepOutcome::Idle => WorkOutcome::Idle,
        caph_reconciler::StepOutcome::Requeue(delay) => WorkOutcome::RequeueAfter(delay),
        caph_reconciler::StepOutcome::RateLimited => WorkOutcome::RequeueAfter(ctx.flags.rate_limit_wait),
    })
}

async fn host_backing(store: &dyn StateStore, machine: &caph_domain::Machine) -> Option<Host> {
    let hosts = store.list_hosts().await.ok()?;
    hosts
        .into_iter()
        .map(|v| v.value)
        .find(|h| h.consumer_ref.as_ref().is_some_and(|c| c.name == machine.name.as_str()))
}

/// Periodically sweep every stored host/machine/remediation name onto its
/// queue. This stands in for the Kubernetes informer resync loop a real
/// controller-runtime manager gets for free (out of scope here, see
/// spec.md §1) — without it, nothing would ever re-enter a reconcile that
/// didn't end with an explicit requeue.
pub fn spawn_sync_sweep(
    scheduler: Arc<caph_scheduler::Scheduler>,
    store: Arc<dyn StateStore>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Ok(hosts) = store.list_hosts().await {
                for h in hosts {
                    scheduler.host_queue().add(h.value.name.as_str().to_string());
                }
            }
            if let Ok(machines) = store.list_machines().await {
                for m in machines {
                    scheduler.machine_queue().add(m.value.name.as_str().to_string());
                }
            }
            if let Ok(remediations) = store.list_remediations().await {
                for r in remediations {
                    scheduler.remediation_queue().add(r.value.name.as_str().to_string());
                }
            }
            tokio::time::sleep(period).await;
        }
    })
}
