use std::sync::Arc;
use std::time::Duration;

use caph_domain::{
    ErrorType, Fingerprint, Host, ProvisioningState, RebootType, SecretStatus,
};
use caph_remote::{RebootDecision, RobotCredentials, RobotResetType};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::HostStepError;
use crate::liveness::LivenessTracker;
use crate::report::StepOutcome;
use crate::transport::HostTransport;

/// An SSH key's material plus the namespaced reference and content digest it
/// was resolved from — resolving secrets themselves is the caller's job
/// (the core never reads Kubernetes objects directly); this crate only
/// compares digests to detect rotation.
#[derive(Debug, Clone)]
pub struct ResolvedSshSecret {
    pub secret_ref: caph_domain::NamespacedName,
    pub data_hash: String,
    pub private_key_pem: String,
    pub public_key: String,
}

/// Everything one `reconcile_host` call needs beyond the host record itself.
/// Constructed fresh per reconcile by the caller (scheduler/manager) from
/// the cluster's credentials secret and the host's rescue/OS key secrets.
pub struct HostStepCtx {
    pub now: DateTime<Utc>,
    pub credentials: RobotCredentials,
    pub ssh_user: String,
    pub rescue_secret: Option<ResolvedSshSecret>,
    pub os_secret: Option<ResolvedSshSecret>,
    /// Rendered Hetzner `installimage` autosetup file content, built from
    /// the machine's `InstallImage` spec by the caller.
    pub autosetup_config: Vec<u8>,
    /// The cloud-init-compatible script a bootstrap collaborator produced,
    /// delivered verbatim over SSH in the `provisioning` state.
    pub user_data: Vec<u8>,
    /// Remote path checked in `ensure-provisioned` for the marker cloud-init
    /// writes on completion.
    pub cloud_init_sentinel_path: String,
    /// Reachability probe timeout for reboot-completion polling.
    pub reachability_timeout: Duration,
    /// Consecutive-failure window for the `provisioned`-state liveness
    /// probe. Shared across calls for the same host; never persisted.
    pub liveness: Arc<LivenessTracker>,
}

const RESCUE_USER: &str = "root";
const AUTOSETUP_REMOTE_PATH: &str = "/autosetup";
const USER_DATA_REMOTE_PATH: &str = "/root/user-data.sh";

/// Drive one host through a single state-machine step. Returns
/// [`StepOutcome`] on success; [`HostStepError`] classifies failure as
/// recoverable (operator-correctable, state machine stays put) or fatal
/// (requires the `permanent-error` annotation to clear before retrying).
pub async fn reconcile_host(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
) -> Result<StepOutcome, HostStepError> {
    if host.status.permanent_error {
        return Ok(StepOutcome::Idle);
    }

    // Maintenance takes effect only once any in-flight reboot's post-reboot
    // signal has been observed — losing that observation would strand the
    // reboot engine mid-escalation.
    if host.maintenance && !host.status.rebooted && host.status.provisioning_state == ProvisioningState::Provisioned {
        info!(host = %host.name, "maintenance requested, entering deprovisioning");
        host.status.provisioning_state = ProvisioningState::Deprovisioning;
        host.status.clear_error(ctx.now);
        return Ok(StepOutcome::requeue_now());
    }

    // A bound host can lose its consumer at any point past `available` (the
    // binder released it, or the owning machine was deleted) — `available`
    // itself is excluded because an absent consumer there is the normal
    // unclaimed condition, not a release event, and `none`/`registering`
    // precede any possible bind. Per spec, deprovisioning is reachable from
    // any (post-bind) state, not just `provisioned`.
    let mid_provisioning_cycle = matches!(
        host.status.provisioning_state,
        ProvisioningState::ImageInstalling
            | ProvisioningState::Provisioning
            | ProvisioningState::EnsureProvisioned
            | ProvisioningState::Provisioned
    );
    if host.consumer_ref.is_none() && mid_provisioning_cycle {
        info!(host = %host.name, "consumer released, entering deprovisioning");
        host.status.provisioning_state = ProvisioningState::Deprovisioning;
        host.status.clear_error(ctx.now);
        return Ok(StepOutcome::requeue_now());
    }

    match host.status.provisioning_state {
        ProvisioningState::None => step_none(host, transport, ctx).await,
        ProvisioningState::Registering => step_registering(host, transport, ctx).await,
        ProvisioningState::Available => step_available(host, ctx),
        ProvisioningState::ImageInstalling => step_image_installing(host, transport, ctx).await,
        ProvisioningState::Provisioning => step_provisioning(host, transport, ctx).await,
        ProvisioningState::EnsureProvisioned => step_ensure_provisioned(host, transport, ctx).await,
        ProvisioningState::Provisioned => step_provisioned(host, transport, ctx).await,
        ProvisioningState::Deprovisioning => step_deprovisioning(host, transport, ctx).await,
    }
}

fn advance(host: &mut Host, ctx: &HostStepCtx) {
    let next = host.status.provisioning_state.next_on_success();
    if let Some(next) = next {
        host.status.provisioning_state = next;
    }
    host.status.clear_error(ctx.now);
}

async fn step_none(host: &mut Host, transport: &dyn HostTransport, ctx: &HostStepCtx) -> Result<StepOutcome, HostStepError> {
    host.root_device_hints.validate().map_err(|e| {
        HostStepError::recoverable(ErrorType::Registration, e.to_string())
    })?;

    let server = transport.get_server(&ctx.credentials, host.server_id).await.map_err(|e| classify_registration(e))?;
    host.status.ip_address = server.server_ip;

    let mut reboot_types = transport
        .reboot_types(&ctx.credentials, host.server_id)
        .await
        .map_err(classify_registration)?;
    if ctx.rescue_secret.is_some() {
        reboot_types.insert(0, RebootType::Ssh);
    }
    host.status.reboot_types = reboot_types;

    advance(host, ctx);
    Ok(StepOutcome::requeue_now())
}

async fn step_registering(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
) -> Result<StepOutcome, HostStepError> {
    let Some(rescue) = &ctx.rescue_secret else {
        return Err(HostStepError::recoverable(
            ErrorType::Registration,
            "no rescue SSH secret configured".to_string(),
        ));
    };

    let fingerprint = Fingerprint::of(rescue.public_key.as_bytes());
    transport
        .ensure_ssh_key(&ctx.credentials, &fingerprint, &rescue.public_key)
        .await
        .map_err(classify_registration)?;

    host.status.ssh_status.rescue_key = Some(fingerprint);
    host.status.ssh_status.current_rescue =
        Some(SecretStatus { secret_ref: rescue.secret_ref.clone(), data_hash: rescue.data_hash.clone() });

    advance(host, ctx);
    Ok(StepOutcome::requeue_now())
}

fn step_available(host: &mut Host, ctx: &HostStepCtx) -> Result<StepOutcome, HostStepError> {
    maybe_reregister_rescue_key(host, ctx);
    if host.status.install_image.is_some() {
        advance(host, ctx);
        return Ok(StepOutcome::requeue_now());
    }
    Ok(StepOutcome::Idle)
}

/// If the rescue secret rotated, treat rescue as unconfigured again so the
/// next reconcile re-registers under the new fingerprint. Callers only
/// invoke this from states before `image-installing` — re-registering once
/// the rescue system is already mid-install would abandon that work.
fn maybe_reregister_rescue_key(host: &mut Host, ctx: &HostStepCtx) {
    if let Some(rescue) = &ctx.rescue_secret {
        let rotated = host
            .status
            .ssh_status
            .current_rescue
            .as_ref()
            .is_none_or(|s| !s.matches(&rescue.secret_ref, &rescue.data_hash));
        if rotated {
            debug!(host = %host.name, "rescue secret rotated, will re-register");
            host.status.ssh_status.current_rescue = None;
            host.status.ssh_status.rescue_key = None;
            host.status.provisioning_state = ProvisioningState::Registering;
        }
    }
}

async fn step_image_installing(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
) -> Result<StepOutcome, HostStepError> {
    let rescue = ctx
        .rescue_secret
        .as_ref()
        .ok_or_else(|| HostStepError::recoverable(ErrorType::Preparation, "no rescue SSH secret configured".into()))?;
    let rescue_fp = host
        .status
        .ssh_status
        .rescue_key
        .clone()
        .ok_or_else(|| HostStepError::recoverable(ErrorType::Preparation, "rescue key not registered".into()))?;

    // Step 1: enable rescue on the vendor.
    transport
        .set_rescue(&ctx.credentials, host.server_id, std::slice::from_ref(&rescue_fp))
        .await
        .map_err(classify_preparation)?;

    // Step 2/3: reboot into rescue and come back up enough to SSH in. This
    // reuses the shared reboot-engine drive loop; while it reports anything
    // other than `Completed` we requeue and re-enter this same step later.
    let ip = host.status.ip_address.clone().ok_or_else(|| {
        HostStepError::recoverable(ErrorType::Preparation, "host has no known IP address".into())
    })?;
    match drive_reboot(host, transport, ctx, &ip, ErrorType::Preparation).await? {
        RebootDrive::Done => {}
        RebootDrive::Pending(outcome) => return Ok(outcome),
    }

    // Step 4: verify hardware against root-device hints.
    let inventory = transport
        .hardware_inventory(&ip, 22, RESCUE_USER, &rescue.private_key_pem)
        .await
        .map_err(classify_preparation)?;
    host.status.hardware_inventory = inventory.clone();

    caph_select::resolve_root_device_hints(&host.root_device_hints, &inventory).map_err(|_| {
        HostStepError::recoverable(ErrorType::Preparation, "NoStorageDeviceFound".to_string())
    })?;

    // Step 5/6: upload autosetup config and run installimage.
    transport
        .upload_autosetup(&ip, 22, RESCUE_USER, &rescue.private_key_pem, AUTOSETUP_REMOTE_PATH, &ctx.autosetup_config)
        .await
        .map_err(classify_preparation)?;

    let result = transport
        .ssh_exec(&ip, 22, RESCUE_USER, &rescue.private_key_pem, &format!("installimage -a -c {AUTOSETUP_REMOTE_PATH}"))
        .await
        .map_err(classify_preparation)?;
    if !result.success() {
        return Err(HostStepError::recoverable(
            ErrorType::Preparation,
            format!("installimage exited with status {:?}", result.exit_status),
        ));
    }

    // Step 7: reboot into the installed OS.
    host.status.start_reboot(RebootType::Ssh, ctx.now);
    transport.ssh_reboot(&ip, 22, RESCUE_USER, &rescue.private_key_pem).await.map_err(classify_preparation)?;

    advance(host, ctx);
    Ok(StepOutcome::Requeue(Duration::from_secs(10)))
}

async fn step_provisioning(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
) -> Result<StepOutcome, HostStepError> {
    let os = ctx
        .os_secret
        .as_ref()
        .ok_or_else(|| HostStepError::recoverable(ErrorType::Provisioning, "no OS SSH secret configured".into()))?;
    let ssh_spec = host
        .status
        .ssh_spec
        .clone()
        .ok_or_else(|| HostStepError::recoverable(ErrorType::Provisioning, "no ssh spec bound to host".into()))?;
    let ip = host.status.ip_address.clone().ok_or_else(|| {
        HostStepError::recoverable(ErrorType::Provisioning, "host has no known IP address".into())
    })?;

    if !transport.is_reachable(&ip, ssh_spec.port_after_install_image).await {
        return Ok(StepOutcome::Requeue(Duration::from_secs(10)));
    }

    transport
        .upload_autosetup(
            &ip,
            ssh_spec.port_after_install_image,
            &ctx.ssh_user,
            &os.private_key_pem,
            USER_DATA_REMOTE_PATH,
            &ctx.user_data,
        )
        .await
        .map_err(classify_provisioning)?;

    let cmd = format!("chmod +x {USER_DATA_REMOTE_PATH} && {USER_DATA_REMOTE_PATH}");
    let result = transport
        .ssh_exec(&ip, ssh_spec.port_after_install_image, &ctx.ssh_user, &os.private_key_pem, &cmd)
        .await
        .map_err(classify_provisioning)?;
    if !result.success() {
        return Err(HostStepError::recoverable(
            ErrorType::Provisioning,
            format!("user-data script exited with status {:?}", result.exit_status),
        ));
    }

    host.status.ssh_status.current_os =
        Some(SecretStatus { secret_ref: os.secret_ref.clone(), data_hash: os.data_hash.clone() });

    advance(host, ctx);
    Ok(StepOutcome::requeue_now())
}

async fn step_ensure_provisioned(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
) -> Result<StepOutcome, HostStepError> {
    let os = ctx
        .os_secret
        .as_ref()
        .ok_or_else(|| HostStepError::recoverable(ErrorType::Provisioning, "no OS SSH secret configured".into()))?;
    let ssh_spec = host
        .status
        .ssh_spec
        .clone()
        .ok_or_else(|| HostStepError::recoverable(ErrorType::Provisioning, "no ssh spec bound to host".into()))?;
    let ip = host.status.ip_address.clone().ok_or_else(|| {
        HostStepError::recoverable(ErrorType::Provisioning, "host has no known IP address".into())
    })?;

    // Connecting successfully on the post-cloud-init port is itself
    // evidence cloud-init completed — the two ports are deliberately
    // distinct predicates rather than one port checked twice.
    if !transport.is_reachable(&ip, ssh_spec.port_after_cloud_init).await {
        return Ok(StepOutcome::Requeue(Duration::from_secs(15)));
    }

    let cmd = format!("test -f {} && echo present", ctx.cloud_init_sentinel_path);
    let result = transport
        .ssh_exec(&ip, ssh_spec.port_after_cloud_init, &ctx.ssh_user, &os.private_key_pem, &cmd)
        .await
        .map_err(classify_provisioning)?;

    if !result.success() || !String::from_utf8_lossy(&result.stdout).contains("present") {
        return Err(HostStepError::recoverable(
            ErrorType::Provisioning,
            "CloudInitNotInstalled".to_string(),
        ));
    }

    host.status.last_provisioned_at = Some(ctx.now);
    host.status.provider_id = Some(caph_domain::Machine::provider_id_for_server(host.server_id));
    advance(host, ctx);
    Ok(StepOutcome::requeue_now())
}

async fn step_provisioned(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
) -> Result<StepOutcome, HostStepError> {
    if host.status.reboot_requested {
        host.status.reboot_requested = false;
        let ip = host.status.ip_address.clone().ok_or_else(|| {
            HostStepError::recoverable(ErrorType::Provisioning, "host has no known IP address".into())
        })?;
        return match drive_reboot(host, transport, ctx, &ip, ErrorType::Provisioning).await? {
            RebootDrive::Done => Ok(StepOutcome::Idle),
            RebootDrive::Pending(outcome) => Ok(outcome),
        };
    }

    if host.status.rebooted {
        let ip = host.status.ip_address.clone().ok_or_else(|| {
            HostStepError::recoverable(ErrorType::Provisioning, "host has no known IP address".into())
        })?;
        return match drive_reboot(host, transport, ctx, &ip, ErrorType::Provisioning).await? {
            RebootDrive::Done => Ok(StepOutcome::Idle),
            RebootDrive::Pending(outcome) => Ok(outcome),
        };
    }

    let ssh_spec = host.status.ssh_spec.clone();
    if let (Some(ssh_spec), Some(ip)) = (ssh_spec, host.status.ip_address.clone()) {
        if !transport.is_reachable(&ip, ssh_spec.port_after_cloud_init).await {
            if ctx.liveness.record_failure(&host.name, ctx.now) {
                info!(host = %host.name, "three consecutive liveness failures, triggering reboot");
                return match drive_reboot(host, transport, ctx, &ip, ErrorType::Provisioning).await? {
                    RebootDrive::Done => Ok(StepOutcome::Idle),
                    RebootDrive::Pending(outcome) => Ok(outcome),
                };
            }
            return Ok(StepOutcome::Requeue(Duration::from_secs(30)));
        }
        ctx.liveness.clear(&host.name);
    }

    Ok(StepOutcome::Idle)
}

async fn step_deprovisioning(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
) -> Result<StepOutcome, HostStepError> {
    if let Some(rescue) = &ctx.rescue_secret {
        if let Some(ip) = host.status.ip_address.clone() {
            let rescue_fp = host.status.ssh_status.rescue_key.clone();
            if let Some(rescue_fp) = rescue_fp {
                transport
                    .set_rescue(&ctx.credentials, host.server_id, std::slice::from_ref(&rescue_fp))
                    .await
                    .map_err(classify_provisioning)?;
                match drive_reboot(host, transport, ctx, &ip, ErrorType::Provisioning).await? {
                    RebootDrive::Done => {}
                    RebootDrive::Pending(outcome) => return Ok(outcome),
                }
                if host.wipe_disk_on_release && !host.status.hardware_inventory.is_empty() {
                    transport
                        .wipe_disk_headers(&ip, 22, RESCUE_USER, &rescue.private_key_pem, &host.status.hardware_inventory)
                        .await
                        .map_err(classify_provisioning)?;
                }
            }
        }
    }

    host.status.install_image = None;
    host.status.user_data_secret_ref = None;
    host.status.ssh_status = Default::default();
    host.status.hardware_inventory.clear();
    host.status.provisioning_state = ProvisioningState::Available;
    host.status.clear_error(ctx.now);
    Ok(StepOutcome::requeue_now())
}

enum RebootDrive {
    Done,
    Pending(StepOutcome),
}

/// Shared reboot-in-progress driver used by every state that needs a
/// reboot-and-wait: starts a reboot if none is in flight, polls
/// reachability, and escalates through the ladder on timeout. `kind` is the
/// error type recorded if the ladder is exhausted without a signal.
async fn drive_reboot(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
    ip: &str,
    exhausted_kind: ErrorType,
) -> Result<RebootDrive, HostStepError> {
    let started_at = host.status.reboot_started_at.unwrap_or(ctx.now);
    let decision = caph_remote::decide_reboot(ctx.now, started_at, &host.status);

    match decision {
        RebootDecision::Start(mechanism) => {
            issue_reboot(host, transport, ctx, mechanism).await?;
            Ok(RebootDrive::Pending(StepOutcome::Requeue(Duration::from_secs(5))))
        }
        RebootDecision::KeepWaiting => {
            let port = host.status.ssh_spec.as_ref().map(|s| s.port_after_install_image).unwrap_or(22);
            if transport.is_reachable(ip, port).await {
                host.status.clear_reboot(ctx.now);
                Ok(RebootDrive::Done)
            } else {
                Ok(RebootDrive::Pending(StepOutcome::Requeue(Duration::from_secs(5))))
            }
        }
        RebootDecision::Completed => {
            host.status.clear_reboot(ctx.now);
            Ok(RebootDrive::Done)
        }
        RebootDecision::Escalate { from, to, error } => {
            warn!(host = %host.name, %from, %to, "reboot mechanism too slow, escalating");
            host.status.record_error(ctx.now, error, format!("{from} reboot exceeded timeout budget"));
            issue_reboot(host, transport, ctx, to).await?;
            Ok(RebootDrive::Pending(StepOutcome::Requeue(Duration::from_secs(5))))
        }
        RebootDecision::ExhaustedLadder => Err(HostStepError::fatal(
            "RebootLadderExhausted",
            format!("no further reboot mechanism available for host {}", host.name),
        )),
    }
}

async fn issue_reboot(
    host: &mut Host,
    transport: &dyn HostTransport,
    ctx: &HostStepCtx,
    mechanism: RebootType,
) -> Result<(), HostStepError> {
    let ip = host.status.ip_address.clone();
    match mechanism {
        RebootType::Ssh => {
            let key = ctx.rescue_secret.as_ref().or(ctx.os_secret.as_ref()).ok_or_else(|| {
                HostStepError::recoverable(ErrorType::Provisioning, "no ssh key available for ssh reboot".into())
            })?;
            let ip = ip.ok_or_else(|| HostStepError::recoverable(ErrorType::Provisioning, "no ip address".into()))?;
            let port = host.status.ssh_spec.as_ref().map(|s| s.port_after_install_image).unwrap_or(22);
            // Record the attempt before the call: even if the session drops
            // or the vendor call errors, the next `decide_reboot` must see
            // this mechanism as in-flight (and, on timeout, escalate past
            // it) rather than recompute the same `Start` decision forever.
            host.status.start_reboot(mechanism, ctx.now);
            transport.ssh_reboot(&ip, port, &ctx.ssh_user, &key.private_key_pem).await.map_err(classify_provisioning)?;
        }
        RebootType::Software => {
            host.status.start_reboot(mechanism, ctx.now);
            transport.reboot_robot(&ctx.credentials, host.server_id, RobotResetType::Software).await.map_err(classify_provisioning)?;
        }
        RebootType::Hardware => {
            host.status.start_reboot(mechanism, ctx.now);
            transport.reboot_robot(&ctx.credentials, host.server_id, RobotResetType::Hardware).await.map_err(|e| {
                // A rejected hardware reset has nowhere further within this
                // call — record the dedicated error and let the next
                // reconcile's `decide_reboot` escalate past it to `power`
                // (the in-progress mechanism was already recorded above).
                let _ = &e;
                HostStepError::recoverable(ErrorType::HardwareRebootFailed, "hardware reboot rejected by vendor".to_string())
            })?;
        }
        RebootType::Power => {
            host.status.start_reboot(mechanism, ctx.now);
            transport.reboot_robot(&ctx.credentials, host.server_id, RobotResetType::Power).await.map_err(classify_provisioning)?;
        }
        RebootType::Manual => {
            warn!(host = %host.name, "manual reboot required, a human must intervene");
            host.status.start_reboot(mechanism, ctx.now);
        }
    }
    Ok(())
}

fn classify_registration(e: caph_remote::RemoteError) -> HostStepError {
    classify(e, ErrorType::Registration)
}

fn classify_preparation(e: caph_remote::RemoteError) -> HostStepError {
    classify(e, ErrorType::Preparation)
}

fn classify_provisioning(e: caph_remote::RemoteError) -> HostStepError {
    classify(e, ErrorType::Provisioning)
}

fn classify(e: caph_remote::RemoteError, kind: ErrorType) -> HostStepError {
    use caph_remote::RemoteError;
    match e {
        RemoteError::RateLimited { retry_after_secs } => HostStepError::RateLimited { retry_after_secs },
        RemoteError::Permanent { status: 401, message } | RemoteError::Permanent { status: 403, message } => {
            HostStepError::fatal("RobotCredentialsInvalid", message)
        }
        other => HostStepError::recoverable(kind, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use caph_domain::{ConsumerRef, Disk, HostName, HostStatus, NamespacedName, RootDeviceHints};
    use caph_remote::{CommandOutput, RemoteError, RobotServer};
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FakeTransport {
        reachable: Mutex<bool>,
        rescue_too_slow: Mutex<bool>,
        wipe_calls: Mutex<u32>,
        rate_limited: Mutex<bool>,
        reboot_fails: Mutex<bool>,
    }

    #[async_trait]
    impl HostTransport for FakeTransport {
        async fn get_server(&self, _creds: &RobotCredentials, server_id: u64) -> Result<RobotServer, RemoteError> {
            if *self.rate_limited.lock().await {
                return Err(RemoteError::RateLimited { retry_after_secs: 120 });
            }
            Ok(RobotServer {
                server_ip: Some("10.0.0.1".into()),
                server_number: server_id,
                server_name: "srv".into(),
                status: "ready".into(),
                reset: true,
                rescue: true,
            })
        }

        async fn reboot_types(&self, _creds: &RobotCredentials, _server_id: u64) -> Result<Vec<RebootType>, RemoteError> {
            Ok(vec![RebootType::Software, RebootType::Hardware, RebootType::Power, RebootType::Manual])
        }

        async fn ensure_ssh_key(&self, _c: &RobotCredentials, _fp: &Fingerprint, _pk: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn set_rescue(&self, _c: &RobotCredentials, _s: u64, _k: &[Fingerprint]) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn reboot_robot(&self, _c: &RobotCredentials, _s: u64, _k: RobotResetType) -> Result<(), RemoteError> {
            if *self.reboot_fails.lock().await {
                return Err(RemoteError::Transient("reset rejected".into()));
            }
            Ok(())
        }

        async fn ssh_probe(&self, _ip: &str, _port: u16, _user: &str, _pk: &str) -> Result<Fingerprint, RemoteError> {
            Ok(Fingerprint::of(b"x"))
        }

        async fn ssh_exec(&self, _ip: &str, _port: u16, _user: &str, _pk: &str, _cmd: &str) -> Result<CommandOutput, RemoteError> {
            Ok(CommandOutput { exit_status: Some(0), stdout: b"present".to_vec(), stderr: vec![] })
        }

        async fn ssh_reboot(&self, _ip: &str, _port: u16, _user: &str, _pk: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn upload_autosetup(&self, _ip: &str, _port: u16, _user: &str, _pk: &str, _path: &str, _c: &[u8]) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn hardware_inventory(&self, _ip: &str, _port: u16, _user: &str, _pk: &str) -> Result<Vec<Disk>, RemoteError> {
            Ok(vec![Disk { name: "sda".into(), wwn: "0x5000c500".into(), size_bytes: 1_000_000_000_000 }])
        }

        async fn wipe_disk_headers(&self, _ip: &str, _port: u16, _user: &str, _pk: &str, _d: &[Disk]) -> Result<(), RemoteError> {
            *self.wipe_calls.lock().await += 1;
            Ok(())
        }

        async fn is_reachable(&self, _ip: &str, _port: u16) -> bool {
            !*self.rescue_too_slow.lock().await && *self.reachable.lock().await
        }
    }

    fn host(state: ProvisioningState) -> Host {
        Host {
            name: HostName::new("h1"),
            server_id: 42,
            description: None,
            cluster_ref: NamespacedName::new("default", "c1"),
            rescue_secret_ref: NamespacedName::new("default", "rescue-key"),
            root_device_hints: RootDeviceHints { wwn: Some("0x5000c500".into()), raid: vec![] },
            consumer_ref: Some(ConsumerRef::new("default", "m1")),
            maintenance: false,
            wipe_disk_on_release: false,
            labels: HashMap::new(),
            status: HostStatus { provisioning_state: state, ..HostStatus::default() },
        }
    }

    fn ctx() -> HostStepCtx {
        HostStepCtx {
            now: Utc::now(),
            credentials: RobotCredentials { user: "u".into(), password: "p".into() },
            ssh_user: "root".into(),
            rescue_secret: Some(ResolvedSshSecret {
                secret_ref: NamespacedName::new("default", "rescue"),
                data_hash: "hash-a".into(),
                private_key_pem: "pem".into(),
                public_key: "ssh-ed25519 AAAA".into(),
            }),
            os_secret: Some(ResolvedSshSecret {
                secret_ref: NamespacedName::new("default", "os"),
                data_hash: "hash-b".into(),
                private_key_pem: "pem".into(),
                public_key: "ssh-ed25519 AAAA".into(),
            }),
            autosetup_config: b"autosetup".to_vec(),
            user_data: b"#!/bin/sh\necho hi\n".to_vec(),
            cloud_init_sentinel_path: "/var/lib/cloud/instance/boot-finished".into(),
            reachability_timeout: Duration::from_secs(5),
            liveness: Arc::new(LivenessTracker::new()),
        }
    }

    #[tokio::test]
    async fn none_to_registering_fetches_server_and_reboot_types() {
        let mut h = host(ProvisioningState::None);
        let transport = FakeTransport::default();
        let outcome = reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Registering);
        assert!(h.status.reboot_types.contains(&RebootType::Ssh));
        assert_eq!(outcome, StepOutcome::requeue_now());
    }

    #[tokio::test]
    async fn rate_limited_robot_call_classifies_as_rate_limited_error() {
        let mut h = host(ProvisioningState::None);
        let transport = FakeTransport::default();
        *transport.rate_limited.lock().await = true;
        let err = reconcile_host(&mut h, &transport, &ctx()).await.unwrap_err();
        assert!(matches!(err, HostStepError::RateLimited { retry_after_secs: 120 }));
        assert_eq!(h.status.provisioning_state, ProvisioningState::None);
    }

    #[tokio::test]
    async fn registering_to_available_registers_rescue_key() {
        let mut h = host(ProvisioningState::Registering);
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Available);
        assert!(h.status.ssh_status.rescue_key.is_some());
        assert!(h.status.ssh_status.current_rescue.is_some());
    }

    #[tokio::test]
    async fn available_without_install_image_is_idle() {
        let mut h = host(ProvisioningState::Available);
        h.consumer_ref = None;
        let transport = FakeTransport::default();
        let outcome = reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(outcome, StepOutcome::Idle);
        assert_eq!(h.status.provisioning_state, ProvisioningState::Available);
    }

    #[tokio::test]
    async fn available_with_install_image_advances() {
        let mut h = host(ProvisioningState::Available);
        h.status.install_image = Some(caph_domain::InstallImage {
            name: "ubuntu-24.04".into(),
            url: "https://ex/u24.tar.gz".into(),
            post_install_user_data_partition_label: None,
        });
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::ImageInstalling);
    }

    #[tokio::test]
    async fn image_installing_runs_full_sequence_and_advances() {
        let mut h = host(ProvisioningState::ImageInstalling);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.ssh_status.rescue_key = Some(Fingerprint::of(b"ssh-ed25519 AAAA"));
        let transport = FakeTransport::default();
        *transport.reachable.lock().await = true;

        let outcome = reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Provisioning);
        assert!(matches!(outcome, StepOutcome::Requeue(_)));
        assert!(!h.status.hardware_inventory.is_empty());
    }

    #[tokio::test]
    async fn image_installing_missing_wwn_stays_put_with_preparation_error() {
        let mut h = host(ProvisioningState::ImageInstalling);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.ssh_status.rescue_key = Some(Fingerprint::of(b"ssh-ed25519 AAAA"));
        h.root_device_hints = RootDeviceHints { wwn: Some("0xDEADBEEF".into()), raid: vec![] };
        let transport = FakeTransport::default();
        *transport.reachable.lock().await = true;

        let err = reconcile_host(&mut h, &transport, &ctx()).await.unwrap_err();
        assert!(matches!(err, HostStepError::Recoverable { kind: ErrorType::Preparation, .. }));
        assert_eq!(h.status.provisioning_state, ProvisioningState::ImageInstalling);
    }

    #[tokio::test]
    async fn ensure_provisioned_checks_sentinel_and_sets_last_provisioned() {
        let mut h = host(ProvisioningState::EnsureProvisioned);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.ssh_spec = Some(caph_domain::SshSpec {
            secret_ref: NamespacedName::new("default", "os"),
            port_after_install_image: 22,
            port_after_cloud_init: 2222,
        });
        let transport = FakeTransport::default();
        *transport.reachable.lock().await = true;

        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Provisioned);
        assert!(h.status.last_provisioned_at.is_some());
        assert_eq!(h.status.provider_id.as_deref(), Some("hcloud-bm://42"));
    }

    #[tokio::test]
    async fn provisioned_host_with_no_reboot_in_flight_is_idle_when_reachable() {
        let mut h = host(ProvisioningState::Provisioned);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.ssh_spec = Some(caph_domain::SshSpec {
            secret_ref: NamespacedName::new("default", "os"),
            port_after_install_image: 22,
            port_after_cloud_init: 2222,
        });
        let transport = FakeTransport::default();
        *transport.reachable.lock().await = true;
        let outcome = reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(outcome, StepOutcome::Idle);
    }

    #[tokio::test]
    async fn reboot_requested_on_provisioned_host_starts_a_reboot() {
        let mut h = host(ProvisioningState::Provisioned);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.reboot_requested = true;
        h.status.reboot_types = vec![RebootType::Ssh, RebootType::Software];
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert!(!h.status.reboot_requested);
        assert!(h.status.rebooted);
    }

    #[tokio::test]
    async fn three_consecutive_liveness_failures_trigger_a_reboot() {
        let mut h = host(ProvisioningState::Provisioned);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.ssh_spec = Some(caph_domain::SshSpec {
            secret_ref: NamespacedName::new("default", "os"),
            port_after_install_image: 22,
            port_after_cloud_init: 2222,
        });
        h.status.reboot_types = vec![RebootType::Ssh];
        let transport = FakeTransport::default();
        let c = ctx();

        for _ in 0..2 {
            let outcome = reconcile_host(&mut h, &transport, &c).await.unwrap();
            assert_eq!(outcome, StepOutcome::Requeue(Duration::from_secs(30)));
            assert!(!h.status.rebooted);
        }
        reconcile_host(&mut h, &transport, &c).await.unwrap();
        assert!(h.status.rebooted);
    }

    #[tokio::test]
    async fn issue_reboot_records_the_attempted_mechanism_even_on_vendor_failure() {
        let mut h = host(ProvisioningState::Provisioned);
        h.status.ip_address = Some("10.0.0.1".into());
        let transport = FakeTransport::default();
        *transport.reboot_fails.lock().await = true;

        let err = issue_reboot(&mut h, &transport, &ctx(), RebootType::Hardware).await.unwrap_err();
        assert!(matches!(err, HostStepError::Recoverable { kind: ErrorType::HardwareRebootFailed, .. }));
        // The next `decide_reboot` must see `hardware` as the in-flight
        // mechanism, not whatever preceded it, or it recomputes the same
        // `Start(Hardware)` decision forever instead of escalating to
        // `power` once the timeout budget elapses.
        assert_eq!(h.status.reboot_in_progress, Some(RebootType::Hardware));
    }

    #[tokio::test]
    async fn maintenance_on_provisioned_host_enters_deprovisioning() {
        let mut h = host(ProvisioningState::Provisioned);
        h.maintenance = true;
        let transport = FakeTransport::default();
        let outcome = reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Deprovisioning);
        assert_eq!(outcome, StepOutcome::requeue_now());
    }

    #[tokio::test]
    async fn maintenance_deferred_while_reboot_in_flight() {
        let mut h = host(ProvisioningState::Provisioned);
        h.maintenance = true;
        h.status.rebooted = true;
        h.status.reboot_in_progress = Some(RebootType::Ssh);
        h.status.reboot_started_at = Some(Utc::now());
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Provisioned);
    }

    #[tokio::test]
    async fn consumer_released_on_provisioned_host_enters_deprovisioning() {
        let mut h = host(ProvisioningState::Provisioned);
        h.consumer_ref = None;
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Deprovisioning);
    }

    #[tokio::test]
    async fn consumer_released_mid_image_installing_enters_deprovisioning() {
        let mut h = host(ProvisioningState::ImageInstalling);
        h.consumer_ref = None;
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Deprovisioning);
    }

    #[tokio::test]
    async fn consumer_released_mid_provisioning_enters_deprovisioning() {
        let mut h = host(ProvisioningState::Provisioning);
        h.consumer_ref = None;
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Deprovisioning);
    }

    #[tokio::test]
    async fn unclaimed_available_host_does_not_enter_deprovisioning() {
        let mut h = host(ProvisioningState::Available);
        h.consumer_ref = None;
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_ne!(h.status.provisioning_state, ProvisioningState::Deprovisioning);
    }

    #[tokio::test]
    async fn deprovisioning_clears_install_image_and_returns_to_available() {
        let mut h = host(ProvisioningState::Deprovisioning);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.install_image = Some(caph_domain::InstallImage {
            name: "x".into(),
            url: "y".into(),
            post_install_user_data_partition_label: None,
        });
        h.status.ssh_status.rescue_key = Some(Fingerprint::of(b"k"));
        let transport = FakeTransport::default();
        *transport.reachable.lock().await = true;

        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Available);
        assert!(h.status.install_image.is_none());
        assert!(h.status.ssh_status.rescue_key.is_none());
    }

    #[tokio::test]
    async fn deprovisioning_wipes_disks_only_when_requested() {
        let mut h = host(ProvisioningState::Deprovisioning);
        h.wipe_disk_on_release = true;
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.ssh_status.rescue_key = Some(Fingerprint::of(b"k"));
        h.status.hardware_inventory = vec![Disk { name: "sda".into(), wwn: "0x5000c500".into(), size_bytes: 1 }];
        let transport = FakeTransport::default();
        *transport.reachable.lock().await = true;

        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(*transport.wipe_calls.lock().await, 1);
        assert!(h.status.hardware_inventory.is_empty());
    }

    #[tokio::test]
    async fn deprovisioning_does_not_wipe_disks_by_default() {
        let mut h = host(ProvisioningState::Deprovisioning);
        h.status.ip_address = Some("10.0.0.1".into());
        h.status.ssh_status.rescue_key = Some(Fingerprint::of(b"k"));
        h.status.hardware_inventory = vec![Disk { name: "sda".into(), wwn: "0x5000c500".into(), size_bytes: 1 }];
        let transport = FakeTransport::default();
        *transport.reachable.lock().await = true;

        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(*transport.wipe_calls.lock().await, 0);
    }

    #[tokio::test]
    async fn rescue_rotation_before_image_installing_reregisters() {
        let mut h = host(ProvisioningState::Available);
        h.status.ssh_status.current_rescue = Some(SecretStatus {
            secret_ref: NamespacedName::new("default", "rescue"),
            data_hash: "stale-hash".into(),
        });
        let transport = FakeTransport::default();
        reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Registering);
    }

    #[tokio::test]
    async fn rescue_rotation_same_digest_does_not_reregister() {
        let mut h = host(ProvisioningState::Available);
        h.status.ssh_status.current_rescue =
            Some(SecretStatus { secret_ref: NamespacedName::new("default", "rescue"), data_hash: "hash-a".into() });
        let transport = FakeTransport::default();
        let outcome = reconcile_host(&mut h, &transport, &ctx()).await.unwrap();
        assert_eq!(h.status.provisioning_state, ProvisioningState::Available);
        assert_eq!(outcome, StepOutcome::Idle);
    }
}
