use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Process configuration for the manager binary.
///
/// `leader_elect` is accepted and stored but never acted on: real leader
/// election against the Kubernetes API is part of the management-process
/// bootstrap this core explicitly does not implement.
#[derive(Debug, Clone, Parser)]
#[command(name = "caph-manager", about = "Hetzner bare-metal host controller", version)]
pub struct Flags {
    #[arg(long, env = "CAPH_LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    #[arg(long, env = "CAPH_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(long, env = "CAPH_WATCH_FILTER_LABEL")]
    pub watch_filter_label: Option<String>,

    #[arg(long, env = "CAPH_HOST_CONCURRENCY", default_value_t = 1)]
    pub host_concurrency: usize,

    #[arg(long, env = "CAPH_MACHINE_CONCURRENCY", default_value_t = 4)]
    pub machine_concurrency: usize,

    #[arg(long, env = "CAPH_SYNC_PERIOD", value_parser = humantime::parse_duration, default_value = "10m")]
    pub sync_period: Duration,

    #[arg(long, env = "CAPH_RATE_LIMIT_WAIT", value_parser = humantime::parse_duration, default_value = "1h")]
    pub rate_limit_wait: Duration,

    #[arg(long, env = "CAPH_PRE_PROVISION_COMMAND")]
    pub pre_provision_command: Option<PathBuf>,

    #[arg(long, env = "CAPH_HCLOUD_IMAGE_URL_COMMAND")]
    pub hcloud_image_url_command: Option<PathBuf>,

    #[arg(long, env = "CAPH_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: String,

    /// Path to the redb state file. Not part of spec.md's abstracted flag
    /// set — every long-running process in this corpus needs somewhere to
    /// persist state, so this mirrors the teacher's bootstrap `store_path`.
    #[arg(long, env = "CAPH_STORE_PATH", default_value = "caph.redb")]
    pub store_path: PathBuf,

    /// Root of the mounted-secret tree `SecretResolver` reads credentials
    /// and SSH key material from (see `caph_config::SecretResolver`).
    #[arg(long, env = "CAPH_SECRETS_DIR", default_value = "/etc/caph/secrets")]
    pub secrets_dir: PathBuf,
}
