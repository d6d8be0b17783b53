//! Clients for the vendor-facing side of a reconcile: the Hetzner Robot
//! REST API, an SSH session to the host itself, and the reboot escalation
//! engine that sits between them. Nothing in this crate caches a connection
//! or a credential across calls — every call resolves what it needs fresh,
//! which keeps a reconcile worker free of hidden cross-call state.

pub mod error;
pub mod reboot;
pub mod robot;
pub mod ssh;

pub use error::RemoteError;
pub use reboot::{decide as decide_reboot, is_reachable, RebootDecision};
pub use robot::{
    BootConfig, RescueConfig, RobotClient, RobotCredentials, RobotResetType, RobotServer, SshKeyFingerprintRef,
    SshKeyRecord,
};
pub use ssh::{CommandOutput, SshClient};
