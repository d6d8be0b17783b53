use thiserror::Error;

/// Every call into the Robot API or an SSH session ends up here. Variants
/// distinguish what the caller should do next: `RateLimited` means back off
/// cluster-wide, `Permanent`/`NotFound` mean stop retrying, `Transient` means
/// try again on the next reconcile.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("robot api rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("robot api permanent error ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("robot api resource not found: {0}")]
    NotFound(String),

    #[error("robot api transient error: {0}")]
    Transient(String),

    #[error("ssh error: {0}")]
    Ssh(String),

    #[error("ssh handshake or auth timed out")]
    SshTimeout,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("no credentials available for this call")]
    NoCredentials,
}
