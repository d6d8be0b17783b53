use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("machine not found: {0}")]
    MachineNotFound(String),

    #[error("remediation not found: {0}")]
    RemediationNotFound(String),

    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// A CAS write's `expected_version` didn't match the stored
    /// `resource_version`. The caller should re-read and retry.
    #[error("resource version conflict: expected {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
