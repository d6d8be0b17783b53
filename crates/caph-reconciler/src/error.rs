use caph_domain::ErrorType;
use thiserror::Error;

/// What a single reconcile step produced when it did not make forward
/// progress to a stable idle state.
///
/// `Recoverable` errors are surfaced on host status as
/// errorType/errorMessage/errorCount; the operator corrects the underlying
/// input and the next reconcile proceeds normally. `Fatal` errors halt the
/// host and require human intervention, typically clearing the
/// permanent-error annotation once the root cause is fixed. Transient or
/// rate-limited errors from `caph-remote` are caught by the reconcile
/// functions themselves and turned into one of these two, never propagated
/// raw — a reconcile step always produces a classified outcome.
#[derive(Debug, Error)]
pub enum HostStepError {
    #[error("{kind}: {message}")]
    Recoverable { kind: ErrorType, message: String },

    #[error("fatal: {reason} ({message})")]
    Fatal { reason: String, message: String },

    /// The vendor returned 429. Carries the vendor's reset hint so the
    /// caller can record a cluster-scoped expiry (§4.3) instead of treating
    /// this as an ordinary recoverable host error.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl HostStepError {
    pub fn recoverable(kind: ErrorType, message: impl Into<String>) -> Self {
        HostStepError::Recoverable { kind, message: message.into() }
    }

    pub fn fatal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        HostStepError::Fatal { reason: reason.into(), message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] caph_store::StoreError),

    #[error("remote error: {0}")]
    Remote(#[from] caph_remote::RemoteError),

    #[error("domain error: {0}")]
    Domain(#[from] caph_domain::DomainError),

    #[error("select error: {0}")]
    Select(#[from] caph_select::SelectError),

    #[error("no available host matches selector, retry with back-off")]
    NoAvailableHost,

    #[error("remediation strategy invalid: {0}")]
    InvalidRemediation(String),
}
