use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("root device hints must set exactly one of wwn or raid, got: {0}")]
    InvalidRootDeviceHints(String),

    #[error("invalid host selector: {0}")]
    InvalidSelector(String),

    #[error("invalid remediation strategy: {0}")]
    InvalidRemediationStrategy(String),

    #[error("invalid fingerprint '{0}': not a recognized sha256-hex or legacy md5-colon value")]
    InvalidFingerprint(String),

    #[error("invalid reboot annotation payload: {0}")]
    InvalidRebootAnnotation(String),
}
