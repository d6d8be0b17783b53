use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid command path '{path}': {reason}")]
    InvalidCommandPath { path: String, reason: String },

    #[error("credentials secret invalid: {0}")]
    Credentials(String),

    #[error("domain error: {0}")]
    Domain(#[from] caph_domain::DomainError),
}
