use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{MachineName, RemediationName};

/// The only remediation strategy this core implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStrategyType {
    Reboot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationStrategy {
    #[serde(rename = "type")]
    pub strategy_type: RemediationStrategyType,
    pub retry_limit: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl RemediationStrategy {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.timeout.is_zero() {
            return Err(DomainError::InvalidRemediationStrategy(
                "timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationPhase {
    Running,
    Waiting,
    DeletingMachine,
    Failed,
}

impl std::fmt::Display for RemediationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemediationPhase::Running => "Running",
            RemediationPhase::Waiting => "Waiting",
            RemediationPhase::DeletingMachine => "Deleting machine",
            RemediationPhase::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    pub name: RemediationName,
    pub machine_ref: MachineName,
    pub strategy: RemediationStrategy,
    pub phase: RemediationPhase,
    pub retry_count: u32,
}

impl Remediation {
    /// `retryCount >= retryLimit` — including the `retryLimit == 0` boundary,
    /// which must route straight to `DeletingMachine` without a `Waiting`
    /// cycle first.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.strategy.retry_limit
    }
}
