mod cluster;
mod error;
mod fingerprint;
mod host;
mod ids;
mod machine;
mod remediation;
mod selector;

pub use cluster::{Cluster, ClusterCredentialsRef, RateLimitState};
pub use error::DomainError;
pub use fingerprint::Fingerprint;
pub use host::{
    ConsumerRef, Disk, ErrorType, Host, HostStatus, InstallImage, ProvisioningState, RebootType,
    RootDeviceHints, SecretStatus, SshSpec, SshStatus,
};
pub use ids::{ClusterName, HostName, MachineName, NamespacedName, RemediationName};
pub use machine::Machine;
pub use remediation::{Remediation, RemediationPhase, RemediationStrategy, RemediationStrategyType};
pub use selector::{HostSelector, SelectorOperator, SelectorRequirement};
