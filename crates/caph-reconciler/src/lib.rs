//! The three reconcile loops that drive bare-metal provisioning: the host
//! state machine, the machine binder, and the remediation controller. Each
//! is a plain async function over [`caph_store::StateStore`] and
//! [`caph_remote`] — the work-queue scheduling that decides when and how
//! often to call them lives in `caph-scheduler`.

pub mod binder;
pub mod error;
pub mod host;
pub mod liveness;
pub mod remediation;
pub mod report;
pub mod transport;

pub use binder::{bind, release};
pub use error::{HostStepError, ReconcileError};
pub use host::{reconcile_host, HostStepCtx, ResolvedSshSecret};
pub use liveness::LivenessTracker;
pub use remediation::reconcile_remediation;
pub use report::StepOutcome;
pub use transport::{HostTransport, LiveTransport};
