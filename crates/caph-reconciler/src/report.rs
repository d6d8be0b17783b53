use std::time::Duration;

/// What the caller (the scheduler, see `caph-scheduler`) should do after one
/// reconcile step: settle into idleness, requeue itself after a short delay
/// to continue a multi-step operation, or park until the cluster's
/// rate-limit window clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The object reached a stable state (`available`/`provisioned` with
    /// nothing pending); idle until the next external event (informer
    /// update, annotation change) wakes the queue.
    Idle,
    /// Progress was made internally; requeue after the given delay to
    /// continue the multi-step operation.
    Requeue(Duration),
    /// The vendor API is rate-limited; requeue at the cluster's
    /// `rate_limit.expires_at` rather than applying ordinary back-off.
    RateLimited,
}

impl StepOutcome {
    pub fn requeue_now() -> Self {
        StepOutcome::Requeue(Duration::ZERO)
    }
}
