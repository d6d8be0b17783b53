//! The reconcile scheduler: one work queue per object kind, a configurable
//! worker pool per queue, single-flight dedup, and rate-limit-aware
//! requeue. This crate knows nothing about hosts, machines, or robots —
//! it drives an opaque key through a caller-supplied async handler and
//! acts only on the [`WorkOutcome`] the handler returns.

mod queue;
mod worker;

pub use queue::WorkQueue;
pub use worker::{run_workers, WorkOutcome};

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Identifies one reconcilable object across the three queues this
/// scheduler runs. The scheduler treats this as an opaque dedup key; only
/// `caph-manager`'s wiring interprets the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    Host(String),
    Machine(String),
    Remediation(String),
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKey::Host(n) => write!(f, "host/{n}"),
            ObjectKey::Machine(n) => write!(f, "machine/{n}"),
            ObjectKey::Remediation(n) => write!(f, "remediation/{n}"),
        }
    }
}

/// Per-queue worker counts, taken from `caph-config::Flags`.
#[derive(Debug, Clone, Copy)]
pub struct Concurrency {
    pub host: usize,
    pub machine: usize,
    pub remediation: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self { host: 1, machine: 4, remediation: 1 }
    }
}

/// Owns the three per-kind queues and the shutdown signal the worker pools
/// select against. Created once at manager startup; `host()`/`machine()`/
/// `remediation()` give `caph-manager` a handle to `add()` keys discovered
/// from a sync-period sweep, and `run(...)` spawns the worker pools
/// against caller-supplied handlers.
pub struct Scheduler {
    host_queue: Arc<WorkQueue<String>>,
    machine_queue: Arc<WorkQueue<String>>,
    remediation_queue: Arc<WorkQueue<String>>,
    concurrency: Concurrency,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(concurrency: Concurrency) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            host_queue: Arc::new(WorkQueue::new()),
            machine_queue: Arc::new(WorkQueue::new()),
            remediation_queue: Arc::new(WorkQueue::new()),
            concurrency,
            shutdown,
        }
    }

    pub fn host_queue(&self) -> Arc<WorkQueue<String>> {
        Arc::clone(&self.host_queue)
    }

    pub fn machine_queue(&self) -> Arc<WorkQueue<String>> {
        Arc::clone(&self.machine_queue)
    }

    pub fn remediation_queue(&self) -> Arc<WorkQueue<String>> {
        Arc::clone(&self.remediation_queue)
    }

    /// Runs all three worker pools concurrently until [`Scheduler::shutdown`]
    /// is called. Each `handler_*` is invoked with the bare object name
    /// (namespace/name key) dequeued from its respective queue.
    pub async fn run<HFut, MFut, RFut>(
        &self,
        host_handler: impl Fn(String) -> HFut + Send + Sync + 'static,
        machine_handler: impl Fn(String) -> MFut + Send + Sync + 'static,
        remediation_handler: impl Fn(String) -> RFut + Send + Sync + 'static,
    ) where
        HFut: std::future::Future<Output = WorkOutcome> + Send + 'static,
        MFut: std::future::Future<Output = WorkOutcome> + Send + 'static,
        RFut: std::future::Future<Output = WorkOutcome> + Send + 'static,
    {
        let rx = self.shutdown.subscribe();
        tokio::join!(
            run_workers(self.host_queue(), self.concurrency.host, rx.clone(), host_handler),
            run_workers(self.machine_queue(), self.concurrency.machine, rx.clone(), machine_handler),
            run_workers(
                self.remediation_queue(),
                self.concurrency.remediation,
                rx,
                remediation_handler
            ),
        );
    }

    /// Signals every worker pool to stop pulling new work. In-flight
    /// handler calls are left to finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn scheduler_drains_each_queue_through_its_own_handler() {
        let scheduler = Arc::new(Scheduler::new(Concurrency { host: 1, machine: 1, remediation: 1 }));
        let host_calls = Arc::new(AtomicUsize::new(0));
        let machine_calls = Arc::new(AtomicUsize::new(0));
        let remediation_calls = Arc::new(AtomicUsize::new(0));

        scheduler.host_queue().add("default/h1".to_string());
        scheduler.machine_queue().add("default/m1".to_string());
        scheduler.remediation_queue().add("default/r1".to_string());

        let (h, m, r) = (Arc::clone(&host_calls), Arc::clone(&machine_calls), Arc::clone(&remediation_calls));
        let scheduler2 = Arc::clone(&scheduler);
        let run = tokio::spawn(async move {
            scheduler2
                .run(
                    move |_k| {
                        let h = Arc::clone(&h);
                        async move {
                            h.fetch_add(1, Ordering::SeqCst);
                            WorkOutcome::Idle
                        }
                    },
                    move |_k| {
                        let m = Arc::clone(&m);
                        async move {
                            m.fetch_add(1, Ordering::SeqCst);
                            WorkOutcome::Idle
                        }
                    },
                    move |_k| {
                        let r = Arc::clone(&r);
                        async move {
                            r.fetch_add(1, Ordering::SeqCst);
                            WorkOutcome::Idle
                        }
                    },
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(host_calls.load(Ordering::SeqCst), 1);
        assert_eq!(machine_calls.load(Ordering::SeqCst), 1);
        assert_eq!(remediation_calls.load(Ordering::SeqCst), 1);

        scheduler.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), run).await;
    }

    #[test]
    fn object_key_display_is_kind_slash_name() {
        assert_eq!(ObjectKey::Host("default/h1".into()).to_string(), "host/default/h1");
    }
}
