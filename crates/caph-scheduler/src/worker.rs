use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::queue::WorkQueue;

/// What a single pass over a key produced, telling the worker loop how
/// (and whether) to bring the key back onto the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Settled; only a future `add` brings it back.
    Idle,
    /// Multi-step operation in progress, or a transient failure — try
    /// again after the given delay.
    RequeueAfter(StdDuration),
    /// The shared credential/cluster this key belongs to is rate-limited;
    /// don't come back before `until`.
    RateLimitedUntil(DateTime<Utc>),
}

/// Runs `concurrency` worker loops pulling from `queue`, each invoking
/// `handler` once per dequeued key and requeuing per its [`WorkOutcome`].
/// Workers stop pulling new work as soon as `shutdown` observes `true`;
/// in-flight handler calls are allowed to finish.
pub async fn run_workers<K, F, Fut>(
    queue: Arc<WorkQueue<K>>,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
    handler: F,
) where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkOutcome> + Send + 'static,
{
    let handler = Arc::new(handler);
    let mut workers = Vec::with_capacity(concurrency);
    for id in 0..concurrency {
        let queue = Arc::clone(&queue);
        let handler = Arc::clone(&handler);
        let mut shutdown = shutdown.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!(worker = id, "shutting down");
                            break;
                        }
                        continue;
                    }
                    item = queue.get() => item,
                };

                debug!(worker = id, item = ?item, "processing");
                let outcome = handler(item.clone()).await;
                queue.done(&item);

                match outcome {
                    WorkOutcome::Idle => {}
                    WorkOutcome::RequeueAfter(delay) => queue.add_after(item, delay),
                    WorkOutcome::RateLimitedUntil(until) => {
                        let delay = (until - Utc::now())
                            .to_std()
                            .unwrap_or(StdDuration::ZERO);
                        warn!(item = ?item, delay_secs = delay.as_secs(), "rate limited, parking");
                        queue.add_after(item, delay);
                    }
                }
            }
        }));
    }

    for w in workers {
        let _ = w.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;

    #[tokio::test]
    async fn handler_runs_once_per_add_and_idle_settles() {
        let queue = Arc::new(WorkQueue::<&str>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        queue.add("h1");
        let calls2 = Arc::clone(&calls);
        let handle = tokio::spawn(run_workers(Arc::clone(&queue), 1, rx, move |_item| {
            let calls = Arc::clone(&calls2);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                WorkOutcome::Idle
            }
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn requeue_after_brings_the_item_back() {
        let queue = Arc::new(WorkQueue::<&str>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        queue.add("h1");
        let calls2 = Arc::clone(&calls);
        let handle = tokio::spawn(run_workers(Arc::clone(&queue), 1, rx, move |_item| {
            let calls = Arc::clone(&calls2);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    WorkOutcome::RequeueAfter(Duration::from_millis(10))
                } else {
                    WorkOutcome::Idle
                }
            }
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn shutdown_stops_workers_without_panicking() {
        let queue = Arc::new(WorkQueue::<&str>::new());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_workers(Arc::clone(&queue), 2, rx, |_item| async {
            WorkOutcome::Idle
        }));
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }
}
