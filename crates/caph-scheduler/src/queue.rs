use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;

/// A level-triggered work queue with single-flight dedup by key: at most
/// one worker processes a given key at a time, and an `add` that arrives
/// while a key is already being processed is remembered rather than
/// dropped, so the key is reprocessed exactly once more after the current
/// pass finishes. This is the same debounce shape Kubernetes controllers
/// universally build their reconcile queues on.
pub struct WorkQueue<K> {
    order: Mutex<VecDeque<K>>,
    dirty: DashMap<K, ()>,
    processing: DashMap<K, ()>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { order: Mutex::new(VecDeque::new()), dirty: DashMap::new(), processing: DashMap::new() }
    }

    /// Enqueue `item` for processing. A no-op if `item` is already pending;
    /// if `item` is currently being processed, it is marked to be
    /// reprocessed once the in-flight pass calls [`WorkQueue::done`].
    pub fn add(&self, item: K) {
        if self.dirty.insert(item.clone(), ()).is_some() {
            return;
        }
        if self.processing.contains_key(&item) {
            return;
        }
        self.order.lock().unwrap().push_back(item);
        self.notify.notify_one();
    }

    /// Enqueue `item` after `delay`. Used for ordinary requeue back-off and
    /// rate-limit-aware scheduling; the spawned timer is detached; a
    /// shutdown in the meantime simply means the delayed `add` is a no-op
    /// observation on a queue nobody is draining anymore.
    pub fn add_after(self: &Arc<Self>, item: K, delay: std::time::Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Block until an item is available, marking it as in-flight. Returns
    /// `None` only if the queue is dropped while a caller is waiting.
    pub async fn get(&self) -> K {
        loop {
            if let Some(item) = self.order.lock().unwrap().pop_front() {
                self.dirty.remove(&item);
                self.processing.insert(item.clone(), ());
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Mark `item`'s processing pass complete. If it was re-added while in
    /// flight, it goes back on the order queue for another pass.
    pub fn done(&self, item: &K) {
        self.processing.remove(item);
        if self.dirty.contains_key(item) {
            self.order.lock().unwrap().push_back(item.clone());
            self.notify.notify_one();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.order.lock().unwrap().len()
    }
}
