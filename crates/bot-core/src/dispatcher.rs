//! Background Dispatcher (C8): the one concurrency primitive
//! the core depends on for LLM/enrichment work — a keyed-sequential,
//! bounded-concurrency queue with drop-oldest backpressure.
//!
//! A daemon task drains a bounded channel in batches and gates
//! concurrency with a semaphore; `tokio::sync::{mpsc, Semaphore}` provide
//! both the channel and the gating.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, Semaphore};

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatcherCounters {
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

struct QueuedItem<P> {
    key: String,
    payload: P,
}

/// Per-key FIFO queues plus a round-robin cursor over the keys that
/// currently have pending work, so no single key can starve the others.
struct Queues<P> {
    by_key: std::collections::BTreeMap<String, VecDeque<P>>,
    key_order: VecDeque<String>,
    total_len: usize,
}

impl<P> Default for Queues<P> {
    fn default() -> Self {
        Self {
            by_key: std::collections::BTreeMap::new(),
            key_order: VecDeque::new(),
            total_len: 0,
        }
    }
}

impl<P> Queues<P> {
    fn push(&mut self, key: String, payload: P) {
        let queue = self.by_key.entry(key.clone()).or_default();
        if queue.is_empty() {
            self.key_order.push_back(key);
        }
        queue.push_back(payload);
        self.total_len += 1;
    }

    /// Drop the single oldest item across all keys.
    fn drop_oldest(&mut self) {
        if let Some(key) = self.key_order.front().cloned() {
            if let Some(queue) = self.by_key.get_mut(&key) {
                queue.pop_front();
                self.total_len -= 1;
                if queue.is_empty() {
                    self.by_key.remove(&key);
                    self.key_order.pop_front();
                }
            }
        }
    }

    /// Pop the next item from the next key in round-robin order whose key
    /// is not currently being processed (`busy_keys`).
    fn pop_next(&mut self, busy_keys: &std::collections::BTreeSet<String>) -> Option<QueuedItem<P>> {
        let rotations = self.key_order.len();
        for _ in 0..rotations {
            let key = self.key_order.pop_front()?;
            if busy_keys.contains(&key) {
                self.key_order.push_back(key);
                continue;
            }
            let queue = self.by_key.get_mut(&key)?;
            let payload = queue.pop_front();
            let has_more = !queue.is_empty();
            if queue.is_empty() {
                self.by_key.remove(&key);
            } else {
                self.key_order.push_back(key.clone());
            }
            if let Some(payload) = payload {
                return Some(QueuedItem { key, payload });
            }
            if has_more {
                continue;
            }
        }
        None
    }
}

/// Bounded, per-key-sequential, bounded-concurrency dispatcher. Items sharing a key run strictly in order, one at a time, no
/// matter how many concurrency slots are free.
pub struct Dispatcher<P> {
    queues: Arc<Mutex<Queues<P>>>,
    busy_keys: Arc<Mutex<std::collections::BTreeSet<String>>>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    notify: Arc<Notify>,
    pending: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            queues: self.queues.clone(),
            busy_keys: self.busy_keys.clone(),
            semaphore: self.semaphore.clone(),
            capacity: self.capacity,
            notify: self.notify.clone(),
            pending: self.pending.clone(),
            active: self.active.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<P: Send + 'static> Dispatcher<P> {
    pub fn new(capacity: usize, max_concurrency: usize) -> Self {
        Self {
            queues: Arc::new(Mutex::new(Queues::default())),
            busy_keys: Arc::new(Mutex::new(std::collections::BTreeSet::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            capacity: capacity.max(1),
            notify: Arc::new(Notify::new()),
            pending: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current `depth / capacity`.
    pub async fn queue_utilization(&self) -> f64 {
        let queues = self.queues.lock().await;
        queues.total_len as f64 / self.capacity as f64
    }

    pub fn counters(&self) -> DispatcherCounters {
        DispatcherCounters {
            pending: self.pending.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Enqueue `payload` under `key`, dropping the oldest queued item
    /// (across all keys) if at capacity.
    pub async fn enqueue(&self, key: impl Into<String>, payload: P) {
        let mut queues = self.queues.lock().await;
        if queues.total_len >= self.capacity {
            queues.drop_oldest();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queues.push(key.into(), payload);
        self.pending.fetch_add(1, Ordering::Relaxed);
        drop(queues);
        self.notify.notify_one();
    }

    /// Drain and process items with `handler`, honoring per-key ordering
    /// and the global concurrency gate, until `shutdown` resolves.
    pub async fn run<F, Fut>(&self, handler: F, mut shutdown: impl std::future::Future<Output = ()> + Unpin)
    where
        F: Fn(String, P) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let item = loop {
                let mut queues = self.queues.lock().await;
                let busy = self.busy_keys.lock().await;
                if let Some(item) = queues.pop_next(&busy) {
                    break Some(item);
                }
                drop(busy);
                drop(queues);
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = &mut shutdown => break None,
                }
            };
            let Some(item) = item else { break };

            self.busy_keys.lock().await.insert(item.key.clone());
            let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            self.pending.fetch_sub(1, Ordering::Relaxed);
            self.active.fetch_add(1, Ordering::Relaxed);

            let dispatcher = self.clone();
            let handler = handler.clone();
            let key = item.key.clone();
            tokio::spawn(async move {
                let ok = handler(item.key, item.payload).await;
                drop(permit);
                dispatcher.active.fetch_sub(1, Ordering::Relaxed);
                if ok {
                    dispatcher.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    dispatcher.failed.fetch_add(1, Ordering::Relaxed);
                }
                dispatcher.busy_keys.lock().await.remove(&key);
                dispatcher.notify.notify_one();
            });
        }
    }
}

/// `{<0.1 -> 3x, <0.3 -> 2x, <0.6 -> 1x, <0.8 -> 0.5x, >=0.8 -> 0.1x} * base_rate`.
pub fn adaptive_sample_rate(queue_utilization: f64, base_rate: f64) -> f64 {
    let multiplier = if queue_utilization < 0.1 {
        3.0
    } else if queue_utilization < 0.3 {
        2.0
    } else if queue_utilization < 0.6 {
        1.0
    } else if queue_utilization < 0.8 {
        0.5
    } else {
        0.1
    };
    (base_rate * multiplier).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn adaptive_sample_rate_scales_down_as_queue_fills() {
        assert_eq!(adaptive_sample_rate(0.05, 0.1), 0.3);
        assert_eq!(adaptive_sample_rate(0.5, 0.1), 0.1);
        assert!((adaptive_sample_rate(0.9, 0.1) - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn enqueue_at_capacity_drops_oldest_and_counts_exactly_one() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(2, 1);
        dispatcher.enqueue("k1", 1).await;
        dispatcher.enqueue("k1", 2).await;
        dispatcher.enqueue("k1", 3).await;
        assert_eq!(dispatcher.counters().dropped, 1);
    }

    #[tokio::test]
    async fn same_key_items_process_strictly_in_order() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(100, 4);
        for i in 0..5 {
            dispatcher.enqueue("same-key", i).await;
        }
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let dispatcher_clone = dispatcher.clone();
        let handle = tokio::spawn(async move {
            dispatcher_clone
                .run(
                    move |_key, payload: u32| {
                        let order = order_clone.clone();
                        async move {
                            order.lock().await.push(payload);
                            true
                        }
                    },
                    Box::pin(async move {
                        let _ = shutdown_rx.await;
                    }),
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn distinct_keys_run_concurrently_up_to_the_concurrency_cap() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(100, 4);
        for key in ["a", "b", "c", "d"] {
            dispatcher.enqueue(key, 1).await;
        }
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let concurrent_clone = concurrent.clone();
        let max_seen_clone = max_seen.clone();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let dispatcher_clone = dispatcher.clone();
        let handle = tokio::spawn(async move {
            dispatcher_clone
                .run(
                    move |_key, _payload: u32| {
                        let concurrent = concurrent_clone.clone();
                        let max_seen = max_seen_clone.clone();
                        async move {
                            let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            concurrent.fetch_sub(1, Ordering::SeqCst);
                            true
                        }
                    },
                    Box::pin(async move {
                        let _ = shutdown_rx.await;
                    }),
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(max_seen.load(Ordering::SeqCst) >= 2);
    }
}
