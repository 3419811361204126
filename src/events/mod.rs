//! In-process event bus.
//!
//! Topic-addressed publish/subscribe with at-most-once delivery. `publish`
//! never blocks: every subscriber owns a bounded buffer drained by its own
//! worker task, and when the buffer is full the oldest pending event is
//! evicted and counted in `event_bus_dropped_total`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod handlers;

pub use handlers::EventHandlers;

/// Topic names published by the monitoring core.
pub mod topics {
    pub const MONITOR_TASK_CREATED: &str = "gitbeam.commit.monitor.task.created";
    pub const MONITOR_TASK_DELETED: &str = "gitbeam.commit.monitor.task.deleted";
    /// Emitted once per newly persisted commit.
    pub const COMMIT_CREATED: &str = "com.gitbeam.commits.commit.created";
}

/// A published message.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: Vec<u8>,
    pub emitted_at: DateTime<Utc>,
}

struct SubscriberQueue {
    topic: String,
    pending: Mutex<VecDeque<Event>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn push(&self, event: Event) {
        let evicted = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            let evicted = if pending.len() >= self.capacity {
                pending.pop_front()
            } else {
                None
            };
            pending.push_back(event);
            evicted
        };

        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!("event_bus_dropped_total", "topic" => self.topic.clone()).increment(1);
            debug!(topic = %self.topic, "subscriber buffer full; dropped oldest event");
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        self.pending
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .pop_front()
    }
}

struct BusInner {
    subscribers: RwLock<HashMap<String, Vec<Arc<SubscriberQueue>>>>,
    capacity: usize,
    shutdown: CancellationToken,
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Events evicted from this subscriber's buffer so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Stops the worker; events still buffered are discarded.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl EventBus {
    /// Creates a bus whose subscribers buffer at most `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Fan `payload` out to every current subscriber of `topic` without waiting.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) {
        let event = Event {
            topic: topic.to_string(),
            payload,
            emitted_at: Utc::now(),
        };

        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        match subscribers.get(topic) {
            Some(queues) => {
                for queue in queues {
                    queue.push(event.clone());
                }
            }
            None => debug!(topic, "no subscribers for topic"),
        }
    }

    /// Serialize `value` as JSON and publish it.
    pub fn publish_json<T: Serialize>(&self, topic: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(payload) => self.publish(topic, payload),
            Err(error) => warn!(topic, %error, "failed to serialize event payload"),
        }
    }

    /// Register `handler` for `topic`. Events are delivered serially, in
    /// publish order, on a dedicated worker task.
    pub fn subscribe<F, Fut>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue = Arc::new(SubscriberQueue {
            topic: topic.to_string(),
            pending: Mutex::new(VecDeque::with_capacity(self.inner.capacity)),
            capacity: self.inner.capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        let cancel = self.inner.shutdown.child_token();

        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(Arc::clone(&queue));

        let worker_queue = Arc::clone(&queue);
        let worker_cancel = cancel.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                if worker_cancel.is_cancelled() {
                    break;
                }
                match worker_queue.pop() {
                    Some(event) => handler(event).await,
                    None => {
                        tokio::select! {
                            _ = worker_queue.notify.notified() => {}
                            _ = worker_cancel.cancelled() => break,
                        }
                    }
                }
            }

            // Detach so publishers stop filling a buffer nobody drains.
            let mut subscribers = inner
                .subscribers
                .write()
                .unwrap_or_else(|poison| poison.into_inner());
            if let Some(queues) = subscribers.get_mut(&worker_queue.topic) {
                queues.retain(|q| !Arc::ptr_eq(q, &worker_queue));
            }
        });

        Subscription { queue, cancel }
    }

    /// Total events evicted across all live subscribers.
    pub fn dropped_total(&self) -> u64 {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .values()
            .flatten()
            .map(|q| q.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// Stops every subscriber worker.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }
}
