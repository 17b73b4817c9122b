//! # Change Queue
//!
//! Out-of-band change notifications for entities. A topic has at most one
//! consumer at a time, arbitrated by a renewable lease.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::errors::{QueueError, QueueResult};
use crate::sync::EntityId;

/// What happened to an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    #[default]
    Updated,
    Deleted,
}

/// Notification that an entity changed outside the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: EntityId,
    /// Tenant owning the entity, when the producer knows it
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn updated(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            tenant: None,
            kind: ChangeKind::Updated,
        }
    }
}

/// Stream of decoded events; `Malformed` items may be skipped
pub type EventStream = BoxStream<'static, QueueResult<ChangeEvent>>;

/// Source of change notifications
pub trait ChangeQueue: Send + Sync {
    /// Take or renew exclusive ownership of `topic` for `lease`
    ///
    /// Returns false while another holder's lease is live.
    fn acquire_exclusive<'a>(
        &'a self,
        topic: &'a str,
        holder: &'a str,
        lease: Duration,
    ) -> BoxFuture<'a, QueueResult<bool>>;

    /// Open the event stream for `topic`
    fn consume<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, QueueResult<EventStream>>;
}

struct Lease {
    holder: String,
    expires_at: Instant,
}

type Subscriber = mpsc::UnboundedSender<QueueResult<ChangeEvent>>;

/// In-process change queue
#[derive(Default)]
pub struct MemoryChangeQueue {
    leases: Mutex<HashMap<String, Lease>>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    failing_acquires: AtomicUsize,
}

impl MemoryChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every consumer of `topic`
    pub fn publish(&self, topic: &str, event: ChangeEvent) -> usize {
        self.deliver(topic, Ok(event))
    }

    /// Deliver a raw JSON payload, surfacing decode failures as `Malformed`
    pub fn publish_raw(&self, topic: &str, payload: &str) -> usize {
        let item = serde_json::from_str::<ChangeEvent>(payload)
            .map_err(|e| QueueError::Malformed(e.to_string()));
        self.deliver(topic, item)
    }

    /// Tell consumers of `topic` they lost ownership, and drop the lease
    pub fn revoke(&self, topic: &str) {
        if let Ok(mut leases) = self.leases.lock() {
            leases.remove(topic);
        }
        self.deliver(topic, Err(QueueError::OwnershipLost));
    }

    /// End every stream on `topic`
    pub fn close(&self, topic: &str) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.remove(topic);
        }
    }

    /// Current lease holder, if the lease is live
    pub fn holder(&self, topic: &str) -> Option<String> {
        let leases = self.leases.lock().ok()?;
        leases
            .get(topic)
            .filter(|lease| lease.expires_at > Instant::now())
            .map(|lease| lease.holder.clone())
    }

    /// Live consumers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.get(topic).map_or(0, |list| list.iter().filter(|s| !s.is_closed()).count()))
            .unwrap_or(0)
    }

    /// Make the next `n` acquisitions fail with `Unavailable`
    pub fn fail_acquires(&self, n: usize) {
        self.failing_acquires.store(n, Ordering::SeqCst);
    }

    fn deliver(&self, topic: &str, item: QueueResult<ChangeEvent>) -> usize {
        let Ok(mut subs) = self.subscribers.lock() else {
            return 0;
        };
        let Some(list) = subs.get_mut(topic) else {
            return 0;
        };
        list.retain(|tx| tx.send(item.clone()).is_ok());
        list.len()
    }
}

impl ChangeQueue for MemoryChangeQueue {
    fn acquire_exclusive<'a>(
        &'a self,
        topic: &'a str,
        holder: &'a str,
        lease: Duration,
    ) -> BoxFuture<'a, QueueResult<bool>> {
        Box::pin(async move {
            let failing = self
                .failing_acquires
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(QueueError::Unavailable("injected acquire failure".into()));
            }

            let mut leases = self
                .leases
                .lock()
                .map_err(|_| QueueError::Unavailable("lease lock poisoned".into()))?;
            let now = Instant::now();
            if let Some(current) = leases.get(topic) {
                if current.holder != holder && current.expires_at > now {
                    return Ok(false);
                }
            }
            leases.insert(
                topic.to_string(),
                Lease {
                    holder: holder.to_string(),
                    expires_at: now + lease,
                },
            );
            Ok(true)
        })
    }

    fn consume<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, QueueResult<EventStream>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers
                .lock()
                .map_err(|_| QueueError::Unavailable("subscriber lock poisoned".into()))?
                .entry(topic.to_string())
                .or_default()
                .push(tx);

            let events = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(events.boxed())
        })
    }
}
