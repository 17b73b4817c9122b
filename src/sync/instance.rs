//! # Instance
//!
//! Live synchronization state for one document: materialized content, the
//! current version, the version log, the position board and parked waiters.
//!
//! ## Serialization
//! All state transitions happen under one short-held mutex, so observers see
//! a total order of submissions, position reports, waiter resolution and
//! invalidation. Submissions additionally pass an async write gate that is
//! held while the batch is persisted; the state mutex is never held across
//! an await, and parked waiters hold neither.
//!
//! ## Lifecycle
//! `Live → Invalidated`. Invalidation is terminal; the registry builds a new
//! instance for the key on next access.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use super::document::{Document, DocumentKey, EntityId, UserId};
use super::errors::{SyncError, SyncResult};
use super::positions::{PositionBoard, PositionMetadata, UserPosition};
use super::version_log::{LogEntry, VersionLog};
use super::waiter::{Interest, Wake, Waiter, WaiterId, WaiterSet};
use crate::observability::{Logger, MetricsRegistry};
use crate::store::{DocumentStore, LoadedDocument, StoreError};

/// Upper bound for the persist retry backoff
const MAX_PERSIST_BACKOFF: Duration = Duration::from_secs(5);

/// Per-instance tuning
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Log entries retained for incremental catch-up
    pub max_log_len: usize,
    /// Retries of a transient store failure while persisting a batch
    pub persist_retries: u32,
    /// First persist retry delay; doubles per attempt
    pub persist_backoff: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            max_log_len: 1000,
            persist_retries: 3,
            persist_backoff: Duration::from_millis(100),
        }
    }
}

/// Result of a step submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome<S> {
    /// Steps appended; `steps` are the new log entries
    Accepted { version: u64, steps: Vec<LogEntry<S>> },
    /// `base_version` was behind; nothing changed
    Stale { current_version: u64 },
}

/// Steps and positions newer than a client's version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBatch<S> {
    pub version: u64,
    pub steps: Vec<LogEntry<S>>,
    pub positions: Vec<UserPosition>,
}

/// Result of an events read
#[derive(Debug, Clone, PartialEq)]
pub enum EventsOutcome<S> {
    /// The client is already at the current version
    NoNewData { version: u64 },
    Events(EventBatch<S>),
}

/// Full state for a client starting from scratch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub content: Value,
    pub version: u64,
    pub positions: Vec<UserPosition>,
}

/// Point-in-time counters for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStats {
    pub version: u64,
    pub log_len: usize,
    pub waiters: usize,
    pub positions: usize,
    pub oldest_waiter_ms: Option<u64>,
}

struct InstanceInner<D: Document> {
    document: D,
    version: u64,
    log: VersionLog<D::Step>,
    positions: PositionBoard,
    waiters: WaiterSet,
    invalidated: bool,
    last_active: Instant,
}

/// The per-document synchronization actor
pub struct Instance<D: Document> {
    key: DocumentKey,
    store: Arc<dyn DocumentStore<D>>,
    metrics: Arc<MetricsRegistry>,
    inner: Mutex<InstanceInner<D>>,
    write_gate: tokio::sync::Mutex<()>,
    persist_retries: u32,
    persist_backoff: Duration,
}

impl<D: Document> Instance<D> {
    /// Build a live instance from freshly loaded content
    pub fn new(
        key: DocumentKey,
        loaded: LoadedDocument<D>,
        config: &InstanceConfig,
        store: Arc<dyn DocumentStore<D>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let inner = InstanceInner {
            document: loaded.document,
            version: loaded.version,
            log: VersionLog::new(loaded.version, config.max_log_len),
            positions: PositionBoard::new(),
            waiters: WaiterSet::new(),
            invalidated: false,
            last_active: Instant::now(),
        };
        Self {
            key,
            store,
            metrics,
            inner: Mutex::new(inner),
            write_gate: tokio::sync::Mutex::new(()),
            persist_retries: config.persist_retries,
            persist_backoff: config.persist_backoff,
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, InstanceInner<D>>> {
        self.inner
            .lock()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))
    }

    /// Lock a live instance, refreshing its activity timestamp
    fn lock_live(&self) -> SyncResult<MutexGuard<'_, InstanceInner<D>>> {
        let mut inner = self.lock()?;
        if inner.invalidated {
            return Err(SyncError::Invalidated);
        }
        inner.last_active = Instant::now();
        Ok(inner)
    }

    /// Current content, version and every position
    pub fn snapshot(&self) -> SyncResult<Snapshot> {
        let inner = self.lock_live()?;
        Ok(Snapshot {
            content: inner.document.to_json(),
            version: inner.version,
            positions: inner.positions.snapshot(None),
        })
    }

    /// Steps after `since_version` plus the full position board
    pub fn get_events(&self, since_version: u64) -> SyncResult<EventsOutcome<D::Step>> {
        let inner = self.lock_live()?;
        let steps = inner.log.since(since_version)?;
        if since_version == inner.version {
            return Ok(EventsOutcome::NoNewData {
                version: inner.version,
            });
        }
        Ok(EventsOutcome::Events(EventBatch {
            version: inner.version,
            steps,
            positions: inner.positions.snapshot(None),
        }))
    }

    /// Append a batch if `base_version` is current
    ///
    /// The batch is validated against a staged copy and persisted before
    /// anything in memory changes, so a failed persist leaves version, log
    /// and content exactly as they were.
    pub async fn submit_steps(
        &self,
        base_version: u64,
        steps: Vec<D::Step>,
        client_id: &str,
        user_id: UserId,
    ) -> SyncResult<SubmitOutcome<D::Step>> {
        if steps.is_empty() {
            return Err(SyncError::InvalidSteps("empty step batch".into()));
        }

        let _gate = self.write_gate.lock().await;

        let staged = {
            let inner = self.lock_live()?;
            if base_version != inner.version {
                self.metrics.increment_submissions_stale();
                Logger::trace(
                    "SUBMIT_STALE",
                    &[
                        ("document", &self.key.to_string()),
                        ("base_version", &base_version.to_string()),
                        ("version", &inner.version.to_string()),
                    ],
                );
                return Ok(SubmitOutcome::Stale {
                    current_version: inner.version,
                });
            }
            let mut staged = inner.document.clone();
            staged
                .apply_all(&steps)
                .map_err(|e| SyncError::InvalidSteps(e.to_string()))?;
            staged
        };

        self.persist(base_version, &steps).await?;

        let mut inner = self.lock_live()?;
        inner.document = staged;
        let entries = inner.log.append(&steps, client_id, user_id);
        inner.version += steps.len() as u64;
        debug_assert_eq!(inner.version, inner.log.head_version());

        let version = inner.version;
        let woken = inner.waiters.wake_version(version);
        drop(inner);

        self.metrics.increment_steps_accepted(steps.len() as u64);
        for _ in 0..woken {
            self.metrics.increment_waiters_woken();
        }

        Ok(SubmitOutcome::Accepted {
            version,
            steps: entries,
        })
    }

    /// Write a batch through to the store, retrying transient failures.
    ///
    /// Runs under the write gate, so the base version cannot move between
    /// attempts. A conflict means durable state moved without this instance,
    /// which is then invalidated.
    async fn persist(&self, base_version: u64, steps: &[D::Step]) -> SyncResult<()> {
        let mut attempt = 0;
        let mut backoff = self.persist_backoff;

        loop {
            let err = match self.store.persist_steps(&self.key, base_version, steps).await {
                Ok(_) => return Ok(()),
                Err(err) => err,
            };

            if err.is_transient() && attempt < self.persist_retries {
                attempt += 1;
                Logger::warn(
                    "STEP_PERSIST_RETRY",
                    &[
                        ("attempt", &attempt.to_string()),
                        ("document", &self.key.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_PERSIST_BACKOFF);
                continue;
            }

            Logger::warn(
                "STEP_PERSIST_FAILED",
                &[
                    ("document", &self.key.to_string()),
                    ("base_version", &base_version.to_string()),
                    ("reason", &err.to_string()),
                ],
            );
            if let StoreError::Conflict { .. } = err {
                self.invalidate();
                return Err(SyncError::Invalidated);
            }
            return Err(err.into());
        }
    }

    /// Positions of everyone except `exclude_user`
    pub fn extract_positions(&self, exclude_user: Option<UserId>) -> SyncResult<Vec<UserPosition>> {
        let inner = self.lock_live()?;
        Ok(inner.positions.snapshot(exclude_user))
    }

    /// Replace a user's position and wake everyone not excluding that user
    pub fn register_position(
        &self,
        user_id: UserId,
        metadata: PositionMetadata,
    ) -> SyncResult<UserPosition> {
        let mut inner = self.lock_live()?;
        let position = inner.positions.register(user_id, metadata);
        let woken = inner.waiters.wake_positions(user_id);
        drop(inner);

        self.metrics.increment_position_reports();
        for _ in 0..woken {
            self.metrics.increment_waiters_woken();
        }
        Ok(position)
    }

    /// Park a waiter
    ///
    /// The wake condition is re-checked under the state lock, so a version
    /// bump between the caller's read and this registration resolves the
    /// handle immediately instead of being missed.
    pub fn add_waiter(
        self: &Arc<Self>,
        requested_version: u64,
        exclude_user: Option<UserId>,
        interest: Interest,
    ) -> SyncResult<WaiterHandle<D>> {
        let mut inner = self.lock_live()?;
        let (waiter, receiver) = Waiter::new(requested_version, exclude_user, interest);

        if waiter.wants_version(inner.version) {
            let version = inner.version;
            waiter.resolve(Wake::VersionAdvanced { version });
            return Ok(WaiterHandle::resolved(Arc::clone(self), receiver));
        }

        let id = inner.waiters.insert(waiter);
        drop(inner);

        self.metrics.increment_waiters_parked();
        Ok(WaiterHandle::parked(Arc::clone(self), id, receiver))
    }

    fn remove_waiter(&self, id: WaiterId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.waiters.remove(id);
        }
    }

    /// Retire the instance and wake every waiter with `Invalidated`
    ///
    /// Returns false if it was already invalidated.
    pub fn invalidate(&self) -> bool {
        self.retire("external_change")
    }

    pub(crate) fn retire(&self, reason: &str) -> bool {
        let woken = match self.inner.lock() {
            Ok(mut inner) => {
                if inner.invalidated {
                    return false;
                }
                inner.invalidated = true;
                inner.waiters.wake_all(Wake::Invalidated)
            }
            Err(_) => return false,
        };

        self.metrics.increment_instances_invalidated();
        for _ in 0..woken {
            self.metrics.increment_waiters_woken();
        }
        Logger::info(
            "INSTANCE_INVALIDATED",
            &[
                ("document", &self.key.to_string()),
                ("reason", reason),
                ("waiters_woken", &woken.to_string()),
            ],
        );
        true
    }

    /// Drop positions not refreshed within `max_age`
    pub fn prune_positions(&self, max_age: chrono::Duration) -> usize {
        match self.inner.lock() {
            Ok(mut inner) if !inner.invalidated => inner.positions.prune_stale(max_age).len(),
            _ => 0,
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.lock().map(|i| i.invalidated).unwrap_or(true)
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().map(|i| i.version).unwrap_or(0)
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().map(|i| i.waiters.len()).unwrap_or(0)
    }

    /// Time since the last operation, or `None` while waiters are parked
    pub fn idle_for(&self) -> Option<Duration> {
        let inner = self.inner.lock().ok()?;
        if !inner.waiters.is_empty() {
            return None;
        }
        Some(inner.last_active.elapsed())
    }

    /// Entities embedded in the current content
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.inner
            .lock()
            .map(|i| i.document.entity_ids())
            .unwrap_or_default()
    }

    /// Whether an out-of-band change to `entity_id` affects this document
    pub fn embeds(&self, entity_id: &EntityId) -> bool {
        self.key.document_id == *entity_id || self.entity_ids().contains(entity_id)
    }

    pub fn stats(&self) -> SyncResult<InstanceStats> {
        let inner = self.lock()?;
        Ok(InstanceStats {
            version: inner.version,
            log_len: inner.log.len(),
            waiters: inner.waiters.len(),
            positions: inner.positions.len(),
            oldest_waiter_ms: inner
                .waiters
                .oldest()
                .map(|t| t.elapsed().as_millis() as u64),
        })
    }
}

/// A parked long poll
///
/// Dropping the handle before it resolves deregisters the waiter, which is
/// how a closed client connection releases its slot.
pub struct WaiterHandle<D: Document> {
    instance: Arc<Instance<D>>,
    id: Option<WaiterId>,
    receiver: oneshot::Receiver<Wake>,
}

impl<D: Document> WaiterHandle<D> {
    fn parked(instance: Arc<Instance<D>>, id: WaiterId, receiver: oneshot::Receiver<Wake>) -> Self {
        Self {
            instance,
            id: Some(id),
            receiver,
        }
    }

    fn resolved(instance: Arc<Instance<D>>, receiver: oneshot::Receiver<Wake>) -> Self {
        Self {
            instance,
            id: None,
            receiver,
        }
    }

    /// Wait for a wake or the deadline, whichever comes first
    pub async fn wait(mut self, timeout: Duration) -> Wake {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(wake)) => {
                // The waker already removed us from the set.
                self.id = None;
                wake
            }
            // Sender gone without a wake: the instance was torn down.
            Ok(Err(_)) => {
                self.id = None;
                Wake::Invalidated
            }
            Err(_) => {
                self.instance.metrics.increment_waiters_timed_out();
                Wake::TimedOut
            }
        }
    }

    pub fn instance(&self) -> &Arc<Instance<D>> {
        &self.instance
    }
}

impl<D: Document> Drop for WaiterHandle<D> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.instance.remove_waiter(id);
        }
    }
}
