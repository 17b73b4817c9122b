use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::observability::Logger;
use crate::session::SessionCache;
use crate::shutdown;
use crate::store::DocumentStore;
use crate::sync::{
    BootstrapSequence, Document, DocumentKey, EventBatch, EventsOutcome, Instance, InstanceRegistry,
    Interest, PositionMetadata, RegistryStats, Snapshot, SubmitOutcome, SyncError, SyncResult,
    UserId, UserPosition, Wake,
};

/// Service-level timing
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Long-poll timeout when the client does not ask for one
    pub default_waiter_timeout: Duration,
    /// Upper bound on any requested long-poll timeout
    pub max_waiter_timeout: Duration,
    /// Instances idle this long are evicted by the sweeper
    pub idle_evict: Duration,
    pub sweep_interval: Duration,
    /// Positions not refreshed within this window are dropped
    pub position_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_waiter_timeout: Duration::from_secs(120),
            max_waiter_timeout: Duration::from_secs(300),
            idle_evict: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
            position_ttl: Duration::from_secs(300),
        }
    }
}

/// What one sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub instances_evicted: usize,
    pub positions_pruned: usize,
    pub sessions_expired: usize,
}

/// Document sync operations
pub struct SyncService<D: Document> {
    registry: Arc<InstanceRegistry<D>>,
    store: Arc<dyn DocumentStore<D>>,
    config: ServiceConfig,
}

impl<D: Document> SyncService<D> {
    pub fn new(
        config: ServiceConfig,
        registry: Arc<InstanceRegistry<D>>,
        store: Arc<dyn DocumentStore<D>>,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry<D>> {
        &self.registry
    }

    /// Full content, version and positions
    pub async fn get_snapshot(&self, key: &DocumentKey) -> SyncResult<Snapshot> {
        self.registry.get(key).await?.snapshot()
    }

    /// Submit a step batch based on `base_version`
    pub async fn submit_steps(
        &self,
        key: &DocumentKey,
        base_version: u64,
        steps: Vec<D::Step>,
        client_id: &str,
        user_id: UserId,
    ) -> SyncResult<SubmitOutcome<D::Step>> {
        let instance = self.registry.get(key).await?;
        instance
            .submit_steps(base_version, steps, client_id, user_id)
            .await
    }

    /// Events after `since_version`, waiting up to `timeout` if there are none yet
    ///
    /// Returns `NoNewData` when the wait expires without a change.
    pub async fn await_events(
        &self,
        key: &DocumentKey,
        since_version: u64,
        exclude_user: Option<UserId>,
        timeout: Option<Duration>,
    ) -> SyncResult<EventsOutcome<D::Step>> {
        let instance = self.registry.get(key).await?;
        if let EventsOutcome::Events(batch) = instance.get_events(since_version)? {
            return Ok(EventsOutcome::Events(batch));
        }

        let handle = instance.add_waiter(since_version, exclude_user, Interest::Events)?;
        match handle.wait(self.clamp(timeout)).await {
            Wake::Invalidated => Err(SyncError::Invalidated),
            Wake::TimedOut => Ok(EventsOutcome::NoNewData {
                version: instance.version(),
            }),
            Wake::VersionAdvanced { .. } => instance.get_events(since_version),
            Wake::PositionsChanged => Self::positions_only(&instance, since_version),
        }
    }

    /// A position change with no new steps still delivers the board
    fn positions_only(instance: &Instance<D>, since_version: u64) -> SyncResult<EventsOutcome<D::Step>> {
        match instance.get_events(since_version)? {
            EventsOutcome::NoNewData { version } => Ok(EventsOutcome::Events(EventBatch {
                version,
                steps: Vec::new(),
                positions: instance.extract_positions(None)?,
            })),
            events => Ok(events),
        }
    }

    /// Replace the caller's cursor position
    pub async fn report_position(
        &self,
        key: &DocumentKey,
        user_id: UserId,
        metadata: PositionMetadata,
    ) -> SyncResult<UserPosition> {
        self.registry.get(key).await?.register_position(user_id, metadata)
    }

    /// Everyone else's positions, optionally after waiting for a change
    pub async fn poll_positions(
        &self,
        key: &DocumentKey,
        exclude_user: Option<UserId>,
        poll: bool,
        timeout: Option<Duration>,
    ) -> SyncResult<Vec<UserPosition>> {
        let instance = self.registry.get(key).await?;
        if poll {
            let handle = instance.add_waiter(instance.version(), exclude_user, Interest::Positions)?;
            if handle.wait(self.clamp(timeout)).await == Wake::Invalidated {
                return Err(SyncError::Invalidated);
            }
        }
        instance.extract_positions(exclude_user)
    }

    /// Create a document and its entity placeholders, then load it
    pub async fn create_document(&self, key: &DocumentKey, document: D) -> SyncResult<Snapshot> {
        BootstrapSequence::for_new_document(document)
            .run(self.store.as_ref(), key)
            .await?;
        self.get_snapshot(key).await
    }

    /// Retire the live instance for `key`
    pub fn invalidate(&self, key: &DocumentKey) -> bool {
        self.registry.invalidate(key)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    fn clamp(&self, timeout: Option<Duration>) -> Duration {
        timeout
            .unwrap_or(self.config.default_waiter_timeout)
            .min(self.config.max_waiter_timeout)
    }

    /// One housekeeping pass
    pub fn sweep(&self, sessions: Option<&SessionCache>) -> SweepReport {
        let position_ttl = chrono::Duration::from_std(self.config.position_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        // Prune before evicting so positions on evicted instances are counted.
        let positions_pruned = self.registry.prune_positions(position_ttl);
        let report = SweepReport {
            instances_evicted: self.registry.evict_idle(self.config.idle_evict),
            positions_pruned,
            sessions_expired: sessions.map_or(0, |s| s.purge_expired()),
        };
        if report != SweepReport::default() {
            Logger::info(
                "SWEEP_COMPLETE",
                &[
                    ("instances_evicted", &report.instances_evicted.to_string()),
                    ("positions_pruned", &report.positions_pruned.to_string()),
                    ("sessions_expired", &report.sessions_expired.to_string()),
                ],
            );
        }
        report
    }

    /// Run `sweep` every `sweep_interval` until shutdown
    pub fn spawn_sweeper(
        self: Arc<Self>,
        sessions: Option<Arc<SessionCache>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.sweep_interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(sessions.as_deref());
                    }
                    _ = shutdown::signalled(&mut shutdown) => break,
                }
            }
        })
    }

    /// Retire every instance; parked long-polls resolve as invalidated
    pub fn shutdown(&self) -> usize {
        let drained = self.registry.drain();
        Logger::info("SYNC_SERVICE_DRAINED", &[("instances", &drained.to_string())]);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsRegistry;
    use crate::store::MemoryDocumentStore;
    use crate::sync::{Block, BlockDocument, BlockStep, RegistryConfig};
    use uuid::Uuid;

    fn service() -> (Arc<MemoryDocumentStore<BlockDocument>>, SyncService<BlockDocument>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = Arc::new(InstanceRegistry::new(
            RegistryConfig::default(),
            store.clone(),
            Arc::new(MetricsRegistry::new()),
        ));
        let config = ServiceConfig {
            max_waiter_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        (store.clone(), SyncService::new(config, registry, store))
    }

    fn meta(name: &str) -> PositionMetadata {
        PositionMetadata {
            entity_id: None,
            shortname: name.into(),
            display_name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_create_then_submit() {
        let (_, service) = service();
        let key = DocumentKey::new("acme", Uuid::new_v4());

        let snapshot = service.create_document(&key, BlockDocument::new()).await.unwrap();
        assert_eq!(snapshot.version, 0);

        let step = BlockStep::InsertBlock { index: 0, block: Block::new("p", "x") };
        let outcome = service
            .submit_steps(&key, 0, vec![step], "c1", Uuid::new_v4())
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_await_events_times_out_with_no_change() {
        let (_, service) = service();
        let key = DocumentKey::new("acme", Uuid::new_v4());
        service.create_document(&key, BlockDocument::new()).await.unwrap();

        let outcome = service
            .await_events(&key, 0, None, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(outcome, EventsOutcome::NoNewData { version: 0 });
        assert_eq!(service.registry().stats().waiters, 0);
    }

    #[tokio::test]
    async fn test_position_change_wakes_event_poll() {
        let (_, service) = service();
        let service = Arc::new(service);
        let key = DocumentKey::new("acme", Uuid::new_v4());
        service.create_document(&key, BlockDocument::new()).await.unwrap();
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());

        let poll = {
            let (service, key) = (service.clone(), key.clone());
            tokio::spawn(async move { service.await_events(&key, 0, Some(me), Some(Duration::from_secs(5))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.report_position(&key, other, meta("other")).await.unwrap();

        match poll.await.unwrap().unwrap() {
            EventsOutcome::Events(batch) => {
                assert!(batch.steps.is_empty());
                assert_eq!(batch.positions.len(), 1);
            }
            other => panic!("expected positions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_clamped() {
        let (_, service) = service();
        let key = DocumentKey::new("acme", Uuid::new_v4());
        service.create_document(&key, BlockDocument::new()).await.unwrap();

        let started = std::time::Instant::now();
        let positions = service
            .poll_positions(&key, None, true, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(positions.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sweep_evicts_and_prunes() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = Arc::new(InstanceRegistry::new(
            RegistryConfig::default(),
            store.clone(),
            Arc::new(MetricsRegistry::new()),
        ));
        let config = ServiceConfig {
            idle_evict: Duration::ZERO,
            position_ttl: Duration::ZERO,
            ..Default::default()
        };
        let service = SyncService::new(config, registry, store);
        let key = DocumentKey::new("acme", Uuid::new_v4());
        service.create_document(&key, BlockDocument::new()).await.unwrap();
        service.report_position(&key, Uuid::new_v4(), meta("ana")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = service.sweep(None);
        assert_eq!(report.positions_pruned, 1);
        assert_eq!(report.instances_evicted, 1);
        assert!(service.registry().is_empty());
    }
}
