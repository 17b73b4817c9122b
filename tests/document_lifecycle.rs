//! Document Lifecycle Tests
//!
//! Creation through the setup sequence, single-flight loading, and the
//! housekeeping sweep.

use std::sync::Arc;
use std::time::Duration;

use docsync::observability::MetricsRegistry;
use docsync::service::{ServiceConfig, SweepReport, SyncService};
use docsync::session::{SessionCache, SessionCacheConfig, StaticIdentity, StaticIdentityResolver};
use docsync::shutdown;
use docsync::store::{DocumentStore, MemoryDocumentStore};
use docsync::sync::{
    Block, BlockDocument, DocumentKey, InstanceRegistry, PositionMetadata, RegistryConfig,
    SyncError,
};
use uuid::Uuid;

// =============================================================================
// Test Utilities
// =============================================================================

struct Harness {
    store: Arc<MemoryDocumentStore<BlockDocument>>,
    service: Arc<SyncService<BlockDocument>>,
}

fn harness(config: ServiceConfig) -> Harness {
    let store = Arc::new(MemoryDocumentStore::<BlockDocument>::new());
    let dyn_store: Arc<dyn DocumentStore<BlockDocument>> = store.clone();
    let registry = Arc::new(InstanceRegistry::new(
        RegistryConfig {
            load_backoff: Duration::from_millis(1),
            ..RegistryConfig::default()
        },
        dyn_store.clone(),
        Arc::new(MetricsRegistry::new()),
    ));
    Harness {
        store,
        service: Arc::new(SyncService::new(config, registry, dyn_store)),
    }
}

fn new_key() -> DocumentKey {
    DocumentKey::new("acme", Uuid::new_v4())
}

fn viewer() -> PositionMetadata {
    PositionMetadata {
        entity_id: None,
        shortname: "eve".to_string(),
        display_name: "Eve".to_string(),
    }
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn test_create_reserves_entities_and_loads() {
    let h = harness(ServiceConfig::default());
    let key = new_key();
    let block = Block::new("paragraph", "hello");
    let block_id = block.entity_id;

    let snapshot = h
        .service
        .create_document(&key, BlockDocument::with_blocks(vec![block]))
        .await
        .unwrap();

    assert_eq!(snapshot.version, 0);
    assert_eq!(snapshot.content["blocks"][0]["text"], "hello");
    assert!(snapshot.positions.is_empty());
    assert_eq!(h.store.entity_owner(&block_id), Some(key.clone()));
    assert!(h.service.registry().peek(&key).is_some());
}

#[tokio::test]
async fn test_create_twice_rejected() {
    let h = harness(ServiceConfig::default());
    let key = new_key();
    let block = Block::new("paragraph", "first");
    let block_id = block.entity_id;
    h.service
        .create_document(&key, BlockDocument::with_blocks(vec![block]))
        .await
        .unwrap();

    let err = h
        .service
        .create_document(&key, BlockDocument::new())
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::AlreadyExists);
    assert_eq!(err.status_code(), 409);
    // The original document keeps its reservations.
    assert_eq!(h.store.entity_owner(&block_id), Some(key));
}

#[tokio::test]
async fn test_entity_owned_elsewhere_blocks_creation() {
    let h = harness(ServiceConfig::default());
    let block = Block::new("paragraph", "owned");
    let first = new_key();
    h.service
        .create_document(&first, BlockDocument::with_blocks(vec![block.clone()]))
        .await
        .unwrap();

    let second = new_key();
    let err = h
        .service
        .create_document(&second, BlockDocument::with_blocks(vec![block.clone()]))
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::AlreadyExists);
    assert!(h.store.get(&second).is_none());
    assert_eq!(h.store.entity_owner(&block.entity_id), Some(first));
}

#[tokio::test]
async fn test_failed_document_write_releases_reservations() {
    let h = harness(ServiceConfig::default());
    let key = new_key();
    // Occupy the key so the document write, the second setup action, fails.
    h.store.insert(key.clone(), BlockDocument::new(), 4);

    let block = Block::new("paragraph", "orphan");
    let err = h
        .service
        .create_document(&key, BlockDocument::with_blocks(vec![block.clone()]))
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::AlreadyExists);
    assert_eq!(h.store.entity_owner(&block.entity_id), None);
    assert_eq!(h.store.get(&key).unwrap().1, 4);
}

#[tokio::test]
async fn test_missing_document_not_found() {
    let h = harness(ServiceConfig::default());
    let err = h.service.get_snapshot(&new_key()).await.unwrap_err();
    assert_eq!(err, SyncError::NotFound);
    assert_eq!(err.status_code(), 404);
    assert_eq!(h.service.stats().instances, 0);
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_concurrent_first_access_loads_once() {
    let h = harness(ServiceConfig::default());
    let key = new_key();
    h.store.insert(key.clone(), BlockDocument::new(), 12);
    h.store.set_load_delay(Some(Duration::from_millis(50)));

    let readers: Vec<_> = (0..10)
        .map(|_| {
            let service = Arc::clone(&h.service);
            let key = key.clone();
            tokio::spawn(async move { service.get_snapshot(&key).await })
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.await.unwrap().unwrap().version, 12);
    }
    assert_eq!(h.store.load_count(), 1);
}

#[tokio::test]
async fn test_transient_load_failures_retried() {
    let h = harness(ServiceConfig::default());
    let key = new_key();
    h.store.insert(key.clone(), BlockDocument::new(), 0);
    h.store.fail_loads(2);

    assert!(h.service.get_snapshot(&key).await.is_ok());
    assert_eq!(h.store.load_count(), 3);
}

#[tokio::test]
async fn test_persistent_load_failure_surfaces_and_is_not_cached() {
    let h = harness(ServiceConfig::default());
    let key = new_key();
    h.store.insert(key.clone(), BlockDocument::new(), 0);
    h.store.fail_loads(100);

    let err = h.service.get_snapshot(&key).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));

    h.store.fail_loads(0);
    assert!(h.service.get_snapshot(&key).await.is_ok());
}

// =============================================================================
// Housekeeping
// =============================================================================

#[tokio::test]
async fn test_sweep_prunes_stale_positions() {
    let h = harness(ServiceConfig {
        position_ttl: Duration::from_millis(10),
        ..ServiceConfig::default()
    });
    let key = new_key();
    h.service.create_document(&key, BlockDocument::new()).await.unwrap();
    h.service
        .report_position(&key, Uuid::new_v4(), viewer())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let report = h.service.sweep(None);

    assert_eq!(
        report,
        SweepReport {
            instances_evicted: 0,
            positions_pruned: 1,
            sessions_expired: 0,
        }
    );
    let positions = h.service.poll_positions(&key, None, false, None).await.unwrap();
    assert!(positions.is_empty());
}

#[tokio::test]
async fn test_sweep_evicts_idle_instances() {
    let h = harness(ServiceConfig {
        idle_evict: Duration::from_millis(10),
        ..ServiceConfig::default()
    });
    let key = new_key();
    h.service.create_document(&key, BlockDocument::new()).await.unwrap();
    let instance = h.service.registry().peek(&key).unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.service.sweep(None).instances_evicted, 1);
    assert!(instance.is_invalidated());
    assert!(h.service.registry().is_empty());

    // Evicted documents come back on the next access.
    assert_eq!(h.service.get_snapshot(&key).await.unwrap().version, 0);
}

#[tokio::test]
async fn test_background_sweeper_expires_sessions_until_shutdown() {
    let h = harness(ServiceConfig {
        sweep_interval: Duration::from_millis(10),
        ..ServiceConfig::default()
    });
    let resolver = Arc::new(StaticIdentityResolver::new(&[StaticIdentity {
        token: "secret".to_string(),
        user_id: Uuid::new_v4(),
        shortname: "eve".to_string(),
        display_name: "Eve".to_string(),
    }]));
    let sessions = Arc::new(SessionCache::new(
        SessionCacheConfig {
            capacity: 10,
            ttl: Duration::from_millis(5),
        },
        resolver.clone(),
        Arc::new(MetricsRegistry::new()),
    ));
    sessions.resolve("secret").await.unwrap();
    assert_eq!(sessions.len(), 1);

    let (tx, rx) = shutdown::channel();
    let sweeper = h.service.clone().spawn_sweeper(Some(sessions.clone()), rx);

    for _ in 0..100 {
        if sessions.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(sessions.is_empty());
    assert_eq!(resolver.released(), 1);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
