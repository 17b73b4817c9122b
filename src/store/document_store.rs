//! # Document Store
//!
//! Durable side of a document. The engine loads content and its version on
//! first access and persists every accepted step batch before acknowledging
//! it. `MemoryDocumentStore` backs tests and the development server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use futures_util::future::BoxFuture;

use super::errors::{StoreError, StoreResult};
use crate::sync::document::{Document, DocumentKey, EntityId};

/// Content and version as read from the store
#[derive(Debug, Clone)]
pub struct LoadedDocument<D> {
    pub document: D,
    pub version: u64,
}

/// Durable document storage
pub trait DocumentStore<D: Document>: Send + Sync {
    /// Read current content and version
    fn load<'a>(&'a self, key: &'a DocumentKey) -> BoxFuture<'a, StoreResult<LoadedDocument<D>>>;

    /// Durably append a batch on top of `base_version`, returning the new version
    fn persist_steps<'a>(
        &'a self,
        key: &'a DocumentKey,
        base_version: u64,
        steps: &'a [D::Step],
    ) -> BoxFuture<'a, StoreResult<u64>>;

    /// Create a document at version 0
    fn create<'a>(&'a self, key: &'a DocumentKey, document: D) -> BoxFuture<'a, StoreResult<u64>>;

    /// Remove a document
    fn delete<'a>(&'a self, key: &'a DocumentKey) -> BoxFuture<'a, StoreResult<()>>;

    /// Create placeholder records for entities a document will embed
    fn reserve_entities<'a>(
        &'a self,
        key: &'a DocumentKey,
        ids: &'a [EntityId],
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Drop placeholder records created by `reserve_entities`
    fn release_entities<'a>(
        &'a self,
        key: &'a DocumentKey,
        ids: &'a [EntityId],
    ) -> BoxFuture<'a, StoreResult<()>>;
}

#[derive(Debug, Clone)]
struct StoredDocument<D> {
    document: D,
    version: u64,
}

/// In-memory document store with failure injection for tests
#[derive(Debug)]
pub struct MemoryDocumentStore<D> {
    documents: RwLock<HashMap<DocumentKey, StoredDocument<D>>>,
    entities: RwLock<HashMap<EntityId, DocumentKey>>,
    loads: AtomicUsize,
    failing_loads: AtomicUsize,
    failing_persists: AtomicUsize,
    load_delay: RwLock<Option<Duration>>,
}

impl<D: Document> Default for MemoryDocumentStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Document> MemoryDocumentStore<D> {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            entities: RwLock::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            failing_loads: AtomicUsize::new(0),
            failing_persists: AtomicUsize::new(0),
            load_delay: RwLock::new(None),
        }
    }

    /// Seed a document directly at a given version
    pub fn insert(&self, key: DocumentKey, document: D, version: u64) {
        if let Ok(mut docs) = self.documents.write() {
            docs.insert(key, StoredDocument { document, version });
        }
    }

    /// Overwrite content out of band, keeping the version
    pub fn replace_content(&self, key: &DocumentKey, document: D) -> StoreResult<()> {
        let mut docs = self.documents.write().map_err(|_| lock_poisoned())?;
        let stored = docs.get_mut(key).ok_or(StoreError::NotFound)?;
        stored.document = document;
        Ok(())
    }

    /// Durable content and version, if stored
    pub fn get(&self, key: &DocumentKey) -> Option<(D, u64)> {
        self.documents
            .read()
            .ok()
            .and_then(|docs| docs.get(key).map(|s| (s.document.clone(), s.version)))
    }

    /// Owner of a reserved entity
    pub fn entity_owner(&self, id: &EntityId) -> Option<DocumentKey> {
        self.entities.read().ok().and_then(|e| e.get(id).cloned())
    }

    /// Number of `load` calls served so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make the next `n` loads fail with `Unavailable`
    pub fn fail_loads(&self, n: usize) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` persists fail with `Unavailable`
    pub fn fail_persists(&self, n: usize) {
        self.failing_persists.store(n, Ordering::SeqCst);
    }

    /// Delay every load, to widen races in tests
    pub fn set_load_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.load_delay.write() {
            *d = delay;
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn lock_poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

impl<D: Document> DocumentStore<D> for MemoryDocumentStore<D> {
    fn load<'a>(&'a self, key: &'a DocumentKey) -> BoxFuture<'a, StoreResult<LoadedDocument<D>>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let delay = self.load_delay.read().ok().and_then(|d| *d);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if Self::take_failure(&self.failing_loads) {
                return Err(StoreError::Unavailable("injected load failure".into()));
            }
            let docs = self.documents.read().map_err(|_| lock_poisoned())?;
            let stored = docs.get(key).ok_or(StoreError::NotFound)?;
            Ok(LoadedDocument {
                document: stored.document.clone(),
                version: stored.version,
            })
        })
    }

    fn persist_steps<'a>(
        &'a self,
        key: &'a DocumentKey,
        base_version: u64,
        steps: &'a [D::Step],
    ) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(async move {
            if Self::take_failure(&self.failing_persists) {
                return Err(StoreError::Unavailable("injected persist failure".into()));
            }
            let mut docs = self.documents.write().map_err(|_| lock_poisoned())?;
            let stored = docs.get_mut(key).ok_or(StoreError::NotFound)?;
            if stored.version != base_version {
                return Err(StoreError::Conflict {
                    expected: base_version,
                    actual: stored.version,
                });
            }
            let mut next = stored.document.clone();
            next.apply_all(steps)
                .map_err(|e| StoreError::Rejected(e.to_string()))?;
            stored.document = next;
            stored.version += steps.len() as u64;
            Ok(stored.version)
        })
    }

    fn create<'a>(&'a self, key: &'a DocumentKey, document: D) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(async move {
            let mut docs = self.documents.write().map_err(|_| lock_poisoned())?;
            if docs.contains_key(key) {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            docs.insert(key.clone(), StoredDocument { document, version: 0 });
            Ok(0)
        })
    }

    fn delete<'a>(&'a self, key: &'a DocumentKey) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut docs = self.documents.write().map_err(|_| lock_poisoned())?;
            docs.remove(key).map(|_| ()).ok_or(StoreError::NotFound)
        })
    }

    fn reserve_entities<'a>(
        &'a self,
        key: &'a DocumentKey,
        ids: &'a [EntityId],
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut entities = self.entities.write().map_err(|_| lock_poisoned())?;
            if let Some(taken) = ids.iter().find(|id| entities.contains_key(id)) {
                return Err(StoreError::AlreadyExists(format!("entity {}", taken)));
            }
            for id in ids {
                entities.insert(*id, key.clone());
            }
            Ok(())
        })
    }

    fn release_entities<'a>(
        &'a self,
        key: &'a DocumentKey,
        ids: &'a [EntityId],
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut entities = self.entities.write().map_err(|_| lock_poisoned())?;
            for id in ids {
                if entities.get(id) == Some(key) {
                    entities.remove(id);
                }
            }
            Ok(())
        })
    }
}
