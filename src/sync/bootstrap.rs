//! # Document Bootstrap
//!
//! Creating a document touches the store more than once: placeholder records
//! for every embedded entity first, then the document itself. The steps run as
//! an ordered sequence; if one fails, the ones already applied are rolled back
//! newest first and the original error is returned.

use futures_util::future::BoxFuture;

use super::document::{Document, DocumentKey, EntityId};
use super::errors::{SyncError, SyncResult};
use crate::observability::{Logger, ObservationScope};
use crate::store::{DocumentStore, StoreResult};

/// One reversible step of document setup
pub trait SetupAction<D: Document>: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply<'a>(
        &'a self,
        store: &'a dyn DocumentStore<D>,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn rollback<'a>(
        &'a self,
        store: &'a dyn DocumentStore<D>,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StoreResult<()>>;
}

/// Reserve placeholder records for entities the document embeds
pub struct ReserveEntities {
    pub ids: Vec<EntityId>,
}

impl<D: Document> SetupAction<D> for ReserveEntities {
    fn name(&self) -> &'static str {
        "reserve_entities"
    }

    fn apply<'a>(
        &'a self,
        store: &'a dyn DocumentStore<D>,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StoreResult<()>> {
        store.reserve_entities(key, &self.ids)
    }

    fn rollback<'a>(
        &'a self,
        store: &'a dyn DocumentStore<D>,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StoreResult<()>> {
        store.release_entities(key, &self.ids)
    }
}

/// Write the document entity at version 0
pub struct CreateDocument<D> {
    pub document: D,
}

impl<D: Document> SetupAction<D> for CreateDocument<D> {
    fn name(&self) -> &'static str {
        "create_document"
    }

    fn apply<'a>(
        &'a self,
        store: &'a dyn DocumentStore<D>,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { store.create(key, self.document.clone()).await.map(|_| ()) })
    }

    fn rollback<'a>(
        &'a self,
        store: &'a dyn DocumentStore<D>,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StoreResult<()>> {
        store.delete(key)
    }
}

/// Ordered setup actions with reverse-order rollback
pub struct BootstrapSequence<D: Document> {
    actions: Vec<Box<dyn SetupAction<D>>>,
}

impl<D: Document> Default for BootstrapSequence<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Document> BootstrapSequence<D> {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Entities first, then the document
    pub fn for_new_document(document: D) -> Self {
        let ids = document.entity_ids();
        Self::new()
            .then(ReserveEntities { ids })
            .then(CreateDocument { document })
    }

    pub fn then(mut self, action: impl SetupAction<D> + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Apply every action in order
    pub async fn run(&self, store: &dyn DocumentStore<D>, key: &DocumentKey) -> SyncResult<()> {
        let document = key.to_string();
        let scope = ObservationScope::with_fields("DOCUMENT_BOOTSTRAP", &[("document", &document)]);

        for (applied, action) in self.actions.iter().enumerate() {
            if let Err(err) = action.apply(store, key).await {
                let reason = format!("{}: {}", action.name(), err);
                self.roll_back(&self.actions[..applied], store, key).await;
                scope.fail(&reason);
                return Err(SyncError::from(err));
            }
        }

        scope.complete_with_fields(&[("actions", &self.actions.len().to_string())]);
        Ok(())
    }

    async fn roll_back(
        &self,
        applied: &[Box<dyn SetupAction<D>>],
        store: &dyn DocumentStore<D>,
        key: &DocumentKey,
    ) {
        for action in applied.iter().rev() {
            if let Err(err) = action.rollback(store, key).await {
                Logger::error(
                    "BOOTSTRAP_ROLLBACK_FAILED",
                    &[
                        ("action", action.name()),
                        ("document", &key.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDocumentStore, StoreError};
    use crate::sync::document::{Block, BlockDocument};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Records apply/rollback calls and optionally fails on apply
    struct Journaled {
        name: &'static str,
        fail: bool,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl SetupAction<BlockDocument> for Journaled {
        fn name(&self) -> &'static str {
            self.name
        }

        fn apply<'a>(
            &'a self,
            _store: &'a dyn DocumentStore<BlockDocument>,
            _key: &'a DocumentKey,
        ) -> BoxFuture<'a, StoreResult<()>> {
            Box::pin(async move {
                self.journal.lock().unwrap().push(format!("apply {}", self.name));
                if self.fail {
                    Err(StoreError::Rejected("injected".into()))
                } else {
                    Ok(())
                }
            })
        }

        fn rollback<'a>(
            &'a self,
            _store: &'a dyn DocumentStore<BlockDocument>,
            _key: &'a DocumentKey,
        ) -> BoxFuture<'a, StoreResult<()>> {
            Box::pin(async move {
                self.journal.lock().unwrap().push(format!("rollback {}", self.name));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_rollback_in_reverse_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let action = |name: &'static str, fail: bool| Journaled { name, fail, journal: journal.clone() };
        let sequence = BootstrapSequence::new()
            .then(action("a", false))
            .then(action("b", false))
            .then(action("c", true));

        let store = MemoryDocumentStore::<BlockDocument>::new();
        let key = DocumentKey::new("acme", Uuid::new_v4());
        assert!(sequence.run(&store, &key).await.is_err());

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["apply a", "apply b", "apply c", "rollback b", "rollback a"]
        );
    }

    #[tokio::test]
    async fn test_new_document_reserves_entities() {
        let store = MemoryDocumentStore::<BlockDocument>::new();
        let key = DocumentKey::new("acme", Uuid::new_v4());
        let block = Block::new("paragraph", "hello");
        let doc = BlockDocument::with_blocks(vec![block.clone()]);

        BootstrapSequence::for_new_document(doc).run(&store, &key).await.unwrap();

        assert_eq!(store.entity_owner(&block.entity_id), Some(key.clone()));
        assert_eq!(store.get(&key).map(|(_, v)| v), Some(0));
    }

    #[tokio::test]
    async fn test_existing_document_releases_reservations() {
        let store = MemoryDocumentStore::<BlockDocument>::new();
        let key = DocumentKey::new("acme", Uuid::new_v4());
        store.insert(key.clone(), BlockDocument::new(), 2);
        let block = Block::new("paragraph", "hello");

        let err = BootstrapSequence::for_new_document(BlockDocument::with_blocks(vec![block.clone()]))
            .run(&store, &key)
            .await
            .unwrap_err();

        assert_eq!(err, SyncError::AlreadyExists);
        assert!(store.entity_owner(&block.entity_id).is_none());
        assert_eq!(store.get(&key).map(|(_, v)| v), Some(2));
    }
}
