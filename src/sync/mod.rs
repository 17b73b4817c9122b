//! # Sync Engine
//!
//! Version-based collaborative editing over a central authority.
//!
//! Clients hold a document at some version and submit step batches against
//! it. The per-document `Instance` accepts a batch only if it was based on the
//! current version, records it in a bounded log, and wakes long-polling
//! readers. Clients that fall behind the log resync from a fresh snapshot.

pub mod bootstrap;
pub mod document;
pub mod errors;
pub mod instance;
pub mod positions;
pub mod registry;
pub mod version_log;
pub mod waiter;

pub use bootstrap::{BootstrapSequence, CreateDocument, ReserveEntities, SetupAction};
pub use document::{Block, BlockDocument, BlockStep, Document, DocumentKey, EntityId, StepError, UserId};
pub use errors::{SyncError, SyncResult};
pub use instance::{
    EventBatch, EventsOutcome, Instance, InstanceConfig, InstanceStats, Snapshot, SubmitOutcome,
    WaiterHandle,
};
pub use positions::{PositionBoard, PositionMetadata, UserPosition};
pub use registry::{InstanceRegistry, RegistryConfig, RegistryStats};
pub use version_log::{LogEntry, VersionLog};
pub use waiter::{Interest, Wake, WaiterId};
