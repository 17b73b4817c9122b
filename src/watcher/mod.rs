//! # Entity Watcher
//!
//! Pushes out-of-band entity changes into the instance registry.

pub mod entity_watcher;
pub mod errors;
pub mod queue;

pub use entity_watcher::{EntityWatcher, WatcherConfig};
pub use errors::{QueueError, QueueResult};
pub use queue::{ChangeEvent, ChangeKind, ChangeQueue, EventStream, MemoryChangeQueue};
