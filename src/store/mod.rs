//! # Backing Store
//!
//! Durable storage collaborator for documents and their embedded entities.

pub mod document_store;
pub mod errors;

pub use document_store::{DocumentStore, LoadedDocument, MemoryDocumentStore};
pub use errors::{StoreError, StoreResult};
