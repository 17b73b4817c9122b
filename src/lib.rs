//! docsync - synchronization engine for a multi-tenant collaborative
//! document editor
//!
//! Clients edit a shared document by submitting step batches against the
//! version they last saw; one central authority per document orders them,
//! keeps a bounded history for catch-up, and wakes long-polling readers.

pub mod cli;
pub mod http_server;
pub mod observability;
pub mod service;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod sync;
pub mod watcher;
