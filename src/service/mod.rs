//! # Sync Service
//!
//! The operations clients call, composed over the instance registry:
//! snapshot, submit, long-poll for events, report and poll positions,
//! document creation, plus the housekeeping sweeper.

mod sync_service;

pub use sync_service::{ServiceConfig, SweepReport, SyncService};
