//! # HTTP Server
//!
//! Axum front end for the sync service.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/metrics` - Counters and registry stats
//! - `/docs/:tenant/:doc` - Create / snapshot
//! - `/docs/:tenant/:doc/steps` - Submit steps
//! - `/docs/:tenant/:doc/events` - Long-poll for events
//! - `/docs/:tenant/:doc/positions` - Report / poll positions

pub mod config;
pub mod document_routes;
pub mod errors;
pub mod observability_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ErrorResponse};
pub use server::{AppState, HttpServer};
