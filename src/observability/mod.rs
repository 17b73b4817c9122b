//! Observability for the sync engine
//!
//! - Structured logging (one JSON object per line)
//! - Monotonic counters
//! - Scope-based begin/complete logging
//!
//! # Usage
//!
//! ```ignore
//! use docsync::observability::{Logger, MetricsRegistry, ObservationScope};
//!
//! Logger::info("INSTANCE_LOADED", &[("tenant", "acme"), ("version", "42")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_steps_accepted(3);
//!
//! let scope = ObservationScope::new("BOOTSTRAP");
//! // ... do work ...
//! scope.complete();
//! ```

mod logger;
mod metrics;
mod scope;

pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};
