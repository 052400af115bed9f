//! Shared configuration, error types, IDs, and observability primitives for DQE crates.
//!
//! Architecture role:
//! - defines job/runtime configuration passed across layers
//! - provides common [`DqeError`] / [`Result`] contracts
//! - hosts the Prometheus metrics registry used by job coordination
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::JobsConfig;
pub use error::{DqeError, Result};
pub use ids::*;
pub use metrics::MetricsRegistry;
