//! # NetHub Modules
//!
//! - [`metrics`] - Metrics registry, snapshots and the JSON endpoint
//! - [`tls`] - Certificate bootstrap and server-side TLS configuration
//! - [`server`] - Listeners, connection registry and per-connection handlers

pub mod metrics;
pub mod server;
pub mod tls;
