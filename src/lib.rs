//! # NetHub Core
//!
//! Concurrent plaintext and TLS connection server with a thread-safe
//! metrics registry and point-in-time JSON snapshots.
//!
//! ## Features
//!
//! - Plaintext and TLS listeners with one task per connection
//! - Self-signed certificate bootstrap and optional mutual TLS
//! - Connection registry keeping the `active_connections` gauge exact
//! - Labelled counters, gauges and histograms with a per-metric series cap
//! - JSON snapshot endpoint served over HTTP
//! - Host CPU and memory gauges
//!
//! ## Architecture
//!
//! A [`modules::server::ConnectionListener`] accepts connections and hands
//! each one to a handler task that owns a registration guard from the shared
//! [`modules::server::ConnectionRegistry`]. Handlers record traffic in a
//! [`modules::metrics::MetricsRegistry`], which the
//! [`modules::metrics::MetricsExporter`] snapshots on every request without
//! blocking the data path.

pub mod config;
pub mod logging;
pub mod modules;
