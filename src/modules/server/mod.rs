//! Server Module
//!
//! Plaintext and TLS connection listeners. Every accepted connection is
//! registered in a shared [`ConnectionRegistry`], served by its own task
//! through a framed read/write loop, and deregistered when that task ends,
//! whether it returned normally or was aborted.
//!
//! ## Example Configuration
//!
//! ```toml
//! [[listeners]]
//! name = "tcp"
//! port = 9500
//! transport = "plain"
//! framing = "line"
//!
//! [connection]
//! idle_timeout = "300s"
//! write_timeout = "10s"
//! ```

mod codec;
mod config;
mod error;
mod handler;
mod listener;
mod metrics;
mod registry;
mod service;
mod stream;

pub use codec::{FrameCodec, FrameError};
pub use config::{ConnectionSettings, Framing, ListenerConfig, TransportKind};
pub use error::{ConnectionError, ServerError, ServerResult};
pub use listener::{shutdown_all, ConnectionListener, ListenerState, ListenerStats};
pub use metrics::{
    transport_labels, ServerMetrics, ACTIVE_CONNECTIONS, BYTES_RECEIVED_TOTAL, BYTES_SENT_TOTAL,
    CONNECTIONS_TOTAL, CONNECTION_DURATION_SECONDS, ERRORS_TOTAL, MESSAGES_RECEIVED_TOTAL,
    MESSAGES_SENT_TOTAL,
};
pub use registry::{
    ConnectionGuard, ConnectionInfo, ConnectionRegistry, ConnectionState, NewConnection,
};
pub use service::{CommandService, ConnectionContext, EchoService, MessageService, Reply, TlsSession};
pub use stream::{ActivityStream, BoxedStream, ByteStream};
