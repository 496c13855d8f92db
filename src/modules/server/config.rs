//! Listener and connection configuration types.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport of a listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP.
    #[default]
    Plain,
    /// TLS over TCP.
    Tls,
}

impl TransportKind {
    /// Both transports, in label order.
    pub const ALL: [Self; 2] = [Self::Plain, Self::Tls];

    /// Value of the `transport` label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Tls => "tls",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How frames are delimited on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Newline-terminated UTF-8 lines.
    #[default]
    Line,
    /// 4-byte big-endian length prefix followed by the payload.
    LengthPrefixed,
}

/// Configuration for one listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Listener name, used in logs.
    pub name: String,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub address: IpAddr,

    /// Listen port (0 picks a free port).
    pub port: u16,

    /// Transport.
    #[serde(default)]
    pub transport: TransportKind,

    /// Frame delimiting.
    #[serde(default)]
    pub framing: Framing,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl ListenerConfig {
    /// Create a plain line-framed listener config.
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: default_bind_address(),
            port,
            transport: TransportKind::Plain,
            framing: Framing::Line,
        }
    }

    /// Set the bind address.
    #[must_use]
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Set the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Set the framing.
    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Get the socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Per-connection limits shared by all listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Close a connection when no bytes arrive for this long.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Close a connection when a write takes longer than this.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Abort TLS handshakes that take longer than this.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// Largest accepted frame, in bytes.
    pub max_frame_length: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            max_frame_length: 64 * 1024,
        }
    }
}
