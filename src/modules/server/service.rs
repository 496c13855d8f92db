//! Application logic run on each connection.

use std::net::SocketAddr;

use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use serde_json::{json, Value};

use super::config::TransportKind;

/// Negotiated TLS parameters of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSession {
    /// Protocol version, e.g. `TLSv1_3`.
    pub protocol: String,
    /// Cipher suite name.
    pub cipher_suite: String,
}

/// Per-connection state visible to a [`MessageService`].
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Connection ID.
    pub id: u64,
    /// Transport.
    pub transport: TransportKind,
    /// Client address.
    pub remote_addr: SocketAddr,
    /// When the connection was accepted.
    pub established_at: DateTime<Utc>,
    /// TLS parameters, for TLS connections.
    pub tls: Option<TlsSession>,
    /// Frames received so far.
    pub messages_received: u64,
    /// Frames sent so far.
    pub messages_sent: u64,
    /// Payload bytes received so far.
    pub bytes_received: u64,
    /// Payload bytes sent so far.
    pub bytes_sent: u64,
}

/// Response to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send a frame and keep reading.
    Send(Bytes),
    /// Send a final frame, then close.
    SendAndClose(Bytes),
    /// Send nothing.
    None,
    /// Close without replying.
    Close,
}

/// Application semantics layered over a framed connection.
pub trait MessageService: Send + Sync + 'static {
    /// Frame sent right after the connection is ready.
    fn greeting(&self, _ctx: &ConnectionContext) -> Option<Bytes> {
        None
    }

    /// Handle one frame received from the client.
    fn handle(&self, ctx: &ConnectionContext, frame: Bytes) -> Reply;
}

/// Line-oriented command protocol answering with one-line JSON documents.
///
/// Commands are case-insensitive: `ping`, `time`/`hora`, `date`/`fecha`,
/// `info`, `stats`, `help` and `exit`/`bye`/`adios`.
#[derive(Debug, Clone)]
pub struct CommandService {
    server_name: String,
}

const COMMANDS: &[&str] = &[
    "ping - connectivity test",
    "time - current server time",
    "date - current server date",
    "info - server information",
    "stats - connection statistics",
    "help - this help",
    "exit - close the connection",
];

impl CommandService {
    /// Create a service announcing itself as `server_name`.
    #[must_use]
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    fn reply(&self, ctx: &ConnectionContext, command: &str) -> Value {
        let secure = ctx.tls.is_some();
        match command {
            "ping" => json!({
                "status": "ok",
                "command": "ping",
                "response": "pong",
                "secure": secure,
            }),
            "time" | "hora" => json!({
                "status": "ok",
                "command": "time",
                "response": Local::now().format("%H:%M:%S").to_string(),
                "secure": secure,
            }),
            "date" | "fecha" => json!({
                "status": "ok",
                "command": "date",
                "response": Local::now().format("%d/%m/%Y").to_string(),
                "secure": secure,
            }),
            "info" => json!({
                "status": "ok",
                "command": "info",
                "server": self.server_name,
                "version": env!("CARGO_PKG_VERSION"),
                "transport": ctx.transport.as_str(),
                "protocol": ctx.tls.as_ref().map(|t| t.protocol.as_str()),
                "cipher": ctx.tls.as_ref().map(|t| t.cipher_suite.as_str()),
                "secure": secure,
            }),
            "stats" => json!({
                "status": "ok",
                "command": "stats",
                "connection_id": ctx.id,
                "client_ip": ctx.remote_addr.ip().to_string(),
                "client_port": ctx.remote_addr.port(),
                "connected_seconds": (Utc::now() - ctx.established_at).num_seconds(),
                "messages_received": ctx.messages_received,
                "messages_sent": ctx.messages_sent,
                "bytes_received": ctx.bytes_received,
                "bytes_sent": ctx.bytes_sent,
                "secure": secure,
            }),
            "help" => json!({
                "status": "ok",
                "command": "help",
                "commands": COMMANDS,
                "secure": secure,
            }),
            _ => json!({
                "status": "error",
                "command": command,
                "message": "Unknown command. Type 'help' for available commands.",
                "secure": secure,
            }),
        }
    }
}

impl MessageService for CommandService {
    fn greeting(&self, ctx: &ConnectionContext) -> Option<Bytes> {
        let welcome = json!({
            "type": "welcome",
            "message": format!("Welcome to {}", self.server_name),
            "version": env!("CARGO_PKG_VERSION"),
            "secure": ctx.tls.is_some(),
            "cipher": ctx.tls.as_ref().map(|t| t.cipher_suite.as_str()),
            "instructions": "Type 'help' for available commands",
        });
        Some(Bytes::from(welcome.to_string()))
    }

    fn handle(&self, ctx: &ConnectionContext, frame: Bytes) -> Reply {
        let text = String::from_utf8_lossy(&frame);
        let command = text.trim().to_lowercase();

        if command.is_empty() {
            return Reply::None;
        }

        if matches!(command.as_str(), "exit" | "bye" | "adios") {
            let goodbye = json!({
                "status": "ok",
                "message": "Closing connection. Goodbye!",
                "secure": ctx.tls.is_some(),
            });
            return Reply::SendAndClose(Bytes::from(goodbye.to_string()));
        }

        Reply::Send(Bytes::from(self.reply(ctx, &command).to_string()))
    }
}

/// Sends every frame back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

impl MessageService for EchoService {
    fn handle(&self, _ctx: &ConnectionContext, frame: Bytes) -> Reply {
        Reply::Send(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tls: bool) -> ConnectionContext {
        ConnectionContext {
            id: 7,
            transport: if tls {
                TransportKind::Tls
            } else {
                TransportKind::Plain
            },
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 50000)),
            established_at: Utc::now(),
            tls: tls.then(|| TlsSession {
                protocol: "TLSv1_3".to_string(),
                cipher_suite: "TLS13_AES_256_GCM_SHA384".to_string(),
            }),
            messages_received: 3,
            messages_sent: 2,
            bytes_received: 12,
            bytes_sent: 80,
        }
    }

    fn parse(reply: Reply) -> Value {
        match reply {
            Reply::Send(bytes) | Reply::SendAndClose(bytes) => {
                serde_json::from_slice(&bytes).unwrap()
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_ping() {
        let service = CommandService::new("NetHub");
        let reply = parse(service.handle(&ctx(false), Bytes::from(" PING ")));
        assert_eq!(reply["status"], "ok");
        assert_eq!(reply["response"], "pong");
        assert_eq!(reply["secure"], false);
    }

    #[test]
    fn test_aliases() {
        let service = CommandService::new("NetHub");
        for (alias, canonical) in [("hora", "time"), ("fecha", "date")] {
            let reply = parse(service.handle(&ctx(false), Bytes::from(alias)));
            assert_eq!(reply["command"], canonical);
        }
    }

    #[test]
    fn test_info_over_tls() {
        let service = CommandService::new("NetHub");
        let reply = parse(service.handle(&ctx(true), Bytes::from("info")));
        assert_eq!(reply["server"], "NetHub");
        assert_eq!(reply["transport"], "tls");
        assert_eq!(reply["protocol"], "TLSv1_3");
        assert_eq!(reply["secure"], true);
    }

    #[test]
    fn test_stats() {
        let service = CommandService::new("NetHub");
        let reply = parse(service.handle(&ctx(false), Bytes::from("stats")));
        assert_eq!(reply["connection_id"], 7);
        assert_eq!(reply["client_port"], 50000);
        assert_eq!(reply["messages_received"], 3);
    }

    #[test]
    fn test_help_lists_commands() {
        let service = CommandService::new("NetHub");
        let reply = parse(service.handle(&ctx(false), Bytes::from("help")));
        assert_eq!(reply["commands"].as_array().unwrap().len(), COMMANDS.len());
    }

    #[test]
    fn test_unknown_command() {
        let service = CommandService::new("NetHub");
        let reply = parse(service.handle(&ctx(false), Bytes::from("launch rockets")));
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["command"], "launch rockets");
    }

    #[test]
    fn test_exit_closes() {
        let service = CommandService::new("NetHub");
        for word in ["exit", "BYE", "adios"] {
            assert!(matches!(
                service.handle(&ctx(false), Bytes::from(word)),
                Reply::SendAndClose(_)
            ));
        }
        assert_eq!(service.handle(&ctx(false), Bytes::from("  ")), Reply::None);
    }

    #[test]
    fn test_greeting() {
        let service = CommandService::new("NetHub");
        let greeting = service.greeting(&ctx(true)).unwrap();
        let value: Value = serde_json::from_slice(&greeting).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["cipher"], "TLS13_AES_256_GCM_SHA384");
    }

    #[test]
    fn test_echo() {
        assert_eq!(
            EchoService.handle(&ctx(false), Bytes::from("abc")),
            Reply::Send(Bytes::from("abc"))
        );
    }
}
