//! Accept loop dispatching connections to handlers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::config::{ConnectionSettings, ListenerConfig, TransportKind};
use super::error::{ServerError, ServerResult};
use super::handler::{self, HandlerConfig};
use super::registry::{ConnectionRegistry, NewConnection};
use super::service::MessageService;

/// Pause after a transient accept error such as running out of file
/// descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created, not bound.
    Idle,
    /// Waiting for connections.
    Listening,
    /// Registering and spawning a handler for a new connection.
    Dispatching,
    /// No longer accepting; draining handlers.
    ShuttingDown,
    /// All handlers finished.
    Stopped,
}

/// Statistics for a listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub total_accepted: u64,

    /// Connections currently open.
    pub active_connections: usize,

    /// Total accept errors.
    pub accept_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_accepted: AtomicU64,
    accept_errors: AtomicU64,
}

/// Binds a port and hands every accepted connection to its own task.
pub struct ConnectionListener {
    config: ListenerConfig,
    settings: ConnectionSettings,
    service: Arc<dyn MessageService>,
    tls: Option<TlsAcceptor>,
    registry: Arc<ConnectionRegistry>,
    state: Arc<Mutex<ListenerState>>,
    counters: Arc<Counters>,
    stop: CancellationToken,
    tracker: TaskTracker,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for ConnectionListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionListener")
            .field("name", &self.config.name)
            .field("transport", &self.config.transport)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl ConnectionListener {
    /// Create a listener. TLS listeners also need [`Self::with_tls`].
    #[must_use]
    pub fn new(
        config: ListenerConfig,
        settings: ConnectionSettings,
        registry: Arc<ConnectionRegistry>,
        service: Arc<dyn MessageService>,
    ) -> Self {
        Self {
            config,
            settings,
            service,
            tls: None,
            registry,
            state: Arc::new(Mutex::new(ListenerState::Idle)),
            counters: Arc::new(Counters::default()),
            stop: CancellationToken::new(),
            tracker: TaskTracker::new(),
            accept_task: None,
            local_addr: None,
        }
    }

    /// Use `acceptor` for TLS handshakes.
    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Listener name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Transport.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.config.transport
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    /// Address actually bound, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get listener statistics.
    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            total_accepted: self.counters.total_accepted.load(Ordering::Relaxed),
            active_connections: self
                .registry
                .list_active()
                .iter()
                .filter(|info| info.listener == self.config.name)
                .count(),
            accept_errors: self.counters.accept_errors.load(Ordering::Relaxed),
        }
    }

    /// Bind the configured address and start accepting.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindError`] if the address is unavailable and
    /// [`ServerError::MissingTlsContext`] for a TLS listener without an
    /// acceptor.
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.state() != ListenerState::Idle {
            return Err(ServerError::AlreadyRunning);
        }

        if self.config.transport == TransportKind::Tls && self.tls.is_none() {
            return Err(ServerError::MissingTlsContext {
                listener: self.config.name.clone(),
            });
        }

        let address = self.config.socket_addr();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::BindError { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::BindError { address, source })?;

        info!(
            name = %self.config.name,
            address = %local_addr,
            transport = %self.config.transport,
            "Listener started"
        );

        *self.state.lock() = ListenerState::Listening;
        self.local_addr = Some(local_addr);

        let accept = AcceptLoop {
            listener,
            name: self.config.name.clone(),
            transport: self.config.transport,
            local_addr,
            handler: Arc::new(HandlerConfig {
                settings: self.settings.clone(),
                framing: self.config.framing,
                service: Arc::clone(&self.service),
                tls: self.tls.clone(),
            }),
            registry: Arc::clone(&self.registry),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            stop: self.stop.clone(),
            tracker: self.tracker.clone(),
        };
        self.accept_task = Some(tokio::spawn(accept.run()));

        Ok(local_addr)
    }

    /// Stop accepting, cancel every handler, and wait up to `drain_timeout`
    /// for them to finish. Stragglers are then aborted.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimeout`] after force-closing
    /// stragglers; the listener is stopped either way.
    pub async fn shutdown(&mut self, drain_timeout: Duration) -> ServerResult<()> {
        let accept_task = self.accept_task.take().ok_or(ServerError::NotRunning)?;

        *self.state.lock() = ListenerState::ShuttingDown;
        info!(name = %self.config.name, "Listener shutting down");

        self.stop.cancel();
        if let Err(e) = accept_task.await {
            warn!(name = %self.config.name, error = %e, "Accept loop ended abnormally");
        }

        self.tracker.close();
        self.registry.cancel_listener(&self.config.name);

        let result = if timeout(drain_timeout, self.tracker.wait()).await.is_ok() {
            Ok(())
        } else {
            let remaining = self.registry.force_close_listener(&self.config.name);
            self.tracker.wait().await;
            let err = ServerError::ShutdownTimeout {
                remaining,
                timeout: drain_timeout,
            };
            warn!(name = %self.config.name, error = %err, "Drain timeout elapsed");
            Err(err)
        };

        *self.state.lock() = ListenerState::Stopped;
        info!(name = %self.config.name, "Listener stopped");
        result
    }
}

/// Shut down every listener sharing `registry`.
///
/// All handlers are cancelled up front so they drain together; each
/// listener then gets up to `drain_timeout`. Connections still registered
/// afterwards are aborted. Returns the failures by listener name.
pub async fn shutdown_all(
    listeners: &mut [ConnectionListener],
    registry: &ConnectionRegistry,
    drain_timeout: Duration,
) -> Vec<(String, ServerError)> {
    registry.cancel_all();

    let mut failures = Vec::new();
    for listener in listeners.iter_mut() {
        if let Err(e) = listener.shutdown(drain_timeout).await {
            failures.push((listener.name().to_string(), e));
        }
    }

    let stragglers = registry.force_close_all();
    if stragglers > 0 {
        warn!(count = stragglers, "Force-closed connections outside any listener");
    }
    failures
}

struct AcceptLoop {
    listener: TcpListener,
    name: String,
    transport: TransportKind,
    local_addr: SocketAddr,
    handler: Arc<HandlerConfig>,
    registry: Arc<ConnectionRegistry>,
    state: Arc<Mutex<ListenerState>>,
    counters: Arc<Counters>,
    stop: CancellationToken,
    tracker: TaskTracker,
}

impl AcceptLoop {
    async fn run(self) {
        debug!(name = %self.name, address = %self.local_addr, "Accept loop started");

        loop {
            tokio::select! {
                () = self.stop.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => {
                        self.counters.accept_errors.fetch_add(1, Ordering::Relaxed);

                        // Some errors are transient, others are fatal
                        if is_fatal_accept_error(&e) {
                            error!(name = %self.name, error = %e, "Fatal accept error");
                            break;
                        }

                        warn!(name = %self.name, error = %e, "Transient accept error");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        debug!(name = %self.name, "Accept loop stopped");
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        self.set_state(ListenerState::Dispatching);
        self.counters.total_accepted.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "Failed to configure stream");
        }

        let guard = self.registry.on_accept(NewConnection {
            transport: self.transport,
            listener: self.name.clone(),
            remote_addr: peer,
            local_addr: stream.local_addr().unwrap_or(self.local_addr),
        });
        let id = guard.id();
        debug!(name = %self.name, peer = %peer, conn_id = id, "Accepted connection");

        let task = self
            .tracker
            .spawn(handler::serve(stream, guard, Arc::clone(&self.handler)));
        self.registry.attach_task(id, task.abort_handle());

        self.set_state(ListenerState::Listening);
    }

    fn set_state(&self, next: ListenerState) {
        let mut state = self.state.lock();
        if !matches!(*state, ListenerState::ShuttingDown | ListenerState::Stopped) {
            *state = next;
        }
    }
}

/// Check if an accept error is fatal (unrecoverable).
fn is_fatal_accept_error(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        error.kind(),
        ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::NotFound
    )
}
