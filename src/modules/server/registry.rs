//! Tracking of open connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::TransportKind;
use super::metrics::ServerMetrics;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted and serving.
    Open,
    /// Shutting down; still counted as live.
    Closing,
    /// Deregistered.
    Closed,
}

/// Metadata of a tracked connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Unique connection ID. Never reused.
    pub id: u64,
    /// Transport.
    pub transport: TransportKind,
    /// Name of the accepting listener.
    pub listener: String,
    /// Client address.
    pub remote_addr: SocketAddr,
    /// Local address.
    pub local_addr: SocketAddr,
    /// When the connection was accepted.
    pub established_at: DateTime<Utc>,
    /// Last frame read or written.
    pub last_activity: DateTime<Utc>,
    /// Current state.
    pub state: ConnectionState,
}

/// A connection about to be registered.
#[derive(Debug, Clone)]
pub struct NewConnection {
    /// Transport.
    pub transport: TransportKind,
    /// Name of the accepting listener.
    pub listener: String,
    /// Client address.
    pub remote_addr: SocketAddr,
    /// Local address.
    pub local_addr: SocketAddr,
}

#[derive(Debug)]
struct Entry {
    info: ConnectionInfo,
    started: Instant,
    cancel: CancellationToken,
    abort: Option<AbortHandle>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u64, Entry>,
    plain: usize,
    tls: usize,
}

impl Inner {
    fn count_mut(&mut self, transport: TransportKind) -> &mut usize {
        match transport {
            TransportKind::Plain => &mut self.plain,
            TransportKind::Tls => &mut self.tls,
        }
    }
}

/// Registry of open connections.
///
/// The `active_connections{transport}` gauge is written while the map lock
/// is held, so it always equals the number of live entries of that
/// transport.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    metrics: ServerMetrics,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(metrics: ServerMetrics) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            metrics,
        }
    }

    /// Metrics handle shared with handlers.
    #[must_use]
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Register an accepted connection in state `Open`.
    ///
    /// The returned guard deregisters the connection when dropped.
    pub fn on_accept(self: &Arc<Self>, conn: NewConnection) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let cancel = self.shutdown.child_token();
        let transport = conn.transport;

        let info = ConnectionInfo {
            id,
            transport,
            listener: conn.listener,
            remote_addr: conn.remote_addr,
            local_addr: conn.local_addr,
            established_at: now,
            last_activity: now,
            state: ConnectionState::Open,
        };

        {
            let mut inner = self.inner.lock();
            inner.entries.insert(
                id,
                Entry {
                    info,
                    started: Instant::now(),
                    cancel: cancel.clone(),
                    abort: None,
                },
            );
            let count = inner.count_mut(transport);
            *count += 1;
            self.metrics.set_active(transport, *count);
        }
        self.metrics.connection_opened(transport);

        debug!(conn_id = id, peer = %conn.remote_addr, %transport, "Connection registered");

        ConnectionGuard {
            registry: Arc::clone(self),
            id,
            transport,
            remote_addr: conn.remote_addr,
            established_at: now,
            cancel,
        }
    }

    /// Remember the task serving a connection so it can be aborted.
    pub fn attach_task(&self, id: u64, handle: AbortHandle) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&id) {
            entry.abort = Some(handle);
        }
    }

    /// Deregister a connection.
    ///
    /// Returns the final metadata, or `None` if the connection was already
    /// closed. Calling this twice is harmless.
    pub fn on_close(&self, id: u64) -> Option<ConnectionInfo> {
        let (entry, lifetime) = {
            let mut inner = self.inner.lock();
            let entry = inner.entries.remove(&id)?;
            let transport = entry.info.transport;
            let count = inner.count_mut(transport);
            *count = count.saturating_sub(1);
            self.metrics.set_active(transport, *count);
            // A deregistered connection always has its duration recorded
            let lifetime = entry.started.elapsed();
            self.metrics.connection_closed(transport, lifetime);
            (entry, lifetime)
        };

        debug!(
            conn_id = id,
            peer = %entry.info.remote_addr,
            duration_ms = lifetime.as_millis() as u64,
            "Connection deregistered"
        );

        let mut info = entry.info;
        info.state = ConnectionState::Closed;
        Some(info)
    }

    /// Update the last-activity timestamp.
    pub fn touch(&self, id: u64) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&id) {
            entry.info.last_activity = Utc::now();
        }
    }

    /// Move a connection to `Closing`.
    pub fn mark_closing(&self, id: u64) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&id) {
            entry.info.state = ConnectionState::Closing;
        }
    }

    /// Get the metadata of one connection.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<ConnectionInfo> {
        self.inner.lock().entries.get(&id).map(|e| e.info.clone())
    }

    /// Consistent list of live connections, ordered by ID.
    #[must_use]
    pub fn list_active(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self
            .inner
            .lock()
            .entries
            .values()
            .map(|e| e.info.clone())
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Number of live connections.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Number of live connections of one transport.
    #[must_use]
    pub fn active_count_for(&self, transport: TransportKind) -> usize {
        let mut inner = self.inner.lock();
        *inner.count_mut(transport)
    }

    /// Ask every handler to stop. Connections registered later start out
    /// cancelled.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.entries.values_mut() {
            entry.info.state = ConnectionState::Closing;
        }
        self.shutdown.cancel();
    }

    /// Cancel the handlers of one listener.
    pub fn cancel_listener(&self, listener: &str) {
        let mut inner = self.inner.lock();
        for entry in inner
            .entries
            .values_mut()
            .filter(|e| e.info.listener == listener)
        {
            entry.info.state = ConnectionState::Closing;
            entry.cancel.cancel();
        }
    }

    /// Abort the tasks of connections still open. Their guards deregister
    /// them as the tasks unwind. Returns how many tasks were aborted.
    pub fn force_close_all(&self) -> usize {
        self.force_close(|_| true)
    }

    /// Abort the tasks of one listener's open connections.
    pub fn force_close_listener(&self, listener: &str) -> usize {
        self.force_close(|info| info.listener == listener)
    }

    fn force_close(&self, matches: impl Fn(&ConnectionInfo) -> bool) -> usize {
        let handles: Vec<(u64, AbortHandle)> = self
            .inner
            .lock()
            .entries
            .values()
            .filter(|e| matches(&e.info))
            .filter_map(|e| e.abort.clone().map(|h| (e.info.id, h)))
            .collect();

        for (id, handle) in &handles {
            warn!(conn_id = id, "Force-closing connection");
            handle.abort();
        }
        handles.len()
    }
}

/// Registration held by a connection handler.
///
/// Dropping the guard deregisters the connection, whichever way the
/// handler exits, including task abort.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: u64,
    transport: TransportKind,
    remote_addr: SocketAddr,
    established_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl ConnectionGuard {
    /// Connection ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transport.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Client address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// When the connection was accepted.
    #[must_use]
    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Token cancelled when the connection should stop.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The owning registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Record activity on the connection.
    pub fn touch(&self) {
        self.registry.touch(self.id);
    }

    /// Mark the connection as closing.
    pub fn mark_closing(&self) {
        self.registry.mark_closing(self.id);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.on_close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::metrics::MetricsRegistry;
    use crate::modules::server::metrics::{transport_labels, ACTIVE_CONNECTIONS};

    fn registry() -> (Arc<MetricsRegistry>, Arc<ConnectionRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let server_metrics = ServerMetrics::register(Arc::clone(&metrics)).unwrap();
        (metrics, Arc::new(ConnectionRegistry::new(server_metrics)))
    }

    fn conn(transport: TransportKind, port: u16) -> NewConnection {
        NewConnection {
            transport,
            listener: "test".to_string(),
            remote_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            local_addr: SocketAddr::from(([127, 0, 0, 1], 9500)),
        }
    }

    fn gauge(metrics: &MetricsRegistry, transport: TransportKind) -> f64 {
        metrics
            .snapshot()
            .value(ACTIVE_CONNECTIONS, &transport_labels(transport))
            .unwrap()
    }

    #[test]
    fn test_accept_five_close_two() {
        let (metrics, registry) = registry();

        let mut guards: Vec<_> = (0..5)
            .map(|i| registry.on_accept(conn(TransportKind::Plain, 40000 + i)))
            .collect();
        assert_eq!(gauge(&metrics, TransportKind::Plain), 5.0);

        guards.truncate(3);
        assert_eq!(gauge(&metrics, TransportKind::Plain), 3.0);
        assert_eq!(registry.active_count(), 3);
        assert_eq!(gauge(&metrics, TransportKind::Tls), 0.0);
    }

    #[test]
    fn test_double_close_is_noop() {
        let (metrics, registry) = registry();
        let keep = registry.on_accept(conn(TransportKind::Tls, 40000));
        let guard = registry.on_accept(conn(TransportKind::Tls, 40001));
        let id = guard.id();

        let info = registry.on_close(id).unwrap();
        assert_eq!(info.state, ConnectionState::Closed);
        assert!(registry.on_close(id).is_none());
        drop(guard);

        assert_eq!(gauge(&metrics, TransportKind::Tls), 1.0);
        assert_eq!(registry.active_count_for(TransportKind::Tls), 1);
        drop(keep);
        assert_eq!(gauge(&metrics, TransportKind::Tls), 0.0);
    }

    #[test]
    fn test_ids_never_reused() {
        let (_metrics, registry) = registry();
        let first = registry.on_accept(conn(TransportKind::Plain, 40000)).id();
        let second = registry.on_accept(conn(TransportKind::Plain, 40001)).id();
        assert!(second > first);
    }

    #[test]
    fn test_touch_and_mark_closing() {
        let (metrics, registry) = registry();
        let guard = registry.on_accept(conn(TransportKind::Plain, 40000));
        let before = registry.get(guard.id()).unwrap().last_activity;

        guard.touch();
        guard.mark_closing();

        let info = registry.get(guard.id()).unwrap();
        assert!(info.last_activity >= before);
        assert_eq!(info.state, ConnectionState::Closing);
        // Closing connections still count as live.
        assert_eq!(gauge(&metrics, TransportKind::Plain), 1.0);
    }

    #[test]
    fn test_list_active() {
        let (_metrics, registry) = registry();
        let a = registry.on_accept(conn(TransportKind::Plain, 40000));
        let b = registry.on_accept(conn(TransportKind::Tls, 40001));

        let list = registry.list_active();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, a.id());
        assert_eq!(list[1].id, b.id());
        assert_eq!(list[1].transport, TransportKind::Tls);
    }

    #[test]
    fn test_cancel_all() {
        let (_metrics, registry) = registry();
        let guard = registry.on_accept(conn(TransportKind::Plain, 40000));
        assert!(!guard.cancel_token().is_cancelled());

        registry.cancel_all();
        assert!(guard.cancel_token().is_cancelled());
        assert_eq!(
            registry.get(guard.id()).unwrap().state,
            ConnectionState::Closing
        );

        let late = registry.on_accept(conn(TransportKind::Plain, 40001));
        assert!(late.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_force_close_deregisters() {
        let (metrics, registry) = registry();
        let guard = registry.on_accept(conn(TransportKind::Plain, 40000));
        let id = guard.id();

        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        registry.attach_task(id, task.abort_handle());

        assert_eq!(registry.force_close_all(), 1);
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(registry.active_count(), 0);
        assert_eq!(gauge(&metrics, TransportKind::Plain), 0.0);
    }

    #[test]
    fn test_concurrent_accept_close() {
        let (metrics, registry) = registry();

        let handles: Vec<_> = (0..8u16)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..200u16 {
                        let guard = registry.on_accept(conn(TransportKind::Plain, t * 1000 + i));
                        drop(guard);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.active_count(), 0);
        assert_eq!(gauge(&metrics, TransportKind::Plain), 0.0);
    }
}
