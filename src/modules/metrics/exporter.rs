//! HTTP endpoint serving JSON snapshots.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MetricsConfig;
use super::error::{MetricsError, MetricsResult};
use super::json::SnapshotExporter;
use super::registry::MetricsRegistry;

/// HTTP/1 server answering `GET <path>` with the registry snapshot.
#[derive(Debug)]
pub struct MetricsExporter {
    config: MetricsConfig,
    registry: Arc<MetricsRegistry>,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl MetricsExporter {
    /// Create a new exporter.
    #[must_use]
    pub fn new(config: MetricsConfig, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            registry,
            shutdown: None,
            task: None,
            local_addr: None,
        }
    }

    /// Bind and start serving.
    pub async fn start(&mut self) -> MetricsResult<()> {
        if self.shutdown.is_some() {
            return Err(MetricsError::AlreadyRunning);
        }

        if !self.config.enabled {
            info!("Metrics endpoint is disabled");
            return Ok(());
        }

        let address = self.config.socket_addr();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| MetricsError::BindError { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| MetricsError::BindError { address, source })?;

        info!(addr = %local_addr, path = %self.config.path, "Metrics endpoint listening");

        let shutdown = CancellationToken::new();
        let routes = Arc::new(Routes {
            registry: Arc::clone(&self.registry),
            path: self.config.path.clone(),
            renderer: SnapshotExporter::new().pretty(self.config.pretty),
        });

        self.task = Some(tokio::spawn(serve(listener, routes, shutdown.clone())));
        self.shutdown = Some(shutdown);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Stop serving and wait for the accept loop to exit.
    pub async fn stop(&mut self) -> MetricsResult<()> {
        let shutdown = self.shutdown.take().ok_or(MetricsError::NotRunning)?;
        shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Metrics endpoint task ended abnormally");
            }
        }
        self.local_addr = None;
        Ok(())
    }

    /// Check if the server is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Address actually bound, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

struct Routes {
    registry: Arc<MetricsRegistry>,
    path: String,
    renderer: SnapshotExporter,
}

async fn serve(listener: TcpListener, routes: Arc<Routes>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, remote_addr)) => {
                        debug!(%remote_addr, "New metrics connection");

                        let routes = Arc::clone(&routes);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let routes = Arc::clone(&routes);
                                async move { Ok::<_, Infallible>(routes.handle(&req)) }
                            });

                            let conn = http1::Builder::new().serve_connection(io, service);
                            tokio::select! {
                                result = conn => {
                                    if let Err(e) = result {
                                        debug!(error = %e, "Metrics connection error");
                                    }
                                }
                                () = shutdown.cancelled() => {}
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Metrics accept error");
                    }
                }
            }
            () = shutdown.cancelled() => {
                info!("Metrics endpoint shutting down");
                break;
            }
        }
    }
}

impl Routes {
    fn handle(&self, req: &Request<Incoming>) -> Response<Full<Bytes>> {
        let path = req.uri().path();

        if req.method() != Method::GET {
            return text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        if path == self.path {
            // The snapshot is taken per request; rendering runs with no
            // registry lock held.
            let snapshot = self.registry.snapshot();
            match self.renderer.to_string(&snapshot) {
                Ok(body) => {
                    let mut response = Response::new(Full::new(Bytes::from(body)));
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    response
                }
                Err(e) => {
                    error!(error = %e, "Failed to render metrics snapshot");
                    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            }
        } else if path == "/health" {
            text(StatusCode::OK, "OK")
        } else {
            text(StatusCode::NOT_FOUND, "Not Found")
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
