//! Per-connection read/write loop.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::FrameCodec;
use super::config::{ConnectionSettings, Framing};
use super::error::ConnectionError;
use super::metrics::ServerMetrics;
use super::registry::ConnectionGuard;
use super::service::{ConnectionContext, MessageService, Reply, TlsSession};
use super::stream::{ActivityStream, BoxedStream};

type Connection = Framed<ActivityStream<BoxedStream>, FrameCodec>;

/// Settings shared by every handler of a listener.
pub(crate) struct HandlerConfig {
    pub(crate) settings: ConnectionSettings,
    pub(crate) framing: Framing,
    pub(crate) service: Arc<dyn MessageService>,
    pub(crate) tls: Option<TlsAcceptor>,
}

/// Whether the loop keeps going after a write.
enum Flow {
    Continue,
    Stop,
}

/// Serve one accepted connection until it ends.
///
/// The guard is dropped on return, which deregisters the connection; a task
/// abort drops it too.
pub(crate) async fn serve(tcp: TcpStream, guard: ConnectionGuard, config: Arc<HandlerConfig>) {
    let transport = guard.transport();
    let metrics = guard.registry().metrics().clone();
    let peer = guard.remote_addr();

    match run(tcp, &guard, &config, &metrics).await {
        Ok(()) => {
            debug!(conn_id = guard.id(), peer = %peer, "Connection closed");
        }
        Err(e) => {
            metrics.error(transport, e.kind());
            match &e {
                ConnectionError::Io(_) => {
                    debug!(conn_id = guard.id(), peer = %peer, error = %e, "Connection closed on IO error");
                }
                ConnectionError::IdleTimeout(_) => {
                    info!(conn_id = guard.id(), peer = %peer, error = %e, "Closing idle connection");
                }
                _ => {
                    warn!(conn_id = guard.id(), peer = %peer, error = %e, "Connection failed");
                }
            }
        }
    }

    guard.mark_closing();
}

async fn run(
    tcp: TcpStream,
    guard: &ConnectionGuard,
    config: &HandlerConfig,
    metrics: &ServerMetrics,
) -> Result<(), ConnectionError> {
    let cancel = guard.cancel_token().clone();
    let settings = &config.settings;

    let (stream, tls): (BoxedStream, Option<TlsSession>) = match &config.tls {
        None => (Box::new(tcp) as BoxedStream, None),
        Some(acceptor) => {
            let handshake = timeout(settings.handshake_timeout, acceptor.accept(tcp));
            let tls_stream = tokio::select! {
                result = handshake => match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(ConnectionError::Handshake(e.to_string())),
                    Err(_) => {
                        return Err(ConnectionError::Handshake(format!(
                            "timed out after {:?}",
                            settings.handshake_timeout
                        )))
                    }
                },
                () = cancel.cancelled() => return Ok(()),
            };

            let (_, session) = tls_stream.get_ref();
            let tls = TlsSession {
                protocol: session
                    .protocol_version()
                    .map(|v| format!("{v:?}"))
                    .unwrap_or_default(),
                cipher_suite: session
                    .negotiated_cipher_suite()
                    .map(|s| format!("{:?}", s.suite()))
                    .unwrap_or_default(),
            };
            debug!(
                conn_id = guard.id(),
                protocol = %tls.protocol,
                cipher = %tls.cipher_suite,
                "TLS handshake complete"
            );
            (Box::new(tls_stream) as BoxedStream, Some(tls))
        }
    };

    let mut ctx = ConnectionContext {
        id: guard.id(),
        transport: guard.transport(),
        remote_addr: guard.remote_addr(),
        established_at: guard.established_at(),
        tls,
        messages_received: 0,
        messages_sent: 0,
        bytes_received: 0,
        bytes_sent: 0,
    };

    let mut framed = Framed::new(
        ActivityStream::new(stream),
        FrameCodec::new(config.framing, settings.max_frame_length),
    );

    if let Some(greeting) = config.service.greeting(&ctx) {
        if let Flow::Stop = send(&mut framed, greeting, &mut ctx, guard, settings, metrics).await? {
            return Ok(());
        }
    }

    // Measured from the last byte read, not the last complete frame.
    let idle = sleep(settings.idle_timeout);
    tokio::pin!(idle);

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(conn_id = ctx.id, "Connection cancelled");
                break;
            }
            next = framed.next() => match next {
                None => break,
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(frame)) => frame,
            },
            () = &mut idle => {
                let deadline = framed.get_ref().last_read() + settings.idle_timeout;
                if deadline <= Instant::now() {
                    return Err(ConnectionError::IdleTimeout(settings.idle_timeout));
                }
                idle.as_mut().reset(deadline);
                continue;
            }
        };

        ctx.messages_received += 1;
        ctx.bytes_received += frame.len() as u64;
        metrics.message_received(ctx.transport, frame.len());
        guard.touch();

        let flow = match config.service.handle(&ctx, frame) {
            Reply::Send(reply) => {
                send(&mut framed, reply, &mut ctx, guard, settings, metrics).await?
            }
            Reply::SendAndClose(reply) => {
                send(&mut framed, reply, &mut ctx, guard, settings, metrics).await?;
                Flow::Stop
            }
            Reply::None => Flow::Continue,
            Reply::Close => Flow::Stop,
        };
        if let Flow::Stop = flow {
            break;
        }
    }

    guard.mark_closing();
    // Best effort: the peer may already be gone.
    let _ = timeout(settings.write_timeout, framed.get_mut().shutdown()).await;
    Ok(())
}

async fn send(
    framed: &mut Connection,
    frame: Bytes,
    ctx: &mut ConnectionContext,
    guard: &ConnectionGuard,
    settings: &ConnectionSettings,
    metrics: &ServerMetrics,
) -> Result<Flow, ConnectionError> {
    let len = frame.len();
    let cancel: &CancellationToken = guard.cancel_token();

    tokio::select! {
        () = cancel.cancelled() => return Ok(Flow::Stop),
        result = timeout(settings.write_timeout, framed.send(frame)) => match result {
            Err(_) => return Err(ConnectionError::WriteTimeout(settings.write_timeout)),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(())) => {}
        },
    }

    ctx.messages_sent += 1;
    ctx.bytes_sent += len as u64;
    metrics.message_sent(ctx.transport, len);
    guard.touch();
    Ok(Flow::Continue)
}
