//! Yamux session loop, per-stream dispatch, and shutdown coordination.
//! The bridge is always the yamux *server*.

use crate::config::BridgeConfig;
use futures::TryStreamExt;
use linuxio_streams::{Registry, Session, Shutdown, ShutdownHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tracing::{error, info, warn};
use yamux::{Config as YamuxConfig, Connection, Mode};

/// Concrete duplex every stream in the bridge shares: a yamux stream
/// adapted from `futures` I/O traits to `tokio`'s.
pub type YamuxStream = Compat<yamux::Stream>;

/// Fires once, from whichever of {signal, peer hangup, explicit command}
/// happens first, and starts the shutdown sequence.
#[derive(Clone)]
pub struct ShutdownRequest(Arc<Notify>);

impl ShutdownRequest {
    pub fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    pub fn request(&self) {
        self.0.notify_one();
    }

    pub async fn requested(&self) {
        self.0.notified().await;
    }
}

/// Converts SIGINT/SIGTERM into a single [`ShutdownRequest`].
pub fn spawn_signal_watcher(request: ShutdownRequest) {
    tokio::spawn(async move {
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGINT handler: {e}");
                return;
            }
        };
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        request.request();
    });
}

/// Runs the full session: accepts yamux streams over `socket` and
/// dispatches each to `registry`, until shutdown.
pub async fn run_session(
    socket: tokio::net::UnixStream,
    session: Arc<Session>,
    registry: Arc<Registry<YamuxStream>>,
    config: BridgeConfig,
) -> anyhow::Result<()> {
    let mut connection = Connection::new(socket.compat(), YamuxConfig::default(), Mode::Server);

    let shutdown_request = ShutdownRequest::new();
    spawn_signal_watcher(shutdown_request.clone());

    let (shutdown_handle, shutdown) = linuxio_streams::shutdown_channel();
    let active = Arc::new(AtomicUsize::new(0));
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_request.requested() => {
                info!("shutdown requested, leaving accept loop");
                break;
            }

            next = connection.try_next() => {
                match next {
                    Ok(Some(stream)) => {
                        spawn_stream_task(
                            stream,
                            session.clone(),
                            registry.clone(),
                            shutdown.clone(),
                            active.clone(),
                            &mut tasks,
                        );
                    }
                    Ok(None) => {
                        info!("peer closed the yamux session");
                        break;
                    }
                    Err(e) => {
                        warn!("yamux session error: {e}");
                        break;
                    }
                }
            }
        }
    }

    shutdown_coordinator(shutdown_handle, &mut tasks, &config).await;
    Ok(())
}

fn spawn_stream_task(
    stream: yamux::Stream,
    session: Arc<Session>,
    registry: Arc<Registry<YamuxStream>>,
    shutdown: Shutdown,
    active: Arc<AtomicUsize>,
    tasks: &mut JoinSet<()>,
) {
    active.fetch_add(1, Ordering::SeqCst);
    tasks.spawn(async move {
        dispatch_stream(stream, session, registry, shutdown).await;
        active.fetch_sub(1, Ordering::SeqCst);
    });
}

/// First frame on a stream MUST be `OPEN`; anything else closes the stream.
async fn dispatch_stream(
    stream: yamux::Stream,
    session: Arc<Session>,
    registry: Arc<Registry<YamuxStream>>,
    shutdown: Shutdown,
) {
    let stream_id: u32 = stream.id().into();
    let mut conn = linuxio_streams::StreamConn::new(stream.compat(), stream_id);

    let open_frame = match conn.read_frame().await {
        Ok(frame) => frame,
        Err(e) => {
            warn!(stream_id, "failed to read opening frame: {e}");
            return;
        }
    };

    if open_frame.opcode != linuxio_protocol::Opcode::Open {
        warn!(stream_id, "first frame was not OPEN, closing stream");
        let _ = conn.write_close().await;
        return;
    }

    let (stream_type, args) = match linuxio_protocol::decode_open_payload(&open_frame.payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(stream_id, "malformed OPEN payload: {e}");
            let _ = conn.write_close().await;
            return;
        }
    };

    let Some(handler) = registry.lookup(&stream_type) else {
        warn!(stream_id, %stream_type, "no handler registered for stream type");
        let _ = conn.write_close().await;
        return;
    };

    match handler.handle(session, conn, args, shutdown).await {
        Ok(()) => {}
        Err(linuxio_streams::HandlerError::Aborted) => {
            // Sentinel: suppressed in logs by design.
        }
        Err(e) => {
            error!(stream_id, %stream_type, "stream handler failed: {e}");
        }
    }
}

/// Pause for in-flight frames to flush, close the shared closing channel,
/// then wait (bounded) for stream tasks to drain.
async fn shutdown_coordinator(
    shutdown_handle: ShutdownHandle,
    tasks: &mut JoinSet<()>,
    config: &BridgeConfig,
) {
    tokio::time::sleep(config.shutdown_flush_pause).await;
    shutdown_handle.trigger();

    let drain = tokio::time::timeout(config.stream_drain_timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drain.is_err() {
        warn!("stream drain window exceeded; exiting regardless");
    }
}
