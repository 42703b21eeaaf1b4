//! Listener multiplexing proxy passthrough and the control plane

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::control::{ControlOp, ControlPlane};
use super::http::{error_response, into_response, snapshot_request, text_response};
use super::ProxyState;
use crate::config::{Config, LimitsConfig, Mode};
use crate::network::{ConnectionLimiter, UpstreamClient, SHUTDOWN_TIMEOUT_MS};
use crate::recording::{HttpRecorder, WebhookRelay};
use crate::replay::HttpReplayer;
use crate::{PlaybackError, Result};

/// Triggers graceful shutdown of a running [`PlaybackServer`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Ask the server to stop accepting and drain
    pub fn shutdown(&self) {
        self.tx.send(()).ok();
    }
}

/// Per-request dispatch shared by all connections
struct Dispatcher {
    state: Arc<ProxyState>,
    control: ControlPlane,
    recorder: HttpRecorder,
    replayer: HttpReplayer,
    limits: LimitsConfig,
}

impl Dispatcher {
    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        if let Some(op) = ControlOp::parse(request.uri()) {
            let result = match op {
                Ok(op) => {
                    debug!("Control operation {:?}", op);
                    self.control.execute(op).await
                }
                Err(e) => Err(e),
            };
            return match result {
                Ok(body) => text_response(StatusCode::OK, body),
                Err(e) => {
                    warn!("Control operation {} failed: {}", request.uri().path(), e);
                    error_response(&e)
                }
            };
        }

        match self.proxy(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Proxy request failed: {}", e);
                error_response(&e)
            }
        }
    }

    async fn proxy(&self, request: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        // The body is read before entering so a slow client cannot hold up transitions
        let request = snapshot_request(request, &self.limits).await?;

        let _gate = self.state.enter().await?;
        let response = match self.state.mode().await {
            Mode::Idle => return Err(PlaybackError::NoModeConfigured),
            Mode::Recording => self.recorder.record(&self.state, request).await?,
            Mode::Replaying => self.replayer.replay(&self.state, &request).await?,
        };

        into_response(&response)
    }
}

/// Record/replay proxy server
pub struct PlaybackServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ProxyState>,
    dispatcher: Arc<Dispatcher>,
    limiter: ConnectionLimiter,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl PlaybackServer {
    /// Validate `config` and bind the listener
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the address cannot be bound
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let remote = config.remote_uri()?;
        let client = UpstreamClient::new(config.limits.max_response_size);

        let webhook = config.webhook_uri()?.map(|uri| {
            info!("Relaying recorded requests to {}", uri);
            let (relay, _task) = WebhookRelay::spawn(client.clone(), uri);
            relay
        });

        let state = Arc::new(ProxyState::new(Duration::from_millis(
            config.limits.control_lock_timeout_ms,
        )));
        // Subscribed before any handle exists so an early shutdown is not lost
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let dispatcher = Dispatcher {
            state: Arc::clone(&state),
            control: ControlPlane::new(
                Arc::clone(&state),
                config.cassette_dir.clone(),
                shutdown_tx.clone(),
            ),
            recorder: HttpRecorder::new(
                client,
                remote,
                webhook,
                Duration::from_millis(config.limits.upstream_timeout_ms),
            ),
            replayer: HttpReplayer::new(config.replay_match),
            limits: config.limits.clone(),
        };

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            state,
            dispatcher: Arc::new(dispatcher),
            limiter: ConnectionLimiter::new(config.limits.max_connections),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared state, for embedding and tests
    #[must_use]
    pub fn state(&self) -> Arc<ProxyState> {
        Arc::clone(&self.state)
    }

    /// Handle that stops the server from outside
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Serve until `/pb/stop` or a [`ShutdownHandle`] fires
    ///
    /// In-flight responses are allowed to finish, then the active cassette is
    /// persisted.
    ///
    /// # Errors
    ///
    /// Returns error if the final persist fails
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            local_addr,
            state,
            dispatcher,
            limiter,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        let mut connections = JoinSet::new();

        info!(
            "Listening on http://{} (max {} connections)",
            local_addr,
            limiter.max_connections()
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Initiating graceful shutdown");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Some(guard) = limiter.try_acquire() else {
                                warn!(
                                    "Connection limit of {} reached, rejecting {}",
                                    limiter.max_connections(),
                                    peer_addr
                                );
                                drop(stream);
                                continue;
                            };

                            debug!(
                                "Accepted {} ({} active)",
                                peer_addr,
                                limiter.active_connections()
                            );
                            let dispatcher = Arc::clone(&dispatcher);
                            let mut conn_shutdown = shutdown_tx.subscribe();

                            connections.spawn(async move {
                                let _guard = guard;
                                let service = service_fn(move |req| {
                                    let dispatcher = Arc::clone(&dispatcher);
                                    async move { Ok::<_, Infallible>(dispatcher.handle(req).await) }
                                });

                                let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                                tokio::pin!(conn);

                                tokio::select! {
                                    result = conn.as_mut() => {
                                        if let Err(e) = result {
                                            debug!("Connection error from {}: {}", peer_addr, e);
                                        }
                                    }
                                    _ = conn_shutdown.recv() => {
                                        conn.as_mut().graceful_shutdown();
                                        if let Err(e) = conn.await {
                                            debug!("Connection error from {} during shutdown: {}", peer_addr, e);
                                        }
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);

        // Wait for in-flight connections with timeout
        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Connection cleanup error: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connections still open after {} ms, aborting",
                connections.len(),
                SHUTDOWN_TIMEOUT_MS
            );
            connections.shutdown().await;
        }

        state.terminate().await?;
        info!("Shutdown complete");
        Ok(())
    }
}
