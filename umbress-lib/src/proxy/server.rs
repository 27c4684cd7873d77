use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::forwarding::{bad_gateway, create_client, forward, HttpClient};
use crate::config::Config;
use crate::error::{FirewallError, Result};
use crate::firewall::{Firewall, RespBody};
use crate::security::ClientAddr;
use crate::telemetry::{init_metrics, start_observability_server, Metrics};

/// Guard to decrement active connections counter when dropped
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared per-connection state.
struct Proxy {
    firewall: Firewall,
    client: HttpClient,
    upstream: String,
    metrics: Option<Arc<Metrics>>,
}

impl Proxy {
    async fn serve(
        self: Arc<Self>,
        mut req: Request<Incoming>,
        peer: SocketAddr,
    ) -> hyper::Response<RespBody> {
        req.extensions_mut().insert(ClientAddr(peer));
        let proxy = Arc::clone(&self);
        self.firewall
            .handle(req, move |req| async move {
                match forward(&proxy.client, &proxy.upstream, Some(peer.ip()), req).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        warn!(error = %e, upstream = %proxy.upstream, "Upstream request failed");
                        if let Some(metrics) = &proxy.metrics {
                            metrics.record_upstream_error();
                        }
                        bad_gateway()
                    }
                }
            })
            .await
    }
}

/// Runs the firewall in front of the configured upstream until SIGTERM or SIGINT.
pub async fn run(config: Arc<Config>) -> Result<()> {
    let shutdown = CancellationToken::new();

    let metrics = match config.telemetry.metrics_port {
        Some(port) => {
            let (metrics, registry) = init_metrics()
                .map_err(|e| FirewallError::Config(format!("Failed to initialize metrics: {e}")))?;
            let token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = start_observability_server(port, registry, token).await {
                    error!(error = %e, "Observability server failed");
                }
            });
            Some(metrics)
        }
        None => None,
    };

    let mut builder = Firewall::builder(config.firewall.clone());
    if let Some(metrics) = &metrics {
        builder = builder.metrics(Arc::clone(metrics));
    }
    let proxy = Arc::new(Proxy {
        firewall: builder.build()?,
        client: create_client(&config.timeout),
        upstream: config.upstream.address.clone(),
        metrics,
    });

    let addr = config.listen;
    let listener = TcpListener::bind(addr).await.map_err(FirewallError::Io)?;
    let conn_builder = ConnBuilder::new(TokioExecutor::new());
    let active_connections = Arc::new(AtomicUsize::new(0));

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        FirewallError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        FirewallError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;

    info!(?addr, upstream = %config.upstream.address, "umbress listening");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                };

                active_connections.fetch_add(1, Ordering::Relaxed);
                let guard = ConnectionGuard(Arc::clone(&active_connections));
                let conn_builder = conn_builder.clone();
                let proxy = Arc::clone(&proxy);

                tokio::spawn(async move {
                    let _guard = guard;
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let proxy = Arc::clone(&proxy);
                        async move { Ok::<_, hyper::Error>(proxy.serve(req, peer).await) }
                    });
                    if let Err(e) = conn_builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "serve_connection error");
                    }
                });
            }
        }
    }

    shutdown.cancel();
    drop(listener);

    info!(
        "Waiting for active connections to finish (timeout: {}s)",
        config.timeout.shutdown_secs
    );
    let shutdown_timeout = Duration::from_secs(config.timeout.shutdown_secs);
    let start = std::time::Instant::now();

    loop {
        let active = active_connections.load(Ordering::Relaxed);
        if active == 0 {
            info!("All connections closed, shutdown complete");
            break;
        }
        if start.elapsed() >= shutdown_timeout {
            warn!(active_connections = active, "Shutdown timeout reached");
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    info!("umbress stopped");
    Ok(())
}
