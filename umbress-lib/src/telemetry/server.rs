use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::handlers::{handle_metrics, health_check_response};
use crate::firewall::response::{full, RespBody};

fn internal_error() -> Response<RespBody> {
    let mut resp = Response::new(full("Internal Server Error"));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

fn route(path: &str, registry: &Registry) -> Response<RespBody> {
    match path {
        "/health" => health_check_response().unwrap_or_else(|_| internal_error()),
        "/metrics" => handle_metrics(registry).unwrap_or_else(|_| internal_error()),
        _ => {
            let mut resp = Response::new(full("Not Found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    }
}

/// Start the observability server on a dedicated port.
///
/// Serves `/metrics` (Prometheus text format) and `/health`. Runs until `shutdown` is
/// cancelled.
pub async fn start_observability_server(
    port: u16,
    registry: Registry,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(?addr, "Observability server started (metrics + health checks)");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Observability server: shutting down");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "Observability server: accept error");
                        continue;
                    }
                };

                let registry = registry.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let resp = route(req.uri().path(), &registry);
                        async move { Ok::<_, hyper::Error>(resp) }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "Observability server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("Observability server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_path_is_not_found() {
        let registry = Registry::new();
        assert_eq!(route("/nope", &registry).status(), StatusCode::NOT_FOUND);
        assert_eq!(route("/health", &registry).status(), StatusCode::OK);
        assert_eq!(route("/metrics", &registry).status(), StatusCode::OK);
    }
}
