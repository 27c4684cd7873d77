use http::header::{HeaderValue, HOST};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::error::{FirewallError, Result};
use crate::firewall::response::{self, RespBody};

pub type HttpClient = Client<HttpConnector, Incoming>;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

pub fn create_client(timeout: &TimeoutConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(Duration::from_millis(timeout.connect_ms)));
    connector.set_nodelay(true);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_millis(timeout.idle_ms))
        .build(connector)
}

/// Rewrites `req` to target `upstream` and sends it, keeping the client's `Host`.
pub async fn forward(
    client: &HttpClient,
    upstream: &str,
    client_ip: Option<IpAddr>,
    req: Request<Incoming>,
) -> Result<Response<RespBody>> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let uri = format!("http://{upstream}{path_and_query}").parse::<http::Uri>()?;

    if !parts.headers.contains_key(HOST) {
        if let Some(authority) = parts.uri.authority() {
            if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(HOST, host);
            }
        }
    }
    if let Some(ip) = client_ip {
        let forwarded = match parts.headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert(X_FORWARDED_FOR, value);
        }
    }
    parts.uri = uri;
    parts.version = http::Version::HTTP_11;

    let resp = client
        .request(Request::from_parts(parts, body))
        .await
        .map_err(|e| FirewallError::Http(format!("Failed to get response from upstream: {e}")))?;
    Ok(resp.map(|b| b.boxed()))
}

pub fn bad_gateway() -> Response<RespBody> {
    response::status(StatusCode::BAD_GATEWAY)
}
