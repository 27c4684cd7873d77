//! Shared helpers for firewall integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{COOKIE, HOST, SET_COOKIE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use umbress_lib::error::{FirewallError, Result as FwResult};
use umbress_lib::firewall::response::full;
use umbress_lib::security::{ClientAddr, ReverseDns};
use umbress_lib::{Firewall, FirewallConfig, MemoryStore, RespBody};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type TestResult = Result<(), BoxError>;

pub const UPSTREAM_BODY: &str = "upstream";

/// Resolver that knows nothing.
pub struct NoDns;

#[async_trait]
impl ReverseDns for NoDns {
    async fn reverse(&self, ip: IpAddr) -> FwResult<Vec<String>> {
        Err(FirewallError::Dns(format!("no PTR for {ip}")))
    }

    async fn forward(&self, host: &str) -> FwResult<Vec<IpAddr>> {
        Err(FirewallError::Dns(format!("no A for {host}")))
    }
}

/// Resolver with one PTR name per address, resolving forward to the same address.
pub struct StaticDns {
    pub ptr: Vec<(IpAddr, String)>,
}

#[async_trait]
impl ReverseDns for StaticDns {
    async fn reverse(&self, ip: IpAddr) -> FwResult<Vec<String>> {
        Ok(self.ptr.iter().filter(|(a, _)| *a == ip).map(|(_, h)| h.clone()).collect())
    }

    async fn forward(&self, host: &str) -> FwResult<Vec<IpAddr>> {
        Ok(self.ptr.iter().filter(|(_, h)| h == host).map(|(a, _)| *a).collect())
    }
}

pub fn firewall_config(toml: &str) -> Result<FirewallConfig, BoxError> {
    Ok(toml::from_str(toml)?)
}

/// Firewall over a fresh in-memory store and a resolver that never answers.
pub fn build_firewall(toml: &str) -> Result<(Firewall, Arc<MemoryStore>), BoxError> {
    build_firewall_with_dns(toml, Arc::new(NoDns))
}

pub fn build_firewall_with_dns(
    toml: &str,
    dns: Arc<dyn ReverseDns>,
) -> Result<(Firewall, Arc<MemoryStore>), BoxError> {
    let store = Arc::new(MemoryStore::new());
    let fw = Firewall::builder(firewall_config(toml)?)
        .store(store.clone())
        .reverse_dns(dns)
        .build()?;
    Ok((fw, store))
}

pub struct TestRequest {
    method: Method,
    uri: String,
    source: IpAddr,
    cookies: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl TestRequest {
    pub fn get(source: &str, uri: &str) -> Self {
        Self {
            method: Method::GET,
            uri: uri.to_string(),
            source: source.parse().unwrap_or(IpAddr::from([127, 0, 0, 1])),
            cookies: Vec::new(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn post(source: &str, uri: &str, body: &str) -> Self {
        let mut req = Self::get(source, uri);
        req.method = Method::POST;
        req.body = body.to_string();
        req.headers
            .push(("content-type", "application/x-www-form-urlencoded".to_string()));
        req
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn build(self) -> Result<Request<Full<Bytes>>, http::Error> {
        let mut builder = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .header(HOST, "www.example.com");
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(COOKIE, cookie);
        }
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let mut req = builder.body(Full::new(Bytes::from(self.body)))?;
        req.extensions_mut()
            .insert(ClientAddr(SocketAddr::new(self.source, 40000)));
        Ok(req)
    }
}

/// Runs `req` through the firewall with a downstream that answers 200.
pub async fn send(
    fw: &Firewall,
    req: TestRequest,
) -> Result<Response<RespBody>, BoxError> {
    let req = req.build()?;
    Ok(fw
        .handle(req, |_req| async {
            let mut resp = Response::new(full(UPSTREAM_BODY));
            *resp.status_mut() = StatusCode::OK;
            resp
        })
        .await)
}

/// Value of the `name` cookie set by `resp`.
pub fn set_cookie(resp: &Response<RespBody>, name: &str) -> Option<String> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().to_string())
}

/// Local HTTP server answering every request with the same canned response.
/// Returns its address and the number of requests it has served.
pub async fn spawn_stub(
    status: StatusCode,
    headers: &[(&'static str, &'static str)],
    body: &'static str,
) -> Result<(SocketAddr, Arc<AtomicUsize>), BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let headers = headers.to_vec();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let counter = counter.clone();
            let headers = headers.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |_req: Request<Incoming>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
                    *resp.status_mut() = status;
                    for (name, value) in &headers {
                        resp.headers_mut().insert(*name, HeaderValue::from_static(*value));
                    }
                    async move { Ok::<_, Infallible>(resp) }
                });
                let _ = ConnBuilder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    Ok((addr, hits))
}
