use ahash::AHashMap;
use http::header::{HOST, USER_AGENT};
use http::{HeaderMap, Method, Uri};
use std::net::IpAddr;

use crate::challenge::{cookie_domain, parse_cookies};

/// Per-request facts every stage reads, extracted once.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub source: IpAddr,
    /// `source` rendered for store keys.
    pub source_key: String,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Effective host, `X-Forwarded-Host` first when the proxy is trusted.
    pub host: Option<String>,
    /// Effective scheme is https.
    pub secure: bool,
    pub user_agent: Option<String>,
    cookies: AHashMap<String, String>,
}

impl RequestContext {
    pub fn new(
        source: IpAddr,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        trust_proxy: bool,
    ) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let forwarded_host = trust_proxy.then(|| header("x-forwarded-host")).flatten();
        let host = forwarded_host
            .or_else(|| header(HOST.as_str()))
            .or_else(|| uri.authority().map(|a| a.to_string()));

        let secure = if trust_proxy {
            header("x-forwarded-proto").is_some_and(|p| p.eq_ignore_ascii_case("https"))
        } else {
            uri.scheme_str() == Some("https")
        };

        Self {
            source,
            source_key: source.to_string(),
            method: method.clone(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            host,
            secure,
            user_agent: headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            cookies: parse_cookies(headers),
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Domain attribute for cookies set on this request.
    pub fn cookie_domain(&self) -> Option<String> {
        self.host.as_deref().and_then(cookie_domain)
    }
}
