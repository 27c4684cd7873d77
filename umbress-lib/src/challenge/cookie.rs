use ahash::AHashMap;
use chrono::{DateTime, Utc};
use http::header::COOKIE;
use http::HeaderMap;
use std::fmt::Write;

/// Name/value pairs from every `Cookie` header. The first occurrence of a name wins.
pub fn parse_cookies(headers: &HeaderMap) -> AHashMap<String, String> {
    let mut cookies = AHashMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else { continue };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"');
            cookies.entry(name.to_string()).or_insert_with(|| value.to_string());
        }
    }
    cookies
}

/// `Set-Cookie` value for a challenge cookie.
#[derive(Debug, Clone)]
pub struct SetCookie<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// Unix seconds.
    pub expires_at: u64,
    /// Cookie domain without the leading dot; omitted when `None`.
    pub domain: Option<&'a str>,
    pub secure: bool,
}

impl SetCookie<'_> {
    pub fn render(&self) -> String {
        let mut out = format!("{}={}; Path=/", self.name, self.value);
        let expires = i64::try_from(self.expires_at)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        if let Some(expires) = expires {
            let _ = write!(out, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"));
        }
        if let Some(domain) = self.domain {
            let _ = write!(out, "; Domain=.{domain}");
        }
        out.push_str("; HttpOnly; SameSite=Lax");
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

/// Cookie domain for a request host: port and a leading `www.` are stripped, and IP
/// literals or single-label hosts get no `Domain` attribute.
pub(crate) fn cookie_domain(host: &str) -> Option<String> {
    if host.starts_with('[') {
        return None;
    }
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    if host.parse::<std::net::IpAddr>().is_ok() || !host.contains('.') {
        return None;
    }
    let host = host.strip_prefix("www.").unwrap_or(host);
    Some(host.to_ascii_lowercase())
}
