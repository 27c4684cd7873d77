use http::{Extensions, HeaderMap};
use std::net::{IpAddr, SocketAddr};

/// Peer address of the connection a request arrived on.
///
/// Inserted into request extensions by the bundled server; embedders using their own
/// transport insert it themselves or supply a custom [`SourceExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Derives the source identity of a request.
pub trait SourceExtractor: Send + Sync + 'static {
    fn extract(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr>;
}

/// Default extractor: first `X-Forwarded-For` hop when the proxy is trusted, otherwise the
/// socket peer from [`ClientAddr`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSourceExtractor {
    pub trust_proxy: bool,
}

impl SourceExtractor for DefaultSourceExtractor {
    fn extract(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
        if self.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return Some(normalize_ip(ip));
            }
        }
        extensions
            .get::<ClientAddr>()
            .map(|addr| normalize_ip(addr.0.ip()))
    }
}

/// Maps IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) to plain IPv4.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use std::str::FromStr;

    fn request(xff: Option<&str>, peer: &str) -> Request<()> {
        let mut builder = Request::builder().uri("/");
        if let Some(xff) = xff {
            builder = builder.header("x-forwarded-for", xff);
        }
        let mut req = builder.body(()).unwrap_or_default();
        if let Ok(addr) = SocketAddr::from_str(peer) {
            req.extensions_mut().insert(ClientAddr(addr));
        }
        req
    }

    fn source<E: SourceExtractor>(ex: &E, req: &Request<()>) -> Option<IpAddr> {
        ex.extract(req.headers(), req.extensions())
    }

    #[test]
    fn forwarded_header_ignored_unless_trusted() {
        let req = request(Some("203.0.113.9, 10.0.0.1"), "10.0.0.1:5555");
        let untrusted = DefaultSourceExtractor { trust_proxy: false };
        let trusted = DefaultSourceExtractor { trust_proxy: true };
        assert_eq!(source(&untrusted, &req), IpAddr::from_str("10.0.0.1").ok());
        assert_eq!(source(&trusted, &req), IpAddr::from_str("203.0.113.9").ok());
    }

    #[test]
    fn mapped_v6_normalized() {
        let req = request(None, "[::ffff:192.0.2.7]:443");
        let ex = DefaultSourceExtractor::default();
        assert_eq!(source(&ex, &req), IpAddr::from_str("192.0.2.7").ok());
    }

    #[test]
    fn garbage_forwarded_falls_back_to_peer() {
        let req = request(Some("not-an-ip"), "198.51.100.2:80");
        let ex = DefaultSourceExtractor { trust_proxy: true };
        assert_eq!(source(&ex, &req), IpAddr::from_str("198.51.100.2").ok());
    }
}
