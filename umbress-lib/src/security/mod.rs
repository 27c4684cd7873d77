pub mod crawler;
pub mod geoip;
pub mod ip_filter;
pub mod rate_limit;
pub mod source;

pub use crawler::{CrawlerVerdict, CrawlerVerifier, HickoryReverseDns, ReverseDns};
pub use geoip::{GeoDecision, GeoPolicy};
pub use ip_filter::{IpListPolicy, IpMatcher};
pub use rate_limit::{RateDecision, RateLimiter};
pub use source::{normalize_ip, ClientAddr, DefaultSourceExtractor, SourceExtractor};
