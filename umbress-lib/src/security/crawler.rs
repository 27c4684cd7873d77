//! Search engine crawler verification.
//!
//! A user agent claiming to be a known crawler is confirmed by reverse DNS: one of the PTR
//! names must belong to the crawler's domain and resolve forward to the source address.
//! Confirmed addresses are remembered in the store under `bot_<ip>`.

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use regex::Regex;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CrawlerConfig;
use crate::error::{FirewallError, Result};
use crate::store::Store;

static CRAWLER_USER_AGENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"((AdsBot-)?Google(bot)?)|Yandex(Webmaster|Bot|Metrika)|(bing|msn)bot|Baiduspider|Mail\.RU_Bot|Applebot",
    )
    .ok()
});

/// Crawler domains, matched on whole labels.
static CRAWLER_HOSTNAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(^|\.)(google(bot)?\.com|yandex\.(com|net|ru)|search\.msn\.com|crawl\.baidu\.com|mail\.ru|applebot\.apple\.com)$",
    )
    .ok()
});

/// Link preview bots that publish no reverse DNS.
static PREVIEW_USER_AGENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Twitterbot|facebookexternalhit|vkShare").ok());

const UNCONFIRMED_TTL: Duration = Duration::from_secs(60 * 60);

fn matches(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Reverse and forward name resolution.
#[async_trait]
pub trait ReverseDns: Send + Sync + 'static {
    /// PTR names of `ip`, without the trailing dot.
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>>;

    /// Addresses `host` resolves to.
    async fn forward(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// [`ReverseDns`] over the system resolver configuration.
pub struct HickoryReverseDns {
    resolver: TokioResolver,
}

impl HickoryReverseDns {
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|e| {
                warn!(error = %e, "System resolver configuration unavailable, using defaults");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });
        Self { resolver }
    }
}

impl Default for HickoryReverseDns {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseDns for HickoryReverseDns {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>> {
        let lookup = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| FirewallError::Dns(format!("PTR lookup for {ip} failed: {e}")))?;
        Ok(lookup
            .iter()
            .map(|ptr| ptr.to_string().trim_end_matches('.').to_string())
            .collect())
    }

    async fn forward(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| FirewallError::Dns(format!("Lookup of {host} failed: {e}")))?;
        Ok(lookup.iter().collect())
    }
}

/// Outcome of crawler verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerVerdict {
    /// Not a crawler; later stages decide.
    Ordinary,
    /// Confirmed crawler, preview bot or whitelisted user agent: challenges are skipped.
    Bypass,
    /// Claims to be a crawler but reverse DNS does not confirm it.
    Unverified,
}

pub struct CrawlerVerifier {
    enabled: bool,
    dns: Arc<dyn ReverseDns>,
    store: Arc<dyn Store>,
    cache_ttl: Duration,
    dns_timeout: Duration,
    user_agents_whitelist: Option<Regex>,
}

impl CrawlerVerifier {
    pub fn new(
        cfg: &CrawlerConfig,
        user_agents_whitelist: Option<&str>,
        dns: Arc<dyn ReverseDns>,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        let user_agents_whitelist = user_agents_whitelist
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    FirewallError::Config(format!("Invalid user agent whitelist regex: {e}"))
                })
            })
            .transpose()?;
        Ok(Self {
            enabled: cfg.enabled,
            dns,
            store,
            cache_ttl: Duration::from_secs(cfg.cache_ttl_secs),
            dns_timeout: Duration::from_millis(cfg.dns_timeout_ms),
            user_agents_whitelist,
        })
    }

    pub async fn verify(&self, ip: IpAddr, user_agent: Option<&str>) -> CrawlerVerdict {
        let Some(ua) = user_agent else {
            return CrawlerVerdict::Ordinary;
        };

        if self.enabled && matches(&CRAWLER_USER_AGENT, ua) {
            return self.verify_crawler(ip).await;
        }
        if self.enabled && matches(&PREVIEW_USER_AGENT, ua) {
            return CrawlerVerdict::Bypass;
        }
        if self.user_agents_whitelist.as_ref().is_some_and(|re| re.is_match(ua)) {
            return CrawlerVerdict::Bypass;
        }
        CrawlerVerdict::Ordinary
    }

    async fn verify_crawler(&self, ip: IpAddr) -> CrawlerVerdict {
        let key = format!("bot_{ip}");
        match self.store.get(&key).await {
            Ok(Some(v)) if v == "1" => return CrawlerVerdict::Bypass,
            Ok(Some(_)) => return CrawlerVerdict::Unverified,
            Ok(None) => {}
            Err(e) => warn!(error = %e, %ip, "Crawler cache lookup failed"),
        }

        let confirmed = match tokio::time::timeout(self.dns_timeout, self.confirm(ip)).await {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(e)) => {
                warn!(error = %e, %ip, "Crawler DNS verification failed");
                return CrawlerVerdict::Unverified;
            }
            Err(_) => {
                warn!(%ip, "Crawler DNS verification timed out");
                return CrawlerVerdict::Unverified;
            }
        };

        let (value, ttl) = if confirmed { ("1", self.cache_ttl) } else { ("0", UNCONFIRMED_TTL) };
        if let Err(e) = self.store.set(&key, value, ttl).await {
            warn!(error = %e, %ip, "Crawler cache write failed");
        }

        if confirmed {
            info!(%ip, "Crawler confirmed by reverse DNS");
            CrawlerVerdict::Bypass
        } else {
            debug!(%ip, "Crawler user agent not confirmed by reverse DNS");
            CrawlerVerdict::Unverified
        }
    }

    async fn confirm(&self, ip: IpAddr) -> Result<bool> {
        for host in self.dns.reverse(ip).await? {
            if !matches(&CRAWLER_HOSTNAME, &host) {
                continue;
            }
            match self.dns.forward(&host).await {
                Ok(addrs) if addrs.contains(&ip) => return Ok(true),
                Ok(_) => debug!(%ip, host, "PTR name does not resolve back to source"),
                Err(e) => debug!(error = %e, host, "Forward confirmation failed"),
            }
        }
        Ok(false)
    }
}
