use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ipnet::Ipv6Net;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::bucket::{BucketVerdict, LeakyBucket};
use super::queue::QueueCounter;
use super::rate::parse_rate;
use super::shared::SharedMarkers;
use crate::config::{RateLimitMode, RateLimiterConfig};
use crate::error::{FirewallError, Result};
use crate::store::Store;

const BAN_PREFIX: &str = "ratelimiter_banned_";

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// Request may proceed, optionally after an artificial delay.
    Admit { delay: Option<Duration> },
    /// Request is rejected; the client may retry after the given time.
    Deny { retry_after: Duration },
}

enum Model {
    Queue { counter: Arc<QueueCounter>, requests: u64 },
    Shared { markers: SharedMarkers, requests: usize },
    Bucket(Arc<LeakyBucket>),
}

impl Model {
    fn name(&self) -> &'static str {
        match self {
            Model::Queue { .. } => "queue",
            Model::Shared { .. } => "shared",
            Model::Bucket(_) => "bucket",
        }
    }
}

/// Per-source rate limiter with store-backed bans.
pub struct RateLimiter {
    model: Model,
    store: Arc<dyn Store>,
    ban_for: Duration,
    clear_after_ban: bool,
    ipv6_prefix: u8,
}

impl RateLimiter {
    /// Builds the configured model and spawns its decay task, stopped by `shutdown`.
    pub fn new(
        cfg: &RateLimiterConfig,
        store: Arc<dyn Store>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let model = match cfg.mode {
            RateLimitMode::Queue | RateLimitMode::Shared if cfg.requests == 0 || cfg.per == 0 => {
                return Err(FirewallError::Config(
                    "rate_limiter.requests and rate_limiter.per must be > 0".into(),
                ));
            }
            RateLimitMode::Queue => {
                let counter = Arc::new(QueueCounter::new());
                let interval =
                    Duration::from_secs_f64(cfg.per as f64 / f64::from(cfg.requests));
                counter.spawn_decay(interval, shutdown);
                Model::Queue { counter, requests: u64::from(cfg.requests) }
            }
            RateLimitMode::Shared => Model::Shared {
                markers: SharedMarkers::new(store.clone(), Duration::from_secs(cfg.per)),
                requests: cfg.requests as usize,
            },
            RateLimitMode::Bucket => {
                let rate = parse_rate(cfg.rate.as_deref().unwrap_or_default())?;
                let bucket = Arc::new(LeakyBucket::new(rate, cfg.burst, cfg.nodelay));
                bucket.spawn_decay(shutdown);
                Model::Bucket(bucket)
            }
        };

        Ok(Self {
            model,
            store,
            ban_for: Duration::from_secs(cfg.ban_for),
            clear_after_ban: cfg.clear_queue_after_ban,
            ipv6_prefix: cfg.ipv6_prefix.min(128),
        })
    }

    pub fn mode(&self) -> &'static str {
        self.model.name()
    }

    /// Key the source is accounted under: the address itself, or its network for IPv6.
    pub fn key_for(&self, ip: IpAddr) -> String {
        match ip {
            IpAddr::V6(v6) if self.ipv6_prefix < 128 => Ipv6Net::new(v6, self.ipv6_prefix)
                .map(|net| net.trunc().to_string())
                .unwrap_or_else(|_| v6.to_string()),
            other => other.to_string(),
        }
    }

    /// Records one request from `ip` and decides whether it may proceed.
    pub async fn check(&self, ip: IpAddr) -> RateDecision {
        let key = self.key_for(ip);
        let ban_key = format!("{BAN_PREFIX}{key}");

        match self.store.ttl(&ban_key).await {
            Ok(Some(remaining)) => {
                return RateDecision::Deny { retry_after: remaining };
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, %key, "Rate limiter ban lookup failed"),
        }

        match &self.model {
            Model::Queue { counter, requests } => {
                if counter.hit(&key) > *requests {
                    self.ban(&key, &ban_key).await;
                    return RateDecision::Deny { retry_after: self.ban_for };
                }
                RateDecision::Admit { delay: None }
            }
            Model::Shared { markers, requests } => {
                // Mark first; the count then includes this request.
                if let Err(e) = markers.mark(&key).await {
                    warn!(error = %e, %key, "Rate limiter marker write failed");
                    return RateDecision::Admit { delay: None };
                }
                let live = match markers.count(&key).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, %key, "Rate limiter marker lookup failed");
                        return RateDecision::Admit { delay: None };
                    }
                };
                if live > *requests {
                    self.ban(&key, &ban_key).await;
                    return RateDecision::Deny { retry_after: self.ban_for };
                }
                RateDecision::Admit { delay: None }
            }
            Model::Bucket(bucket) => match bucket.hit(&key) {
                BucketVerdict::Admit => RateDecision::Admit { delay: None },
                BucketVerdict::Delay(d) => RateDecision::Admit { delay: Some(d) },
                BucketVerdict::Deny(wait) => RateDecision::Deny { retry_after: wait },
            },
        }
    }

    async fn ban(&self, key: &str, ban_key: &str) {
        let expires_at = SystemTime::now()
            .checked_add(self.ban_for)
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if let Err(e) = self.store.set(ban_key, &expires_at.to_string(), self.ban_for).await {
            warn!(error = %e, %key, "Rate limiter ban write failed");
        }
        info!(source = %key, ban_for_secs = self.ban_for.as_secs(), "Source banned by rate limiter");

        if self.clear_after_ban {
            match &self.model {
                Model::Queue { counter, .. } => counter.clear(key),
                Model::Shared { markers, .. } => {
                    if let Err(e) = markers.clear(key).await {
                        warn!(error = %e, %key, "Rate limiter marker cleanup failed");
                    }
                }
                Model::Bucket(bucket) => bucket.clear(key),
            }
        }
    }
}
