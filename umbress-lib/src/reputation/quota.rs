use http::header::RETRY_AFTER;
use http::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::challenge::unix_now;

const DEFAULT_SUSPENSION: u64 = 60;

/// Process-wide back-off for one provider after it answered `429`.
#[derive(Debug, Default)]
pub struct ProviderQuota {
    /// Unix seconds; zero when not suspended.
    suspended_until: AtomicU64,
}

impl ProviderQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspended(&self) -> bool {
        unix_now() < self.suspended_until.load(Ordering::Relaxed)
    }

    pub fn suspend_for(&self, duration: Duration) {
        let until = unix_now().saturating_add(duration.as_secs().max(1));
        self.suspended_until.fetch_max(until, Ordering::Relaxed);
    }

    /// Suspends until `X-RateLimit-Reset` (unix seconds), or for `Retry-After` seconds,
    /// or for a minute when neither header is usable.
    pub fn suspend_from_headers(&self, provider: &str, headers: &HeaderMap) {
        let number = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        let now = unix_now();
        let secs = number(http::HeaderName::from_static("x-ratelimit-reset"))
            .filter(|reset| *reset > now)
            .map(|reset| reset - now)
            .or_else(|| number(RETRY_AFTER))
            .unwrap_or(DEFAULT_SUSPENSION);
        warn!(provider, suspended_for_secs = secs, "Reputation provider quota exhausted");
        self.suspend_for(Duration::from_secs(secs));
    }
}
