use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::store::Store;

const MARKER_PREFIX: &str = "ratelimiter_";

/// Request markers kept in the [`Store`], one individually expiring key per request.
///
/// Instances sharing a store see each other's markers, so the count is consistent across
/// a horizontally scaled deployment.
pub struct SharedMarkers {
    store: Arc<dyn Store>,
    window: Duration,
    seq: AtomicU64,
}

impl SharedMarkers {
    pub fn new(store: Arc<dyn Store>, window: Duration) -> Self {
        Self { store, window, seq: AtomicU64::new(0) }
    }

    fn prefix(key: &str) -> String {
        format!("{MARKER_PREFIX}{key}_")
    }

    /// Number of live markers for `key`.
    pub async fn count(&self, key: &str) -> Result<usize> {
        Ok(self.store.keys(&Self::prefix(key)).await?.len())
    }

    /// Writes one marker for `key`.
    pub async fn mark(&self, key: &str) -> Result<()> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let marker = format!("{}{nanos}_{seq}", Self::prefix(key));
        self.store.set(&marker, "1", self.window).await
    }

    /// Drops every marker for `key`.
    pub async fn clear(&self, key: &str) -> Result<()> {
        let keys = self.store.keys(&Self::prefix(key)).await?;
        self.store.del_many(&keys).await
    }
}
