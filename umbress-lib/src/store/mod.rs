//! Key-value state shared by the pipeline stages.
//!
//! Ban records, challenge tokens, crawler verdicts and shared rate-limiter markers all live
//! behind the [`Store`] trait so that a deployment can back them with an external TTL store.
//! [`MemoryStore`] is the in-process default.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Key-value store with per-key expiry.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Value of a live key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Stores `value` only when no live value exists. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a live key.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    async fn del_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.del(key).await?;
        }
        Ok(())
    }
}
