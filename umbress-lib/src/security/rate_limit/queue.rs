use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-process per-source counters with periodic linear decay.
#[derive(Debug, Default)]
pub struct QueueCounter {
    counts: DashMap<String, u64, RandomState>,
}

impl QueueCounter {
    pub fn new() -> Self {
        Self { counts: DashMap::with_hasher(RandomState::new()) }
    }

    /// Records one request and returns the new count.
    pub fn hit(&self, key: &str) -> u64 {
        let mut count = self.counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn clear(&self, key: &str) {
        self.counts.remove(key);
    }

    /// Decrements every counter by one, removing those that reach zero.
    pub fn decay_once(&self) {
        self.counts.retain(|_, count| {
            *count = count.saturating_sub(1);
            *count > 0
        });
    }

    pub(super) fn spawn_decay(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(queue) = queue.upgrade() else { break };
                        queue.decay_once();
                    }
                }
            }
        });
    }
}
