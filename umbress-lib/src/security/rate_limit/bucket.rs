use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::rate::Rate;

const DECAY_TICK: Duration = Duration::from_millis(100);
// Absorbs float accumulation so exactly `burst` extra requests fit under the ceiling.
const EPSILON: f64 = 1e-9;

/// Outcome of one request against a [`LeakyBucket`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketVerdict {
    Admit,
    /// Admitted after the given artificial delay.
    Delay(Duration),
    /// Rejected; the bucket drains enough to admit a request after the given time.
    Deny(Duration),
}

/// Leaky bucket keyed by source.
///
/// Pressure is measured in seconds of backlog: each admitted request adds `1 / rate` and the
/// bucket drains at one second per second. Pressure up to `1.0` is free. With a burst of
/// `b`, pressure up to `1 + b / rate` is admitted, delayed by `pressure - 1.0` unless
/// `nodelay` is set.
#[derive(Debug)]
pub struct LeakyBucket {
    pressure: DashMap<String, f64, RandomState>,
    tick: f64,
    base: f64,
    ceiling: f64,
    burst: bool,
    nodelay: bool,
}

impl LeakyBucket {
    pub fn new(rate: Rate, burst: Option<u32>, nodelay: bool) -> Self {
        let tick = rate.tick();
        let burst_n = burst.unwrap_or(0);
        // Rates below one request per second still admit a single request.
        let base = tick.max(1.0);
        Self {
            pressure: DashMap::with_hasher(RandomState::new()),
            tick,
            base,
            ceiling: base + tick * f64::from(burst_n),
            burst: burst_n > 0,
            nodelay,
        }
    }

    pub fn hit(&self, key: &str) -> BucketVerdict {
        let mut entry = self.pressure.entry(key.to_string()).or_insert(0.0);
        let next = *entry + self.tick;
        let limit = if self.burst { self.ceiling } else { self.base };
        if next > limit + EPSILON {
            let wait = (next - limit).max(self.tick);
            return BucketVerdict::Deny(Duration::from_secs_f64(wait));
        }
        *entry = next;
        if self.burst && !self.nodelay && next > self.base + EPSILON {
            BucketVerdict::Delay(Duration::from_secs_f64(next - self.base))
        } else {
            BucketVerdict::Admit
        }
    }

    pub fn pressure(&self, key: &str) -> f64 {
        self.pressure.get(key).map(|p| *p).unwrap_or(0.0)
    }

    pub fn clear(&self, key: &str) {
        self.pressure.remove(key);
    }

    /// Drains every bucket by `elapsed`, removing empty ones.
    pub fn decay(&self, elapsed: Duration) {
        let drained = elapsed.as_secs_f64();
        self.pressure.retain(|_, p| {
            *p -= drained;
            *p > 0.0
        });
    }

    pub fn len(&self) -> usize {
        self.pressure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pressure.is_empty()
    }

    pub(super) fn spawn_decay(self: &Arc<Self>, shutdown: CancellationToken) {
        let bucket = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DECAY_TICK);
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(bucket) = bucket.upgrade() else { break };
                        let now = Instant::now();
                        bucket.decay(now.duration_since(last));
                        last = now;
                    }
                }
            }
        });
    }
}
