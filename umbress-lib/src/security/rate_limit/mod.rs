//! Per-source rate limiting.
//!
//! Three interchangeable models share one contract ([`RateLimiter::check`]):
//!
//! - **queue**: in-process counters decremented by one every `per / requests` seconds.
//!   The request that pushes a counter above `requests` bans the source.
//! - **shared**: one expiring marker key per request in the [`Store`](crate::store::Store).
//!   The live marker count replaces the counter, so instances sharing a store agree.
//! - **bucket**: leaky bucket driven by a rate string (`"20r/s"`), with optional burst and
//!   artificial delay. Excess requests are rejected without a ban.
//!
//! Bans live in the store under `ratelimiter_banned_<source>` for `ban_for` seconds and
//! every request during a ban gets `429` with `Retry-After` set to the remaining time.
//!
//! # Configuration
//!
//! ```toml
//! [firewall.rate_limiter]
//! enabled = true
//! requests = 10
//! per = 60
//! ban_for = 30
//! ```

mod bucket;
mod limiter;
mod queue;
mod rate;
mod shared;

pub use bucket::{BucketVerdict, LeakyBucket};
pub use limiter::{RateDecision, RateLimiter};
pub use queue::QueueCounter;
pub use rate::{parse_rate, Rate};
pub use shared::SharedMarkers;
