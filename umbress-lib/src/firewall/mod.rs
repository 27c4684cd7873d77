//! Request admission pipeline.
//!
//! [`Firewall::handle`] runs every stage in a fixed order and short-circuits on the first
//! terminal verdict: crawler verification, geoip rule, challenges, IP list, rate limiter,
//! reputation, then the downstream continuation.

mod builder;
pub mod context;
pub mod response;

pub use builder::FirewallBuilder;
pub use context::RequestContext;
pub use response::RespBody;

use ahash::AHashMap;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::challenge::{Challenge, ChallengeKind};
use crate::config::{FirewallConfig, MessagesConfig};
use crate::error::Result;
use crate::reputation::{PluginAction, ReputationExecutor};
use crate::security::{
    CrawlerVerdict, CrawlerVerifier, GeoDecision, GeoPolicy, IpListPolicy, RateDecision,
    RateLimiter, SourceExtractor,
};
use crate::store::Store;
use crate::telemetry::metrics::{values, Metrics};

/// Largest challenge submission body read.
const MAX_FORM_BYTES: usize = 16 * 1024;

/// Result of stages 2 to 7. A passing request gets its body back.
enum Outcome<B> {
    Pass { body: B, delay: Option<Duration> },
    Respond { resp: Response<RespBody>, verdict: &'static str, stage: &'static str },
}

impl<B> Outcome<B> {
    fn respond(resp: Response<RespBody>, verdict: &'static str, stage: &'static str) -> Self {
        Outcome::Respond { resp, verdict, stage }
    }
}

/// The assembled pipeline. Background tasks stop when it is dropped.
pub struct Firewall {
    trust_proxy: bool,
    extractor: Arc<dyn SourceExtractor>,
    crawler: CrawlerVerifier,
    geo: Option<GeoPolicy>,
    challenges: Vec<Challenge>,
    ip_list: IpListPolicy,
    rate_limiter: Option<RateLimiter>,
    reputation: ReputationExecutor,
    messages: MessagesConfig,
    store: Arc<dyn Store>,
    metrics: Option<Arc<Metrics>>,
    shutdown: CancellationToken,
}

impl Firewall {
    /// Builds a firewall with the default collaborators.
    pub fn new(config: FirewallConfig) -> Result<Self> {
        FirewallBuilder::new(config).build()
    }

    pub fn builder(config: FirewallConfig) -> FirewallBuilder {
        FirewallBuilder::new(config)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Decides the request. `next` is invoked only when the request passes, after any
    /// rate-limiter delay.
    pub async fn handle<B, F, Fut>(&self, req: Request<B>, next: F) -> Response<RespBody>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Response<RespBody>>,
    {
        let start = Instant::now();

        let Some(source) = self.extractor.extract(req.headers(), req.extensions()) else {
            warn!(uri = %req.uri(), "Request source unknown, passing through");
            return self.pass(req, next, None, start).await;
        };

        let (parts, body) = req.into_parts();
        let ctx = RequestContext::new(
            source,
            &parts.method,
            &parts.uri,
            &parts.headers,
            self.trust_proxy,
        );

        match self.evaluate(&ctx, &parts.headers, body).await {
            Outcome::Pass { body, delay } => {
                self.pass(Request::from_parts(parts, body), next, delay, start).await
            }
            Outcome::Respond { resp, verdict, stage } => {
                self.record(verdict, stage, resp.status().as_u16(), start);
                resp
            }
        }
    }

    async fn pass<B, F, Fut>(
        &self,
        req: Request<B>,
        next: F,
        delay: Option<Duration>,
        start: Instant,
    ) -> Response<RespBody>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Response<RespBody>>,
    {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let resp = next(req).await;
        self.record(values::VERDICT_PASS, values::STAGE_UPSTREAM, resp.status().as_u16(), start);
        resp
    }

    fn record(&self, verdict: &str, stage: &str, status: u16, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(verdict, stage, status, start.elapsed().as_secs_f64());
        }
    }

    /// Runs stages 2 to 7. Only a challenge submission consumes the body, and it always
    /// ends in a response.
    async fn evaluate<B>(
        &self,
        ctx: &RequestContext,
        headers: &http::HeaderMap,
        body: B,
    ) -> Outcome<B>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut bypass = false;
        let mut forced: Vec<ChallengeKind> = Vec::new();

        match self.crawler.verify(ctx.source, ctx.user_agent.as_deref()).await {
            CrawlerVerdict::Ordinary => {}
            CrawlerVerdict::Bypass => {
                self.record_crawler("bypass");
                bypass = true;
            }
            CrawlerVerdict::Unverified => {
                self.record_crawler("unverified");
                if self.challenge(ChallengeKind::Automated).is_some_and(Challenge::is_enabled) {
                    forced.push(ChallengeKind::Automated);
                } else {
                    debug!(source = %ctx.source, "Unconfirmed crawler blocked");
                    return self.forbidden(values::STAGE_CRAWLER);
                }
            }
        }

        if let Some(geo) = &self.geo {
            match geo.evaluate(headers) {
                GeoDecision::Continue => {}
                GeoDecision::Bypass => bypass = true,
                GeoDecision::RequireAutomated => forced.push(ChallengeKind::Automated),
                GeoDecision::RequireCaptcha => forced.push(ChallengeKind::Captcha),
                GeoDecision::Block => {
                    debug!(source = %ctx.source, "Blocked by geoip rule");
                    return self.forbidden(values::STAGE_GEOIP);
                }
            }
        }

        if !bypass {
            for challenge in &self.challenges {
                if !challenge.applies(ctx, forced.contains(&challenge.kind())) {
                    continue;
                }
                if challenge.is_submission(ctx) {
                    let form = read_form(body).await;
                    let outcome = challenge.submit(ctx, &form).await;
                    self.record_challenge(challenge.kind(), outcome.label());
                    let resp = outcome
                        .into_response()
                        .unwrap_or_else(|| response::status(http::StatusCode::FORBIDDEN));
                    return Outcome::respond(
                        resp,
                        values::VERDICT_CHALLENGE,
                        values::STAGE_CHALLENGE,
                    );
                }
                let outcome = challenge.check(ctx).await;
                self.record_challenge(challenge.kind(), outcome.label());
                if let Some(resp) = outcome.into_response() {
                    let stage = values::STAGE_CHALLENGE;
                    return Outcome::respond(resp, values::VERDICT_CHALLENGE, stage);
                }
            }
        }

        if self.ip_list.is_enabled() {
            if self.ip_list.is_allowed(ctx.source) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_ip_filter_allowed();
                }
            } else {
                if let Some(metrics) = &self.metrics {
                    metrics.record_ip_filter_denied();
                }
                debug!(source = %ctx.source, "Blocked by IP list");
                return self.forbidden(values::STAGE_IP_FILTER);
            }
        }

        let mut delay = None;
        if let Some(limiter) = &self.rate_limiter {
            match limiter.check(ctx.source).await {
                RateDecision::Admit { delay: d } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rate_limit_allowed(limiter.mode(), d.is_some());
                    }
                    delay = d;
                }
                RateDecision::Deny { retry_after } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rate_limit_rejection(limiter.mode());
                    }
                    let resp = response::too_many_requests(
                        retry_after,
                        self.messages.too_many_requests.as_deref(),
                    );
                    let stage = values::STAGE_RATE_LIMIT;
                    return Outcome::respond(resp, values::VERDICT_RATE_LIMITED, stage);
                }
            }
        }

        if let Some(hit) = self.reputation.evaluate(ctx).await {
            match hit.action {
                PluginAction::Block => {
                    debug!(source = %ctx.source, plugin = %hit.plugin, "Blocked by reputation");
                    return self.forbidden(values::STAGE_REPUTATION);
                }
                PluginAction::Challenge(kind) => {
                    let Some(challenge) = self.challenge(kind) else {
                        return self.forbidden(values::STAGE_REPUTATION);
                    };
                    let outcome = challenge.check(ctx).await;
                    self.record_challenge(kind, outcome.label());
                    if let Some(resp) = outcome.into_response() {
                        let stage = values::STAGE_REPUTATION;
                        return Outcome::respond(resp, values::VERDICT_CHALLENGE, stage);
                    }
                }
            }
        }

        Outcome::Pass { body, delay }
    }

    fn challenge(&self, kind: ChallengeKind) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.kind() == kind)
    }

    fn forbidden<B>(&self, stage: &'static str) -> Outcome<B> {
        Outcome::respond(
            response::forbidden(self.messages.access_denied.as_deref()),
            values::VERDICT_BLOCK,
            stage,
        )
    }

    fn record_crawler(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_crawler_verification(result);
        }
    }

    fn record_challenge(&self, kind: ChallengeKind, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_challenge(kind.as_str(), outcome);
        }
    }
}

impl Drop for Firewall {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Decodes an urlencoded submission body. Oversized or malformed bodies decode to nothing.
async fn read_form<B>(body: B) -> AHashMap<String, String>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes: Bytes = match Limited::new(body, MAX_FORM_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "Challenge submission body rejected");
            return AHashMap::new();
        }
    };
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}
