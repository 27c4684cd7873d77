use ahash::AHashMap;
use http::{Method, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::captcha::CaptchaVerifier;
use super::cookie::SetCookie;
use super::page::{self, PageParams};
use super::pow::solve;
use super::token::{unix_now, ChallengeToken};
use super::ChallengeKind;
use crate::config::{AutomatedConfig, CaptchaConfig};
use crate::firewall::context::RequestContext;
use crate::firewall::response::{self, RespBody};
use crate::store::Store;

/// Result of running a challenge stage.
pub enum ChallengeOutcome {
    /// Client holds a valid clearance; later stages decide.
    Cleared,
    /// A puzzle was (re)issued.
    Issued(Response<RespBody>),
    /// The submission was correct; the response sets the clearance cookie and redirects.
    Solved(Response<RespBody>),
    /// The submission was wrong, incomplete or stale; a puzzle was re-issued.
    Rejected(Response<RespBody>),
}

impl ChallengeOutcome {
    pub fn into_response(self) -> Option<Response<RespBody>> {
        match self {
            ChallengeOutcome::Cleared => None,
            ChallengeOutcome::Issued(r)
            | ChallengeOutcome::Solved(r)
            | ChallengeOutcome::Rejected(r) => Some(r),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChallengeOutcome::Cleared => "cleared",
            ChallengeOutcome::Issued(_) => "issued",
            ChallengeOutcome::Solved(_) => "solved",
            ChallengeOutcome::Rejected(_) => "rejected",
        }
    }
}

enum Page {
    Automated { content: String },
    Captcha { site_key: String, header: String, description: String },
}

/// One challenge kind bound to its configuration and the shared store.
pub struct Challenge {
    kind: ChallengeKind,
    enabled: bool,
    cookie_ttl: u64,
    issue_cache: u64,
    page: Page,
    store: Arc<dyn Store>,
    verifier: Option<Arc<dyn CaptchaVerifier>>,
}

impl Challenge {
    pub fn automated(cfg: &AutomatedConfig, store: Arc<dyn Store>) -> Self {
        Self {
            kind: ChallengeKind::Automated,
            enabled: cfg.enabled,
            cookie_ttl: cfg.cookie_ttl_secs,
            issue_cache: cfg.issue_cache_secs,
            page: Page::Automated { content: cfg.content.clone() },
            store,
            verifier: None,
        }
    }

    pub fn captcha(
        cfg: &CaptchaConfig,
        store: Arc<dyn Store>,
        verifier: Arc<dyn CaptchaVerifier>,
    ) -> Self {
        Self {
            kind: ChallengeKind::Captcha,
            enabled: cfg.enabled,
            cookie_ttl: cfg.cookie_ttl_secs,
            issue_cache: cfg.issue_cache_secs,
            page: Page::Captcha {
                site_key: cfg.site_key.clone(),
                header: cfg.header.clone(),
                description: cfg.description.clone(),
            },
            store,
            verifier: Some(verifier),
        }
    }

    pub fn kind(&self) -> ChallengeKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the stage runs for this request: enabled for everyone, forced by another
    /// stage, or a challenge of this kind is already in flight for the client.
    pub fn applies(&self, ctx: &RequestContext, forced: bool) -> bool {
        let in_flight = ctx.cookie(self.kind.puzzle_cookie()).is_some()
            && ctx.cookie(self.kind.clearance_cookie()).is_none();
        self.enabled || forced || in_flight
    }

    /// A POST carrying this kind's submit query parameter.
    pub fn is_submission(&self, ctx: &RequestContext) -> bool {
        ctx.method == Method::POST && ctx.query_param(self.kind.submit_param()).is_some()
    }

    /// Verifies the clearance cookies of a regular request.
    pub async fn check(&self, ctx: &RequestContext) -> ChallengeOutcome {
        let puzzle = ctx.cookie(self.kind.puzzle_cookie());
        let clearance = ctx.cookie(self.kind.clearance_cookie());
        let (Some(puzzle), Some(clearance)) = (puzzle, clearance) else {
            return ChallengeOutcome::Issued(self.issue(ctx).await);
        };

        match self.store.get(&self.kind.passed_key(&ctx.source_key)).await {
            Ok(Some(pair)) if pair == format!("{puzzle}_{clearance}") => ChallengeOutcome::Cleared,
            Ok(_) => {
                debug!(source = %ctx.source, kind = %self.kind, "Clearance does not match issued pair");
                ChallengeOutcome::Issued(self.issue(ctx).await)
            }
            Err(e) => {
                warn!(error = %e, source = %ctx.source, kind = %self.kind, "Clearance lookup failed");
                ChallengeOutcome::Cleared
            }
        }
    }

    /// Handles a puzzle submission; `form` holds the decoded request body.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        form: &AHashMap<String, String>,
    ) -> ChallengeOutcome {
        match self.verify_submission(ctx, form).await {
            Some(token) => ChallengeOutcome::Solved(self.solved(ctx, &token).await),
            None => ChallengeOutcome::Rejected(self.issue(ctx).await),
        }
    }

    async fn verify_submission(
        &self,
        ctx: &RequestContext,
        form: &AHashMap<String, String>,
    ) -> Option<ChallengeToken> {
        let raw = match self.store.get(&self.kind.token_key(&ctx.source_key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, source = %ctx.source, kind = %self.kind, "Token lookup failed");
                return None;
            }
        };
        let token = ChallengeToken::decode(&raw)?;
        if token.is_expired() {
            return None;
        }
        let submitted = ctx.query_param(self.kind.submit_param())?;
        let held = ctx.cookie(self.kind.puzzle_cookie());
        if submitted != token.puzzle || held != Some(token.puzzle.as_str()) {
            return None;
        }

        match self.kind {
            ChallengeKind::Automated => {
                let sk = form.get("sk")?;
                let answer: u128 = form.get("jschallenge")?.trim().parse().ok()?;
                (*sk == token.puzzle && answer == solve(sk)).then_some(token)
            }
            ChallengeKind::Captcha => {
                let response = form.get("g-recaptcha-response").filter(|r| !r.is_empty())?;
                let verifier = self.verifier.as_ref()?;
                match verifier.verify(response, ctx.source).await {
                    Ok(true) => Some(token),
                    Ok(false) => None,
                    Err(e) => {
                        warn!(error = %e, source = %ctx.source, "Captcha verification error");
                        None
                    }
                }
            }
        }
    }

    async fn solved(&self, ctx: &RequestContext, token: &ChallengeToken) -> Response<RespBody> {
        let ttl = Duration::from_secs(token.remaining_secs());
        if let Err(e) =
            self.store.set(&self.kind.passed_key(&ctx.source_key), &token.pair(), ttl).await
        {
            warn!(error = %e, source = %ctx.source, kind = %self.kind, "Failed to record solved challenge");
        }
        info!(source = %ctx.source, kind = %self.kind, "Challenge solved");

        let domain = ctx.cookie_domain();
        let cookie = SetCookie {
            name: self.kind.clearance_cookie(),
            value: &token.clearance,
            expires_at: token.expires_at,
            domain: domain.as_deref(),
            secure: ctx.secure,
        };
        response::redirect(&ctx.path, &cookie.render())
    }

    async fn issue(&self, ctx: &RequestContext) -> Response<RespBody> {
        let token = self.current_token(ctx).await;
        let nonce = Uuid::new_v4().simple().to_string();
        let params = PageParams {
            path: &ctx.path,
            puzzle: &token.puzzle,
            nonce: &nonce,
            expires_at: token.expires_at,
        };
        let body = match &self.page {
            Page::Automated { content } => page::automated(content, &params),
            Page::Captcha { site_key, header, description } => {
                page::captcha(site_key, header, description, &params)
            }
        };

        let domain = ctx.cookie_domain();
        let cookie = SetCookie {
            name: self.kind.puzzle_cookie(),
            value: &token.puzzle,
            expires_at: token.expires_at,
            domain: domain.as_deref(),
            secure: ctx.secure,
        };
        response::challenge_page(self.kind.holding_status(), body, &cookie.render())
    }

    /// Token to hand out: the recorded one while it is fresh or already held by the client,
    /// otherwise a new one.
    async fn current_token(&self, ctx: &RequestContext) -> ChallengeToken {
        let key = self.kind.token_key(&ctx.source_key);
        match self.store.get(&key).await {
            Ok(Some(raw)) => {
                if let Some(token) = ChallengeToken::decode(&raw).filter(|t| !t.is_expired()) {
                    let issued_at = token.expires_at.saturating_sub(self.cookie_ttl);
                    let fresh = unix_now() < issued_at.saturating_add(self.issue_cache);
                    let held = ctx.cookie(self.kind.puzzle_cookie()) == Some(token.puzzle.as_str());
                    if fresh || held {
                        return token;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, source = %ctx.source, kind = %self.kind, "Token lookup failed"),
        }

        let token = ChallengeToken::generate(self.cookie_ttl);
        let ttl = Duration::from_secs(self.cookie_ttl);
        if let Err(e) = self.store.set(&key, &token.encode(), ttl).await {
            warn!(error = %e, source = %ctx.source, kind = %self.kind, "Failed to record issued token");
        }
        debug!(source = %ctx.source, kind = %self.kind, "Challenge issued");
        token
    }
}
