use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::Firewall;
use crate::challenge::{CaptchaVerifier, Challenge, ChallengeKind, RecaptchaVerifier};
use crate::config::{validate, FirewallConfig};
use crate::error::Result;
use crate::reputation::{plugins_from_config, MitigationPlugin, ReputationExecutor};
use crate::security::{
    CrawlerVerifier, DefaultSourceExtractor, GeoPolicy, HickoryReverseDns, IpListPolicy,
    RateLimiter, ReverseDns, SourceExtractor,
};
use crate::store::{MemoryStore, Store};
use crate::telemetry::Metrics;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Assembles a [`Firewall`], with overridable collaborators.
///
/// Anything not supplied gets the built-in default: an in-memory store, the system resolver,
/// Google reCAPTCHA and the providers enabled in configuration.
pub struct FirewallBuilder {
    config: FirewallConfig,
    store: Option<Arc<dyn Store>>,
    dns: Option<Arc<dyn ReverseDns>>,
    captcha: Option<Arc<dyn CaptchaVerifier>>,
    plugins: Option<Vec<Arc<dyn MitigationPlugin>>>,
    extractor: Option<Arc<dyn SourceExtractor>>,
    metrics: Option<Arc<Metrics>>,
}

impl FirewallBuilder {
    pub fn new(config: FirewallConfig) -> Self {
        Self {
            config,
            store: None,
            dns: None,
            captcha: None,
            plugins: None,
            extractor: None,
            metrics: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reverse_dns(mut self, dns: Arc<dyn ReverseDns>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn captcha_verifier(mut self, verifier: Arc<dyn CaptchaVerifier>) -> Self {
        self.captcha = Some(verifier);
        self
    }

    /// Replaces the plugins built from `reputation.*`.
    pub fn plugins(mut self, plugins: Vec<Arc<dyn MitigationPlugin>>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn source_extractor(mut self, extractor: Arc<dyn SourceExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the configuration and builds every stage.
    ///
    /// Must run inside a Tokio runtime: background decay and sweep tasks are spawned here.
    pub fn build(self) -> Result<Firewall> {
        let cfg = self.config;
        validate(&cfg)?;

        let shutdown = CancellationToken::new();

        let store = match self.store {
            Some(store) => store,
            None => {
                let memory = Arc::new(MemoryStore::new());
                memory.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());
                memory as Arc<dyn Store>
            }
        };
        let dns: Arc<dyn ReverseDns> = match self.dns {
            Some(dns) => dns,
            None => Arc::new(HickoryReverseDns::new()),
        };
        let captcha_verifier: Arc<dyn CaptchaVerifier> = match self.captcha {
            Some(verifier) => verifier,
            None => Arc::new(RecaptchaVerifier::new(&cfg.challenge.captcha)?),
        };
        let plugins = match self.plugins {
            Some(plugins) => plugins,
            None => plugins_from_config(&cfg.reputation)?,
        };
        let extractor: Arc<dyn SourceExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(DefaultSourceExtractor { trust_proxy: cfg.trust_proxy }),
        };

        let mut order = Vec::with_capacity(2);
        for kind in &cfg.challenge.order {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        for kind in [ChallengeKind::Automated, ChallengeKind::Captcha] {
            if !order.contains(&kind) {
                order.push(kind);
            }
        }
        let challenges = order
            .into_iter()
            .map(|kind| match kind {
                ChallengeKind::Automated => {
                    Challenge::automated(&cfg.challenge.automated, store.clone())
                }
                ChallengeKind::Captcha => Challenge::captcha(
                    &cfg.challenge.captcha,
                    store.clone(),
                    captcha_verifier.clone(),
                ),
            })
            .collect();

        let crawler = CrawlerVerifier::new(
            &cfg.crawlers,
            cfg.challenge.user_agents_whitelist.as_deref(),
            dns,
            store.clone(),
        )?;
        let rate_limiter = if cfg.rate_limiter.enabled {
            Some(RateLimiter::new(&cfg.rate_limiter, store.clone(), shutdown.clone())?)
        } else {
            None
        };
        let reputation = ReputationExecutor::new(
            &cfg.reputation,
            plugins,
            store.clone(),
            self.metrics.clone(),
            shutdown.clone(),
        );

        Ok(Firewall {
            trust_proxy: cfg.trust_proxy,
            extractor,
            crawler,
            geo: cfg.geoip.as_ref().map(GeoPolicy::new),
            challenges,
            ip_list: IpListPolicy::from_config(&cfg)?,
            rate_limiter,
            reputation,
            messages: cfg.messages,
            store,
            metrics: self.metrics,
            shutdown,
        })
    }
}
