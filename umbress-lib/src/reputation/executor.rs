use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BanRecord, MitigationPlugin, PluginAction};
use crate::config::{ExecutionStyle, ReputationConfig};
use crate::firewall::context::RequestContext;
use crate::store::Store;
use crate::telemetry::metrics::{values, Metrics};

/// Lifetime of the in-flight marker beyond the provider timeout.
const CHECKING_GRACE: Duration = Duration::from_secs(5);

/// A source banned by a plugin, and what to do about the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationHit {
    pub plugin: String,
    pub action: PluginAction,
}

/// Polls the configured plugins at most once per source and record lifetime.
#[derive(Clone)]
pub struct ReputationExecutor {
    plugins: Arc<[Arc<dyn MitigationPlugin>]>,
    style: ExecutionStyle,
    store: Arc<dyn Store>,
    timeout: Duration,
    ban_for: Duration,
    clean_ttl: Duration,
    metrics: Option<Arc<Metrics>>,
    shutdown: CancellationToken,
}

impl ReputationExecutor {
    pub fn new(
        cfg: &ReputationConfig,
        plugins: Vec<Arc<dyn MitigationPlugin>>,
        store: Arc<dyn Store>,
        metrics: Option<Arc<Metrics>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            plugins: plugins.into(),
            style: cfg.style,
            store,
            timeout: Duration::from_millis(cfg.timeout_ms),
            ban_for: Duration::from_secs(cfg.ban_for),
            clean_ttl: Duration::from_secs(cfg.clean_ttl_secs),
            metrics,
            shutdown,
        }
    }

    /// Returns the ban affecting this request, if any.
    ///
    /// A recorded ban is answered from the store. Otherwise the first request to claim the
    /// in-flight marker polls the plugins: inline in sync style, detached in async style,
    /// where the verdict only affects later requests.
    pub async fn evaluate(&self, ctx: &RequestContext) -> Option<ReputationHit> {
        if !self.plugins.iter().any(|p| p.is_available()) {
            return None;
        }
        let key = BanRecord::key(&ctx.source_key);

        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<BanRecord>(&raw) {
                Ok(BanRecord::Banned { plugin }) => {
                    return Some(self.recorded_hit(plugin, ctx));
                }
                Ok(BanRecord::Clean | BanRecord::Checking) => return None,
                Err(e) => {
                    warn!(error = %e, source = %ctx.source, "Discarding malformed ban record");
                }
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, source = %ctx.source, "Ban record lookup failed"),
        }

        let marker = encode(&BanRecord::Checking);
        match self.store.set_if_absent(&key, &marker, self.timeout + CHECKING_GRACE).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(error = %e, source = %ctx.source, "Failed to claim reputation check");
                return None;
            }
        }

        match self.style {
            ExecutionStyle::Sync => {
                let index = self.check(ctx.source, &key).await?;
                let plugin = self.plugins.get(index)?;
                Some(ReputationHit {
                    plugin: plugin.name().to_string(),
                    action: plugin.action(ctx),
                })
            }
            ExecutionStyle::Async => {
                let this = self.clone();
                let source = ctx.source;
                tokio::spawn(async move {
                    tokio::select! {
                        _ = this.shutdown.cancelled() => {}
                        _ = this.check(source, &key) => {}
                    }
                });
                None
            }
        }
    }

    fn recorded_hit(&self, name: String, ctx: &RequestContext) -> ReputationHit {
        let action = match self.plugins.iter().find(|p| p.name() == name) {
            Some(plugin) => plugin.action(ctx),
            None => {
                debug!(plugin = %name, source = %ctx.source, "Ban recorded by unconfigured plugin");
                PluginAction::Block
            }
        };
        ReputationHit { plugin: name, action }
    }

    /// Polls and persists a conclusive verdict; returns the index of the banning plugin.
    ///
    /// An inconclusive poll releases the in-flight marker so a later request polls again.
    async fn check(&self, ip: IpAddr, key: &str) -> Option<usize> {
        let (record, ttl, banned_by) = match self.poll(ip).await {
            Poll::Banned(index) => {
                let name = self
                    .plugins
                    .get(index)
                    .map(|p| p.name().to_string())
                    .unwrap_or_default();
                info!(
                    source = %ip,
                    plugin = %name,
                    ban_secs = self.ban_for.as_secs(),
                    "Source banned by reputation plugin"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_reputation_ban(&name);
                }
                (BanRecord::Banned { plugin: name }, self.ban_for, Some(index))
            }
            Poll::Clean => (BanRecord::Clean, self.clean_ttl, None),
            Poll::Inconclusive => {
                debug!(source = %ip, "Reputation verdict inconclusive, not recorded");
                if let Err(e) = self.store.del(key).await {
                    warn!(error = %e, source = %ip, "Failed to release reputation check");
                }
                return None;
            }
        };
        if let Err(e) = self.store.set(key, &encode(&record), ttl).await {
            warn!(error = %e, source = %ip, "Failed to store reputation verdict");
        }
        banned_by
    }

    /// Queries every available plugin concurrently; the first positive in configuration
    /// order wins. Clean needs an answer from every plugin.
    async fn poll(&self, ip: IpAddr) -> Poll {
        let handles: Vec<_> = self
            .plugins
            .iter()
            .map(|plugin| {
                if !plugin.is_available() {
                    return None;
                }
                let plugin = Arc::clone(plugin);
                let timeout = self.timeout;
                Some(tokio::spawn(async move {
                    tokio::time::timeout(timeout, plugin.should_ban(ip)).await
                }))
            })
            .collect();

        let mut first = None;
        let mut answered = 0;
        for (index, handle) in handles.into_iter().enumerate() {
            let name = self.plugins.get(index).map(|p| p.name()).unwrap_or_default();
            let Some(handle) = handle else {
                debug!(plugin = name, source = %ip, "Reputation plugin suspended, skipped");
                if let Some(metrics) = &self.metrics {
                    metrics.record_reputation_check(name, values::RESULT_SUSPENDED);
                }
                continue;
            };
            let banned = match handle.await {
                Ok(Ok(Ok(banned))) => Some(banned),
                Ok(Ok(Err(e))) => {
                    warn!(plugin = name, source = %ip, error = %e, "Reputation lookup failed");
                    None
                }
                Ok(Err(_)) => {
                    warn!(
                        plugin = name,
                        source = %ip,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Reputation lookup timed out"
                    );
                    None
                }
                Err(e) => {
                    warn!(plugin = name, source = %ip, error = %e, "Reputation task failed");
                    None
                }
            };
            if let Some(metrics) = &self.metrics {
                let result = match banned {
                    Some(true) => values::RESULT_BAN,
                    Some(false) => values::RESULT_CLEAN,
                    None => values::RESULT_ERROR,
                };
                metrics.record_reputation_check(name, result);
            }
            if banned.is_some() {
                answered += 1;
            }
            if banned == Some(true) && first.is_none() {
                first = Some(index);
            }
        }
        match first {
            Some(index) => Poll::Banned(index),
            None if answered == self.plugins.len() => Poll::Clean,
            None => Poll::Inconclusive,
        }
    }
}

/// Outcome of one polling round.
enum Poll {
    Banned(usize),
    Clean,
    /// Some plugin failed, timed out or was suspended, and none banned.
    Inconclusive,
}

fn encode(record: &BanRecord) -> String {
    serde_json::to_string(record).unwrap_or_default()
}
