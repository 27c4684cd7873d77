//! Third-party IP reputation.
//!
//! Each provider is a [`MitigationPlugin`]. The [`ReputationExecutor`] polls them, persists the
//! first positive verdict as a ban record under `ip-based-mitigation-<source>` and answers
//! later requests from that record without polling again.

mod abuseipdb;
mod executor;
mod quota;
mod virustotal;

pub use abuseipdb::AbuseIpDbPlugin;
pub use executor::{ReputationExecutor, ReputationHit};
pub use quota::ProviderQuota;
pub use virustotal::{AnalysisResult, AnalysisStats, VirusTotalDecision, VirusTotalPlugin};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::challenge::ChallengeKind;
use crate::config::{PluginActionConfig, ReputationConfig};
use crate::error::Result;
use crate::firewall::context::RequestContext;

/// What happens to a request from a source a plugin has banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginAction {
    Block,
    Challenge(ChallengeKind),
}

impl From<PluginActionConfig> for PluginAction {
    fn from(cfg: PluginActionConfig) -> Self {
        match cfg {
            PluginActionConfig::Block => PluginAction::Block,
            PluginActionConfig::Check => PluginAction::Challenge(ChallengeKind::Automated),
            PluginActionConfig::Recaptcha => PluginAction::Challenge(ChallengeKind::Captcha),
        }
    }
}

/// A reputation provider.
#[async_trait]
pub trait MitigationPlugin: Send + Sync + 'static {
    /// Stable name, persisted in ban records.
    fn name(&self) -> &str;

    async fn should_ban(&self, ip: IpAddr) -> Result<bool>;

    /// False while the provider refuses lookups, e.g. after a quota response.
    fn is_available(&self) -> bool {
        true
    }

    /// Action applied to requests from a source this plugin banned.
    fn action(&self, ctx: &RequestContext) -> PluginAction;
}

/// Persisted reputation state of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BanRecord {
    Banned { plugin: String },
    Clean,
    Checking,
}

impl BanRecord {
    pub const KEY_PREFIX: &'static str = "ip-based-mitigation-";

    pub fn key(source: &str) -> String {
        format!("{}{source}", Self::KEY_PREFIX)
    }
}

/// Builds the enabled built-in plugins in a fixed order: AbuseIPDB, then VirusTotal.
pub fn plugins_from_config(cfg: &ReputationConfig) -> Result<Vec<Arc<dyn MitigationPlugin>>> {
    let timeout = Duration::from_millis(cfg.timeout_ms);
    let mut plugins: Vec<Arc<dyn MitigationPlugin>> = Vec::new();
    if let Some(abuse) = cfg.abuseipdb.as_ref().filter(|c| c.enabled) {
        plugins.push(Arc::new(AbuseIpDbPlugin::new(abuse, timeout)?));
    }
    if let Some(vt) = cfg.virustotal.as_ref().filter(|c| c.enabled) {
        plugins.push(Arc::new(VirusTotalPlugin::new(vt, timeout)?));
    }
    Ok(plugins)
}
