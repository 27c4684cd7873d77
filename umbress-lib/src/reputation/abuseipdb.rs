use async_trait::async_trait;
use http::header::ACCEPT;
use http::StatusCode;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::quota::ProviderQuota;
use super::{MitigationPlugin, PluginAction};
use crate::config::AbuseIpDbConfig;
use crate::error::{FirewallError, Result};
use crate::firewall::context::RequestContext;

const NAME: &str = "abuseipdb";

#[derive(Debug, Deserialize)]
struct CheckResponse {
    data: CheckRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckRecord {
    abuse_confidence_score: u8,
}

/// AbuseIPDB `v2/check` lookup; bans when the abuse confidence score reaches the threshold.
pub struct AbuseIpDbPlugin {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    confidence_score_to_ban: u8,
    max_age_in_days: Option<u32>,
    action: PluginAction,
    quota: Arc<ProviderQuota>,
}

impl AbuseIpDbPlugin {
    pub fn new(cfg: &AbuseIpDbConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FirewallError::provider(NAME, format!("Failed to build client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v2/check", cfg.base_url.trim_end_matches('/')),
            token: cfg.token.clone(),
            confidence_score_to_ban: cfg.confidence_score_to_ban,
            max_age_in_days: cfg.max_age_in_days,
            action: cfg.action.into(),
            quota: Arc::new(ProviderQuota::new()),
        })
    }

    pub fn quota(&self) -> Arc<ProviderQuota> {
        Arc::clone(&self.quota)
    }

    async fn confidence_score(&self, ip: IpAddr) -> Result<u8> {
        let mut params = vec![("ipAddress", ip.to_string())];
        if let Some(days) = self.max_age_in_days {
            params.push(("maxAgeInDays", days.to_string()));
        }
        let url = reqwest::Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| FirewallError::provider(NAME, format!("Invalid URL: {e}")))?;

        let resp = self
            .client
            .get(url)
            .header("Key", &self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FirewallError::provider(NAME, e.to_string()))?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            self.quota.suspend_from_headers(NAME, resp.headers());
            return Err(FirewallError::provider(NAME, "quota exhausted"));
        }
        if !resp.status().is_success() {
            return Err(FirewallError::provider(NAME, format!("unexpected status {}", resp.status())));
        }

        let body: CheckResponse = resp
            .json()
            .await
            .map_err(|e| FirewallError::provider(NAME, format!("Invalid response body: {e}")))?;
        Ok(body.data.abuse_confidence_score)
    }
}

#[async_trait]
impl MitigationPlugin for AbuseIpDbPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        !self.quota.is_suspended()
    }

    async fn should_ban(&self, ip: IpAddr) -> Result<bool> {
        if self.quota.is_suspended() {
            debug!(%ip, "AbuseIPDB suspended, skipping lookup");
            return Err(FirewallError::provider(NAME, "suspended"));
        }
        let score = self.confidence_score(ip).await?;
        debug!(%ip, score, "AbuseIPDB confidence score");
        Ok(score >= self.confidence_score_to_ban)
    }

    fn action(&self, _ctx: &RequestContext) -> PluginAction {
        self.action
    }
}
