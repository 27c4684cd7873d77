use async_trait::async_trait;
use http::header::ACCEPT;
use http::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::quota::ProviderQuota;
use super::{MitigationPlugin, PluginAction};
use crate::config::VirusTotalConfig;
use crate::error::{FirewallError, Result};
use crate::firewall::context::RequestContext;

const NAME: &str = "virustotal";

/// Vendor verdict counts of the last analysis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisStats {
    pub harmless: u32,
    pub malicious: u32,
    pub suspicious: u32,
    pub undetected: u32,
    pub timeout: u32,
}

/// One vendor's verdict.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    pub category: String,
    pub result: String,
    pub method: String,
    pub engine_name: String,
}

/// Caller-supplied ban decision over the stats and the per-vendor results.
pub type VirusTotalDecision =
    Arc<dyn Fn(&AnalysisStats, &HashMap<String, AnalysisResult>) -> bool + Send + Sync>;

#[derive(Debug, Deserialize)]
struct IpAddressResponse {
    data: IpAddressData,
}

#[derive(Debug, Deserialize)]
struct IpAddressData {
    attributes: IpAddressAttributes,
}

#[derive(Debug, Deserialize)]
struct IpAddressAttributes {
    #[serde(default)]
    last_analysis_stats: AnalysisStats,
    #[serde(default)]
    last_analysis_results: HashMap<String, AnalysisResult>,
}

/// VirusTotal `v3/ip_addresses` lookup.
pub struct VirusTotalPlugin {
    client: reqwest::Client,
    base_url: String,
    token: String,
    malicious_to_ban: u32,
    decision: Option<VirusTotalDecision>,
    action: PluginAction,
    quota: Arc<ProviderQuota>,
}

impl VirusTotalPlugin {
    pub fn new(cfg: &VirusTotalConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FirewallError::provider(NAME, format!("Failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            malicious_to_ban: cfg.malicious_to_ban,
            decision: None,
            action: cfg.action.into(),
            quota: Arc::new(ProviderQuota::new()),
        })
    }

    /// Replaces the default `malicious >= malicious_to_ban` rule.
    pub fn with_decision(mut self, decision: VirusTotalDecision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn quota(&self) -> Arc<ProviderQuota> {
        Arc::clone(&self.quota)
    }

    fn decide(&self, attrs: &IpAddressAttributes) -> bool {
        match &self.decision {
            Some(decision) => decision(&attrs.last_analysis_stats, &attrs.last_analysis_results),
            None => attrs.last_analysis_stats.malicious >= self.malicious_to_ban,
        }
    }
}

#[async_trait]
impl MitigationPlugin for VirusTotalPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        !self.quota.is_suspended()
    }

    async fn should_ban(&self, ip: IpAddr) -> Result<bool> {
        if self.quota.is_suspended() {
            debug!(%ip, "VirusTotal suspended, skipping lookup");
            return Err(FirewallError::provider(NAME, "suspended"));
        }

        let url = format!("{}/api/v3/ip_addresses/{ip}", self.base_url);
        let resp = self
            .client
            .get(url)
            .header("x-apikey", &self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FirewallError::provider(NAME, e.to_string()))?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            self.quota.suspend_from_headers(NAME, resp.headers());
            return Err(FirewallError::provider(NAME, "quota exhausted"));
        }
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(FirewallError::provider(NAME, format!("unexpected status {}", resp.status())));
        }

        let body: IpAddressResponse = resp
            .json()
            .await
            .map_err(|e| FirewallError::provider(NAME, format!("Invalid response body: {e}")))?;
        let stats = &body.data.attributes.last_analysis_stats;
        debug!(%ip, malicious = stats.malicious, suspicious = stats.suspicious, "VirusTotal analysis");
        Ok(self.decide(&body.data.attributes))
    }

    fn action(&self, _ctx: &RequestContext) -> PluginAction {
        self.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> Result<VirusTotalPlugin> {
        let cfg: VirusTotalConfig = toml::from_str(r#"token = "t""#)
            .map_err(|e| FirewallError::Config(e.to_string()))?;
        VirusTotalPlugin::new(&cfg, Duration::from_secs(1))
    }

    fn attrs(malicious: u32) -> IpAddressAttributes {
        IpAddressAttributes {
            last_analysis_stats: AnalysisStats { malicious, ..Default::default() },
            last_analysis_results: HashMap::new(),
        }
    }

    #[test]
    fn default_threshold_is_three_malicious() -> Result<()> {
        let vt = plugin()?;
        assert!(!vt.decide(&attrs(2)));
        assert!(vt.decide(&attrs(3)));
        Ok(())
    }

    #[test]
    fn custom_decision_overrides_threshold() -> Result<()> {
        let vt = plugin()?.with_decision(Arc::new(
            |stats: &AnalysisStats, _: &HashMap<String, AnalysisResult>| stats.malicious > 0,
        ));
        assert!(vt.decide(&attrs(1)));
        assert!(!vt.decide(&attrs(0)));
        Ok(())
    }

    #[test]
    fn parses_provider_payload() -> std::result::Result<(), serde_json::Error> {
        let raw = r#"{"data":{"type":"ip_address","id":"1.2.3.4","attributes":{
            "last_analysis_stats":{"harmless":60,"malicious":4,"suspicious":1,"undetected":20,"timeout":0},
            "last_analysis_results":{"Vendor":{"category":"malicious","result":"malware","method":"blacklist","engine_name":"Vendor"}}}}}"#;
        let parsed: IpAddressResponse = serde_json::from_str(raw)?;
        assert_eq!(parsed.data.attributes.last_analysis_stats.malicious, 4);
        assert_eq!(parsed.data.attributes.last_analysis_results.len(), 1);
        Ok(())
    }
}
