use std::fs;
use std::path::Path;

use regex::Regex;

use crate::config::{Config, FirewallConfig, GeoAction, PluginActionConfig, RateLimitMode};
use crate::error::{FirewallError, Result};
use crate::security::rate_limit::parse_rate;

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| FirewallError::Config(format!("Failed to read config file: {e}")))?;
    load_from_str(&txt)
}

pub fn load_from_str(txt: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(txt)
        .map_err(|e| FirewallError::Config(format!("Failed to parse config: {e}")))?;

    if cfg.upstream.address.trim().is_empty() {
        return Err(FirewallError::Config("upstream address cannot be empty".into()));
    }
    if cfg.timeout.connect_ms == 0 {
        return Err(FirewallError::Config("connect_ms must be > 0".into()));
    }
    validate(&cfg.firewall)?;

    Ok(cfg)
}

/// Rejects policies that are ambiguous or cannot be enforced.
pub fn validate(fw: &FirewallConfig) -> Result<()> {
    if !fw.whitelist.is_empty() && !fw.blacklist.is_empty() {
        return Err(FirewallError::Config(
            "whitelist and blacklist are mutually exclusive".into(),
        ));
    }

    let rl = &fw.rate_limiter;
    if rl.enabled {
        match rl.mode {
            RateLimitMode::Queue | RateLimitMode::Shared => {
                if rl.requests == 0 {
                    return Err(FirewallError::Config("rate_limiter.requests must be > 0".into()));
                }
                if rl.per == 0 {
                    return Err(FirewallError::Config("rate_limiter.per must be > 0".into()));
                }
            }
            RateLimitMode::Bucket => {
                let rate = rl.rate.as_deref().ok_or_else(|| {
                    FirewallError::Config("rate_limiter.rate is required in bucket mode".into())
                })?;
                parse_rate(rate)?;
            }
        }
        if rl.ipv6_prefix > 128 {
            return Err(FirewallError::Config(format!(
                "rate_limiter.ipv6_prefix must be <= 128, got {}",
                rl.ipv6_prefix
            )));
        }
    }

    let ch = &fw.challenge;
    if let Some(pattern) = &ch.user_agents_whitelist {
        Regex::new(pattern).map_err(|e| {
            FirewallError::Config(format!("Invalid challenge.user_agents_whitelist regex: {e}"))
        })?;
    }

    let captcha_reachable = ch.captcha.enabled
        || fw.geoip.as_ref().is_some_and(|g| {
            g.action == Some(GeoAction::Recaptcha)
                || g.otherwise == Some(GeoAction::Recaptcha)
        })
        || [
            fw.reputation.abuseipdb.as_ref().filter(|p| p.enabled).map(|p| p.action),
            fw.reputation.virustotal.as_ref().filter(|p| p.enabled).map(|p| p.action),
        ]
        .contains(&Some(PluginActionConfig::Recaptcha));
    if captcha_reachable && ch.captcha.secret_key.trim().is_empty() {
        return Err(FirewallError::Config(
            "challenge.captcha.secret_key is required when a captcha can be issued".into(),
        ));
    }

    if let Some(geo) = &fw.geoip {
        if geo.codes.is_empty() {
            return Err(FirewallError::Config("geoip.codes cannot be empty".into()));
        }
        if geo.header.trim().is_empty() {
            return Err(FirewallError::Config("geoip.header cannot be empty".into()));
        }
    }

    if let Some(p) = fw.reputation.abuseipdb.as_ref().filter(|p| p.enabled) {
        if p.token.trim().is_empty() {
            return Err(FirewallError::Config("reputation.abuseipdb.token is required".into()));
        }
        if p.confidence_score_to_ban > 100 {
            return Err(FirewallError::Config(
                "reputation.abuseipdb.confidence_score_to_ban must be <= 100".into(),
            ));
        }
    }
    if let Some(p) = fw.reputation.virustotal.as_ref().filter(|p| p.enabled) {
        if p.token.trim().is_empty() {
            return Err(FirewallError::Config("reputation.virustotal.token is required".into()));
        }
    }

    Ok(())
}
