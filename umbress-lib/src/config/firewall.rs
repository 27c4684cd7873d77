use serde::Deserialize;

use crate::challenge::ChallengeKind;

/// Request admission policy
///
/// Every section is optional; with the defaults every request passes through.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FirewallConfig {
    /// Read the client address from `X-Forwarded-For` and the effective host/scheme
    /// from `X-Forwarded-Host` / `X-Forwarded-Proto`
    /// Enable only when a trusted reverse proxy sits in front of the firewall
    /// Default: false
    #[serde(default)]
    pub trust_proxy: bool,
    /// Only these IPs/networks are admitted
    /// Exact addresses and CIDR notation: ["10.0.0.1", "192.168.1.0/24", "::1/128"]
    /// Malformed entries are dropped with a warning
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// These IPs/networks are rejected with 403
    /// Mutually exclusive with `whitelist`
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Custom bodies for terminal responses
    #[serde(default)]
    pub messages: MessagesConfig,
    /// Rate limiting
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    /// Automated and captcha challenges
    #[serde(default)]
    pub challenge: ChallengeConfig,
    /// Search engine crawler verification
    #[serde(default)]
    pub crawlers: CrawlerConfig,
    /// Country based rule, evaluated when the country header is present
    #[serde(default)]
    pub geoip: Option<GeoIpRule>,
    /// Third-party IP reputation checks
    #[serde(default)]
    pub reputation: ReputationConfig,
}

/// Custom response bodies
///
/// A body that parses as JSON is served as `application/json`, anything else as `text/plain`.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct MessagesConfig {
    /// Body of 429 responses
    #[serde(default)]
    pub too_many_requests: Option<String>,
    /// Body of 403 responses produced by the IP lists, geoip and reputation stages
    #[serde(default)]
    pub access_denied: Option<String>,
}

/// Rate limiter model
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitMode {
    /// In-process counters decremented by a background task every `per / requests` seconds
    #[default]
    Queue,
    /// Individually expiring marker keys in the store, consistent across instances
    /// sharing the store
    Shared,
    /// Leaky bucket driven by a rate string, with optional burst and delay
    Bucket,
}

/// Rate limiting configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Enable rate limiting
    /// Default: false
    #[serde(default)]
    pub enabled: bool,
    /// Limiter model
    /// Default: "queue"
    #[serde(default)]
    pub mode: RateLimitMode,
    /// Requests allowed within `per` seconds (queue and shared models)
    /// Default: 60
    #[serde(default = "default_requests")]
    pub requests: u32,
    /// Window in seconds (queue and shared models)
    /// Default: 60
    #[serde(default = "default_per")]
    pub per: u64,
    /// Ban duration in seconds once the threshold is crossed
    /// Default: 30
    #[serde(default = "default_ban_for")]
    pub ban_for: u64,
    /// Drop the source's counter when it gets banned so it does not re-trigger right
    /// after the ban expires
    /// Default: true
    #[serde(default = "default_true")]
    pub clear_queue_after_ban: bool,
    /// Rate string for the bucket model, e.g. "20r/s" or "600r/m"
    #[serde(default)]
    pub rate: Option<String>,
    /// Extra requests admitted above the rate (bucket model)
    #[serde(default)]
    pub burst: Option<u32>,
    /// Admit burst requests immediately instead of delaying them (bucket model)
    /// Default: false
    #[serde(default)]
    pub nodelay: bool,
    /// IPv6 sources are rate limited per network of this prefix length
    /// Default: 64
    #[serde(default = "default_ipv6_prefix")]
    pub ipv6_prefix: u8,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: RateLimitMode::default(),
            requests: default_requests(),
            per: default_per(),
            ban_for: default_ban_for(),
            clear_queue_after_ban: true,
            rate: None,
            burst: None,
            nodelay: false,
            ipv6_prefix: default_ipv6_prefix(),
        }
    }
}

/// Challenge configuration shared by both challenge kinds
#[derive(Debug, Deserialize, Clone)]
pub struct ChallengeConfig {
    /// Evaluation order of the challenge stages
    /// Default: ["automated", "captcha"]
    #[serde(default = "default_challenge_order")]
    pub order: Vec<ChallengeKind>,
    /// Regex of user agents that skip every challenge
    #[serde(default)]
    pub user_agents_whitelist: Option<String>,
    /// Computational browser check
    #[serde(default)]
    pub automated: AutomatedConfig,
    /// reCAPTCHA check
    #[serde(default)]
    pub captcha: CaptchaConfig,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            order: default_challenge_order(),
            user_agents_whitelist: None,
            automated: AutomatedConfig::default(),
            captcha: CaptchaConfig::default(),
        }
    }
}

/// Automated (JS computation) challenge
#[derive(Debug, Deserialize, Clone)]
pub struct AutomatedConfig {
    /// Challenge every client
    /// Default: false
    #[serde(default)]
    pub enabled: bool,
    /// Lifetime of the puzzle and clearance cookies in seconds
    /// Default: 86400 (1 day)
    #[serde(default = "default_cookie_ttl")]
    pub cookie_ttl_secs: u64,
    /// How long an issued puzzle is reused for repeat requests of the same client
    /// Default: 10
    #[serde(default = "default_automated_issue_cache")]
    pub issue_cache_secs: u64,
    /// HTML fragment shown on the challenge page
    #[serde(default = "default_automated_content")]
    pub content: String,
}

impl Default for AutomatedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_ttl_secs: default_cookie_ttl(),
            issue_cache_secs: default_automated_issue_cache(),
            content: default_automated_content(),
        }
    }
}

/// Captcha (reCAPTCHA v2) challenge
#[derive(Debug, Deserialize, Clone)]
pub struct CaptchaConfig {
    /// Challenge every client
    /// Default: false
    #[serde(default)]
    pub enabled: bool,
    /// reCAPTCHA site key embedded in the page
    #[serde(default)]
    pub site_key: String,
    /// reCAPTCHA secret used for server-side verification
    /// Required whenever a captcha can be issued
    #[serde(default)]
    pub secret_key: String,
    /// Lifetime of the puzzle and clearance cookies in seconds
    /// Default: 86400 (1 day)
    #[serde(default = "default_cookie_ttl")]
    pub cookie_ttl_secs: u64,
    /// How long an issued puzzle is reused for repeat requests of the same client
    /// Default: 4
    #[serde(default = "default_captcha_issue_cache")]
    pub issue_cache_secs: u64,
    /// Verification endpoint
    /// Default: "https://www.google.com/recaptcha/api/siteverify"
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
    /// Verification request timeout in milliseconds
    /// Default: 5000
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_ms: u64,
    /// Page header
    #[serde(default = "default_captcha_header")]
    pub header: String,
    /// Page text
    #[serde(default = "default_captcha_description")]
    pub description: String,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            site_key: String::new(),
            secret_key: String::new(),
            cookie_ttl_secs: default_cookie_ttl(),
            issue_cache_secs: default_captcha_issue_cache(),
            verify_url: default_verify_url(),
            verify_timeout_ms: default_verify_timeout(),
            header: default_captcha_header(),
            description: default_captcha_description(),
        }
    }
}

/// Search engine crawler verification
#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    /// Verify clients whose user agent claims to be a search engine crawler
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How long a confirmed crawler address is remembered, in seconds
    /// Default: 15552000 (180 days)
    #[serde(default = "default_crawler_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Reverse DNS lookup timeout in milliseconds
    /// Default: 2000
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_secs: default_crawler_cache_ttl(),
            dns_timeout_ms: default_dns_timeout(),
        }
    }
}

/// Kind of country list
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeoListType {
    Whitelist,
    Blacklist,
}

/// Outcome of a geoip rule
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeoAction {
    /// Skip the challenge stages
    Pass,
    /// Require the automated challenge
    Check,
    /// Require the captcha challenge
    Recaptcha,
    /// Reject with 403
    Block,
    /// No effect, later stages decide
    Continue,
}

/// Country based rule
#[derive(Debug, Deserialize, Clone)]
pub struct GeoIpRule {
    /// Whether `codes` lists welcome or unwelcome countries
    #[serde(rename = "type")]
    pub list_type: GeoListType,
    /// ISO 3166-1 alpha-2 country codes
    pub codes: Vec<String>,
    /// Applied to listed countries
    /// Default: "pass" for whitelists, "block" for blacklists
    #[serde(default)]
    pub action: Option<GeoAction>,
    /// Applied to every other country
    /// Default: "block" for whitelists, "continue" for blacklists
    #[serde(default)]
    pub otherwise: Option<GeoAction>,
    /// Header carrying the country code, set by the edge (CDN, nginx geoip module)
    /// Default: "x-umbress-country"
    #[serde(default = "default_geo_header")]
    pub header: String,
}

/// Reputation plugin execution style
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStyle {
    /// Plugins gate the current request
    Sync,
    /// Plugins run in the background, bans apply to later requests
    #[default]
    Async,
}

/// Action taken against a source banned by a reputation plugin
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PluginActionConfig {
    #[default]
    Block,
    Check,
    Recaptcha,
}

/// Third-party IP reputation checks
#[derive(Debug, Deserialize, Clone)]
pub struct ReputationConfig {
    /// Execution style
    /// Default: "async"
    #[serde(default)]
    pub style: ExecutionStyle,
    /// Per-provider request timeout in milliseconds
    /// Default: 3000
    #[serde(default = "default_provider_timeout")]
    pub timeout_ms: u64,
    /// Ban duration in seconds once a plugin reports a source
    /// Default: 3600
    #[serde(default = "default_reputation_ban_for")]
    pub ban_for: u64,
    /// How long a clean verdict is remembered, in seconds
    /// Default: 1800
    #[serde(default = "default_clean_ttl")]
    pub clean_ttl_secs: u64,
    /// AbuseIPDB provider
    #[serde(default)]
    pub abuseipdb: Option<AbuseIpDbConfig>,
    /// VirusTotal provider
    #[serde(default)]
    pub virustotal: Option<VirusTotalConfig>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            style: ExecutionStyle::default(),
            timeout_ms: default_provider_timeout(),
            ban_for: default_reputation_ban_for(),
            clean_ttl_secs: default_clean_ttl(),
            abuseipdb: None,
            virustotal: None,
        }
    }
}

/// AbuseIPDB provider
#[derive(Debug, Deserialize, Clone)]
pub struct AbuseIpDbConfig {
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API key
    #[serde(default)]
    pub token: String,
    /// Ban when the abuse confidence score reaches this value (0-100)
    /// Default: 80
    #[serde(default = "default_confidence_score")]
    pub confidence_score_to_ban: u8,
    /// Only consider reports from the last N days
    #[serde(default)]
    pub max_age_in_days: Option<u32>,
    /// Default: "block"
    #[serde(default)]
    pub action: PluginActionConfig,
    /// Default: "https://api.abuseipdb.com"
    #[serde(default = "default_abuseipdb_url")]
    pub base_url: String,
}

/// VirusTotal provider
#[derive(Debug, Deserialize, Clone)]
pub struct VirusTotalConfig {
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API key
    #[serde(default)]
    pub token: String,
    /// Ban when at least this many vendors flag the address as malicious
    /// Default: 3
    #[serde(default = "default_malicious_to_ban")]
    pub malicious_to_ban: u32,
    /// Default: "block"
    #[serde(default)]
    pub action: PluginActionConfig,
    /// Default: "https://www.virustotal.com"
    #[serde(default = "default_virustotal_url")]
    pub base_url: String,
}

fn default_true() -> bool {
    true
}

fn default_requests() -> u32 {
    60
}

fn default_per() -> u64 {
    60
}

fn default_ban_for() -> u64 {
    30
}

fn default_ipv6_prefix() -> u8 {
    64
}

fn default_challenge_order() -> Vec<ChallengeKind> {
    vec![ChallengeKind::Automated, ChallengeKind::Captcha]
}

fn default_cookie_ttl() -> u64 {
    86400
}

fn default_automated_issue_cache() -> u64 {
    10
}

fn default_captcha_issue_cache() -> u64 {
    4
}

fn default_automated_content() -> String {
    "<h1>Checking your browser before accessing the website</h1>\
     <p>This process is automatic. You will be redirected shortly.</p>"
        .to_string()
}

fn default_verify_url() -> String {
    "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_verify_timeout() -> u64 {
    5000
}

fn default_captcha_header() -> String {
    "Please confirm you are human".to_string()
}

fn default_captcha_description() -> String {
    "Unusual traffic was detected from your network. Complete the check below to continue."
        .to_string()
}

fn default_crawler_cache_ttl() -> u64 {
    60 * 60 * 24 * 180
}

fn default_dns_timeout() -> u64 {
    2000
}

fn default_geo_header() -> String {
    "x-umbress-country".to_string()
}

fn default_provider_timeout() -> u64 {
    3000
}

fn default_reputation_ban_for() -> u64 {
    3600
}

fn default_clean_ttl() -> u64 {
    1800
}

fn default_confidence_score() -> u8 {
    80
}

fn default_abuseipdb_url() -> String {
    "https://api.abuseipdb.com".to_string()
}

fn default_malicious_to_ban() -> u32 {
    3
}

fn default_virustotal_url() -> String {
    "https://www.virustotal.com".to_string()
}
