mod firewall;
mod loader;
mod types;

pub use firewall::{
    AbuseIpDbConfig, AutomatedConfig, CaptchaConfig, ChallengeConfig, CrawlerConfig,
    ExecutionStyle, FirewallConfig, GeoAction, GeoIpRule, GeoListType, MessagesConfig,
    PluginActionConfig, RateLimitMode, RateLimiterConfig, ReputationConfig, VirusTotalConfig,
};
pub use loader::{load_from_path, load_from_str, validate};
pub use types::{Config, LoggingConfig, TelemetryConfig, TimeoutConfig, UpstreamConfig};
