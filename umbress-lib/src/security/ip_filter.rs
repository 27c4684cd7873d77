use ahash::AHashSet;
use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::warn;

use crate::config::FirewallConfig;
use crate::error::{FirewallError, Result};
use crate::security::source::normalize_ip;

/// Immutable address list, split into exact addresses and subnets at construction.
#[derive(Debug, Clone, Default)]
pub struct IpMatcher {
    exact: AHashSet<IpAddr>,
    networks: Vec<IpNet>,
}

impl IpMatcher {
    /// Builds a matcher from textual entries. Malformed entries are dropped with a warning.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut exact = AHashSet::new();
        let mut networks = Vec::new();
        for raw in entries {
            let entry = raw.as_ref().trim();
            if let Ok(ip) = IpAddr::from_str(entry) {
                exact.insert(normalize_ip(ip));
            } else if let Ok(net) = IpNet::from_str(entry) {
                // Host routes are exact addresses.
                if net.prefix_len() == net.max_prefix_len() {
                    exact.insert(normalize_ip(net.addr()));
                } else {
                    networks.push(net.trunc());
                }
            } else {
                warn!(entry, "Dropping malformed IP list entry");
            }
        }
        Self { exact, networks }
    }

    /// Whether `ip` matches any entry. Families never cross: a v4 address is only tested
    /// against v4 networks.
    pub fn classify(&self, ip: IpAddr) -> bool {
        let ip = normalize_ip(ip);
        if self.exact.contains(&ip) {
            return true;
        }
        self.networks.iter().any(|net| match (net, ip) {
            (IpNet::V4(net), IpAddr::V4(v4)) => net.contains(&v4),
            (IpNet::V6(net), IpAddr::V6(v6)) => net.contains(&v6),
            _ => false,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.networks.len()
    }
}

/// Allow/deny policy applied by the IP list stage.
#[derive(Debug, Clone, Default)]
pub enum IpListPolicy {
    #[default]
    Disabled,
    Whitelist(IpMatcher),
    Blacklist(IpMatcher),
}

impl IpListPolicy {
    pub fn from_config(cfg: &FirewallConfig) -> Result<Self> {
        match (cfg.whitelist.is_empty(), cfg.blacklist.is_empty()) {
            (true, true) => Ok(Self::Disabled),
            (false, true) => Ok(Self::Whitelist(IpMatcher::new(&cfg.whitelist))),
            (true, false) => Ok(Self::Blacklist(IpMatcher::new(&cfg.blacklist))),
            (false, false) => Err(FirewallError::Config(
                "whitelist and blacklist are mutually exclusive".into(),
            )),
        }
    }

    /// Returns `true` if the IP should be allowed, `false` if it should be blocked.
    ///
    /// An empty matcher imposes no restriction, even in whitelist mode (every configured
    /// entry was malformed).
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        match self {
            Self::Disabled => true,
            Self::Whitelist(m) => m.is_empty() || m.classify(ip),
            Self::Blacklist(m) => m.is_empty() || !m.classify(ip),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }

    #[test]
    fn test_exact_and_cidr() {
        let m = IpMatcher::new(&["127.0.0.1", "192.168.1.0/24", "10.0.0.7/32"]);
        assert!(m.classify(ip("127.0.0.1")));
        assert!(m.classify(ip("192.168.1.254")));
        assert!(m.classify(ip("10.0.0.7")));
        assert!(!m.classify(ip("192.168.2.1")));
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn test_family_separation() {
        let m = IpMatcher::new(&["0.0.0.0/0"]);
        assert!(m.classify(ip("8.8.8.8")));
        assert!(!m.classify(ip("2001:db8::1")));

        let m6 = IpMatcher::new(&["::/0"]);
        assert!(m6.classify(ip("2001:db8::1")));
        assert!(!m6.classify(ip("8.8.8.8")));
    }

    #[test]
    fn test_mapped_address_matches_v4_entry() {
        let m = IpMatcher::new(&["192.0.2.0/24"]);
        assert!(m.classify(ip("::ffff:192.0.2.10")));
    }

    #[test]
    fn test_malformed_entries_dropped() {
        let m = IpMatcher::new(&["not-an-ip", "300.1.1.1", "10.0.0.0/33", "10.0.0.0/8"]);
        assert_eq!(m.len(), 1);
        assert!(m.classify(ip("10.200.0.1")));
    }

    #[test]
    fn test_whitelist_policy() {
        let policy = IpListPolicy::Whitelist(IpMatcher::new(&["10.0.0.0/24"]));
        assert!(policy.is_allowed(ip("10.0.0.5")));
        assert!(!policy.is_allowed(ip("10.0.1.5")));
    }

    #[test]
    fn test_blacklist_policy() {
        let policy = IpListPolicy::Blacklist(IpMatcher::new(&["2001:db8::/32"]));
        assert!(!policy.is_allowed(ip("2001:db8::dead")));
        assert!(policy.is_allowed(ip("2001:db9::1")));
        assert!(policy.is_allowed(ip("10.0.0.1")));
    }

    #[test]
    fn test_both_lists_rejected() {
        let cfg = FirewallConfig {
            whitelist: vec!["10.0.0.1".into()],
            blacklist: vec!["10.0.0.2".into()],
            ..FirewallConfig::default()
        };
        assert!(IpListPolicy::from_config(&cfg).is_err());
    }

    #[test]
    fn test_disabled_allows_all() {
        let policy = IpListPolicy::from_config(&FirewallConfig::default())
            .unwrap_or(IpListPolicy::Blacklist(IpMatcher::new(&["0.0.0.0/0"])));
        assert!(!policy.is_enabled());
        assert!(policy.is_allowed(ip("1.2.3.4")));
    }
}
