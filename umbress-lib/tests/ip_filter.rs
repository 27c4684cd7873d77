use std::net::IpAddr;
use umbress_lib::config::FirewallConfig;
use umbress_lib::security::{IpListPolicy, IpMatcher};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type TestResult = Result<(), BoxError>;

fn ip(s: &str) -> Result<IpAddr, BoxError> {
    Ok(s.parse()?)
}

#[test]
fn classification_respects_address_family() -> TestResult {
    let v4_only = IpMatcher::new(&["0.0.0.0/0", "10.0.0.0/8"]);
    assert!(v4_only.classify(ip("10.1.2.3")?));
    assert!(!v4_only.classify(ip("::1")?));
    assert!(!v4_only.classify(ip("2001:db8::1")?));

    let v6_only = IpMatcher::new(&["::/0"]);
    assert!(v6_only.classify(ip("2001:db8::1")?));
    assert!(!v6_only.classify(ip("10.1.2.3")?));
    Ok(())
}

#[test]
fn exact_entries_and_networks() -> TestResult {
    let m = IpMatcher::new(&["192.0.2.7", "198.51.100.0/24", "2001:db8:1::/48", "not-an-ip"]);
    assert_eq!(m.len(), 3);
    assert!(m.classify(ip("192.0.2.7")?));
    assert!(!m.classify(ip("192.0.2.8")?));
    assert!(m.classify(ip("198.51.100.200")?));
    assert!(m.classify(ip("2001:db8:1:ffff::1")?));
    assert!(!m.classify(ip("2001:db8:2::1")?));
    Ok(())
}

#[test]
fn whitelist_admits_only_matches() -> TestResult {
    let cfg: FirewallConfig = toml::from_str(r#"whitelist = ["10.0.0.0/24"]"#)?;
    let policy = IpListPolicy::from_config(&cfg)?;
    assert!(policy.is_enabled());
    for host in 0..=255u8 {
        assert!(policy.is_allowed(IpAddr::from([10, 0, 0, host])));
        assert!(!policy.is_allowed(IpAddr::from([10, 0, 1, host])));
    }
    Ok(())
}

#[test]
fn blacklist_is_the_inverse() -> TestResult {
    let cfg: FirewallConfig = toml::from_str(r#"blacklist = ["10.0.0.0/24"]"#)?;
    let policy = IpListPolicy::from_config(&cfg)?;
    for host in [0u8, 5, 255] {
        assert!(!policy.is_allowed(IpAddr::from([10, 0, 0, host])));
        assert!(policy.is_allowed(IpAddr::from([10, 0, 1, host])));
    }
    Ok(())
}

#[test]
fn both_lists_are_rejected() -> TestResult {
    let cfg: FirewallConfig = toml::from_str(
        r#"
whitelist = ["10.0.0.1"]
blacklist = ["10.0.0.2"]
"#,
    )?;
    assert!(IpListPolicy::from_config(&cfg).is_err());
    Ok(())
}

#[test]
fn no_lists_means_no_restriction() -> TestResult {
    let policy = IpListPolicy::from_config(&FirewallConfig::default())?;
    assert!(!policy.is_enabled());
    assert!(policy.is_allowed(ip("203.0.113.9")?));
    Ok(())
}
