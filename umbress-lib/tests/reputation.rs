mod common;

use async_trait::async_trait;
use common::{firewall_config, send, spawn_stub, BoxError, NoDns, TestRequest, TestResult};
use http::StatusCode;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use umbress_lib::challenge::ChallengeKind;
use umbress_lib::config::{AbuseIpDbConfig, VirusTotalConfig};
use umbress_lib::error::{FirewallError, Result as FwResult};
use umbress_lib::firewall::RequestContext;
use umbress_lib::reputation::{
    AbuseIpDbPlugin, BanRecord, MitigationPlugin, PluginAction, VirusTotalPlugin,
};
use umbress_lib::{Firewall, MemoryStore, Store};

const SOURCE: &str = "203.0.113.9";

enum Verdict {
    Ban,
    Clean,
    Fail,
    FailThenBan,
    Unavailable,
}

struct FakePlugin {
    name: &'static str,
    verdict: Verdict,
    action: PluginAction,
    calls: AtomicUsize,
}

impl FakePlugin {
    fn new(name: &'static str, verdict: Verdict) -> Arc<Self> {
        Self::with_action(name, verdict, PluginAction::Block)
    }

    fn with_action(name: &'static str, verdict: Verdict, action: PluginAction) -> Arc<Self> {
        Arc::new(Self { name, verdict, action, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MitigationPlugin for FakePlugin {
    fn name(&self) -> &str {
        self.name
    }

    async fn should_ban(&self, _ip: IpAddr) -> FwResult<bool> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = || -> FwResult<bool> {
            Err(FirewallError::Provider {
                provider: self.name.to_string(),
                message: "quota exceeded".into(),
            })
        };
        match self.verdict {
            Verdict::Ban => Ok(true),
            Verdict::Clean => Ok(false),
            Verdict::Fail | Verdict::Unavailable => fail(),
            Verdict::FailThenBan if previous == 0 => fail(),
            Verdict::FailThenBan => Ok(true),
        }
    }

    fn is_available(&self) -> bool {
        !matches!(self.verdict, Verdict::Unavailable)
    }

    fn action(&self, _ctx: &RequestContext) -> PluginAction {
        self.action
    }
}

fn shared(plugin: &Arc<FakePlugin>) -> Arc<dyn MitigationPlugin> {
    plugin.clone()
}

fn firewall(
    style: &str,
    plugins: Vec<Arc<dyn MitigationPlugin>>,
) -> Result<(Firewall, Arc<MemoryStore>), BoxError> {
    let cfg = firewall_config(&format!("[reputation]\nstyle = \"{style}\"\n"))?;
    let store = Arc::new(MemoryStore::new());
    let fw = Firewall::builder(cfg)
        .store(store.clone())
        .reverse_dns(Arc::new(NoDns))
        .plugins(plugins)
        .build()?;
    Ok((fw, store))
}

async fn record(store: &MemoryStore) -> Result<Option<BanRecord>, BoxError> {
    match store.get(&BanRecord::key(SOURCE)).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[tokio::test]
async fn sync_ban_blocks_and_is_remembered() -> TestResult {
    let plugin = FakePlugin::new("fake", Verdict::Ban);
    let (fw, store) = firewall("sync", vec![shared(&plugin)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::FORBIDDEN);
    assert_eq!(record(&store).await?, Some(BanRecord::Banned { plugin: "fake".into() }));

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::FORBIDDEN);
    assert_eq!(plugin.calls(), 1);

    let elsewhere = TestRequest::get("203.0.113.10", "/");
    assert_eq!(send(&fw, elsewhere).await?.status(), StatusCode::FORBIDDEN);
    assert_eq!(plugin.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn clean_verdict_is_cached() -> TestResult {
    let plugin = FakePlugin::new("fake", Verdict::Clean);
    let (fw, store) = firewall("sync", vec![shared(&plugin)])?;

    for _ in 0..3 {
        assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    }
    assert_eq!(plugin.calls(), 1);
    assert_eq!(record(&store).await?, Some(BanRecord::Clean));
    Ok(())
}

#[tokio::test]
async fn async_ban_applies_to_later_requests() -> TestResult {
    let plugin = FakePlugin::new("fake", Verdict::Ban);
    let (fw, store) = firewall("async", vec![shared(&plugin)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);

    let mut banned = false;
    for _ in 0..50 {
        if matches!(record(&store).await?, Some(BanRecord::Banned { .. })) {
            banned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(banned, "background check never recorded the ban");

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::FORBIDDEN);
    assert_eq!(plugin.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_lookup_is_retried_by_a_later_request() -> TestResult {
    let plugin = FakePlugin::new("flaky", Verdict::FailThenBan);
    let (fw, store) = firewall("sync", vec![shared(&plugin)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    assert_eq!(record(&store).await?, None);

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::FORBIDDEN);
    assert_eq!(record(&store).await?, Some(BanRecord::Banned { plugin: "flaky".into() }));
    assert_eq!(plugin.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn partial_answer_is_not_recorded_clean() -> TestResult {
    let clean = FakePlugin::new("clean", Verdict::Clean);
    let failing = FakePlugin::new("failing", Verdict::Fail);
    let (fw, store) = firewall("sync", vec![shared(&clean), shared(&failing)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    assert_eq!(record(&store).await?, None);

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    assert_eq!(clean.calls(), 2);
    assert_eq!(failing.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn async_failure_releases_the_check() -> TestResult {
    let plugin = FakePlugin::new("flaky", Verdict::Fail);
    let (fw, store) = firewall("async", vec![shared(&plugin)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    let mut released = false;
    for _ in 0..50 {
        if plugin.calls() == 1 && record(&store).await?.is_none() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "in-flight marker was never released");
    Ok(())
}

#[tokio::test]
async fn unavailable_plugin_is_skipped() -> TestResult {
    let suspended = FakePlugin::new("suspended", Verdict::Unavailable);
    let clean = FakePlugin::new("clean", Verdict::Clean);
    let (fw, store) = firewall("sync", vec![shared(&suspended), shared(&clean)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    assert_eq!(suspended.calls(), 0);
    assert_eq!(clean.calls(), 1);
    assert_eq!(record(&store).await?, None);
    Ok(())
}

#[tokio::test]
async fn no_available_plugin_skips_the_check() -> TestResult {
    let suspended = FakePlugin::new("suspended", Verdict::Unavailable);
    let (fw, store) = firewall("sync", vec![shared(&suspended)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    assert_eq!(suspended.calls(), 0);
    assert_eq!(record(&store).await?, None);
    Ok(())
}

#[tokio::test]
async fn first_positive_in_order_is_recorded() -> TestResult {
    let clean = FakePlugin::new("first", Verdict::Clean);
    let second = FakePlugin::new("second", Verdict::Ban);
    let third = FakePlugin::new("third", Verdict::Ban);
    let (fw, store) = firewall("sync", vec![shared(&clean), shared(&second), shared(&third)])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::FORBIDDEN);
    let expected = BanRecord::Banned { plugin: "second".into() };
    assert_eq!(record(&store).await?, Some(expected));
    assert_eq!(clean.calls() + second.calls() + third.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn challenge_action_serves_the_challenge() -> TestResult {
    let plugin = FakePlugin::with_action(
        "fake",
        Verdict::Ban,
        PluginAction::Challenge(ChallengeKind::Automated),
    );
    let (fw, _store) = firewall("sync", vec![shared(&plugin)])?;

    let resp = send(&fw, TestRequest::get(SOURCE, "/")).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(common::set_cookie(&resp, "__umbuuid").is_some());
    Ok(())
}

#[tokio::test]
async fn ban_from_unconfigured_plugin_blocks() -> TestResult {
    let plugin = FakePlugin::with_action(
        "current",
        Verdict::Clean,
        PluginAction::Challenge(ChallengeKind::Automated),
    );
    let (fw, store) = firewall("sync", vec![shared(&plugin)])?;
    let stale = serde_json::to_string(&BanRecord::Banned { plugin: "retired".into() })?;
    store
        .set(&BanRecord::key(SOURCE), &stale, Duration::from_secs(60))
        .await?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::FORBIDDEN);
    assert_eq!(plugin.calls(), 0);
    Ok(())
}

const QUOTA_HEADERS: &[(&str, &str)] = &[("retry-after", "60")];

#[tokio::test]
async fn abuseipdb_quota_response_suspends_the_plugin() -> TestResult {
    let (addr, hits) = spawn_stub(StatusCode::TOO_MANY_REQUESTS, QUOTA_HEADERS, "").await?;
    let cfg: AbuseIpDbConfig = toml::from_str(&format!("base_url = \"http://{addr}\"\n"))?;
    let plugin = AbuseIpDbPlugin::new(&cfg, Duration::from_secs(2))?;
    let ip: IpAddr = SOURCE.parse()?;

    assert!(plugin.should_ban(ip).await.is_err());
    assert!(!plugin.is_available());
    assert!(plugin.quota().is_suspended());

    assert!(plugin.should_ban(ip).await.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn virustotal_quota_response_suspends_the_plugin() -> TestResult {
    let (addr, hits) = spawn_stub(StatusCode::TOO_MANY_REQUESTS, QUOTA_HEADERS, "").await?;
    let cfg: VirusTotalConfig = toml::from_str(&format!("base_url = \"http://{addr}\"\n"))?;
    let plugin = VirusTotalPlugin::new(&cfg, Duration::from_secs(2))?;
    let ip: IpAddr = SOURCE.parse()?;

    assert!(plugin.should_ban(ip).await.is_err());
    assert!(!plugin.is_available());

    assert!(plugin.should_ban(ip).await.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn quota_response_leaves_source_unrecorded() -> TestResult {
    let (addr, hits) = spawn_stub(StatusCode::TOO_MANY_REQUESTS, QUOTA_HEADERS, "").await?;
    let cfg: AbuseIpDbConfig = toml::from_str(&format!("base_url = \"http://{addr}\"\n"))?;
    let plugin: Arc<dyn MitigationPlugin> =
        Arc::new(AbuseIpDbPlugin::new(&cfg, Duration::from_secs(2))?);
    let (fw, store) = firewall("sync", vec![plugin])?;

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    assert_eq!(record(&store).await?, None);

    assert_eq!(send(&fw, TestRequest::get(SOURCE, "/")).await?.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn abuseipdb_score_over_threshold_bans() -> TestResult {
    let body = r#"{"data":{"abuseConfidenceScore":90}}"#;
    let (addr, _hits) = spawn_stub(StatusCode::OK, &[("content-type", "application/json")], body)
        .await?;
    let cfg: AbuseIpDbConfig = toml::from_str(&format!("base_url = \"http://{addr}\"\n"))?;
    let plugin = AbuseIpDbPlugin::new(&cfg, Duration::from_secs(2))?;

    assert!(plugin.should_ban(SOURCE.parse()?).await?);
    assert!(plugin.is_available());
    Ok(())
}
