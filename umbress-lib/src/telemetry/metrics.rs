use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

pub mod labels {
    pub const VERDICT: &str = "verdict";
    pub const STAGE: &str = "stage";
    pub const MODE: &str = "mode";
    pub const KIND: &str = "kind";
    pub const OUTCOME: &str = "outcome";
    pub const RESULT: &str = "result";
    pub const PLUGIN: &str = "plugin";
    pub const STATUS_CODE: &str = "status_code";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

pub mod values {
    pub const VERDICT_PASS: &str = "pass";
    pub const VERDICT_BLOCK: &str = "block";
    pub const VERDICT_RATE_LIMITED: &str = "rate_limited";
    pub const VERDICT_CHALLENGE: &str = "challenge";

    pub const STAGE_CRAWLER: &str = "crawler";
    pub const STAGE_GEOIP: &str = "geoip";
    pub const STAGE_CHALLENGE: &str = "challenge";
    pub const STAGE_IP_FILTER: &str = "ip_filter";
    pub const STAGE_RATE_LIMIT: &str = "rate_limit";
    pub const STAGE_REPUTATION: &str = "reputation";
    pub const STAGE_UPSTREAM: &str = "upstream";

    pub const RESULT_BAN: &str = "ban";
    pub const RESULT_CLEAN: &str = "clean";
    pub const RESULT_ERROR: &str = "error";
    pub const RESULT_SUSPENDED: &str = "suspended";
}

#[derive(Clone)]
pub struct Metrics {
    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,

    // IP filtering metrics
    pub ip_filter_requests_total: Counter<u64>,
    pub ip_filter_allowed_total: Counter<u64>,
    pub ip_filter_denied_total: Counter<u64>,

    // Rate limiting metrics
    pub rate_limit_requests_total: Counter<u64>,
    pub rate_limit_allowed_total: Counter<u64>,
    pub rate_limit_delayed_total: Counter<u64>,
    pub rate_limit_rejected_total: Counter<u64>,

    // outcome label: "cleared" | "issued" | "solved" | "rejected"
    pub challenges_total: Counter<u64>,

    // result label: "ordinary" | "bypass" | "unverified"
    pub crawler_verifications_total: Counter<u64>,

    // Reputation metrics
    pub reputation_checks_total: Counter<u64>,
    pub reputation_bans_total: Counter<u64>,
    pub reputation_provider_errors_total: Counter<u64>,

    pub upstream_errors_total: Counter<u64>,

    // Build info
    pub build_info: Gauge<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("umbress_requests_total")
                .with_description("Total number of requests evaluated, by verdict and deciding stage")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("umbress_requests_duration_seconds")
                .with_description("Request duration in seconds, including upstream time")
                .build(),

            ip_filter_requests_total: meter
                .u64_counter("umbress_ip_filter_requests_total")
                .with_description("Total number of requests evaluated by IP filter")
                .build(),
            ip_filter_allowed_total: meter
                .u64_counter("umbress_ip_filter_allowed_total")
                .with_description("Total number of requests allowed by IP filter")
                .build(),
            ip_filter_denied_total: meter
                .u64_counter("umbress_ip_filter_denied_total")
                .with_description("Total number of requests denied by IP filter (403)")
                .build(),

            rate_limit_requests_total: meter
                .u64_counter("umbress_rate_limit_requests_total")
                .with_description("Total number of requests evaluated by rate limiter")
                .build(),
            rate_limit_allowed_total: meter
                .u64_counter("umbress_rate_limit_allowed_total")
                .with_description("Total number of requests allowed by rate limiter")
                .build(),
            rate_limit_delayed_total: meter
                .u64_counter("umbress_rate_limit_delayed_total")
                .with_description("Total number of requests delayed by the bucket rate limiter")
                .build(),
            rate_limit_rejected_total: meter
                .u64_counter("umbress_rate_limit_rejected_total")
                .with_description("Total number of requests rejected by rate limiter (429)")
                .build(),

            challenges_total: meter
                .u64_counter("umbress_challenges_total")
                .with_description("Challenge stage outcomes. outcome=cleared|issued|solved|rejected")
                .build(),

            crawler_verifications_total: meter
                .u64_counter("umbress_crawler_verifications_total")
                .with_description("Crawler verifications. result=ordinary|bypass|unverified")
                .build(),

            reputation_checks_total: meter
                .u64_counter("umbress_reputation_checks_total")
                .with_description("Reputation provider lookups. result=ban|clean|error")
                .build(),
            reputation_bans_total: meter
                .u64_counter("umbress_reputation_bans_total")
                .with_description("Total number of sources banned by a reputation plugin")
                .build(),
            reputation_provider_errors_total: meter
                .u64_counter("umbress_reputation_provider_errors_total")
                .with_description("Total number of failed or timed out reputation lookups")
                .build(),

            upstream_errors_total: meter
                .u64_counter("umbress_upstream_errors_total")
                .with_description("Total number of failed upstream requests")
                .build(),

            build_info: meter
                .u64_gauge("umbress_build_info")
                .with_description("Build information (version, rust version)")
                .build(),
        }
    }

    /// Set build info metric with version labels
    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_request(&self, verdict: &str, stage: &str, status_code: u16, duration: f64) {
        self.requests_total.add(
            1,
            &[
                KeyValue::new(labels::VERDICT, verdict.to_string()),
                KeyValue::new(labels::STAGE, stage.to_string()),
            ],
        );
        self.requests_duration_seconds.record(
            duration,
            &[
                KeyValue::new(labels::VERDICT, verdict.to_string()),
                KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
            ],
        );
    }

    pub fn record_ip_filter_allowed(&self) {
        self.ip_filter_requests_total.add(1, &[]);
        self.ip_filter_allowed_total.add(1, &[]);
    }

    pub fn record_ip_filter_denied(&self) {
        self.ip_filter_requests_total.add(1, &[]);
        self.ip_filter_denied_total.add(1, &[]);
    }

    pub fn record_rate_limit_allowed(&self, mode: &str, delayed: bool) {
        let attrs = &[KeyValue::new(labels::MODE, mode.to_string())];
        self.rate_limit_requests_total.add(1, attrs);
        self.rate_limit_allowed_total.add(1, attrs);
        if delayed {
            self.rate_limit_delayed_total.add(1, attrs);
        }
    }

    pub fn record_rate_limit_rejection(&self, mode: &str) {
        let attrs = &[KeyValue::new(labels::MODE, mode.to_string())];
        self.rate_limit_requests_total.add(1, attrs);
        self.rate_limit_rejected_total.add(1, attrs);
    }

    pub fn record_challenge(&self, kind: &str, outcome: &str) {
        self.challenges_total.add(
            1,
            &[
                KeyValue::new(labels::KIND, kind.to_string()),
                KeyValue::new(labels::OUTCOME, outcome.to_string()),
            ],
        );
    }

    pub fn record_crawler_verification(&self, result: &str) {
        self.crawler_verifications_total
            .add(1, &[KeyValue::new(labels::RESULT, result.to_string())]);
    }

    /// Record one provider lookup. `result` is one of [`values::RESULT_BAN`],
    /// [`values::RESULT_CLEAN`], [`values::RESULT_ERROR`] or [`values::RESULT_SUSPENDED`].
    pub fn record_reputation_check(&self, plugin: &str, result: &str) {
        self.reputation_checks_total.add(
            1,
            &[
                KeyValue::new(labels::PLUGIN, plugin.to_string()),
                KeyValue::new(labels::RESULT, result.to_string()),
            ],
        );
        if result == values::RESULT_ERROR {
            self.reputation_provider_errors_total
                .add(1, &[KeyValue::new(labels::PLUGIN, plugin.to_string())]);
        }
    }

    pub fn record_reputation_ban(&self, plugin: &str) {
        self.reputation_bans_total
            .add(1, &[KeyValue::new(labels::PLUGIN, plugin.to_string())]);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors_total.add(1, &[]);
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("umbress");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}
