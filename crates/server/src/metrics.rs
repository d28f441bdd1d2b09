use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static CHAT_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static STAGE_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static PROVIDER_RETRIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("jobchat_http_requests_total", "HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create jobchat_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "jobchat_http_request_duration_seconds",
                    "HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create jobchat_http_request_duration_seconds"),
        )
    })
}

fn chat_outcomes_total() -> &'static IntCounterVec {
    CHAT_OUTCOMES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "jobchat_chat_outcomes_total",
                    "Chat responses by outcome (success or failure reason).",
                ),
                &["outcome"],
            )
            .expect("create jobchat_chat_outcomes_total"),
        )
    })
}

fn stage_duration_seconds() -> &'static HistogramVec {
    STAGE_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "jobchat_stage_duration_seconds",
                    "Chat pipeline stage duration in seconds.",
                )
                .buckets(vec![
                    0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0,
                ]),
                &["stage", "outcome"],
            )
            .expect("create jobchat_stage_duration_seconds"),
        )
    })
}

fn provider_retries_total() -> &'static IntCounterVec {
    PROVIDER_RETRIES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "jobchat_provider_retries_total",
                    "Completion calls retried after a timeout or transport error.",
                ),
                &["stage"],
            )
            .expect("create jobchat_provider_retries_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_chat_outcome(outcome: &str) {
    chat_outcomes_total().with_label_values(&[outcome]).inc();
}

pub fn observe_stage(stage: &str, outcome: &str, duration: Duration) {
    stage_duration_seconds()
        .with_label_values(&[stage, outcome])
        .observe(duration.as_secs_f64());
}

pub fn inc_provider_retry(stage: &str) {
    provider_retries_total().with_label_values(&[stage]).inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
