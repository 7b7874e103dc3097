// prometheus exporter setup

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::counter;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

pub const UPLINKS_TOTAL: &str = "iot_agent_uplinks_total";
pub const MESSAGES_SENT_TOTAL: &str = "iot_agent_messages_sent_total";
pub const MESSAGE_FAILURES_TOTAL: &str = "iot_agent_message_failures_total";

/// Counts processed uplinks, `outcome` being `published` or an error cause.
pub fn report_uplink(outcome: &'static str) {
    counter!(UPLINKS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn report_message_sent(kind: &'static str) {
    counter!(MESSAGES_SENT_TOTAL, "kind" => kind).increment(1);
}

/// Counts messages dropped without failing the uplink they belong to.
pub fn report_message_failed(kind: &'static str, cause: &'static str) {
    counter!(MESSAGE_FAILURES_TOTAL, "kind" => kind, "cause" => cause).increment(1);
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
