use std::future::ready;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use health::HealthRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::agent::App;
use crate::prometheus::track_metrics;
use crate::sender::EventSender;
use crate::time::TimeSource;
use crate::v0_endpoint;

// Uplink envelopes are small, LwM2M packs a bit larger
const MAX_BODY_SIZE: usize = 256 * 1024;

#[derive(Clone)]
pub struct State {
    pub app: Arc<dyn App>,
    pub sender: Arc<dyn EventSender>,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
}

async fn index() -> &'static str {
    "iot-agent"
}

pub fn router<TZ: TimeSource + Send + Sync + 'static>(
    timesource: TZ,
    readiness: HealthRegistry,
    app: Arc<dyn App>,
    sender: Arc<dyn EventSender>,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = State {
        app,
        sender,
        timesource: Arc::new(timesource),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/health", get(move || ready(readiness.get_status())))
        .route("/api/v0/messages", post(v0_endpoint::message))
        .route("/api/v0/messages/lwm2m", post(v0_endpoint::lwm2m))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // The recorder is global, it is only installed by the server
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
