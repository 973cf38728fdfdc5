//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): every completed request by route, status
//! - `http_requests_errors_total` (counter): requests with status >= 400
//! - `http_request_duration_seconds` (histogram): latency distribution
//!
//! # Design Decisions
//! - Recorder is owned by the service, not installed as the global recorder
//! - Low-overhead metric updates (atomic operations inside the recorder)
//! - Labels are the route pattern and status code only, to bound cardinality
//! - Exposed as Prometheus text on a separate listener

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics::{Key, Label, Level, Metadata, Recorder, Unit};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUESTS_ERRORS_TOTAL: &str = "http_requests_errors_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// One completed request, as fed into the counters and histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub route: String,
    pub method: String,
    pub status_code: u16,
    pub duration_seconds: f64,
}

impl MetricEvent {
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

/// HTTP request metrics backed by a Prometheus recorder.
pub struct HttpMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl HttpMetrics {
    /// Build the recorder with the given latency buckets.
    pub fn new(latency_buckets: &[f64]) -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
                latency_buckets,
            )?
            .build_recorder();
        let handle = recorder.handle();

        recorder.describe_counter(
            HTTP_REQUESTS_TOTAL.into(),
            None,
            "Total number of HTTP requests".into(),
        );
        recorder.describe_counter(
            HTTP_REQUESTS_ERRORS_TOTAL.into(),
            None,
            "HTTP requests that completed with status >= 400".into(),
        );
        recorder.describe_histogram(
            HTTP_REQUEST_DURATION_SECONDS.into(),
            Some(Unit::Seconds),
            "HTTP request duration in seconds".into(),
        );

        Ok(Self { recorder, handle })
    }

    /// Record one completed request.
    pub fn record(&self, event: &MetricEvent) {
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        let labels = vec![
            Label::new("route", event.route.clone()),
            Label::new("status_code", event.status_code.to_string()),
        ];

        self.recorder
            .register_counter(&Key::from_parts(HTTP_REQUESTS_TOTAL, labels.clone()), &metadata)
            .increment(1);

        if event.is_error() {
            self.recorder
                .register_counter(
                    &Key::from_parts(HTTP_REQUESTS_ERRORS_TOTAL, labels.clone()),
                    &metadata,
                )
                .increment(1);
        }

        self.recorder
            .register_histogram(&Key::from_parts(HTTP_REQUEST_DURATION_SECONDS, labels), &metadata)
            .record(event.duration_seconds);
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drain histogram buffers. Runs on the export interval.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }
}

/// Router exposing `GET /metrics`.
pub fn metrics_router(metrics: Arc<HttpMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<HttpMetrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render(),
    )
}

/// Serve the metrics endpoint until shutdown is signalled.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<HttpMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");

    axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(route: &str, status_code: u16) -> MetricEvent {
        MetricEvent {
            route: route.to_string(),
            method: "GET".to_string(),
            status_code,
            duration_seconds: 0.012,
        }
    }

    #[test]
    fn test_success_is_not_an_error() {
        let metrics = HttpMetrics::new(&[0.01, 0.1, 1.0]).unwrap();
        metrics.record(&event("/", 200));
        metrics.record(&event("/", 200));

        let rendered = metrics.render();
        assert!(rendered.contains(r#"http_requests_total{route="/",status_code="200"} 2"#));
        assert!(!rendered.contains(r#"http_requests_errors_total{route="/""#));
        assert!(rendered
            .contains(r#"http_request_duration_seconds_count{route="/",status_code="200"} 2"#));
    }

    #[test]
    fn test_client_and_server_errors_counted() {
        let metrics = HttpMetrics::new(&[0.01, 0.1, 1.0]).unwrap();
        metrics.record(&event("unmatched", 404));
        metrics.record(&event("/error", 500));

        let rendered = metrics.render();
        assert!(rendered
            .contains(r#"http_requests_errors_total{route="unmatched",status_code="404"} 1"#));
        assert!(rendered
            .contains(r#"http_requests_errors_total{route="/error",status_code="500"} 1"#));
    }

    #[test]
    fn test_latency_buckets_applied() {
        let metrics = HttpMetrics::new(&[0.01, 0.1, 1.0]).unwrap();
        metrics.record(&event("/healthz", 200));
        let rendered = metrics.render();
        assert!(rendered.contains("http_request_duration_seconds_bucket"));
        assert!(rendered.contains(r#"le="0.1""#));
    }

    #[test]
    fn test_empty_buckets_rejected() {
        assert!(HttpMetrics::new(&[]).is_err());
    }
}
