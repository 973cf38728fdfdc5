//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use instrumented_service::observability::{logging::json_layer, trace::batch_provider};
use instrumented_service::{HttpServer, Observability, ServiceConfig};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use serde_json::Value;
use tower::ServiceExt;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

/// Config bound to ephemeral local ports, with a long export interval so
/// tests control flushing.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_address = "127.0.0.1:0".into();
    config.observability.export_interval_secs = 60;
    config
}

/// A fully instrumented router plus handles to inspect its telemetry.
pub struct TestApp {
    pub router: Router,
    pub obs: Observability,
    pub spans: InMemorySpanExporter,
}

impl TestApp {
    /// The service's own routes.
    pub fn new() -> Self {
        Self::with_routes(HttpServer::routes(), test_config())
    }

    /// Arbitrary routes behind the service's middleware stack.
    pub fn with_routes(routes: Router, config: ServiceConfig) -> Self {
        let spans = InMemorySpanExporter::default();
        let provider = batch_provider(&config.observability, spans.clone());
        let obs = Observability::start(&config.observability, provider)
            .expect("observability starts");
        let router = HttpServer::instrument(routes, &config, obs.clone());
        Self { router, obs, spans }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }

    /// Every span exported so far, after flushing the batch processor.
    pub async fn finished_spans(&self) -> Vec<SpanData> {
        self.obs.flush().await;
        self.spans.get_finished_spans().unwrap()
    }

    /// Current value of a metric sample, if it has been recorded.
    pub fn metric(&self, name: &str, route: &str, status_code: &str) -> Option<f64> {
        sample(
            &self.obs.metrics().render(),
            name,
            &[("route", route), ("status_code", status_code)],
        )
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// String value of a span attribute.
pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.to_string())
}

/// Find `name{labels} value` in Prometheus text output.
pub fn sample(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let labels = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect::<Vec<_>>()
        .join(",");
    let prefix = format!("{}{{{}}} ", name, labels);
    rendered
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .and_then(|value| value.trim().parse().ok())
}

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// JSON log lines captured from the current thread.
pub struct CapturedLogs {
    buffer: Buffer,
    _guard: DefaultGuard,
}

impl CapturedLogs {
    /// Route this thread's log events into a buffer until dropped.
    ///
    /// Use with the current-thread test runtime so handler tasks share it.
    pub fn start() -> Self {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry().with(json_layer(move || writer.clone()));
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            buffer,
            _guard: guard,
        }
    }

    pub fn lines(&self) -> Vec<Value> {
        let bytes = self.buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Lines whose message equals `message`.
    pub fn with_message(&self, message: &str) -> Vec<Value> {
        self.lines()
            .into_iter()
            .filter(|line| line["message"] == message)
            .collect()
    }
}
