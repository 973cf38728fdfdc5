//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! middleware.rs (one RequestContext per request)
//!     → metrics.rs (counters, histogram)
//!     → trace.rs   (span queued for batch export)
//!     → logging.rs (one structured line per request)
//!
//! Consumers:
//!     → stdout (JSON lines, non-blocking writer)
//!     → Metrics endpoint (Prometheus scrape)
//!     → OpenTelemetry batch span processor (OTLP when configured)
//! ```
//!
//! # Design Decisions
//! - One explicitly constructed [`Observability`] context, injected as state
//! - Explicit lifecycle: `start` at boot, `shutdown` drains before exit
//! - Telemetry failures are logged locally and never reach the client

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod trace;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ObservabilityConfig;

pub use self::metrics::{HttpMetrics, MetricEvent};
pub use self::middleware::{
    install_panic_hook, observe, RequestContext, RequestOutcome, UNMATCHED_ROUTE,
};

/// Errors raised while bringing observability up.
#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("failed to build metrics recorder: {0}")]
    Metrics(#[from] BuildError),
}

struct Inner {
    metrics: Arc<HttpMetrics>,
    provider: SdkTracerProvider,
    tracer: SdkTracer,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Shared handle to the metrics recorder and tracer provider.
///
/// Cheap to clone; every clone refers to the same aggregation state.
#[derive(Clone)]
pub struct Observability {
    inner: Arc<Inner>,
}

impl Observability {
    /// Build the recorder, take ownership of `provider` and spawn the
    /// histogram upkeep task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: &ObservabilityConfig,
        provider: SdkTracerProvider,
    ) -> Result<Self, ObservabilityError> {
        let interval = Duration::from_secs(config.export_interval_secs.max(1));
        let metrics = Arc::new(HttpMetrics::new(&config.latency_buckets)?);
        let tracer = provider.tracer(trace::TRACER_NAME);

        let upkeep_metrics = metrics.clone();
        let upkeep_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                upkeep_metrics.run_upkeep();
            }
        });

        tracing::info!(
            service_name = %config.service_name,
            export_interval_secs = interval.as_secs(),
            "Observability started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                metrics,
                provider,
                tracer,
                tasks: Mutex::new(vec![upkeep_task]),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn metrics(&self) -> &Arc<HttpMetrics> {
        &self.inner.metrics
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.inner.tracer
    }

    /// Export all spans closed so far.
    pub async fn flush(&self) {
        let provider = self.inner.provider.clone();
        match tokio::task::spawn_blocking(move || provider.force_flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Span flush failed"),
            Err(e) => tracing::warn!(error = %e, "Span flush task failed"),
        }
    }

    /// Drain queued spans and stop background tasks. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let provider = self.inner.provider.clone();
        match tokio::task::spawn_blocking(move || provider.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Tracer provider shutdown failed"),
            Err(e) => tracing::warn!(error = %e, "Tracer provider shutdown task failed"),
        }

        let tasks = match self.inner.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            task.abort();
        }
        tracing::info!("Observability shut down");
    }

    /// Whether [`Observability::shutdown`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
