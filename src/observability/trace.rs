//! Distributed tracing support.
//!
//! # Responsibilities
//! - Build the service's OpenTelemetry tracer provider
//! - Extract W3C trace context (`traceparent`) from incoming requests
//! - Inject the server span's context into responses
//! - Export finished spans in batches (OTLP when an endpoint is configured)
//!
//! # Design Decisions
//! - The provider is owned by `Observability`, never installed globally
//! - Batching runs on the SDK's worker, off the request path; a full queue drops
//! - Without an OTLP endpoint spans still carry ids for log correlation

use std::time::Duration;

use axum::http::HeaderMap;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, RandomIdGenerator, Sampler, SdkTracerProvider,
    SpanExporter, TracerProviderBuilder,
};
use opentelemetry_sdk::Resource;

use crate::config::ObservabilityConfig;

/// Instrumentation scope name for spans created by the middleware.
pub const TRACER_NAME: &str = "instrumented-service";

fn provider_builder(config: &ObservabilityConfig) -> TracerProviderBuilder {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
}

/// A provider that creates spans but exports nothing.
pub fn local_provider(config: &ObservabilityConfig) -> SdkTracerProvider {
    provider_builder(config).build()
}

/// A provider handing finished spans to `exporter` in batches, every
/// `export_interval_secs`, with at most `span_queue_capacity` waiting.
pub fn batch_provider<E>(config: &ObservabilityConfig, exporter: E) -> SdkTracerProvider
where
    E: SpanExporter + 'static,
{
    let batch_config = BatchConfigBuilder::default()
        .with_scheduled_delay(Duration::from_secs(config.export_interval_secs.max(1)))
        .with_max_queue_size(config.span_queue_capacity.max(1))
        .build();
    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch_config)
        .build();

    provider_builder(config).with_span_processor(processor).build()
}

/// The provider used by the running service: OTLP/HTTP export when
/// `otlp_endpoint` is set, local-only otherwise.
pub fn service_provider(
    config: &ObservabilityConfig,
) -> Result<SdkTracerProvider, ExporterBuildError> {
    match &config.otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(endpoint.as_str())
                .build()?;
            tracing::info!(endpoint = %endpoint, "OTLP span export enabled");
            Ok(batch_provider(config, exporter))
        }
        None => {
            tracing::info!("No OTLP endpoint configured, spans are not exported");
            Ok(local_provider(config))
        }
    }
}

/// Remote parent context from a `traceparent` header, or an empty context.
pub fn extract_parent(headers: &HeaderMap) -> Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

/// Write `traceparent` for `span_context` into `headers`.
pub fn inject_traceparent(span_context: &SpanContext, headers: &mut HeaderMap) {
    let cx = Context::new().with_remote_span_context(span_context.clone());
    TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use opentelemetry::trace::{
        Span as _, SpanId, TraceFlags, TraceId, TraceState, Tracer as _, TracerProvider as _,
    };
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn headers(traceparent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_str(traceparent).unwrap());
        headers
    }

    #[test]
    fn test_extract_remote_parent() {
        let cx = extract_parent(&headers(PARENT));
        let parent = cx.span().span_context().clone();
        assert!(parent.is_valid());
        assert!(parent.is_remote());
        assert!(parent.is_sampled());
        assert_eq!(parent.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(parent.span_id().to_string(), "00f067aa0ba902b7");
    }

    #[test]
    fn test_invalid_traceparent_ignored() {
        let invalid = [
            "",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        ];
        for value in invalid {
            let cx = extract_parent(&headers(value));
            assert!(!cx.span().span_context().is_valid(), "{value}");
        }
        assert!(!extract_parent(&HeaderMap::new()).span().span_context().is_valid());
    }

    #[test]
    fn test_inject_renders_traceparent() {
        let context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        let mut headers = HeaderMap::new();
        inject_traceparent(&context, &mut headers);
        assert_eq!(headers.get("traceparent").unwrap(), PARENT);
    }

    #[test]
    fn test_batch_provider_exports_child_of_remote_parent() {
        let exporter = InMemorySpanExporter::default();
        let provider = batch_provider(&ObservabilityConfig::default(), exporter.clone());
        let tracer = provider.tracer(TRACER_NAME);

        let parent = extract_parent(&headers(PARENT));
        tracer
            .span_builder("GET /")
            .start_with_context(&tracer, &parent)
            .end();
        tracer.start("GET /healthz").end();
        provider.force_flush().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(
            spans[0].span_context.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(spans[0].parent_span_id.to_string(), "00f067aa0ba902b7");
        assert_eq!(spans[1].parent_span_id, SpanId::INVALID);
        assert_eq!(spans[0].span_context.span_id().to_string().len(), 16);
    }

    #[test]
    fn test_unsampled_parent_not_exported() {
        let exporter = InMemorySpanExporter::default();
        let provider = batch_provider(&ObservabilityConfig::default(), exporter.clone());
        let tracer = provider.tracer(TRACER_NAME);

        let parent = extract_parent(&headers(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00",
        ));
        let span = tracer
            .span_builder("GET /")
            .start_with_context(&tracer, &parent);
        // Ids still exist for log correlation.
        assert!(span.span_context().is_valid());
        drop(span);

        provider.force_flush().unwrap();
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn test_local_provider_needs_no_endpoint() {
        let config = ObservabilityConfig::default();
        assert!(config.otlp_endpoint.is_none());
        let provider = service_provider(&config).unwrap();
        let span = provider.tracer(TRACER_NAME).start("GET /");
        assert!(span.span_context().is_valid());
    }
}
