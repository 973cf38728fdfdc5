//! Request instrumentation middleware.
//!
//! Wraps every request with:
//! 1. A server span (W3C trace context propagated from `traceparent`)
//! 2. Counter and histogram updates
//! 3. One structured completion log line
//! 4. Interception of panics raised anywhere below it
//!
//! Completion is driven by [`RequestContext`]'s `Drop`, so it runs exactly once
//! on every exit path, including panics and futures dropped mid-flight.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use opentelemetry::trace::{Span as _, SpanContext, SpanKind, Status, Tracer as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::Span;
use tracing::Instrument;

use super::metrics::MetricEvent;
use super::trace::{extract_parent, inject_traceparent};
use super::Observability;
use crate::http::error::AppError;
use crate::http::request::X_REQUEST_ID;

tokio::task_local! {
    /// Set while a request's handler future is being polled.
    static REQUEST_SCOPE: ();
}

/// Route label used when no route pattern matched.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// How a request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// A response was produced, successful or not.
    Completed(StatusCode),
    /// Handling faulted; the client got a generic 500.
    Faulted { message: String },
    /// The request future was dropped before producing a response,
    /// typically because the client went away.
    Abandoned,
}

/// Status recorded for abandoned requests ("client closed request").
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Per-request telemetry state. Finalized exactly once, on drop.
pub struct RequestContext {
    obs: Observability,
    start: Instant,
    route: String,
    method: Method,
    request_id: Option<String>,
    trace: SpanContext,
    span: Option<Span>,
    log_span: tracing::Span,
    outcome: Option<RequestOutcome>,
}

impl Observability {
    /// Open the request's span and capture what completion will need.
    pub fn on_request_start(&self, request: &Request) -> RequestContext {
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_owned())
            .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());
        let method = request.method().clone();
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let parent = extract_parent(request.headers());

        let tracer = self.tracer();
        let span = tracer
            .span_builder(format!("{} {}", method, route))
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new("http.method", method.to_string()),
                KeyValue::new("http.route", route.clone()),
            ])
            .start_with_context(tracer, &parent);
        let trace = span.span_context().clone();

        let log_span = tracing::info_span!(
            "http_request",
            trace_id = %trace.trace_id(),
            span_id = %trace.span_id(),
            http.method = %method,
            http.route = %route,
        );

        RequestContext {
            obs: self.clone(),
            start: Instant::now(),
            route,
            method,
            request_id,
            trace,
            span: Some(span),
            log_span,
            outcome: None,
        }
    }

    /// Record how the request ended and finalize its telemetry.
    pub fn on_request_end(&self, mut ctx: RequestContext, outcome: RequestOutcome) {
        ctx.outcome = Some(outcome);
        drop(ctx);
    }

    /// Turn a fault that escaped the handler into a generic 500.
    ///
    /// The fault message goes to the log only, never into the response body.
    pub fn intercept_fault(
        &self,
        ctx: &RequestContext,
        fault: Box<dyn Any + Send>,
    ) -> (Response, RequestOutcome) {
        let message = fault_message(fault.as_ref());
        tracing::error!(
            trace_id = %ctx.trace.trace_id(),
            span_id = %ctx.trace.span_id(),
            http.method = %ctx.method,
            http.route = %ctx.route,
            http.status_code = 500u64,
            error.message = %message,
            "unhandled fault"
        );
        (
            AppError::generic_internal().into_response(),
            RequestOutcome::Faulted { message },
        )
    }
}

impl RequestContext {
    fn finish(&mut self) {
        let Some(mut span) = self.span.take() else {
            return;
        };
        let outcome = self.outcome.take().unwrap_or_else(|| {
            if std::thread::panicking() {
                RequestOutcome::Faulted {
                    message: "panic while finalizing request".to_owned(),
                }
            } else {
                RequestOutcome::Abandoned
            }
        });
        let (status_code, fault) = match outcome {
            RequestOutcome::Completed(status) => (status.as_u16(), None),
            RequestOutcome::Faulted { message } => {
                (StatusCode::INTERNAL_SERVER_ERROR.as_u16(), Some(message))
            }
            RequestOutcome::Abandoned => (CLIENT_CLOSED_REQUEST, None),
        };

        let event = MetricEvent {
            route: self.route.clone(),
            method: self.method.to_string(),
            status_code,
            duration_seconds: self.start.elapsed().as_secs_f64(),
        };
        self.obs.metrics().record(&event);

        span.set_attribute(KeyValue::new(
            "http.status_code",
            i64::from(event.status_code),
        ));
        let span_status = match fault {
            Some(message) => Status::error(message),
            None if status_code >= 500 => Status::error(format!("HTTP {}", status_code)),
            None => Status::Ok,
        };
        span.set_status(span_status);
        span.end();

        self.log_completion(&event);
    }

    fn log_completion(&self, event: &MetricEvent) {
        macro_rules! completion {
            ($level:expr) => {
                tracing::event!(
                    parent: &self.log_span,
                    $level,
                    trace_id = %self.trace.trace_id(),
                    span_id = %self.trace.span_id(),
                    http.method = %event.method,
                    http.route = %event.route,
                    http.status_code = u64::from(event.status_code),
                    duration_seconds = event.duration_seconds,
                    request_id = self.request_id.as_deref(),
                    "request completed"
                )
            };
        }

        match event.status_code {
            500.. => completion!(tracing::Level::ERROR),
            400..=499 => completion!(tracing::Level::WARN),
            _ => completion!(tracing::Level::INFO),
        }
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Middleware entry point, layered over every route and the fallback.
pub async fn observe(State(obs): State<Observability>, request: Request, next: Next) -> Response {
    let ctx = obs.on_request_start(&request);
    let log_span = ctx.log_span.clone();

    let result = AssertUnwindSafe(REQUEST_SCOPE.scope((), next.run(request)))
        .catch_unwind()
        .instrument(log_span)
        .await;

    let (mut response, outcome) = match result {
        Ok(response) => {
            let status = response.status();
            (response, RequestOutcome::Completed(status))
        }
        Err(fault) => obs.intercept_fault(&ctx, fault),
    };

    inject_traceparent(&ctx.trace, response.headers_mut());

    obs.on_request_end(ctx, outcome);
    response
}

/// Whether the current code runs inside a request's handler future.
pub fn in_request_scope() -> bool {
    REQUEST_SCOPE.try_with(|_| ()).is_ok()
}

/// Install a panic hook that leaves faults raised inside a request to the
/// middleware, which logs them as structured lines. Panics anywhere else go
/// to the previously installed hook.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if in_request_scope() {
            return;
        }
        previous(info);
    }));
}

fn fault_message(fault: &(dyn Any + Send)) -> String {
    if let Some(message) = fault.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = fault.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown fault".to_owned()
    }
}
