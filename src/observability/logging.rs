//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Render one flat JSON object per log line
//! - Configure log level from config and environment
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Lines go through a non-blocking writer so logging never stalls a request
//! - Fields of enclosing spans are merged into each line, event fields win

use std::fmt::{self, Write as _};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        format::{JsonFields, Writer},
        FmtContext, FormatEvent, FormatFields, FormattedFields, MakeWriter,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

use crate::config::{LogFormat, ObservabilityConfig};

const DEFAULT_LOG_TARGET: &str = "instrumented_service";

/// Keeps the background log writer alive.
///
/// Must be held for the lifetime of the application so buffered lines are
/// flushed before exit.
pub struct LogGuard {
    _worker: WorkerGuard,
}

/// Initialize the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) -> Result<LogGuard, TryInitError> {
    let (writer, worker) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http=warn",
            DEFAULT_LOG_TARGET,
            config.log_level.to_ascii_lowercase()
        ))
    });

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.log_format {
        LogFormat::Json => Box::new(json_layer(writer)),
        LogFormat::Pretty => Box::new(tracing_subscriber::fmt::layer().with_writer(writer)),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;

    Ok(LogGuard { _worker: worker })
}

/// A fmt layer emitting [`JsonLineFormat`] lines to `writer`.
pub fn json_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(JsonFields::new())
        .event_format(JsonLineFormat)
        .with_writer(writer)
}

/// Formats events as
/// `{"time", "severity", "message", ...span fields, ...event fields}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineFormat;

impl<S, N> FormatEvent<S, N> for JsonLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut line = Map::new();
        line.insert(
            "time".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        line.insert(
            "severity".into(),
            Value::String(severity(event.metadata().level()).into()),
        );

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(fields) = extensions.get::<FormattedFields<N>>() else {
                    continue;
                };
                if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&fields.fields) {
                    line.extend(fields);
                }
            }
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        line.insert(
            "message".into(),
            Value::String(visitor.message.unwrap_or_default()),
        );
        line.extend(visitor.fields);

        let rendered = serde_json::to_string(&line).map_err(|_| fmt::Error)?;
        writeln!(writer, "{}", rendered)
    }
}

/// Severity names as written to the `severity` field.
pub fn severity(level: &Level) -> &'static str {
    match level.as_str() {
        "WARN" => "WARNING",
        other => other,
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.message = Some(text);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.insert(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }
}
