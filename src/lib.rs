//! Instrumented HTTP service library.
//!
//! A small web service (`/`, `/healthz`, `/error`) whose routes are wrapped
//! by an observability middleware producing structured logs, Prometheus
//! metrics and trace spans for every request.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::Observability;
