//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the route table
//! - Wire up middleware (observability, timeout, request ID)
//! - Bind server to listener and serve until shutdown

use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServiceConfig;
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::observability::{observe, Observability};

/// HTTP server for the service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &ServiceConfig, obs: Observability) -> Self {
        Self {
            router: Self::build_router(config, obs),
        }
    }

    /// The service's routes, before any middleware.
    pub fn routes() -> Router {
        Router::new()
            .route("/", get(handlers::hello))
            .route("/healthz", get(handlers::healthz))
            .route("/error", get(handlers::error))
            .fallback(handlers::not_found)
    }

    /// Build the full router: service routes wrapped in every middleware layer.
    pub fn build_router(config: &ServiceConfig, obs: Observability) -> Router {
        Self::instrument(Self::routes(), config, obs)
    }

    /// Wrap any route table with the service's middleware stack.
    ///
    /// Layers run outermost first: request ID, observability, timeout. The
    /// observability layer sits on every route and the fallback, so it sees
    /// the matched route pattern and every response, including timeouts.
    #[allow(deprecated)]
    pub fn instrument(routes: Router, config: &ServiceConfig, obs: Observability) -> Router {
        routes
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::from_fn_with_state(obs, observe))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections until shutdown is signalled.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
