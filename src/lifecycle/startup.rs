//! Startup orchestration.
//!
//! # Responsibilities
//! - Start observability (metrics recorder, span export)
//! - Bind the metrics and HTTP listeners
//! - Spawn the servers and hand back a handle for shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::io;
use std::net::SocketAddr;

use opentelemetry_sdk::trace::SdkTracerProvider;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};

use crate::config::ServiceConfig;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics::serve_metrics;
use crate::observability::{Observability, ObservabilityError};

/// Errors raised while starting or stopping the service.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Observability(#[from] ObservabilityError),

    #[error("server error: {0}")]
    Server(#[from] io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] JoinError),
}

/// A started service: servers running in the background.
pub struct RunningService {
    local_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    observability: Observability,
    shutdown: Shutdown,
    server: JoinHandle<io::Result<()>>,
    metrics_server: Option<JoinHandle<io::Result<()>>>,
}

/// Start observability and both listeners.
pub async fn start(
    config: ServiceConfig,
    provider: SdkTracerProvider,
) -> Result<RunningService, StartupError> {
    let observability = Observability::start(&config.observability, provider)?;
    let shutdown = Shutdown::new();

    let (metrics_addr, metrics_server) = if config.observability.metrics_enabled {
        let listener = bind(&config.observability.metrics_address).await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(serve_metrics(
            listener,
            observability.metrics().clone(),
            shutdown.subscribe(),
        ));
        (Some(addr), Some(task))
    } else {
        (None, None)
    };

    let listener = bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        address = %local_addr,
        request_timeout_secs = config.timeouts.request_secs,
        metrics_address = ?metrics_addr,
        "Listening for connections"
    );

    let server = HttpServer::new(&config, observability.clone());
    let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

    Ok(RunningService {
        local_addr,
        metrics_addr,
        observability,
        shutdown,
        server,
        metrics_server,
    })
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

impl RunningService {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn observability(&self) -> &Observability {
        &self.observability
    }

    /// Stop accepting, drain in-flight requests, then flush telemetry.
    ///
    /// Telemetry is drained even when a server task failed; the first error
    /// is returned afterwards.
    pub async fn stop(self) -> Result<(), StartupError> {
        self.shutdown.trigger();

        let served = self.server.await;
        let metrics_served = match self.metrics_server {
            Some(task) => Some(task.await),
            None => None,
        };
        self.observability.shutdown().await;

        if let Some(metrics_served) = metrics_served {
            if let Err(e) = metrics_served? {
                tracing::warn!(error = %e, "Metrics endpoint stopped with error");
            }
        }
        served??;
        Ok(())
    }
}
