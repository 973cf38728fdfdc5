//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (assign request ID)
//!     → observability middleware (span, metrics, log)
//!     → handlers.rs (literal responses, declared AppError)
//!     → Send to client
//! ```

pub mod error;
pub mod handlers;
pub mod request;
pub mod server;

pub use error::AppError;
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
