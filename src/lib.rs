//! Actix-web middlewares for structured access logs and panic recovery.
//! The access logger is inspired by the `actix-web`'s `Logger` middleware.
//!
//! # Examples:
//! ## By default middlewares use the standard `log` crate for logging.
//! ```bash
//! cargo add actix-web-middleware-accesslog
//! ```
//! Example usage with standard `log` crate and `structured_logger` crate:
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_accesslog::{AccessLogger, Config, Recovery, RustLog};
//! use structured_logger::{Builder, async_json::new_writer};
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     let config = Config::builder()
//!         .utc(true)
//!         .skip_path("/health")
//!         .build()
//!         .expect("valid config");
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .wrap(AccessLogger::with_config(RustLog::default(), config.clone()))
//!             .wrap(Recovery::with_config(RustLog::default(), config.clone(), true))
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?;
//!     Ok(())
//! }
//! ```
//! ## `tracing-request-id` feature allows to log Request ID that set by `TracingLogger`.
//! ```bash
//! cargo add actix-web-middleware-accesslog --features tracing-request-id
//! ```
//! Example usage with `tracing-request-id` feature:
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_accesslog::{AccessLogger, Config, RustLog, fields};
//! use tracing_actix_web::TracingLogger;
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     HttpServer::new(|| {
//!         let config = Config::builder()
//!             .custom_field(fields::tracing_request_id())
//!             .build()
//!             .expect("valid config");
//!
//!         App::new()
//!             .wrap(AccessLogger::with_config(RustLog::default(), config))
//!             .wrap(TracingLogger::default())
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?;
//!     Ok(())
//! }
//!```
//! # Features
//! - One structured record per request: status, method, path, query, client IP, user agent,
//!   time and latency, followed by custom fields
//! - Requests with errors logged at error level, per error or aggregated
//! - Panic recovery with broken connection detection and optional stack traces
//! - Exact, regex and predicate based request exclusion
//! - Pluggable [`LogSink`], with integration for the standard `log` crate
//! - Request ID tracking (with UUID v4 or v7 support)
//! - Integration with tracing ecosystem via `tracing-request-id` feature
//!
//! # Configuration
//!
//! Both middlewares take a [`Config`]. It is validated once when built and is cheap to clone:
//!
//! ```rust
//! use actix_web_middleware_accesslog::{Config, Level, TimeFormat, fields};
//!
//! let config = Config::builder()
//!     .time_format(TimeFormat::Rfc2822)   // default RFC 3339
//!     .utc(true)                          // default local time
//!     .skip_path("/health")
//!     .skip_path_regex(r"^/assets/.*")
//!     .skipper(|req| req.method() == "OPTIONS")
//!     .default_level(Level::Debug)        // default Info
//!     .log_errors_once(true)              // default one record per error
//!     .custom_field(fields::host())
//!     .context_fn(|_req| Vec::new())
//!     .build()
//!     .unwrap();
//! ```
//!
//! # Request errors
//!
//! Handlers report errors without failing the response through [`RequestErrorsExt`]:
//!
//! ```rust
//! use actix_web::{HttpRequest, HttpResponse};
//! use actix_web_middleware_accesslog::RequestErrorsExt;
//!
//! async fn index(req: HttpRequest) -> HttpResponse {
//!     req.add_error("cache unavailable");
//!     HttpResponse::Ok().finish()
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `log` (default) - Enable integration with the standard `log` crate
//! - `tracing-request-id` - Enable integration with `tracing-actix-web`'s request ID
//! - `uuid_v7` - Use UUIDv7 instead of UUIDv4 for request IDs

mod config;
mod error;
mod field;
pub mod fields;
mod logger;
mod recovery;
mod request_errors;
mod wrapper;

pub use crate::config::{Config, ConfigBuilder, ContextFn, CustomField, Skipper, TimeFormat};
pub use crate::error::{ConfigError, RecoveredPanic};
pub use crate::field::{Field, Value};
pub use crate::logger::AccessLogger;
pub use crate::recovery::{
    Recovery, is_broken_connection, is_broken_connection_message, is_broken_io_error,
    panic_message,
};
pub use crate::request_errors::{RequestErrors, RequestErrorsExt};
#[cfg(feature = "log")]
pub use crate::wrapper::RustLog;
pub use crate::wrapper::{Level, LogSink};
