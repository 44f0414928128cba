//! Ready-made functions for [`ConfigBuilder::custom_field`](crate::ConfigBuilder::custom_field).
//!
//! ```rust
//! use actix_web::http::header::HeaderName;
//! use actix_web_middleware_accesslog::{Config, fields};
//!
//! let config = Config::builder()
//!     .custom_field(fields::host())
//!     .custom_field(fields::referer())
//!     .custom_field(fields::request_id(HeaderName::from_static("x-request-id")))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.custom_fields().len(), 3);
//! ```

use std::env;

use actix_http::Version;
use actix_web::{HttpMessage, HttpRequest};
use actix_web::http::header::{self, HeaderName};
use uuid::Uuid;

use crate::field::Field;

/// Request ID generated by [`request_id`] when the client did not send one.
///
/// Stored in the request extensions, so every middleware reports the same value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        #[cfg(not(feature = "uuid_v7"))]
        {
            Self(Uuid::new_v4())
        }
        #[cfg(feature = "uuid_v7")]
        {
            Self(Uuid::now_v7())
        }
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

pub(crate) fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "unknown",
    }
}

fn header_value(req: &HttpRequest, name: &HeaderName) -> String {
    req.headers()
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// Host. Example: localhost
pub fn host() -> impl Fn(&HttpRequest) -> Field + Send + Sync + 'static {
    |req| Field::string("host", req.connection_info().host())
}

/// Referer. Example: https://actix.rs
pub fn referer() -> impl Fn(&HttpRequest) -> Field + Send + Sync + 'static {
    |req| Field::string("referer", header_value(req, &header::REFERER))
}

/// Version of the HTTP protocol. Example: HTTP/1.1
pub fn version() -> impl Fn(&HttpRequest) -> Field + Send + Sync + 'static {
    |req| Field::string("version", http_version(req.version()))
}

/// Any request header, keyed by its name. Missing headers log an empty string.
pub fn request_header(
    name: HeaderName,
) -> impl Fn(&HttpRequest) -> Field + Send + Sync + 'static {
    move |req| Field::string(name.to_string(), header_value(req, &name))
}

/// Environment variable, read on every record. Example: USER
pub fn environment<T: Into<String>>(
    var: T,
) -> impl Fn(&HttpRequest) -> Field + Send + Sync + 'static {
    let var = var.into();
    move |_| Field::string(var.clone(), env::var(&var).unwrap_or_default())
}

/// Request ID taken from the `name` header.
///
/// Generated if not provided by the client; the generated id is kept in the request
/// extensions as [`RequestId`].
pub fn request_id(
    name: HeaderName,
) -> impl Fn(&HttpRequest) -> Field + Send + Sync + 'static {
    move |req| {
        if let Some(val) = req.headers().get(&name) {
            return Field::string(
                name.to_string(),
                String::from_utf8_lossy(val.as_bytes()).into_owned(),
            );
        }

        let existing = req.extensions().get::<RequestId>().copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = RequestId::new();
                req.extensions_mut().insert(id);
                id
            }
        };
        Field::string(name.to_string(), id.0.as_hyphenated().to_string())
    }
}

/// Request ID assigned by `tracing_actix_web::TracingLogger`. Empty when the
/// `TracingLogger` middleware is not installed.
#[cfg(feature = "tracing-request-id")]
pub fn tracing_request_id() -> impl Fn(&HttpRequest) -> Field + Send + Sync + 'static {
    |req| {
        let id = req
            .extensions()
            .get::<tracing_actix_web::RequestId>()
            .map(|id| id.to_string())
            .unwrap_or_default();
        Field::string("tracing_request_id", id)
    }
}
