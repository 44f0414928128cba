use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Errors raised while building a [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid skip path pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("invalid time format description: {0}")]
    InvalidTimeFormat(#[from] time::error::InvalidFormatDescription),
}

/// Error a request resolves to after [`Recovery`](crate::Recovery) caught a panic.
#[derive(Debug, Error)]
pub enum RecoveredPanic {
    /// The client connection was already gone.
    #[error("connection lost: {0}")]
    BrokenConnection(String),

    #[error("panic: {0}")]
    Panic(String),
}

impl ResponseError for RecoveredPanic {
    fn status_code(&self) -> StatusCode {
        match self {
            // nothing reaches the client, the status is left at its default
            RecoveredPanic::BrokenConnection(_) => StatusCode::OK,
            RecoveredPanic::Panic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            RecoveredPanic::BrokenConnection(_) => {
                HttpResponse::build(self.status_code()).force_close().finish()
            }
            RecoveredPanic::Panic(_) => HttpResponse::new(self.status_code()),
        }
    }
}
