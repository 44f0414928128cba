use std::fmt;

use actix_web::HttpMessage;

/// Errors registered against a single request, in registration order.
///
/// Stored in the request extensions; use [`RequestErrorsExt`] to append to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestErrors(Vec<String>);

impl RequestErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub(crate) fn push(&mut self, err: impl Into<String>) {
        self.0.push(err.into());
    }
}

/// One line per error: `Error #01: <text>\n`.
impl fmt::Display for RequestErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            writeln!(f, "Error #{:02}: {}", i + 1, err)?;
        }
        Ok(())
    }
}

/// Access to the per-request error list from handlers and middlewares.
///
/// # Examples
/// ```rust
/// use actix_web::{HttpRequest, HttpResponse};
/// use actix_web_middleware_accesslog::RequestErrorsExt;
///
/// async fn handler(req: HttpRequest) -> HttpResponse {
///     req.add_error("upstream timed out");
///     HttpResponse::BadGateway().finish()
/// }
/// ```
pub trait RequestErrorsExt {
    /// Append an error to the request's list.
    fn add_error<E: fmt::Display>(&self, err: E);

    /// Snapshot of the errors registered so far.
    fn errors(&self) -> RequestErrors;
}

impl<T: HttpMessage> RequestErrorsExt for T {
    fn add_error<E: fmt::Display>(&self, err: E) {
        let mut ext = self.extensions_mut();
        let mut errors = ext.remove::<RequestErrors>().unwrap_or_default();
        errors.push(err.to_string());
        ext.insert(errors);
    }

    fn errors(&self) -> RequestErrors {
        self.extensions()
            .get::<RequestErrors>()
            .cloned()
            .unwrap_or_default()
    }
}
