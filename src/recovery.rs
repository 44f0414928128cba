use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    error::Error as StdError,
    future::Future,
    io,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    rc::Rc,
    sync::{Arc, Once},
    task::{Context, Poll},
};

use pin_project_lite::pin_project;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderMap};
use actix_web::http::{Method, Uri, Version};
use actix_web::{Error, Result};

use crate::config::Config;
use crate::error::RecoveredPanic;
use crate::field::Field;
use crate::fields::http_version;
use crate::wrapper::{Level, LogSink};

const RECOVERY_MESSAGE: &str = "[Recovery from panic]";

/// Middleware turning panics of the wrapped services into logged errors.
///
/// A panic caused by a client that went away (broken pipe, connection reset) is logged with
/// the request path as message and the request fails without a response of its own. Any other
/// panic is logged as `[Recovery from panic]` and answered with `500 Internal Server Error`.
/// In both cases the request resolves to an [`Error`] wrapping a [`RecoveredPanic`].
///
/// Register it last so that it is the outermost middleware; panics raised outside of it
/// are not recovered.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_accesslog::{AccessLogger, Recovery, RustLog};
///
/// let app = App::new()
///     .wrap(AccessLogger::default())
///     .wrap(Recovery::new(RustLog::default()));
/// ```
pub struct Recovery(Rc<Inner>);

struct Inner {
    config: Config,
    sink: Arc<dyn LogSink>,
    stack: bool,
}

impl Recovery {
    /// Create `Recovery` middleware writing to `sink`, without stack traces.
    pub fn new<L: LogSink + 'static>(sink: L) -> Recovery {
        Recovery::with_config(sink, Config::default(), false)
    }

    /// Create `Recovery` middleware with the specified `config`.
    ///
    /// With `stack` set, every recovered panic carries a `stack` field. Capturing it installs a
    /// process-wide panic hook that records a backtrace for every panic, which is expensive.
    pub fn with_config<L: LogSink + 'static>(sink: L, config: Config, stack: bool) -> Recovery {
        if stack {
            install_backtrace_hook();
        }
        Recovery(Rc::new(Inner {
            config,
            sink: Arc::new(sink),
            stack,
        }))
    }
}

impl<S, B> Transform<S, ServiceRequest> for Recovery
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RecoveryMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RecoveryMiddlewareService {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

/// Recovery middleware service.
pub struct RecoveryMiddlewareService<S> {
    inner: Rc<Inner>,
    service: S,
}

impl<S, B> Service<ServiceRequest> for RecoveryMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = RecoveryResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // The request is owned by the wrapped services until they finish and actix needs
        // that ownership to be unique, so keep a copy of its head instead of a handle.
        let snapshot = RequestSnapshot::capture(&req, &self.inner.config);

        let call = panic::catch_unwind(AssertUnwindSafe(|| self.service.call(req)));
        let (fut, payload) = match call {
            Ok(fut) => (Some(fut), None),
            Err(payload) => (None, Some(payload)),
        };

        RecoveryResponse {
            fut,
            panic: payload,
            snapshot,
            inner: Rc::clone(&self.inner),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct RecoveryResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: Option<S::Future>,
        panic: Option<Box<dyn Any + Send>>,
        snapshot: RequestSnapshot,
        inner: Rc<Inner>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for RecoveryResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<B>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if let Some(fut) = this.fut.as_mut().as_pin_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| fut.poll(cx))) {
                Ok(poll) => return poll,
                Err(payload) => {
                    *this.panic = Some(payload);
                    // the unwound future is never polled again; its drop may panic as well
                    let _ = panic::catch_unwind(AssertUnwindSafe(|| this.fut.set(None)));
                }
            }
        }

        let Some(payload) = this.panic.take() else {
            panic!("RecoveryResponse polled after completion");
        };

        Poll::Ready(Err(this.inner.recover(payload, this.snapshot)))
    }
}

impl Inner {
    fn recover(&self, payload: Box<dyn Any + Send>, snapshot: &RequestSnapshot) -> Error {
        let message = panic_message(payload.as_ref());

        if is_broken_connection(payload.as_ref()) {
            #[cfg(feature = "log")]
            log::debug!("client connection lost while serving {}", snapshot.path);

            if self.sink.enabled(Level::Error) {
                self.sink.log(
                    Level::Error,
                    &snapshot.path,
                    &[
                        Field::any("error", &message),
                        Field::bytes("request", snapshot.dump()),
                    ],
                );
            }
            return RecoveredPanic::BrokenConnection(message).into();
        }

        let stack = self.stack.then(take_backtrace);

        if self.sink.enabled(Level::Error) {
            let mut fields = Vec::with_capacity(4 + snapshot.custom_fields.len());
            fields.push(Field::string(
                "time",
                self.config.format_time(self.config.now()),
            ));
            fields.push(Field::any("error", &message));
            fields.push(Field::bytes("request", snapshot.dump()));
            fields.extend(snapshot.custom_fields.iter().cloned());
            if let Some(stack) = stack {
                fields.push(Field::string("stack", stack));
            }

            self.sink.log(Level::Error, RECOVERY_MESSAGE, &fields);
        }

        RecoveredPanic::Panic(message).into()
    }
}

/// What the recovery log needs to know about a request.
struct RequestSnapshot {
    path: String,
    method: Method,
    uri: Uri,
    version: Version,
    host: String,
    headers: HeaderMap,
    custom_fields: Vec<Field>,
}

impl RequestSnapshot {
    fn capture(req: &ServiceRequest, config: &Config) -> Self {
        let mut custom_fields = Vec::with_capacity(config.custom_fields().len());
        config.render_custom_fields(req.request(), &mut custom_fields);

        RequestSnapshot {
            path: req.path().to_string(),
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            host: req.connection_info().host().to_string(),
            headers: req.headers().clone(),
            custom_fields,
        }
    }

    /// Request line and headers in wire format. The body is never included.
    fn dump(&self) -> Vec<u8> {
        let target = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(
            format!("{} {} {}\r\n", self.method, target, http_version(self.version)).as_bytes(),
        );
        buf.extend_from_slice(format!("host: {}\r\n", self.host).as_bytes());

        let mut headers: Vec<_> = self
            .headers
            .iter()
            .filter(|(name, _)| **name != header::HOST)
            .collect();
        headers.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));

        for (name, value) in headers {
            buf.extend_from_slice(name.as_str().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Text of a panic payload as passed to `panic!` or `std::panic::panic_any`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(err) = payload.downcast_ref::<io::Error>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        err.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Whether a panic payload is an I/O error caused by the client dropping the connection.
///
/// Only `io::Error` payloads, directly or in the source chain of a boxed error, qualify.
pub fn is_broken_connection(payload: &(dyn Any + Send)) -> bool {
    if let Some(err) = payload.downcast_ref::<io::Error>() {
        return is_broken_io_error(err);
    }

    if let Some(err) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        let err: &(dyn StdError + 'static) = &**err;
        let mut source = Some(err);
        while let Some(err) = source {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                return is_broken_io_error(io_err);
            }
            source = err.source();
        }
    }

    false
}

/// Checks the error kind first and falls back to the error text for errors that lost it.
pub fn is_broken_io_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    ) || is_broken_connection_message(&err.to_string())
}

/// Case-insensitive match against "broken pipe" and "connection reset by peer".
pub fn is_broken_connection_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("broken pipe") || message.contains("connection reset by peer")
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let _ = PANIC_BACKTRACE.try_with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(Backtrace::force_capture());
                }
            });
            previous(info);
        }));
    });
}

/// Backtrace of the last panic on this thread, or of the caller if none was recorded.
fn take_backtrace() -> String {
    PANIC_BACKTRACE
        .try_with(|slot| slot.borrow_mut().take())
        .ok()
        .flatten()
        .unwrap_or_else(Backtrace::force_capture)
        .to_string()
}
