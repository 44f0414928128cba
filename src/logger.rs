use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use futures_core::ready;
use pin_project_lite::pin_project;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header;
use actix_web::{Error, Result};

use crate::config::Config;
use crate::field::Field;
use crate::request_errors::{RequestErrors, RequestErrorsExt};
use crate::wrapper::{Level, LogSink};

/// Middleware writing one structured record per request.
///
/// Requests without errors are logged at the configured default level with the request path
/// as message. Requests that registered errors (see [`RequestErrorsExt`]) or whose handler
/// failed are logged at error level instead.
///
/// Panics are not caught here; wrap [`Recovery`](crate::Recovery) outside of this middleware.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_accesslog::AccessLogger;
///
/// let app = App::new()
///     .wrap(AccessLogger::default());
/// ```
pub struct AccessLogger(Rc<Inner>);

struct Inner {
    config: Config,
    sink: Arc<dyn LogSink>,
}

impl AccessLogger {
    /// Create `AccessLogger` middleware writing to `sink` with the default [`Config`].
    pub fn new<L: LogSink + 'static>(sink: L) -> AccessLogger {
        AccessLogger::with_config(sink, Config::default())
    }

    /// Create `AccessLogger` middleware writing to `sink` with the specified `config`.
    pub fn with_config<L: LogSink + 'static>(sink: L, config: Config) -> AccessLogger {
        AccessLogger(Rc::new(Inner {
            config,
            sink: Arc::new(sink),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }
}

#[cfg(feature = "log")]
impl Default for AccessLogger {
    /// Create `AccessLogger` middleware writing to the `log` crate facade with target
    /// `actix_web_middleware_accesslog::logger` and the default [`Config`].
    fn default() -> Self {
        AccessLogger::new(crate::wrapper::RustLog::default())
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AccessLoggerMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AccessLoggerMiddlewareService {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

/// Access logger middleware service.
pub struct AccessLoggerMiddlewareService<S> {
    inner: Rc<Inner>,
    service: S,
}

impl<S, B> Service<ServiceRequest> for AccessLoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = AccessLoggerResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // downstream handlers may rewrite path and query, log what the client sent
        let observation = if self.inner.config.is_skipped(&req) {
            None
        } else {
            Some(Observation {
                start: Instant::now(),
                path: req.path().to_string(),
                query: req.query_string().to_string(),
            })
        };

        AccessLoggerResponse {
            fut: self.service.call(req),
            observation,
            inner: Rc::clone(&self.inner),
            _phantom: PhantomData,
        }
    }
}

struct Observation {
    start: Instant,
    path: String,
    query: String,
}

pin_project! {
    pub struct AccessLoggerResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        observation: Option<Observation>,
        inner: Rc<Inner>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for AccessLoggerResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<B>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = ready!(this.fut.poll(cx));

        if let Some(observation) = this.observation.take() {
            this.inner.emit(observation, &res);
        }

        Poll::Ready(res)
    }
}

impl Inner {
    fn emit<B>(&self, observation: Observation, res: &Result<ServiceResponse<B>, Error>) {
        let latency = observation.start.elapsed();
        let end = self.config.now();

        let res = match res {
            Ok(res) => res,
            Err(err) => {
                // the request went down with the failed service, only its error is left
                let mut errors = RequestErrors::default();
                errors.push(err.to_string());
                self.log_errors(&errors);
                return;
            }
        };

        let mut errors = res.request().errors();
        if let Some(err) = res.response().error() {
            errors.push(err.to_string());
        }
        if !errors.is_empty() {
            self.log_errors(&errors);
            return;
        }

        let level = self.config.default_level();
        if !self.sink.enabled(level) {
            return;
        }

        let req = res.request();
        let ip = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or_default()
            .to_string();
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();

        let mut fields = Vec::with_capacity(8 + self.config.custom_fields().len());
        fields.push(Field::int("status", i64::from(res.status().as_u16())));
        fields.push(Field::string("method", req.method().as_str()));
        fields.push(Field::string("path", observation.path.as_str()));
        fields.push(Field::string("query", observation.query));
        fields.push(Field::string("ip", ip));
        fields.push(Field::string("user-agent", user_agent));
        fields.push(Field::string("time", self.config.format_time(end)));
        fields.push(Field::duration("latency", latency));

        self.config.render_custom_fields(req, &mut fields);
        if let Some(context_fn) = self.config.context_fn() {
            fields.extend(context_fn(req));
        }

        self.sink.log(level, &observation.path, &fields);
    }

    fn log_errors(&self, errors: &RequestErrors) {
        if self.config.log_errors_once() {
            self.sink.log(Level::Error, &errors.to_string(), &[]);
        } else {
            for err in errors.iter() {
                self.sink.log(Level::Error, err, &[]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Value;
    use crate::wrapper::observer::Observer;
    use actix_web::{
        App, HttpRequest, HttpResponse,
        http::{StatusCode, Uri},
        test::{TestRequest, call_service, init_service},
        web,
    };
    use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

    const TEST_PATH: &str = "/test";

    async fn no_content() -> HttpResponse {
        HttpResponse::NoContent().finish()
    }

    #[actix_web::test]
    async fn test_logs_one_record_per_request() {
        let observer = Observer::new(Level::Info);
        let config = Config::builder().utc(true).build().unwrap();

        let app = init_service(
            App::new()
                .wrap(AccessLogger::with_config(observer.clone(), config))
                .route(TEST_PATH, web::get().to(no_content)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/test?search=actix")
            .insert_header(("user-agent", "test-agent"))
            .insert_header(("x-forwarded-for", "203.0.113.7"))
            .to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let entries = observer.all();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.level, Level::Info);
        assert_eq!(entry.message, TEST_PATH);
        assert_eq!(
            entry.keys(),
            vec![
                "status",
                "method",
                "path",
                "query",
                "ip",
                "user-agent",
                "time",
                "latency"
            ]
        );
        assert_eq!(entry.get("status"), Some(&Value::Int(204)));
        assert_eq!(entry.get("method").and_then(Value::as_str), Some("GET"));
        assert_eq!(entry.get("path").and_then(Value::as_str), Some(TEST_PATH));
        assert_eq!(
            entry.get("query").and_then(Value::as_str),
            Some("search=actix")
        );
        assert_eq!(entry.get("ip").and_then(Value::as_str), Some("203.0.113.7"));
        assert_eq!(
            entry.get("user-agent").and_then(Value::as_str),
            Some("test-agent")
        );
        assert!(matches!(entry.get("latency"), Some(Value::Duration(_))));

        let time = entry.get("time").and_then(Value::as_str).unwrap();
        let time = OffsetDateTime::parse(time, &Rfc3339).unwrap();
        assert_eq!(time.offset(), UtcOffset::UTC);
    }

    #[actix_web::test]
    async fn test_missing_headers_log_empty_strings() {
        let observer = Observer::new(Level::Info);

        let app = init_service(
            App::new()
                .wrap(AccessLogger::new(observer.clone()))
                .route(TEST_PATH, web::get().to(no_content)),
        )
        .await;

        call_service(&app, TestRequest::get().uri(TEST_PATH).to_request()).await;

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].get("query").and_then(Value::as_str), Some(""));
        assert_eq!(
            entries[0].get("user-agent").and_then(Value::as_str),
            Some("")
        );
        let time = entries[0].get("time").and_then(Value::as_str).unwrap();
        let time = OffsetDateTime::parse(time, &Rfc3339).unwrap();
        let local = [
            UtcOffset::current_local_offset().ok(),
            Some(UtcOffset::UTC),
        ];
        assert!(local.contains(&Some(time.offset())));
    }

    #[actix_web::test]
    async fn test_non_ascii_header_is_logged() {
        let observer = Observer::new(Level::Info);

        let app = init_service(
            App::new()
                .wrap(AccessLogger::new(observer.clone()))
                .route(TEST_PATH, web::get().to(no_content)),
        )
        .await;

        let req = TestRequest::get()
            .uri(TEST_PATH)
            .insert_header((
                header::USER_AGENT,
                header::HeaderValue::from_bytes(b"agent \xe9").unwrap(),
            ))
            .to_request();
        call_service(&app, req).await;

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].get("user-agent").and_then(Value::as_str),
            Some("agent \u{fffd}")
        );
    }

    #[actix_web::test]
    async fn test_skip_paths() {
        let observer = Observer::new(Level::Info);
        let config = Config::builder()
            .utc(true)
            .skip_path("/no_log")
            .default_level(Level::Warn)
            .build()
            .unwrap();

        let app = init_service(
            App::new()
                .wrap(AccessLogger::with_config(observer.clone(), config))
                .route(TEST_PATH, web::get().to(no_content))
                .route("/no_log", web::get().to(no_content)),
        )
        .await;

        call_service(&app, TestRequest::get().uri(TEST_PATH).to_request()).await;
        let res =
            call_service(&app, TestRequest::get().uri("/no_log").to_request()).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].get("path").and_then(Value::as_str),
            Some(TEST_PATH)
        );
        assert_eq!(entries[0].level, Level::Warn);
    }

    #[actix_web::test]
    async fn test_skipper() {
        let observer = Observer::new(Level::Info);
        let config = Config::builder()
            .skipper(|req| req.path() == "/no_log")
            .build()
            .unwrap();

        let app = init_service(
            App::new()
                .wrap(AccessLogger::with_config(observer.clone(), config))
                .route(TEST_PATH, web::get().to(no_content))
                .route("/no_log", web::get().to(no_content)),
        )
        .await;

        call_service(&app, TestRequest::get().uri(TEST_PATH).to_request()).await;
        let res =
            call_service(&app, TestRequest::get().uri("/no_log").to_request()).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, TEST_PATH);
    }

    #[actix_web::test]
    async fn test_skip_path_regexps() {
        let observer = Observer::new(Level::Info);
        let config = Config::builder()
            .skip_path_regex(r"^/no_\s*")
            .build()
            .unwrap();

        let app = init_service(
            App::new()
                .wrap(AccessLogger::with_config(observer.clone(), config))
                .route(TEST_PATH, web::get().to(no_content))
                .route("/no_log", web::get().to(no_content)),
        )
        .await;

        call_service(&app, TestRequest::get().uri(TEST_PATH).to_request()).await;
        let res =
            call_service(&app, TestRequest::get().uri("/no_log").to_request()).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, TEST_PATH);
    }

    #[actix_web::test]
    async fn test_disabled_level_emits_nothing() {
        let observer = Observer::new(Level::Info);
        let config = Config::builder()
            .default_level(Level::Debug)
            .custom_field(|_| panic!("fields must not be built for disabled levels"))
            .build()
            .unwrap();

        let app = init_service(
            App::new()
                .wrap(AccessLogger::with_config(observer.clone(), config))
                .route(TEST_PATH, web::get().to(no_content)),
        )
        .await;

        call_service(&app, TestRequest::get().uri(TEST_PATH).to_request()).await;
        assert!(observer.all().is_empty());
    }

    async fn two_errors(req: HttpRequest) -> HttpResponse {
        req.add_error("error1");
        req.add_error("error2");
        HttpResponse::InternalServerError().finish()
    }

    #[actix_web::test]
    async fn test_log_errors_once() {
        let observer = Observer::new(Level::Info);
        let config = Config::builder().log_errors_once(true).build().unwrap();

        let app = init_service(
            App::new()
                .wrap(AccessLogger::with_config(observer.clone(), config))
                .route("/error", web::get().to(two_errors)),
        )
        .await;

        let res =
            call_service(&app, TestRequest::get().uri("/error").to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, Level::Error);
        assert_eq!(entries[0].message, "Error #01: error1\nError #02: error2\n");
        assert!(entries[0].fields.is_empty());
    }

    #[actix_web::test]
    async fn test_log_each_error() {
        let observer = Observer::new(Level::Info);

        let app = init_service(
            App::new()
                .wrap(AccessLogger::new(observer.clone()))
                .route("/error", web::get().to(two_errors)),
        )
        .await;

        call_service(&app, TestRequest::get().uri("/error").to_request()).await;

        let entries = observer.all();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "error1");
        assert_eq!(entries[1].message, "error2");
        assert!(entries.iter().all(|e| e.level == Level::Error));
        assert!(entries.iter().all(|e| e.fields.is_empty()));
    }

    #[actix_web::test]
    async fn test_handler_error_is_logged() {
        let observer = Observer::new(Level::Info);

        let app = init_service(
            App::new()
                .wrap(AccessLogger::new(observer.clone()))
                .route(
                    "/fail",
                    web::get().to(|| async {
                        Err::<HttpResponse, Error>(actix_web::error::ErrorBadRequest("bad input"))
                    }),
                ),
        )
        .await;

        let req = TestRequest::get().uri("/fail").to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, Level::Error);
        assert_eq!(entries[0].message, "bad input");
    }

    #[actix_web::test]
    async fn test_custom_fields_follow_fixed_fields() {
        let observer = Observer::new(Level::Info);
        let config = Config::builder()
            .custom_field(|_| Field::string("first", "1"))
            .custom_field(|req| Field::bool("has_query", !req.query_string().is_empty()))
            .context_fn(|_| {
                vec![
                    Field::string("trace_id", "4bf92f3577b34da6"),
                    Field::string("span_id", "00f067aa0ba902b7"),
                ]
            })
            .build()
            .unwrap();

        let app = init_service(
            App::new()
                .wrap(AccessLogger::with_config(observer.clone(), config))
                .route(TEST_PATH, web::get().to(no_content)),
        )
        .await;

        call_service(&app, TestRequest::get().uri(TEST_PATH).to_request()).await;

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            &entries[0].keys()[8..],
            &["first", "has_query", "trace_id", "span_id"]
        );
        assert_eq!(entries[0].get("has_query"), Some(&Value::Bool(false)));
    }

    #[actix_web::test]
    async fn test_logs_path_before_rewrite() {
        let observer = Observer::new(Level::Info);

        let app = init_service(
            App::new()
                .wrap_fn(|mut req, srv| {
                    req.head_mut().uri = Uri::from_static("/rewritten?changed=1");
                    srv.call(req)
                })
                .wrap(AccessLogger::new(observer.clone()))
                .route(
                    "/original",
                    web::get().to(|req: HttpRequest| async move {
                        HttpResponse::Ok().body(req.path().to_string())
                    }),
                ),
        )
        .await;

        let req = TestRequest::get().uri("/original?q=1").to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.request().path(), "/rewritten");

        let entries = observer.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "/original");
        assert_eq!(
            entries[0].get("path").and_then(Value::as_str),
            Some("/original")
        );
        assert_eq!(entries[0].get("query").and_then(Value::as_str), Some("q=1"));
    }

    #[test]
    fn test_access_logger_config() {
        let config = Config::builder().skip_path("/health").build().unwrap();
        let logger = AccessLogger::with_config(Observer::new(Level::Info), config);
        assert!(!logger.config().log_errors_once());
    }
}
