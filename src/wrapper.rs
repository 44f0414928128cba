use std::fmt;

use crate::field::Field;

/// Severity of a record handed to a [`LogSink`].
///
/// Ordered like the `log` crate: `Error` is the most severe and compares as the smallest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Error = 1,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        })
    }
}

/// Destination for the structured records produced by the middlewares.
///
/// Implementations must be safe to call from every worker at once; the middlewares never
/// synchronize around a sink.
pub trait LogSink: Send + Sync {
    /// Whether a record at `level` would be emitted. Used to skip building fields.
    fn enabled(&self, level: Level) -> bool;

    /// Emit one record.
    fn log(&self, level: Level, message: &str, fields: &[Field]);
}

impl<T: LogSink + ?Sized> LogSink for std::sync::Arc<T> {
    fn enabled(&self, level: Level) -> bool {
        (**self).enabled(level)
    }

    fn log(&self, level: Level, message: &str, fields: &[Field]) {
        (**self).log(level, message, fields)
    }
}

#[cfg(feature = "log")]
pub use self::rust_log::RustLog;

#[cfg(feature = "log")]
pub mod rust_log {
    use std::borrow::Cow;

    use log::kv::Value as KvValue;

    use super::{Level, LogSink};
    use crate::field::{Field, Value};

    pub(crate) const DEFAULT_TARGET: &str = "actix_web_middleware_accesslog::logger";

    impl From<Level> for log::Level {
        fn from(level: Level) -> Self {
            match level {
                Level::Error => log::Level::Error,
                Level::Warn => log::Level::Warn,
                Level::Info => log::Level::Info,
                Level::Debug => log::Level::Debug,
                Level::Trace => log::Level::Trace,
            }
        }
    }

    /// [`LogSink`] backed by the `log` crate facade.
    ///
    /// Fields are passed as `log::kv` key-values, so any structured `log` backend
    /// (for example `structured-logger`) renders them as separate keys.
    #[derive(Debug, Clone)]
    pub struct RustLog {
        target: Cow<'static, str>,
    }

    impl RustLog {
        pub fn new() -> Self {
            RustLog {
                target: Cow::Borrowed(DEFAULT_TARGET),
            }
        }

        /// Sets the logging target to `target`.
        ///
        /// By default, the log target is `actix_web_middleware_accesslog::logger`.
        ///
        /// # Examples
        /// Using `.target("http_log")` would have this effect on request logs:
        /// ```diff
        /// - [2015-10-21T07:28:00Z INFO  actix_web_middleware_accesslog::logger] /index.html
        /// + [2015-10-21T07:28:00Z INFO  http_log] /index.html
        ///                               ^^^^^^^^
        /// ```
        pub fn target(mut self, target: impl Into<Cow<'static, str>>) -> Self {
            self.target = target.into();
            self
        }

        pub fn log_target(&self) -> &str {
            self.target.as_ref()
        }
    }

    impl Default for RustLog {
        fn default() -> Self {
            RustLog::new()
        }
    }

    fn kv_value(value: &Value) -> KvValue<'_> {
        match value {
            Value::Int(v) => KvValue::from(*v),
            Value::Str(v) => KvValue::from(v.as_str()),
            Value::Bool(v) => KvValue::from(*v),
            Value::Duration(v) => KvValue::from_debug(v),
            Value::Bytes(_) | Value::Any(_) => KvValue::from_display(value),
        }
    }

    impl LogSink for RustLog {
        fn enabled(&self, level: Level) -> bool {
            let level = log::Level::from(level);
            level <= log::max_level()
                && log::logger().enabled(
                    &log::Metadata::builder()
                        .level(level)
                        .target(self.target.as_ref())
                        .build(),
                )
        }

        fn log(&self, level: Level, message: &str, fields: &[Field]) {
            let kvs: Vec<(&str, KvValue)> = fields
                .iter()
                .map(|field| (field.key(), kv_value(field.value())))
                .collect();
            let kvs = kvs.as_slice();

            log::logger().log(
                &log::Record::builder()
                    .args(format_args!("{}", message))
                    .level(level.into())
                    .target(self.target.as_ref())
                    .module_path_static(Some(module_path!()))
                    .key_values(&kvs)
                    .build(),
            );
        }
    }
}
