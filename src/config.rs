use std::{collections::HashSet, fmt, sync::Arc};

use actix_web::HttpRequest;
use actix_web::dev::ServiceRequest;
use regex::Regex;
use time::{
    OffsetDateTime,
    format_description::{
        self, OwnedFormatItem,
        well_known::{Rfc2822, Rfc3339},
    },
};

use crate::error::ConfigError;
use crate::field::Field;
use crate::wrapper::Level;

/// Decides whether a request should bypass the access log.
pub type Skipper = Arc<dyn Fn(&ServiceRequest) -> bool + Send + Sync>;
/// Produces one extra field for every record.
pub type CustomField = Arc<dyn Fn(&HttpRequest) -> Field + Send + Sync>;
/// Produces a list of extra fields for every access record, e.g. trace identifiers.
pub type ContextFn = Arc<dyn Fn(&HttpRequest) -> Vec<Field> + Send + Sync>;

/// How record timestamps are rendered.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TimeFormat {
    /// RFC 3339 with as many fractional digits as needed. Example: 2019-05-29T18:51:00.123456789Z
    #[default]
    Rfc3339,
    /// RFC 2822. Example: Wed, 29 May 2019 18:51:00 +0000
    Rfc2822,
    /// A `time` format description. Example: `[year]-[month]-[day] [hour]:[minute]`
    Custom(OwnedFormatItem),
}

impl TimeFormat {
    /// Parse a `time` format description.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        Ok(TimeFormat::Custom(format_description::parse_owned::<2>(
            pattern,
        )?))
    }

    /// Render `at`. Formatting failures yield an empty string.
    pub fn format(&self, at: OffsetDateTime) -> String {
        let res = match self {
            TimeFormat::Rfc3339 => at.format(&Rfc3339),
            TimeFormat::Rfc2822 => at.format(&Rfc2822),
            TimeFormat::Custom(items) => at.format(items),
        };
        res.unwrap_or_default()
    }
}

/// Shared settings of the [`AccessLogger`](crate::AccessLogger) and
/// [`Recovery`](crate::Recovery) middlewares.
///
/// Built once at startup and never modified afterwards; cloning is cheap, so a single value
/// can be handed to every worker.
///
/// # Examples
/// ```rust
/// use actix_web_middleware_accesslog::{Config, Field, Level};
///
/// let config = Config::builder()
///     .utc(true)
///     .skip_path("/health")
///     .skip_path_regex(r"^/assets/.*")
///     .default_level(Level::Debug)
///     .custom_field(|req| Field::string("host", req.connection_info().host()))
///     .build()
///     .unwrap();
/// assert!(config.utc());
/// ```
#[derive(Clone)]
pub struct Config(Arc<Inner>);

struct Inner {
    time_format: TimeFormat,
    utc: bool,
    skip_paths: HashSet<String>,
    skip_path_regexps: Vec<Regex>,
    skipper: Option<Skipper>,
    default_level: Level,
    log_errors_once: bool,
    custom_fields: Vec<CustomField>,
    context_fn: Option<ContextFn>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn time_format(&self) -> &TimeFormat {
        &self.0.time_format
    }

    pub fn utc(&self) -> bool {
        self.0.utc
    }

    pub fn default_level(&self) -> Level {
        self.0.default_level
    }

    pub fn log_errors_once(&self) -> bool {
        self.0.log_errors_once
    }

    pub fn custom_fields(&self) -> &[CustomField] {
        &self.0.custom_fields
    }

    pub fn context_fn(&self) -> Option<&ContextFn> {
        self.0.context_fn.as_ref()
    }

    /// Whether the access log should ignore this request.
    pub fn is_skipped(&self, req: &ServiceRequest) -> bool {
        if let Some(skipper) = &self.0.skipper {
            if skipper(req) {
                return true;
            }
        }
        let path = req.path();
        self.0.skip_paths.contains(path)
            || self
                .0
                .skip_path_regexps
                .iter()
                .any(|r| r.is_match(path))
    }

    /// Current wall clock time, in UTC or the local offset as configured.
    ///
    /// Falls back to UTC when the local offset cannot be determined.
    pub fn now(&self) -> OffsetDateTime {
        if self.0.utc {
            OffsetDateTime::now_utc()
        } else {
            OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
        }
    }

    pub(crate) fn format_time(&self, at: OffsetDateTime) -> String {
        self.0.time_format.format(at)
    }

    pub(crate) fn render_custom_fields(&self, req: &HttpRequest, fields: &mut Vec<Field>) {
        fields.extend(self.0.custom_fields.iter().map(|f| f(req)));
    }
}

impl Default for Config {
    fn default() -> Self {
        Config(Arc::new(Inner {
            time_format: TimeFormat::Rfc3339,
            utc: false,
            skip_paths: HashSet::new(),
            skip_path_regexps: Vec::new(),
            skipper: None,
            default_level: Level::Info,
            log_errors_once: false,
            custom_fields: Vec::new(),
            context_fn: None,
        }))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("time_format", &self.0.time_format)
            .field("utc", &self.0.utc)
            .field("skip_paths", &self.0.skip_paths)
            .field("skip_path_regexps", &self.0.skip_path_regexps)
            .field("skipper", &self.0.skipper.is_some())
            .field("default_level", &self.0.default_level)
            .field("log_errors_once", &self.0.log_errors_once)
            .field("custom_fields", &self.0.custom_fields.len())
            .field("context_fn", &self.0.context_fn.is_some())
            .finish()
    }
}

/// Builder for [`Config`]. Patterns are validated by [`build`](ConfigBuilder::build).
pub struct ConfigBuilder {
    time_format: TimeFormat,
    time_pattern: Option<String>,
    utc: bool,
    skip_paths: HashSet<String>,
    skip_path_patterns: Vec<String>,
    skip_path_regexps: Vec<Regex>,
    skipper: Option<Skipper>,
    default_level: Level,
    log_errors_once: bool,
    custom_fields: Vec<CustomField>,
    context_fn: Option<ContextFn>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder {
            time_format: TimeFormat::Rfc3339,
            time_pattern: None,
            utc: false,
            skip_paths: HashSet::new(),
            skip_path_patterns: Vec::new(),
            skip_path_regexps: Vec::new(),
            skipper: None,
            default_level: Level::Info,
            log_errors_once: false,
            custom_fields: Vec::new(),
            context_fn: None,
        }
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let time_format = match self.time_pattern {
            Some(pattern) => TimeFormat::parse(&pattern)?,
            None => self.time_format,
        };

        let mut skip_path_regexps = self.skip_path_regexps;
        for pattern in &self.skip_path_patterns {
            skip_path_regexps.push(Regex::new(pattern)?);
        }

        Ok(Config(Arc::new(Inner {
            time_format,
            utc: self.utc,
            skip_paths: self.skip_paths,
            skip_path_regexps,
            skipper: self.skipper,
            default_level: self.default_level,
            log_errors_once: self.log_errors_once,
            custom_fields: self.custom_fields,
            context_fn: self.context_fn,
        })))
    }

    pub fn time_format(mut self, format: TimeFormat) -> Self {
        self.time_format = format;
        self.time_pattern = None;
        self
    }

    /// Use a `time` format description such as `[hour]:[minute]:[second]`.
    pub fn time_pattern<T: Into<String>>(mut self, pattern: T) -> Self {
        self.time_pattern = Some(pattern.into());
        self
    }

    /// Render timestamps in UTC instead of the local offset.
    pub fn utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Ignore and do not log access info for specified path.
    pub fn skip_path<T: Into<String>>(mut self, path: T) -> Self {
        self.skip_paths.insert(path.into());
        self
    }

    /// Ignore and do not log access info for paths that match regex.
    pub fn skip_path_regex<T: Into<String>>(mut self, pattern: T) -> Self {
        self.skip_path_patterns.push(pattern.into());
        self
    }

    /// Same as [`skip_path_regex`](ConfigBuilder::skip_path_regex) for an already compiled regex.
    pub fn skip_path_regexp(mut self, regex: Regex) -> Self {
        self.skip_path_regexps.push(regex);
        self
    }

    pub fn skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&ServiceRequest) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Arc::new(skipper));
        self
    }

    /// Level of access records for requests without errors.
    pub fn default_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Log all errors of a request as a single record instead of one record per error.
    pub fn log_errors_once(mut self, once: bool) -> Self {
        self.log_errors_once = once;
        self
    }

    pub fn custom_field<F>(mut self, field: F) -> Self
    where
        F: Fn(&HttpRequest) -> Field + Send + Sync + 'static,
    {
        self.custom_fields.push(Arc::new(field));
        self
    }

    pub fn context_fn<F>(mut self, context_fn: F) -> Self
    where
        F: Fn(&HttpRequest) -> Vec<Field> + Send + Sync + 'static,
    {
        self.context_fn = Some(Arc::new(context_fn));
        self
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder::new()
    }
}
