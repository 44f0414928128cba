use std::{borrow::Cow, fmt, time::Duration};

/// A single named value attached to a log record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    key: Cow<'static, str>,
    value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer. Example: status code 200
    Int(i64),
    /// String. Example: GET
    Str(String),
    /// Duration. Example: request latency
    Duration(Duration),
    /// Boolean flag.
    Bool(bool),
    /// Raw bytes, rendered lossily as UTF-8. Example: a dumped request head
    Bytes(Vec<u8>),
    /// Opaque value already rendered as text. Example: a panic payload
    Any(String),
}

impl Field {
    pub fn int(key: impl Into<Cow<'static, str>>, value: i64) -> Self {
        Field::new(key, Value::Int(value))
    }

    pub fn string(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Field::new(key, Value::Str(value.into()))
    }

    pub fn duration(key: impl Into<Cow<'static, str>>, value: Duration) -> Self {
        Field::new(key, Value::Duration(value))
    }

    pub fn bool(key: impl Into<Cow<'static, str>>, value: bool) -> Self {
        Field::new(key, Value::Bool(value))
    }

    pub fn bytes(key: impl Into<Cow<'static, str>>, value: impl Into<Vec<u8>>) -> Self {
        Field::new(key, Value::Bytes(value.into()))
    }

    pub fn any(key: impl Into<Cow<'static, str>>, value: impl fmt::Display) -> Self {
        Field::new(key, Value::Any(value.to_string()))
    }

    pub fn new(key: impl Into<Cow<'static, str>>, value: Value) -> Self {
        Field {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        self.key.as_ref()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Any(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(v) | Value::Any(v) => f.write_str(v),
            Value::Duration(v) => write!(f, "{:?}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}
