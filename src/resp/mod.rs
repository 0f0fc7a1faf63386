//! RESP wire protocol support.
//!
//! Strata speaks the Redis serialization protocol (RESP2) so generic
//! key-value clients work unmodified: arrays of bulk strings in,
//! simple strings / bulk strings / integers / arrays / errors out.
//! Inline commands ("PING\r\n") are accepted for hand-driven sessions.

pub mod client;
pub mod codec;

use crate::core::error::{RespErrorMapping, StrataError};
use bytes::Bytes;

/// A RESP protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string (+OK\r\n)
    SimpleString(String),

    /// Error (-ERR message\r\n)
    Error(RespError),

    /// Integer (:1000\r\n)
    Integer(i64),

    /// Bulk string ($6\r\nfoobar\r\n)
    Bulk(Bytes),

    /// Array (*2\r\n...)
    Array(Vec<RespValue>),

    /// Null ($-1\r\n)
    Null,
}

impl RespValue {
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        Self::SimpleString("PONG".to_string())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        Self::SimpleString(s.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    pub fn bulk_string(s: impl AsRef<str>) -> Self {
        Self::Bulk(Bytes::from(s.as_ref().to_string()))
    }

    pub fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        Self::Array(items)
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self::Error(RespError::generic(message))
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(RespError::new(kind, message))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::SimpleString(s) => Some(s.as_bytes()),
            Self::Bulk(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::SimpleString(s) => s.parse().ok(),
            Self::Bulk(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
            _ => None,
        }
    }
}

impl From<&StrataError> for RespValue {
    fn from(error: &StrataError) -> Self {
        if error.is_nil_reply() {
            return Self::Null;
        }
        Self::Error(RespError::new(
            RespErrorMapping::to_error_prefix(error),
            error.to_string(),
        ))
    }
}

/// A RESP error token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespError {
    /// Error class (ERR, WRONGTYPE, OOM, ...).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl RespError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new("ERR", message)
    }

    pub fn syntax() -> Self {
        Self::new("ERR", "syntax error")
    }

    pub fn wrong_arity(command: &str) -> Self {
        Self::new(
            "ERR",
            format!("wrong number of arguments for '{}' command", command),
        )
    }

    pub fn unknown_command(command: &str) -> Self {
        Self::new("ERR", format!("unknown command '{}'", command))
    }
}

impl std::fmt::Display for RespError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.message)
    }
}

impl std::error::Error for RespError {}

/// A parsed client command: name token plus raw arguments.
#[derive(Debug, Clone)]
pub struct Command {
    /// Command token exactly as sent (case preserved so space and
    /// pipe prefixes survive).
    pub name: String,

    /// Arguments.
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Extract a command from a parsed RESP array.
    pub fn from_array(values: Vec<RespValue>) -> Result<Self, RespError> {
        if values.is_empty() {
            return Err(RespError::syntax());
        }

        let mut iter = values.into_iter();
        let name = match iter.next() {
            Some(RespValue::Bulk(b)) => {
                String::from_utf8(b.to_vec()).map_err(|_| RespError::syntax())?
            }
            Some(RespValue::SimpleString(s)) => s,
            _ => return Err(RespError::syntax()),
        };

        let args = iter
            .map(|v| match v {
                RespValue::Bulk(b) => Ok(b),
                RespValue::SimpleString(s) => Ok(Bytes::from(s)),
                RespValue::Integer(n) => Ok(Bytes::from(n.to_string())),
                _ => Err(RespError::syntax()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { name, args })
    }

    pub fn arg(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn arg_int(&self, index: usize) -> Option<i64> {
        self.arg_str(index).and_then(|s| s.parse().ok())
    }

    pub fn arg_float(&self, index: usize) -> Option<f64> {
        self.arg_str(index).and_then(|s| s.parse().ok())
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }
}
