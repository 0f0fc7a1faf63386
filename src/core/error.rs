//! Error types and wire-protocol mapping.
//!
//! Every data-level condition is recoverable and returned to the
//! immediate caller; a command yields a value, a nil, or an error
//! token, never a dropped connection. Only failure to allocate core
//! bookkeeping is fatal to the process.

use thiserror::Error;

/// Common Strata error conditions.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Key or space absent. Rendered as a nil reply, not an error.
    #[error("not found")]
    NotFound,

    /// The key holds a value of a different kind than the operation
    /// expects. No mutation occurs.
    #[error("operation against a key holding the wrong kind of value")]
    TypeMismatch,

    /// A write was rejected because it would exceed the memory budget
    /// and the governor could not free enough space in time.
    #[error("insert rejected: memory budget exceeded")]
    OomAvoidedInsert,

    /// A routed partition's remote node was unreachable or timed out.
    /// Triggers local fallback; surfaced only if the fallback also
    /// misses.
    #[error("route unavailable: {message}")]
    RouteUnavailable { message: String },

    /// Drop attempted on a space that other spaces still depend on.
    #[error("space '{space}' has active dependents")]
    DependencyViolation { space: String },

    /// The space cannot be mutated in its current state (e.g. merge
    /// target equals source).
    #[error("space in use: {message}")]
    SpaceInUse { message: String },

    /// A received replication instruction could not be applied.
    /// Counted; the stream continues with the next instruction.
    #[error("replication instruction failed: {message}")]
    ReplicationInstructionFailed { message: String },

    /// Malformed argument (bad integer, bad pattern, bad space name).
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Snapshot or network I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StrataError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn route(message: impl Into<String>) -> Self {
        Self::RouteUnavailable {
            message: message.into(),
        }
    }

    pub fn repl(message: impl Into<String>) -> Self {
        Self::ReplicationInstructionFailed {
            message: message.into(),
        }
    }

    /// True when the condition should render as a nil reply rather
    /// than an error token.
    pub fn is_nil_reply(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Result type using StrataError.
pub type StrataResult<T> = Result<T, StrataError>;

/// Mapping from StrataError to RESP error prefixes.
pub struct RespErrorMapping;

impl RespErrorMapping {
    /// Error-class token placed before the message in an error reply.
    pub fn to_error_prefix(error: &StrataError) -> &'static str {
        match error {
            StrataError::TypeMismatch => "WRONGTYPE",
            StrataError::OomAvoidedInsert => "OOM",
            StrataError::RouteUnavailable { .. } => "ROUTE",
            StrataError::DependencyViolation { .. } => "DEPENDENCY",
            StrataError::SpaceInUse { .. } => "BUSY",
            _ => "ERR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_reply_classification() {
        assert!(StrataError::NotFound.is_nil_reply());
        assert!(!StrataError::TypeMismatch.is_nil_reply());
    }

    #[test]
    fn test_resp_prefixes() {
        assert_eq!(
            RespErrorMapping::to_error_prefix(&StrataError::TypeMismatch),
            "WRONGTYPE"
        );
        assert_eq!(
            RespErrorMapping::to_error_prefix(&StrataError::OomAvoidedInsert),
            "OOM"
        );
        assert_eq!(
            RespErrorMapping::to_error_prefix(&StrataError::invalid("x")),
            "ERR"
        );
    }
}
