//! CSI error types.
//!
//! Every failure a CSI call can report is a [`CsiError`].  The variants line
//! up with the gRPC status codes the orchestrator understands, so a caller
//! can branch on [`CsiError::code`] without parsing messages.  Errors derive
//! [`Serialize`]/[`Deserialize`] so they can travel across the QUIC
//! transport layer unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The caller supplied a missing, empty, or malformed argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A conflicting create is already in flight for the same volume.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The volume is not in a state that allows the operation.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// A path required by the operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The host refused the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// The operation is not supported by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stable error code, numbered like gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidArgument = 3,
    NotFound = 5,
    PermissionDenied = 7,
    FailedPrecondition = 9,
    Aborted = 10,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::PermissionDenied => "PermissionDenied",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::Aborted => "Aborted",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
        };
        f.write_str(name)
    }
}

impl CsiError {
    /// The error kind, independent of the message.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Aborted(_) => ErrorCode::Aborted,
            Self::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::Internal(_) => ErrorCode::Internal,
            Self::Unimplemented(_) => ErrorCode::Unimplemented,
            Self::Transport(_) => ErrorCode::Unavailable,
        }
    }

    /// Create a [`CsiError::InvalidArgument`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn invalid_argument<E: fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Shorthand for operations this plugin deliberately does not provide.
    pub fn unimplemented(operation: &str) -> Self {
        Self::Unimplemented(format!("{operation} is not implemented"))
    }
}
