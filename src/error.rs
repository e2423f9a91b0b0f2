//! Error types for viewsync

use std::time::Duration;

use thiserror::Error;

use crate::gms::RoleKind;
use crate::types::Address;

/// Result type for membership operations
pub type GmsResult<T> = Result<T, GmsError>;

/// Main error type for membership operations
#[derive(Error, Debug)]
pub enum GmsError {
    /// An operation was invoked that the active role does not support,
    /// e.g. a join issued by a node that is already a member
    #[error("{operation} is not a valid operation for a {role}")]
    WrongRole {
        operation: &'static str,
        role: RoleKind,
    },

    /// A join was rejected by the coordinator
    #[error("join of {member} failed: {reason}")]
    JoinFailed { member: Address, reason: String },

    /// An operation did not complete in time
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { elapsed: Duration, what: &'static str },

    /// The transport refused or could not deliver a message
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GmsError {
    /// Returns true for errors signalling protocol misuse rather than a
    /// runtime failure
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(self, GmsError::WrongRole { .. })
    }
}
