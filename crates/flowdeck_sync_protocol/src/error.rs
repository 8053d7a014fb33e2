//! Error types for protocol validation.

use crate::entity::EntityKind;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while turning wire payloads into typed operations.
///
/// Every variant is a client error: a batch that fails validation is
/// rejected as a whole before any operation reaches the applier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Entity kind not known to this server.
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    /// A field failed a value constraint.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name as it appears on the wire.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The `data` object does not match the schema of its entity kind.
    #[error("malformed {kind} payload: {message}")]
    MalformedPayload {
        /// Entity kind the payload was decoded as.
        kind: EntityKind,
        /// Decoder message.
        message: String,
    },

    /// An operation in a batch failed validation.
    #[error("operation {index}: {source}")]
    Operation {
        /// Position of the operation in the submitted batch.
        index: usize,
        /// Underlying validation error.
        source: Box<ProtocolError>,
    },

    /// Batch is empty or exceeds the configured maximum.
    #[error("batch must contain between 1 and {max} operations, got {actual}")]
    BatchSize {
        /// Maximum accepted operations.
        max: usize,
        /// Operations submitted.
        actual: usize,
    },

    /// Feed cursor could not be interpreted.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wraps this error with the batch position of the offending operation.
    pub fn at_operation(self, index: usize) -> Self {
        Self::Operation {
            index,
            source: Box::new(self),
        }
    }

    /// Returns the batch position of the offending operation, if any.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            ProtocolError::Operation { index, .. } => Some(*index),
            _ => None,
        }
    }
}
