//! Error types and result types for data-access operations.
//!
//! Every fallible operation in this crate returns [`DocSetResult<T>`]. The variants of
//! [`DocSetError`] are grouped by [`ErrorKind`] so callers can decide how to react
//! without matching every variant.

use std::time::Duration;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Broad classification of a [`DocSetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised before any network call: missing id, required field, failed field rule.
    Validation,
    /// Raised while compiling a predicate.
    Compilation,
    /// The store rejected a query.
    Query,
    /// The commit barrier did not clear in time.
    CommitTimeout,
    /// The batch commit failed or could not be attempted.
    Write,
    /// Anything else (serialization, setup, backend plumbing).
    Other,
}

/// Represents all possible errors raised by the data-access layer.
#[derive(Error, Debug)]
pub enum DocSetError {
    /// The entity has no identifier. The argument is the collection name.
    #[error("Entity in collection {0} doesn't have a unique identifier")]
    MissingId(String),
    /// A field rule or value object invariant failed.
    #[error("Invalid entity state for field {field}: {reason}")]
    InvalidEntityState {
        /// Public name of the offending field.
        field: String,
        /// Message produced by the failing rule.
        reason: String,
    },
    /// A predicate was compiled without any term.
    #[error("No expression was provided")]
    EmptyExpression,
    /// A predicate was compiled (or extended) while a combinator was pending.
    #[error("Predicate builder is in an invalid state")]
    InvalidExpressionState,
    /// A typed accessor did not reduce to exactly one field segment.
    #[error("Unable to extract field out of accessor: {0}")]
    CannotExtractField(String),
    /// The store rejected a filter/order/cursor combination.
    #[error("Query error: {0}")]
    Query(String),
    /// Outstanding operations did not finish before the commit deadline.
    #[error("Unable to save changes, operations still outstanding after {0:?}")]
    CommitTimeout(Duration),
    /// The atomic batch commit failed.
    #[error("Write error: {0}")]
    Write(String),
    /// The pending batch exceeds the store's batch ceiling.
    #[error("Batch of {size} writes exceeds the limit of {limit}")]
    BatchTooLarge {
        /// Number of staged writes.
        size: usize,
        /// Ceiling enforced by the store.
        limit: usize,
    },
    /// No document matched where one was required.
    #[error("Unable to find document in collection {0}")]
    NotFound(String),
    /// The entity type was never registered with the context.
    #[error("Entity type not registered: {0}")]
    EntityNotRegistered(String),
    /// A file upload did not complete.
    #[error("Unable to save file: {0}")]
    Upload(String),
    /// Serialization/deserialization error when converting between entity and document.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during context construction.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocSetError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocSetError::MissingId(_) | DocSetError::InvalidEntityState { .. } => ErrorKind::Validation,
            DocSetError::EmptyExpression
            | DocSetError::InvalidExpressionState
            | DocSetError::CannotExtractField(_) => ErrorKind::Compilation,
            DocSetError::Query(_) => ErrorKind::Query,
            DocSetError::CommitTimeout(_) => ErrorKind::CommitTimeout,
            DocSetError::Write(_) | DocSetError::BatchTooLarge { .. } => ErrorKind::Write,
            _ => ErrorKind::Other,
        }
    }

    pub(crate) fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DocSetError::InvalidEntityState {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for data-access operations.
pub type DocSetResult<T> = Result<T, DocSetError>;

impl From<BsonError> for DocSetError {
    fn from(err: BsonError) -> Self {
        DocSetError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocSetError {
    fn from(err: SerdeJsonError) -> Self {
        DocSetError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(DocSetError::MissingId("User".into()).kind(), ErrorKind::Validation);
        assert_eq!(DocSetError::EmptyExpression.kind(), ErrorKind::Compilation);
        assert_eq!(DocSetError::Query("bad".into()).kind(), ErrorKind::Query);
        assert_eq!(
            DocSetError::CommitTimeout(Duration::from_millis(10)).kind(),
            ErrorKind::CommitTimeout
        );
        assert_eq!(
            DocSetError::BatchTooLarge { size: 2, limit: 1 }.kind(),
            ErrorKind::Write
        );
        assert_eq!(DocSetError::Backend("x".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn invalid_field_names_the_field() {
        let err = DocSetError::invalid_field("email", "must contain @");
        assert_eq!(err.to_string(), "Invalid entity state for field email: must contain @");
    }
}
