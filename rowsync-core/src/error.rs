//! Error types shared by the synchronization core.
//!
//! | Error           | Raised by                 | Effect on the batch            |
//! |-----------------|---------------------------|--------------------------------|
//! | `ModelError`    | data source mutations     | reported, item counted failed  |
//! | `ProtocolError` | inbound envelope checks   | whole message dropped          |
//! | `SyncError`     | adapter entry points      | returned to the caller         |

use thiserror::Error;

use crate::model::FieldRef;

/// A data source refused a mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("row {row} out of range (row count {row_count})")]
    RowOutOfRange { row: usize, row_count: usize },

    #[error("unknown field {0:?}")]
    UnknownField(FieldRef),

    #[error("mutation rejected: {0}")]
    Rejected(String),
}

/// An inbound message was structurally invalid and has been dropped.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("no operation in message")]
    MissingOperation,

    #[error("operation is not a string")]
    OperationNotString,

    #[error("no items in message")]
    MissingItems,

    #[error("items of `{operation}` must be {expected}")]
    ItemsShape {
        operation: &'static str,
        expected: &'static str,
    },
}

/// Errors surfaced by the sync adapter.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("adapter is not bound to a data source")]
    NotBound,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to encode outbound message: {0}")]
    Encode(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_display() {
        let err = ModelError::RowOutOfRange { row: 7, row_count: 3 };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_protocol_error_wraps_into_sync_error() {
        let err: SyncError = ProtocolError::MissingItems.into();
        assert!(matches!(err, SyncError::Protocol(ProtocolError::MissingItems)));
        assert_eq!(err.to_string(), "no items in message");
    }

    #[test]
    fn test_items_shape_message() {
        let err = ProtocolError::ItemsShape {
            operation: "remove",
            expected: "an array",
        };
        assert_eq!(err.to_string(), "items of `remove` must be an array");
    }
}
