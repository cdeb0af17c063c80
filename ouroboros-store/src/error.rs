//! Error types for store operations
//!
//! Two families live here. [`StoreError`] is delivered per call on a
//! [`StoreHandle`](crate::supplier::StoreHandle) and is always recoverable by
//! the caller. [`BootstrapError`] is returned while opening the backing pools
//! and means the process cannot serve without its primary storage.

use std::time::Duration;
use thiserror::Error;

/// Per-call error delivered through the result envelope
#[derive(Error, Debug)]
pub enum StoreError {
    /// Caller-supplied arguments violate a size or shape constraint
    #[error("Validation error on {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A connection could not be acquired or was lost mid-operation
    #[error("Connection error: {0}")]
    Connection(String),

    /// The call's deadline elapsed before the operation finished
    #[error("Operation timed out after {}ms: {context}", elapsed.as_millis())]
    Timeout { elapsed: Duration, context: String },

    /// The backing engine rejected the operation
    #[error("Backing store error: {0}")]
    Backing(#[from] sqlx::Error),

    /// The requested entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Serialization of an entity field failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No supplier in the chain answered the operation
    #[error("No supplier handled operation {operation}")]
    Unhandled { operation: &'static str },

    /// A supplier answered with a response of the wrong shape
    #[error("Expected a {expected} response, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    /// The store was closed before the call was dispatched
    #[error("Store is closed")]
    Closed,

    /// The worker dropped the delivery handle without resolving it
    #[error("Worker terminated before delivering a result")]
    WorkerLost,
}

impl StoreError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether the error came from connectivity rather than the engine itself.
    ///
    /// Read paths use this to decide whether a replica failure may be retried
    /// against the primary.
    pub fn is_connectivity(&self) -> bool {
        match self {
            StoreError::Connection(_) => true,
            StoreError::Backing(e) => is_connectivity_error(e),
            _ => false,
        }
    }

    /// Whether the error was caused by the caller's arguments
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation { .. })
    }
}

pub(crate) fn is_connectivity_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Fatal condition raised while opening the backing store
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Settings failed validation before any connection was attempted
    #[error("Invalid SQL settings: {0}")]
    InvalidSettings(String),

    /// The configured driver has no dialect
    #[error("Unsupported database driver: {0}")]
    UnsupportedDriver(String),

    /// The data source could not be turned into a pool
    #[error("Failed to open {target} connection: {source}")]
    Open {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// The primary never answered a ping within the retry budget
    #[error("Primary unreachable after {attempts} attempts: {last_error}")]
    PrimaryUnreachable { attempts: u32, last_error: String },

    /// Required tables or indexes could not be created
    #[error("Schema bootstrap failed: {0}")]
    Schema(#[source] sqlx::Error),
}

impl BootstrapError {
    /// Process exit code for this failure category
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Schema(_) => 100,
            BootstrapError::Open { .. } | BootstrapError::InvalidSettings(_) => 101,
            BootstrapError::PrimaryUnreachable { .. } => 102,
            BootstrapError::UnsupportedDriver(_) => 103,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StoreError::Connection("Failed to connect".to_string());
        assert_eq!(error.to_string(), "Connection error: Failed to connect");

        let timeout_error = StoreError::Timeout {
            elapsed: Duration::from_millis(250),
            context: "post.get".to_string(),
        };
        assert!(timeout_error.to_string().contains("timed out after 250ms"));

        let not_found = StoreError::not_found("post", "abc");
        assert_eq!(not_found.to_string(), "post not found: abc");
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(StoreError::Connection("down".into()).is_connectivity());
        assert!(StoreError::Backing(sqlx::Error::PoolTimedOut).is_connectivity());
        assert!(!StoreError::Backing(sqlx::Error::RowNotFound).is_connectivity());
        assert!(!StoreError::validation("message", "too long").is_connectivity());
        assert!(StoreError::validation("message", "too long").is_validation());
    }

    #[test]
    fn test_bootstrap_exit_codes() {
        let unreachable = BootstrapError::PrimaryUnreachable {
            attempts: 3,
            last_error: "refused".to_string(),
        };
        assert_eq!(unreachable.exit_code(), 102);
        assert_eq!(
            BootstrapError::UnsupportedDriver("oracle".into()).exit_code(),
            103
        );
        assert_eq!(
            BootstrapError::Schema(sqlx::Error::PoolClosed).exit_code(),
            100
        );
    }
}
