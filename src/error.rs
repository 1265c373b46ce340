//! Error types for dispomail.

use thiserror::Error;

/// Common error type for dispomail.
#[derive(Error, Debug)]
pub enum DispomailError {
    /// Generic database error.
    ///
    /// Anything sqlx reports that is neither a connectivity failure nor a
    /// foreign-key violation ends up here.
    #[error("database error: {0}")]
    Database(String),

    /// The database backend could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A mail referenced an address that does not exist.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ownership predicate rejected the caller.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Validation error for caller input (cursors, address names).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// An inbound message could not be parsed.
    #[error("parse failure: {0}")]
    Parse(String),

    /// Legacy schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DispomailError {
    /// Whether the failure is transient and the caller may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispomailError::StoreUnavailable(_))
    }
}

// Both backends go through this conversion, so a violation looks the same
// whether it came from SQLite or PostgreSQL.
impl From<sqlx::Error> for DispomailError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                DispomailError::ForeignKeyViolation(db_err.message().to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DispomailError::StoreUnavailable(e.to_string()),
            other => DispomailError::Database(other.to_string()),
        }
    }
}

/// Result type alias for dispomail operations.
pub type Result<T> = std::result::Result<T, DispomailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_error_display() {
        let err = DispomailError::Unauthorized("address is owned by another user".to_string());
        assert_eq!(
            err.to_string(),
            "unauthorized: address is owned by another user"
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = DispomailError::Validation("bad cursor".to_string());
        assert_eq!(err.to_string(), "validation error: bad cursor");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = DispomailError::NotFound("address".to_string());
        assert_eq!(err.to_string(), "address not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DispomailError = io_err.into();
        assert!(matches!(err, DispomailError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_pool_timeout_is_unavailable() {
        let err: DispomailError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DispomailError::StoreUnavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_is_database_error() {
        let err: DispomailError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DispomailError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(DispomailError::Parse("test".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
