//! Error types for lock coordination.

use std::fmt;

/// A failure reported by the database while running a statement.
///
/// `code` carries the vendor error code (the SQLSTATE for PostgreSQL-wire
/// databases, the extended result code for SQLite). Dialects classify it to
/// decide whether an acquire attempt may be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    /// Vendor error code, if the driver reported one.
    pub code: Option<String>,
    /// Driver message.
    pub message: String,
}

impl SqlError {
    /// Creates an error with a vendor code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Creates an error without a vendor code.
    pub fn without_code(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Returns the vendor code, or an empty string.
    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for SqlError {}

impl From<sqlx::Error> for SqlError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => Self {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            other => Self::without_code(other.to_string()),
        }
    }
}

/// Errors that can occur while acquiring, holding or releasing a lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A statement against the lock table failed.
    #[error("{context}: {source}")]
    Sql {
        /// What the coordinator was doing.
        context: String,
        /// The database failure.
        #[source]
        source: SqlError,
    },

    /// Connection-level database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The retry budget ran out while the lock stayed contended.
    #[error(
        "Number of retries exceeded while attempting to acquire lock on '{resource}' through \
         SELECT ... FOR UPDATE after {attempts} attempt(s). Configure the number of retries \
         with the 'lock_retry_count' option"
    )]
    RetriesExceeded {
        /// Resource that could not be locked.
        resource: String,
        /// Attempts made before giving up.
        attempts: u64,
    },

    /// The lock row no longer carried this runner's marker at release time.
    #[error(
        "Unlock of '{resource}' failed but the protected operation may have succeeded. \
         Check it before re-trying"
    )]
    UnlockMismatch {
        /// Resource whose lock was reset by someone else.
        resource: String,
    },

    /// No registered dialect handles the connection URL.
    #[error("No dialect handles URL {0}")]
    UnknownDialect(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    /// Wraps a database failure with context.
    pub fn sql(context: impl Into<String>, source: SqlError) -> Self {
        Self::Sql {
            context: context.into(),
            source,
        }
    }

    /// Returns the vendor code of the underlying database failure, if any.
    #[must_use]
    pub fn sql_code(&self) -> Option<&str> {
        match self {
            Self::Sql { source, .. } => source.code.as_deref(),
            _ => None,
        }
    }
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_display() {
        let err = SqlError::new("40001", "could not serialize access");
        assert_eq!(err.to_string(), "could not serialize access (code 40001)");
        assert_eq!(err.code(), "40001");

        let err = SqlError::without_code("connection reset");
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(err.code(), "");
    }

    #[test]
    fn test_retries_exceeded_names_option() {
        let err = LockError::RetriesExceeded {
            resource: "flyway_schema_history".to_string(),
            attempts: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("lock_retry_count"));
        assert!(msg.contains("flyway_schema_history"));
    }

    #[test]
    fn test_sql_code() {
        let err = LockError::sql("Unable to perform lock action", SqlError::new("23505", "dup"));
        assert_eq!(err.sql_code(), Some("23505"));
        assert!(LockError::InvalidConfig("x".into()).sql_code().is_none());
    }
}
