//! Error types for fancy-sqlx.
//!
//! All resolver and backend failures are reported through [`FancyError`].
//! Errors raised by user code inside a resolver scope never pass through this
//! type: entry points are generic over the caller's error type and hand the
//! body's error back unchanged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FancyError {
    /// A scope-dependent operation ran with no `atomic()` / `non_atomic()` scope.
    #[error("{operation}() must be called within an atomic() scope")]
    NoActiveScope { operation: &'static str },

    /// The scope handle exists but has no open transaction.
    #[error("{operation}() requires the connection to be in an active transaction")]
    NotInTransaction { operation: &'static str },

    #[error("atomic() cannot be called inside a non_atomic() scope without an active transaction")]
    AtomicInsideNonAtomic,

    #[error("Connection handle {handle_id} is already closed")]
    HandleClosed { handle_id: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FancyError {
    /// Create a no-active-scope error for the named operation.
    pub fn no_active_scope(operation: &'static str) -> Self {
        Self::NoActiveScope { operation }
    }

    /// Create a not-in-transaction error for the named operation.
    pub fn not_in_transaction(operation: &'static str) -> Self {
        Self::NotInTransaction { operation }
    }

    pub fn handle_closed(handle_id: impl ToString) -> Self {
        Self::HandleClosed {
            handle_id: handle_id.to_string(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::NoActiveScope { .. } => {
                Some("Wrap the call in engine.atomic(...) or use atx()/tx() instead")
            }
            Self::AtomicInsideNonAtomic => {
                Some("Begin a transaction on the non_atomic() handle before entering atomic()")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// True for misuse of the resolver API (scope and transaction state errors).
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::NoActiveScope { .. }
                | Self::NotInTransaction { .. }
                | Self::AtomicInsideNonAtomic
                | Self::HandleClosed { .. }
        )
    }
}

/// Convert sqlx errors to FancyError.
impl From<sqlx::Error> for FancyError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => FancyError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                FancyError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => FancyError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => FancyError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                FancyError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => FancyError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => FancyError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => FancyError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                FancyError::schema(format!("Column not found: {}", col), col)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                FancyError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                FancyError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => FancyError::internal("Database worker crashed"),
            _ => FancyError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert rusqlite errors to FancyError.
impl From<rusqlite::Error> for FancyError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message) => {
                let message = message.unwrap_or_else(|| code.to_string());
                let suggestion = match code.code {
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        "Another connection holds the write lock; retry or shorten transactions"
                    }
                    rusqlite::ErrorCode::CannotOpen => {
                        "Verify the database file path exists and is writable"
                    }
                    rusqlite::ErrorCode::ConstraintViolation => {
                        "Check the constraint named in the message"
                    }
                    _ => "Check the SQL syntax and referenced objects",
                };
                FancyError::database(message, Some(code.extended_code.to_string()), suggestion)
            }
            rusqlite::Error::QueryReturnedNoRows => FancyError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            rusqlite::Error::InvalidColumnName(col) => {
                FancyError::schema(format!("Column not found: {}", col), col)
            }
            rusqlite::Error::InvalidParameterCount(given, expected) => FancyError::invalid_input(
                format!("Statement expects {} parameters, {} given", expected, given),
            ),
            rusqlite::Error::InvalidPath(path) => FancyError::connection(
                format!("Invalid database path: {}", path.display()),
                "Check the SQLite file path",
            ),
            other => FancyError::internal(format!("SQLite error: {}", other)),
        }
    }
}

/// Result type alias for fancy-sqlx operations.
pub type FancyResult<T> = Result<T, FancyError>;
