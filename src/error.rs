//! Error types for datasource bootstrapping and transaction execution.
//!
//! `DbError` covers everything the registry and the driver layer can report.
//! `TransactionError` is the tagged outcome of a transaction bracket: it keeps
//! the unit of work's error apart from commit and rollback failures so none of
//! them is lost.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Datasource not found: {name}")]
    ConnectionNotFound { name: String },

    #[error("Unsupported dialect '{dialect}' for datasource '{datasource}'")]
    UnsupportedDialect { dialect: String, datasource: String },

    #[error("Datasource '{name}' is already registered")]
    DuplicateDatasource { name: String },

    #[error("Timeout: {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
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

    /// Create a "datasource not found" error.
    pub fn connection_not_found(name: impl Into<String>) -> Self {
        Self::ConnectionNotFound { name: name.into() }
    }

    pub fn unsupported_dialect(dialect: impl Into<String>, datasource: impl Into<String>) -> Self {
        Self::UnsupportedDialect {
            dialect: dialect.into(),
            datasource: datasource.into(),
        }
    }

    pub fn duplicate_datasource(name: impl Into<String>) -> Self {
        Self::DuplicateDatasource { name: name.into() }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
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
            _ => None,
        }
    }

    /// SQLSTATE code reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the datasource profile: host, port, credentials and ssl_mode",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL statement and the constraints it touches",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire"),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify ssl_mode and the server certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the selected column names",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Failure of a transaction bracket.
///
/// `E` is the error type of the unit of work. A work error is returned
/// unchanged inside [`TransactionError::Work`]; the other variants describe
/// failures of the bracket itself.
#[derive(Error, Debug)]
pub enum TransactionError<E> {
    /// The session could not be derived; the unit of work never ran.
    #[error("Failed to begin transaction {transaction_id}: {source}")]
    Begin {
        transaction_id: String,
        #[source]
        source: DbError,
    },

    /// The unit of work failed and the transaction was rolled back.
    #[error("Transaction {transaction_id} rolled back: {error}")]
    Work { transaction_id: String, error: E },

    /// The unit of work succeeded but the commit did not go through.
    #[error("Transaction {transaction_id} failed to commit: {source}")]
    Commit {
        transaction_id: String,
        #[source]
        source: DbError,
    },

    /// The unit of work failed and the rollback failed too.
    #[error("Transaction {transaction_id} failed ({work}) and rollback failed: {rollback}")]
    Rollback {
        transaction_id: String,
        work: E,
        rollback: DbError,
    },

    /// The deadline expired before the unit of work finished.
    #[error("Transaction {transaction_id} timed out after {timeout_ms}ms")]
    Timeout {
        transaction_id: String,
        timeout_ms: u64,
        /// Set when the rollback issued after the deadline failed as well.
        rollback: Option<DbError>,
    },
}

impl<E> TransactionError<E> {
    /// Correlation id of the failed transaction.
    pub fn transaction_id(&self) -> &str {
        match self {
            Self::Begin { transaction_id, .. }
            | Self::Work { transaction_id, .. }
            | Self::Commit { transaction_id, .. }
            | Self::Rollback { transaction_id, .. }
            | Self::Timeout { transaction_id, .. } => transaction_id,
        }
    }

    /// The unit of work's error, when the work itself failed.
    pub fn work_error(&self) -> Option<&E> {
        match self {
            Self::Work { error, .. } => Some(error),
            Self::Rollback { work, .. } => Some(work),
            _ => None,
        }
    }

    pub fn into_work_error(self) -> Option<E> {
        match self {
            Self::Work { error, .. } => Some(error),
            Self::Rollback { work, .. } => Some(work),
            _ => None,
        }
    }

    /// True when the unit of work reported the failure (rolled back or not).
    pub fn is_work_error(&self) -> bool {
        self.work_error().is_some()
    }

    /// True when the work succeeded but its changes were not applied.
    pub fn is_commit_error(&self) -> bool {
        matches!(self, Self::Commit { .. })
    }
}

/// Short label used in log fields.
pub(crate) struct Kind<'a, E>(pub(crate) &'a TransactionError<E>);

impl<E> fmt::Display for Kind<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.0 {
            TransactionError::Begin { .. } => "begin",
            TransactionError::Work { .. } => "work",
            TransactionError::Commit { .. } => "commit",
            TransactionError::Rollback { .. } => "rollback",
            TransactionError::Timeout { .. } => "timeout",
        };
        f.write_str(label)
    }
}
