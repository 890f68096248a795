//! Connection-related data models.
//!
//! This module defines datasource profiles and the per-invocation transaction
//! state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dialect identifier for PostgreSQL profiles.
pub const DIALECT_POSTGRES: &str = "postgres";

/// Dialect identifier for SQLite profiles (`dbname` is the file path).
pub const DIALECT_SQLITE: &str = "sqlite";

/// Default SSL mode, matching a plain `sslmode=disable` DSN.
pub const DEFAULT_SSL_MODE: &str = "disable";

/// Database backend behind an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Connection settings for one named datasource.
///
/// Immutable once loaded. `Debug` masks the password.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Contains sensitive data - never log
    pub password: String,
    pub dbname: String,
    /// Lowercased dialect identifier, e.g. "postgres"
    pub dialect: String,
    /// Log every statement the driver runs for this datasource
    pub print_log: bool,
    pub ssl_mode: String,
}

impl ConnectionProfile {
    /// Build a profile for a network dialect with default SSL settings.
    pub fn new(
        dialect: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            dbname: dbname.into(),
            dialect: dialect.into().to_ascii_lowercase(),
            print_log: false,
            ssl_mode: DEFAULT_SSL_MODE.to_string(),
        }
    }

    /// Build a SQLite profile backed by the file at `path`.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new(DIALECT_SQLITE, "", 0, "", "", path)
    }

    pub fn with_print_log(mut self, print_log: bool) -> Self {
        self.print_log = print_log;
        self
    }

    pub fn with_ssl_mode(mut self, ssl_mode: impl Into<String>) -> Self {
        self.ssl_mode = ssl_mode.into();
        self
    }

    /// Display-safe target description: `user@host:port/dbname`.
    pub fn target(&self) -> String {
        if self.host.is_empty() {
            return self.dbname.clone();
        }
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("dbname", &self.dbname)
            .field("dialect", &self.dialect)
            .field("print_log", &self.print_log)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// State of a single transaction bracket.
///
/// `Started -> WorkRunning -> Committing -> Committed` on success,
/// `Started -> WorkRunning -> RollingBack -> RolledBack` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Started,
    WorkRunning,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl TransactionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Started, WorkRunning)
                | (WorkRunning, Committing)
                | (WorkRunning, RollingBack)
                | (Committing, Committed)
                | (RollingBack, RolledBack)
        )
    }

    /// Check if the transaction has ended (committed or rolled back).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::WorkRunning => "work_running",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}
