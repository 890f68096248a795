//! Dialect factory.
//!
//! Maps dialect identifiers from the profile file to the strategy that opens a
//! pool for them. New dialects are added with [`DialectRegistry::register`]
//! without touching the dispatch in [`DialectRegistry::open`].

use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, DIALECT_POSTGRES, DIALECT_SQLITE};
use futures_util::future::BoxFuture;
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Statements slower than this are logged at WARN, like a slow-query log.
pub const SLOW_STATEMENT_THRESHOLD: Duration = Duration::from_secs(1);

/// SQLite allows a single writer; one connection avoids lock contention.
pub const SQLITE_MAX_CONNECTIONS: u32 = 1;

/// Strategy that opens a connection handle for one dialect.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        datasource: &'a str,
        profile: &'a ConnectionProfile,
    ) -> BoxFuture<'a, DbResult<DbPool>>;
}

/// Level at which the driver logs every statement of a datasource.
fn statement_log_level(print_log: bool) -> LevelFilter {
    if print_log {
        LevelFilter::Info
    } else {
        LevelFilter::Off
    }
}

/// Enable per-statement logging when the profile asks for it.
fn with_statement_logging<O: ConnectOptions>(options: O, print_log: bool) -> O {
    options
        .log_statements(statement_log_level(print_log))
        .log_slow_statements(LevelFilter::Warn, SLOW_STATEMENT_THRESHOLD)
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(dialect: &str, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            dialect
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password in the datasource profile".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unable to open") {
        return "Check that the database named by dbname exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check the ssl_mode of the datasource profile".to_string();
    }

    "Verify host, port, user, dbname and password of the datasource profile".to_string()
}

/// Opens PostgreSQL pools from `host`/`port`/`user`/`password`/`dbname`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

impl PostgresConnector {
    /// Build connect options equivalent to
    /// `host=.. port=.. dbname=.. user=.. password=.. sslmode=..`.
    pub fn connect_options(profile: &ConnectionProfile) -> DbResult<PgConnectOptions> {
        let ssl_mode = PgSslMode::from_str(&profile.ssl_mode).map_err(|e| {
            DbError::connection(
                format!("Invalid ssl_mode '{}': {}", profile.ssl_mode, e),
                "Use one of disable, allow, prefer, require, verify-ca, verify-full",
            )
        })?;

        let options = PgConnectOptions::new()
            .host(&profile.host)
            .port(profile.port)
            .username(&profile.user)
            .password(&profile.password)
            .database(&profile.dbname)
            .ssl_mode(ssl_mode);

        Ok(with_statement_logging(options, profile.print_log))
    }
}

impl Connector for PostgresConnector {
    fn connect<'a>(
        &'a self,
        datasource: &'a str,
        profile: &'a ConnectionProfile,
    ) -> BoxFuture<'a, DbResult<DbPool>> {
        Box::pin(async move {
            let options = Self::connect_options(profile)?;
            debug!(datasource = %datasource, address = %profile.target(), "Opening PostgreSQL pool");
            let pool = PgPoolOptions::new()
                .connect_with(options)
                .await
                .map_err(|e| {
                    DbError::connection(
                        format!("Failed to connect to datasource {}: {}", datasource, e),
                        connection_suggestion(DIALECT_POSTGRES, &e),
                    )
                })?;
            Ok(DbPool::Postgres(pool))
        })
    }
}

/// Opens SQLite pools; `dbname` is the database file path (or `:memory:`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl SqliteConnector {
    pub fn connect_options(profile: &ConnectionProfile) -> DbResult<SqliteConnectOptions> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", profile.dbname))
            .map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite path '{}': {}", profile.dbname, e),
                    "Set dbname to a file path, e.g. /var/lib/app/app.db",
                )
            })?
            .create_if_missing(true);

        Ok(with_statement_logging(options, profile.print_log))
    }
}

impl Connector for SqliteConnector {
    fn connect<'a>(
        &'a self,
        datasource: &'a str,
        profile: &'a ConnectionProfile,
    ) -> BoxFuture<'a, DbResult<DbPool>> {
        Box::pin(async move {
            let options = Self::connect_options(profile)?;
            debug!(datasource = %datasource, path = %profile.dbname, "Opening SQLite pool");
            let pool = SqlitePoolOptions::new()
                .max_connections(SQLITE_MAX_CONNECTIONS)
                .connect_with(options)
                .await
                .map_err(|e| {
                    DbError::connection(
                        format!("Failed to open datasource {}: {}", datasource, e),
                        connection_suggestion(DIALECT_SQLITE, &e),
                    )
                })?;
            Ok(DbPool::SQLite(pool))
        })
    }
}

/// Dialect identifier → connection strategy.
#[derive(Clone, Default)]
pub struct DialectRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl DialectRegistry {
    /// A registry with no dialects.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dialects shipped with the crate: `postgres` and `sqlite`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(DIALECT_POSTGRES, PostgresConnector)
            .register(DIALECT_SQLITE, SqliteConnector);
        registry
    }

    /// Add or replace the strategy for `dialect` (case-insensitive).
    pub fn register(
        &mut self,
        dialect: impl Into<String>,
        connector: impl Connector + 'static,
    ) -> &mut Self {
        self.connectors
            .insert(dialect.into().to_ascii_lowercase(), Arc::new(connector));
        self
    }

    pub fn supports(&self, dialect: &str) -> bool {
        self.connectors
            .contains_key(&dialect.to_ascii_lowercase())
    }

    /// Registered dialect identifiers, sorted.
    pub fn dialects(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Open a handle for `profile` with the strategy registered for its dialect.
    pub async fn open(&self, datasource: &str, profile: &ConnectionProfile) -> DbResult<DbPool> {
        let connector = self
            .connectors
            .get(&profile.dialect.to_ascii_lowercase())
            .ok_or_else(|| DbError::unsupported_dialect(&profile.dialect, datasource))?;
        connector.connect(datasource, profile).await
    }
}

impl fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialectRegistry")
            .field("dialects", &self.dialects())
            .finish()
    }
}
