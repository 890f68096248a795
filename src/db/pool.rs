//! Connection handles and transaction sessions.
//!
//! `DbPool` is the shareable handle stored in the registry, one per
//! datasource. `DbSession` is the transaction scope derived from it for a
//! single unit of work.

use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::DatabaseType;
use sqlx::{PgPool, Postgres, Sqlite, SqlitePool, Transaction};

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, DbPool, pool => pool.close().await)
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, DbPool, pool => pool.is_closed())
    }

    /// Borrow the PostgreSQL pool, if this is one.
    pub fn as_postgres(&self) -> Option<&PgPool> {
        match self {
            DbPool::Postgres(pool) => Some(pool),
            _ => None,
        }
    }

    /// Borrow the SQLite pool, if this is one.
    pub fn as_sqlite(&self) -> Option<&SqlitePool> {
        match self {
            DbPool::SQLite(pool) => Some(pool),
            _ => None,
        }
    }
}

impl From<PgPool> for DbPool {
    fn from(pool: PgPool) -> Self {
        DbPool::Postgres(pool)
    }
}

impl From<SqlitePool> for DbPool {
    fn from(pool: SqlitePool) -> Self {
        DbPool::SQLite(pool)
    }
}

/// Transaction scope handed to a unit of work.
///
/// Holds a dedicated connection with an open `BEGIN` until the executor
/// commits or rolls it back. Dropping it without either rolls back.
#[derive(Debug)]
pub enum DbSession {
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbSession {
    /// Get the database type for this session.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbSession::Postgres(_) => DatabaseType::PostgreSQL,
            DbSession::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Run a statement without bound parameters and return the affected row count.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let rows_affected = impl_db_dispatch!(self, DbSession, tx => {
            sqlx::query(sql)
                .execute(&mut **tx)
                .await
                .map_err(DbError::from)?
                .rows_affected()
        });
        Ok(rows_affected)
    }

    /// Fetch a single integer value, e.g. `SELECT COUNT(*) ...`.
    pub async fn fetch_scalar_i64(&mut self, sql: &str) -> DbResult<i64> {
        let value = impl_db_dispatch!(self, DbSession, tx => {
            sqlx::query_scalar::<_, i64>(sql)
                .fetch_one(&mut **tx)
                .await
                .map_err(DbError::from)?
        });
        Ok(value)
    }

    /// Borrow the PostgreSQL transaction for typed queries.
    pub fn as_postgres_mut(&mut self) -> Option<&mut Transaction<'static, Postgres>> {
        match self {
            DbSession::Postgres(tx) => Some(tx),
            _ => None,
        }
    }

    /// Borrow the SQLite transaction for typed queries.
    pub fn as_sqlite_mut(&mut self) -> Option<&mut Transaction<'static, Sqlite>> {
        match self {
            DbSession::SQLite(tx) => Some(tx),
            _ => None,
        }
    }
}
