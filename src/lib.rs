//! Datasource registry and transaction executor.
//!
//! Named datasource profiles are read from a YAML file, one sqlx pool is
//! opened per profile, and units of work run inside explicit transactions
//! that commit on success and roll back on error.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{DatasourceRegistry, DbPool, DbSession, DialectRegistry, TransactionExecutor};
pub use error::{DbError, DbResult, TransactionError};
