//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection handles and transaction sessions
//! - Dialect factory for opening pools from profiles
//! - Datasource registry keyed by name
//! - Transaction executor with commit/rollback bracketing
//! - Database dispatch macros for reducing code duplication

pub mod macros;
pub mod dialect;
pub mod pool;
pub mod registry;
pub mod transaction;

pub use dialect::{Connector, DialectRegistry, PostgresConnector, SqliteConnector};
pub use pool::{DbPool, DbSession};
pub use registry::DatasourceRegistry;
pub use transaction::{
    TransactionExecutor, TransactionOptions, TransactionSession, TransactionalHandle,
    execute_in_transaction_with_handle, execute_in_transaction_with_options,
    generate_transaction_id,
};
