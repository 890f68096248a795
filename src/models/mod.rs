//! Data models for datasource profiles and transactions.

pub mod connection;

// Re-export commonly used types
pub use connection::{
    ConnectionProfile, DEFAULT_SSL_MODE, DIALECT_POSTGRES, DIALECT_SQLITE, DatabaseType,
    TransactionState,
};
