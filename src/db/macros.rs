//! Database dispatch macros for reducing code duplication.
//!
//! The macros expand every backend arm with the same body, so generic sqlx
//! code is written once and monomorphised per database.

/// Match over `DbPool` or `DbSession` and run `$body` with the inner value bound.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(self, DbSession, tx => sqlx::query(sql).execute(&mut **tx).await?)
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($value:expr, $enum:ident, $inner:ident => $body:expr) => {
        match $value {
            $crate::db::pool::$enum::Postgres($inner) => $body,
            $crate::db::pool::$enum::SQLite($inner) => $body,
        }
    };
}

/// Implement the transaction seams directly on sqlx pools and transactions.
macro_rules! impl_sqlx_handle {
    ($($db:ty),+ $(,)?) => {
        $(
            impl $crate::db::transaction::TransactionalHandle for sqlx::Pool<$db> {
                type Session = sqlx::Transaction<'static, $db>;

                async fn begin(&self) -> $crate::error::DbResult<Self::Session> {
                    Ok(sqlx::Pool::begin(self).await?)
                }
            }

            impl $crate::db::transaction::TransactionSession for sqlx::Transaction<'static, $db> {
                async fn commit(self) -> $crate::error::DbResult<()> {
                    Ok(sqlx::Transaction::commit(self).await?)
                }

                async fn rollback(self) -> $crate::error::DbResult<()> {
                    Ok(sqlx::Transaction::rollback(self).await?)
                }
            }
        )+
    };
}

pub use impl_db_dispatch;
pub(crate) use impl_sqlx_handle;
