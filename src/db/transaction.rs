//! Transaction bracketing for units of work.
//!
//! A unit of work is an async closure that receives a transaction session.
//! The executor begins the session, runs the work, then commits on success
//! or rolls back on error. Every invocation that obtained a session ends with
//! exactly one commit or one rollback, and no failure is swallowed: see
//! [`TransactionError`].
//!
//! ```ignore
//! let executor = TransactionExecutor::new(registry);
//! executor
//!     .execute_in_transaction(|session| {
//!         Box::pin(async move {
//!             session.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1").await?;
//!             session.execute("UPDATE accounts SET balance = balance + 10 WHERE id = 2").await?;
//!             Ok::<_, DbError>(())
//!         })
//!     })
//!     .await?;
//! ```

use crate::db::macros::impl_sqlx_handle;
use crate::db::pool::{DbPool, DbSession};
use crate::db::registry::DatasourceRegistry;
use crate::error::{DbError, DbResult, Kind, TransactionError};
use crate::models::TransactionState;
use futures_util::future::BoxFuture;
use sqlx::{Postgres, Sqlite};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

/// A handle transaction sessions can be derived from.
pub trait TransactionalHandle: Send + Sync {
    type Session: TransactionSession;

    /// Start an explicit transaction on a connection taken from this handle.
    fn begin(&self) -> impl Future<Output = DbResult<Self::Session>> + Send;
}

/// One transaction scope. Ending it consumes it.
pub trait TransactionSession: Send + Sized {
    fn commit(self) -> impl Future<Output = DbResult<()>> + Send;
    fn rollback(self) -> impl Future<Output = DbResult<()>> + Send;
}

impl TransactionalHandle for DbPool {
    type Session = DbSession;

    async fn begin(&self) -> DbResult<DbSession> {
        match self {
            DbPool::Postgres(pool) => Ok(DbSession::Postgres(pool.begin().await?)),
            DbPool::SQLite(pool) => Ok(DbSession::SQLite(pool.begin().await?)),
        }
    }
}

impl TransactionSession for DbSession {
    async fn commit(self) -> DbResult<()> {
        match self {
            DbSession::Postgres(tx) => Ok(tx.commit().await?),
            DbSession::SQLite(tx) => Ok(tx.commit().await?),
        }
    }

    async fn rollback(self) -> DbResult<()> {
        match self {
            DbSession::Postgres(tx) => Ok(tx.rollback().await?),
            DbSession::SQLite(tx) => Ok(tx.rollback().await?),
        }
    }
}

impl_sqlx_handle!(Postgres, Sqlite);

/// Per-call settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Deadline for the unit of work. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Generate a unique transaction ID.
pub fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// Tracks one invocation through its state machine.
struct TransactionScope {
    id: String,
    state: TransactionState,
    started_at: Instant,
}

impl TransactionScope {
    fn new() -> Self {
        Self {
            id: generate_transaction_id(),
            state: TransactionState::Started,
            started_at: Instant::now(),
        }
    }

    fn advance(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transaction transition {} -> {}",
            self.state,
            next
        );
        trace!(tx_id = %self.id, from = %self.state, to = %next, "Transaction state change");
        self.state = next;
    }

    fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// Deadline bookkeeping for one invocation.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    limit: Duration,
    at: Instant,
}

impl Deadline {
    fn start(options: TransactionOptions) -> Option<Self> {
        options.timeout.map(|limit| Self {
            limit,
            at: Instant::now() + limit,
        })
    }

    fn limit_ms(&self) -> u64 {
        self.limit.as_millis() as u64
    }
}

/// Await `future`, giving up at `at` when a deadline is set.
async fn within<T>(at: Option<Instant>, future: impl Future<Output = T>) -> Option<T> {
    match at {
        Some(at) => tokio::time::timeout_at(at, future).await.ok(),
        None => Some(future.await),
    }
}

/// Commit within what is left of the deadline.
async fn commit_session<S: TransactionSession>(
    session: S,
    deadline: Option<Deadline>,
) -> DbResult<()> {
    within(deadline.map(|d| d.at), session.commit())
        .await
        .unwrap_or_else(|| {
            Err(DbError::timeout(format!(
                "commit did not finish within the {}ms transaction deadline",
                deadline.map(|d| d.limit_ms()).unwrap_or_default()
            )))
        })
}

/// Roll back, bounded by one more deadline period from now.
///
/// The rollback may start after the deadline has passed, so it gets its own
/// window rather than what is left of the original one.
async fn rollback_session<S: TransactionSession>(
    session: S,
    deadline: Option<Deadline>,
) -> DbResult<()> {
    within(deadline.map(|d| Instant::now() + d.limit), session.rollback())
        .await
        .unwrap_or_else(|| {
            Err(DbError::timeout(format!(
                "rollback did not finish within {}ms",
                deadline.map(|d| d.limit_ms()).unwrap_or_default()
            )))
        })
}

/// Run `work` in a transaction on `handle`.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. The
/// work error comes back unchanged in [`TransactionError::Work`]; a failed
/// commit is reported as [`TransactionError::Commit`].
pub async fn execute_in_transaction_with_handle<H, T, E, F>(
    handle: &H,
    work: F,
) -> Result<T, TransactionError<E>>
where
    H: TransactionalHandle,
    E: fmt::Display,
    F: for<'s> FnOnce(&'s mut H::Session) -> BoxFuture<'s, Result<T, E>>,
{
    execute_in_transaction_with_options(handle, TransactionOptions::default(), work).await
}

/// Like [`execute_in_transaction_with_handle`], honouring `options`.
///
/// The deadline covers the unit of work and the commit. When it expires
/// during the work, the work future is dropped, the session is rolled back
/// and [`TransactionError::Timeout`] is returned. A commit that outlives it
/// fails with [`TransactionError::Commit`] wrapping `DbError::Timeout`.
/// Rollbacks get one more deadline period, so a call never blocks for more
/// than twice the timeout once its session is open.
pub async fn execute_in_transaction_with_options<H, T, E, F>(
    handle: &H,
    options: TransactionOptions,
    work: F,
) -> Result<T, TransactionError<E>>
where
    H: TransactionalHandle,
    E: fmt::Display,
    F: for<'s> FnOnce(&'s mut H::Session) -> BoxFuture<'s, Result<T, E>>,
{
    let mut scope = TransactionScope::new();

    let mut session = match handle.begin().await {
        Ok(session) => session,
        Err(source) => {
            error!(tx_id = %scope.id, error = %source, "Failed to begin transaction");
            return Err(TransactionError::Begin {
                transaction_id: scope.id,
                source,
            });
        }
    };
    debug!(tx_id = %scope.id, "Start transaction");

    let deadline = Deadline::start(options);
    scope.advance(TransactionState::WorkRunning);
    let outcome = within(deadline.map(|d| d.at), work(&mut session)).await;

    let Some(result) = outcome else {
        let timeout_ms = deadline.map(|d| d.limit_ms()).unwrap_or_default();
        scope.advance(TransactionState::RollingBack);
        warn!(tx_id = %scope.id, timeout_ms, "Transaction timed out. Rollback transaction");
        let rollback = rollback_session(session, deadline).await.err();
        match &rollback {
            Some(e) => error!(tx_id = %scope.id, error = %e, "Rollback after timeout failed"),
            None => scope.advance(TransactionState::RolledBack),
        }
        return Err(TransactionError::Timeout {
            transaction_id: scope.id,
            timeout_ms,
            rollback,
        });
    };

    let result = match result {
        Ok(value) => {
            scope.advance(TransactionState::Committing);
            match commit_session(session, deadline).await {
                Ok(()) => {
                    scope.advance(TransactionState::Committed);
                    debug!(tx_id = %scope.id, elapsed_ms = scope.elapsed_ms(), "Transaction committed");
                    Ok(value)
                }
                Err(source) => Err(TransactionError::Commit {
                    transaction_id: scope.id.clone(),
                    source,
                }),
            }
        }
        Err(work_error) => {
            scope.advance(TransactionState::RollingBack);
            warn!(tx_id = %scope.id, error = %work_error, "Got error. Rollback transaction");
            match rollback_session(session, deadline).await {
                Ok(()) => {
                    scope.advance(TransactionState::RolledBack);
                    Err(TransactionError::Work {
                        transaction_id: scope.id.clone(),
                        error: work_error,
                    })
                }
                Err(rollback) => Err(TransactionError::Rollback {
                    transaction_id: scope.id.clone(),
                    work: work_error,
                    rollback,
                }),
            }
        }
    };

    if let Err(e) = &result {
        if !matches!(e, TransactionError::Work { .. }) {
            error!(tx_id = %scope.id, kind = %Kind(e), state = %scope.state, error = %e, "Transaction failed");
        }
    }
    result
}

/// Runs units of work against datasources looked up in a registry.
#[derive(Debug)]
pub struct TransactionExecutor<H = DbPool> {
    registry: Arc<DatasourceRegistry<H>>,
    options: TransactionOptions,
}

impl<H> Clone for TransactionExecutor<H> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            options: self.options,
        }
    }
}

impl<H: TransactionalHandle> TransactionExecutor<H> {
    pub fn new(registry: Arc<DatasourceRegistry<H>>) -> Self {
        Self {
            registry,
            options: TransactionOptions::default(),
        }
    }

    /// Apply `options` to every transaction run by this executor.
    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<DatasourceRegistry<H>> {
        &self.registry
    }

    /// Run `work` in a transaction on the default datasource.
    pub async fn execute_in_transaction<T, E, F>(&self, work: F) -> Result<T, TransactionError<E>>
    where
        E: fmt::Display,
        F: for<'s> FnOnce(&'s mut H::Session) -> BoxFuture<'s, Result<T, E>>,
    {
        self.execute_in_transaction_on(self.registry.default_name(), work)
            .await
    }

    /// Run `work` in a transaction on the datasource registered as `name`.
    ///
    /// An unknown name is reported as [`TransactionError::Begin`] wrapping
    /// `DbError::ConnectionNotFound`; the work is not run.
    pub async fn execute_in_transaction_on<T, E, F>(
        &self,
        name: &str,
        work: F,
    ) -> Result<T, TransactionError<E>>
    where
        E: fmt::Display,
        F: for<'s> FnOnce(&'s mut H::Session) -> BoxFuture<'s, Result<T, E>>,
    {
        let handle = self
            .registry
            .get(name)
            .map_err(|source| TransactionError::Begin {
                transaction_id: generate_transaction_id(),
                source,
            })?;
        execute_in_transaction_with_options(handle, self.options, work).await
    }
}
