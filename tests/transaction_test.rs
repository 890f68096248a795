//! Integration tests for the transaction executor against a SQLite file database.

use datasource_tx::db::{
    DatasourceRegistry, DbPool, DialectRegistry, TransactionExecutor, TransactionOptions,
    execute_in_transaction_with_handle,
};
use datasource_tx::error::{DbError, TransactionError};
use datasource_tx::models::ConnectionProfile;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Executor over a single SQLite datasource registered as DEFAULT.
async fn setup() -> (TempDir, TransactionExecutor) {
    let dir = tempfile::tempdir().unwrap();
    let profile = ConnectionProfile::sqlite(dir.path().join("bank.db").to_string_lossy());
    let registry = DatasourceRegistry::<DbPool>::connect(
        vec![("DEFAULT".to_string(), profile)],
        &DialectRegistry::builtin(),
    )
    .await
    .unwrap();
    let executor = TransactionExecutor::new(Arc::new(registry));

    executor
        .execute_in_transaction(|session| {
            Box::pin(async move {
                session
                    .execute("CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL)")
                    .await?;
                session
                    .execute("INSERT INTO accounts (id, balance) VALUES (1, 100), (2, 0)")
                    .await?;
                Ok::<_, DbError>(())
            })
        })
        .await
        .expect("schema setup should commit");

    (dir, executor)
}

async fn balance(executor: &TransactionExecutor, id: i64) -> i64 {
    let sql = format!("SELECT balance FROM accounts WHERE id = {}", id);
    executor
        .execute_in_transaction(|session| Box::pin(async move { session.fetch_scalar_i64(&sql).await }))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_committed_work_is_visible() {
    let (_dir, executor) = setup().await;

    executor
        .execute_in_transaction(|session| {
            Box::pin(async move {
                session
                    .execute("UPDATE accounts SET balance = balance - 30 WHERE id = 1")
                    .await?;
                session
                    .execute("UPDATE accounts SET balance = balance + 30 WHERE id = 2")
                    .await?;
                Ok::<_, DbError>(())
            })
        })
        .await
        .unwrap();

    assert_eq!(balance(&executor, 1).await, 70);
    assert_eq!(balance(&executor, 2).await, 30);
}

#[tokio::test]
async fn test_work_error_erases_changes() {
    let (_dir, executor) = setup().await;

    let result: Result<(), _> = executor
        .execute_in_transaction(|session| {
            Box::pin(async move {
                session
                    .execute("UPDATE accounts SET balance = balance - 500 WHERE id = 1")
                    .await?;
                let remaining = session
                    .fetch_scalar_i64("SELECT balance FROM accounts WHERE id = 1")
                    .await?;
                if remaining < 0 {
                    return Err(DbError::internal("insufficient funds"));
                }
                Ok(())
            })
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(
        err.work_error(),
        Some(DbError::Internal { message }) if message == "insufficient funds"
    ));
    assert_eq!(balance(&executor, 1).await, 100);
}

#[tokio::test]
async fn test_database_error_in_work_rolls_back() {
    let (_dir, executor) = setup().await;

    let result: Result<(), _> = executor
        .execute_in_transaction(|session| {
            Box::pin(async move {
                session
                    .execute("UPDATE accounts SET balance = 0 WHERE id = 1")
                    .await?;
                // Duplicate primary key
                session
                    .execute("INSERT INTO accounts (id, balance) VALUES (2, 1)")
                    .await?;
                Ok::<_, DbError>(())
            })
        })
        .await;

    assert!(matches!(
        result,
        Err(TransactionError::Work {
            error: DbError::Database { .. },
            ..
        })
    ));
    assert_eq!(balance(&executor, 1).await, 100);
}

#[tokio::test]
async fn test_commit_time_constraint_failure_is_reported() {
    let (_dir, executor) = setup().await;

    executor
        .execute_in_transaction(|session| {
            Box::pin(async move {
                session
                    .execute(
                        "CREATE TABLE transfers (id INTEGER PRIMARY KEY, account_id INTEGER \
                         REFERENCES accounts(id) DEFERRABLE INITIALLY DEFERRED)",
                    )
                    .await?;
                Ok::<_, DbError>(())
            })
        })
        .await
        .unwrap();

    // The foreign key is only checked at COMMIT.
    let result = executor
        .execute_in_transaction(|session| {
            Box::pin(async move {
                session
                    .execute("INSERT INTO transfers (id, account_id) VALUES (1, 999)")
                    .await?;
                Ok::<_, DbError>(())
            })
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_commit_error(), "expected commit error, got {:?}", err);
    assert!(!err.is_work_error());

    let count = executor
        .execute_in_transaction(|session| {
            Box::pin(async move { session.fetch_scalar_i64("SELECT COUNT(*) FROM transfers").await })
        })
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_concurrent_invocations_do_not_affect_each_other() {
    let (_dir, executor) = setup().await;

    let failing = executor.execute_in_transaction(|session| {
        Box::pin(async move {
            session
                .execute("UPDATE accounts SET balance = balance + 1 WHERE id = 1")
                .await?;
            Err::<(), _>(DbError::internal("insufficient funds"))
        })
    });
    let succeeding = executor.execute_in_transaction(|session| {
        Box::pin(async move {
            session
                .execute("UPDATE accounts SET balance = balance + 5 WHERE id = 2")
                .await?;
            Ok::<_, DbError>(())
        })
    });

    let (failed, succeeded) = tokio::join!(failing, succeeding);
    assert!(failed.unwrap_err().is_work_error());
    assert!(succeeded.is_ok());
    assert_eq!(balance(&executor, 1).await, 100);
    assert_eq!(balance(&executor, 2).await, 5);
}

#[tokio::test]
async fn test_timeout_rolls_back_pending_changes() {
    let (_dir, executor) = setup().await;
    let executor = executor.with_options(TransactionOptions::with_timeout(Duration::from_millis(50)));

    let result = executor
        .execute_in_transaction(|session| {
            Box::pin(async move {
                session
                    .execute("UPDATE accounts SET balance = 0 WHERE id = 1")
                    .await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, DbError>(())
            })
        })
        .await;

    assert!(matches!(result, Err(TransactionError::Timeout { rollback: None, .. })));
    assert_eq!(balance(&executor, 1).await, 100);
}

#[tokio::test]
async fn test_raw_sqlx_pool_as_handle() {
    let (_dir, executor) = setup().await;
    let pool = executor
        .registry()
        .default_connection()
        .unwrap()
        .as_sqlite()
        .unwrap()
        .clone();

    let rows = execute_in_transaction_with_handle(&pool, |tx| {
        Box::pin(async move {
            let result = sqlx::query("UPDATE accounts SET balance = balance + 1")
                .execute(&mut **tx)
                .await?;
            Ok::<_, sqlx::Error>(result.rows_affected())
        })
    })
    .await
    .unwrap();

    assert_eq!(rows, 2);
    assert_eq!(balance(&executor, 1).await, 101);
}

#[tokio::test]
async fn test_closed_pool_fails_to_begin() {
    let (_dir, executor) = setup().await;
    executor.registry().close_all().await;

    let result = executor
        .execute_in_transaction(|_session| Box::pin(async move { Ok::<_, DbError>(()) }))
        .await;
    match result.unwrap_err() {
        TransactionError::Begin { source, .. } => {
            assert!(matches!(source, DbError::Connection { .. }))
        }
        other => panic!("expected Begin, got {:?}", other),
    }
}
