//! datasource-tx - main entry point.
//!
//! Opens every datasource described in the profile file, reports them and,
//! with `--check`, runs a `SELECT 1` transaction against each one.

use clap::Parser;
use datasource_tx::config::{self, Config};
use datasource_tx::db::{DatasourceRegistry, DialectRegistry, TransactionExecutor};
use datasource_tx::error::{DbError, TransactionError};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// Hint attached to the database error behind a failed check, if any.
fn suggestion(error: &TransactionError<DbError>) -> Option<&str> {
    match error {
        TransactionError::Begin { source, .. } | TransactionError::Commit { source, .. } => {
            source.suggestion()
        }
        TransactionError::Work { error, .. } => error.suggestion(),
        TransactionError::Rollback { rollback, .. } => rollback.suggestion(),
        TransactionError::Timeout { .. } => None,
    }
}

/// Run `SELECT 1` in a transaction on every datasource. Returns the failure count.
async fn check_datasources(executor: &TransactionExecutor) -> usize {
    let mut failures = 0;
    for name in executor.registry().names() {
        let result = executor
            .execute_in_transaction_on(name, |session| {
                Box::pin(async move {
                    session.execute("SELECT 1").await?;
                    Ok::<_, DbError>(())
                })
            })
            .await;

        match result {
            Ok(()) => info!(datasource = %name, "Datasource check passed"),
            Err(e) => {
                failures += 1;
                error!(
                    datasource = %name,
                    tx_id = %e.transaction_id(),
                    error = %e,
                    suggestion = suggestion(&e),
                    "Datasource check failed"
                );
            }
        }
    }
    failures
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        config = %config.config.display(),
        "Starting datasource-tx v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Start-up is fail-fast: nothing is exposed unless every datasource opens.
    let profiles = match config::load_profiles(&config.config) {
        Ok(profiles) => profiles,
        Err(e) => {
            error!(error = %e, "Error loading datasource profiles");
            return ExitCode::FAILURE;
        }
    };

    let dialects = DialectRegistry::builtin();
    let registry = match DatasourceRegistry::<datasource_tx::DbPool>::connect(profiles, &dialects).await
    {
        Ok(registry) => registry.with_default_name(&config.default_datasource),
        Err(e) => {
            error!(error = %e, suggestion = e.suggestion(), "Failed to initialize datasources");
            return ExitCode::FAILURE;
        }
    };

    info!(
        count = registry.len(),
        datasources = ?registry.names(),
        default_datasource = %registry.default_name(),
        "Datasources initialized"
    );
    if !registry.has_default() {
        warn!(
            default_datasource = %registry.default_name(),
            "Default datasource is not configured; transactions without a datasource name will fail"
        );
    }

    let executor = TransactionExecutor::new(Arc::new(registry));

    let mut status = ExitCode::SUCCESS;
    if config.check {
        let failures = check_datasources(&executor).await;
        if failures > 0 {
            error!(failures, "Datasource check failed");
            status = ExitCode::FAILURE;
        }
    }

    executor.registry().close_all().await;
    info!("Shutdown complete");
    status
}
