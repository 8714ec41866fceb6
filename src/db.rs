use std::{future::Future, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::Instrument;

use crate::{
    config::AppConfig,
    errors::{Error, Result, StoreFault},
};

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.store_timeout)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;
    Ok(db)
}

pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}

/// Runs one store round-trip under `limit`. Elapsed time and driver errors
/// both surface as `StoreFailure`.
pub async fn timed<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let span = tracing::debug_span!("db.query", db.system = "postgresql", db.operation = operation);
    match tokio::time::timeout(limit, fut).instrument(span).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => {
            tracing::warn!(operation, ?limit, "store operation timed out");
            Err(Error::StoreFailure(StoreFault::Timeout(limit)))
        }
    }
}

/// Name of the violated unique constraint, if `err` is a unique violation.
pub fn unique_violation(err: &Error) -> Option<&str> {
    match err {
        Error::StoreFailure(StoreFault::Sqlx(sqlx::Error::Database(db_err)))
            if db_err.code().is_some_and(|code| code.as_ref() == UNIQUE_VIOLATION) =>
        {
            Some(db_err.constraint().unwrap_or_default())
        }
        _ => None,
    }
}

/// Translates a zero-row `fetch_one` into `NotFound`.
pub fn not_found(err: Error) -> Error {
    match err {
        Error::StoreFailure(StoreFault::Sqlx(sqlx::Error::RowNotFound)) => Error::NotFound,
        other => other,
    }
}
