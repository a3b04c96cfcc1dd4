//! Postgres connection management for the `postgres` cache backend.

use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    query,
};
use tracing::info;

use crate::config::DatabaseSettings;

use super::error::InfraError;

/// Open a pool against `settings.url` and bring the schema up to date.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, InfraError> {
    let url = settings
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database.url is required for postgres"))?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections.get())
        .connect(url)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;
    info!(
        max_connections = settings.max_connections.get(),
        "Database pool ready"
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), InfraError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| InfraError::database(format!("migrations failed: {err}")))
}

pub async fn health_check(pool: &PgPool) -> Result<(), InfraError> {
    query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|err| InfraError::database(err.to_string()))
}
