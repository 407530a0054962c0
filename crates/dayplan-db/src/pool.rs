use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/dayplan-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables owned by this crate, in dependency order.
pub const TABLES: [&str; 3] = ["daily_plans", "time_blocks", "exit_times"];

/// Create a connection pool with sensible defaults.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.redacted_url()))?;
    Ok(pool)
}

/// Run all pending embedded migrations against the pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!("migrations applied successfully");
    Ok(())
}

/// Ensure the target database exists, creating it if necessary.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;

    // CREATE DATABASE cannot take a bind parameter.
    if !db_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("database name {:?} contains invalid characters", db_name);
    }

    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.maintenance_url())
        .await
        .context("failed to connect to maintenance database")?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint_pool)
            .await
            .context("failed to query pg_database")?;

    if exists {
        info!(db = db_name, "database already exists");
    } else {
        let stmt = format!("CREATE DATABASE {db_name}");
        maint_pool
            .execute(stmt.as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "database created");
    }

    maint_pool.close().await;
    Ok(())
}

/// Row counts for the scheduler's tables, for the `db-init` summary.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let (count,): (i64,) = sqlx::query_as(&query)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table.to_owned(), count));
    }
    Ok(counts)
}
