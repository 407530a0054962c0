//! Shared test utilities for dayplan integration tests.
//!
//! Provides one PostgreSQL server per test binary; each test gets its own
//! freshly migrated database on it.
//!
//! - **`DAYPLAN_TEST_PG_URL`** set: use that server directly (CI runs one
//!   container up front).
//! - Otherwise start a container through testcontainers, shared through a
//!   `OnceCell`.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use dayplan_db::pool;

struct SharedPg {
    base_url: String,
    /// Keeps the container alive. `None` when using an external server.
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var("DAYPLAN_TEST_PG_URL") {
        return SharedPg {
            base_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server URL (no database name) of the shared PostgreSQL.
pub async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.base_url
}

async fn maintenance_pool() -> PgPool {
    let maint_url = format!("{}/postgres", pg_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
        .expect("failed to connect to maintenance database")
}

/// Create a uniquely named database with migrations applied.
///
/// Returns `(pool, db_name)`; pass `db_name` to [`drop_test_db`] when done.
pub async fn create_test_db() -> (PgPool, String) {
    let maint_pool = maintenance_pool().await;
    let db_name = format!("dayplan_test_{}", Uuid::new_v4().simple());
    maint_pool
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create temp database {db_name}: {e}"));
    maint_pool.close().await;

    let temp_url = format!("{}/{db_name}", pg_url().await);
    let temp_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&temp_url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to temp database {db_name}: {e}"));

    pool::run_migrations(&temp_pool)
        .await
        .expect("migrations should succeed");

    (temp_pool, db_name)
}

/// Terminate connections to and drop a database created by
/// [`create_test_db`]. Safe to call twice.
pub async fn drop_test_db(db_name: &str) {
    let maint_pool = maintenance_pool().await;

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;
    let _ = maint_pool
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    maint_pool.close().await;
}
