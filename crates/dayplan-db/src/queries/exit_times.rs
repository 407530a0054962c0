//! Database query functions for the `exit_times` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{ExitTime, NewExitTime};

/// Insert the derived exit times of a plan.
pub async fn insert_exit_times(
    pool: &PgPool,
    plan_id: Uuid,
    exits: &[NewExitTime],
) -> Result<Vec<ExitTime>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let rows = insert_exit_times_in(&mut *tx, plan_id, exits).await?;
    tx.commit().await.context("failed to commit transaction")?;
    Ok(rows)
}

pub(crate) async fn insert_exit_times_in(
    conn: &mut PgConnection,
    plan_id: Uuid,
    exits: &[NewExitTime],
) -> Result<Vec<ExitTime>> {
    let mut rows = Vec::with_capacity(exits.len());

    for exit in exits {
        let row = sqlx::query_as::<_, ExitTime>(
            "INSERT INTO exit_times (plan_id, chain_id, anchor_id, exit_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING *",
        )
        .bind(plan_id)
        .bind(&exit.chain_id)
        .bind(&exit.anchor_id)
        .bind(exit.exit_at)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to insert exit time for chain {}", exit.chain_id))?;
        rows.push(row);
    }

    Ok(rows)
}

/// List a plan's exit times, earliest first.
pub async fn list_exit_times_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<ExitTime>> {
    let rows = sqlx::query_as::<_, ExitTime>(
        "SELECT * FROM exit_times WHERE plan_id = $1 ORDER BY exit_at ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list exit times")?;

    Ok(rows)
}

/// Delete a plan's exit times. Returns the number of rows removed.
pub async fn delete_exit_times_by_plan(pool: &PgPool, plan_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM exit_times WHERE plan_id = $1")
        .bind(plan_id)
        .execute(pool)
        .await
        .context("failed to delete exit times")?;

    Ok(result.rows_affected())
}

pub(crate) async fn delete_exit_times_in(conn: &mut PgConnection, plan_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM exit_times WHERE plan_id = $1")
        .bind(plan_id)
        .execute(&mut *conn)
        .await
        .context("failed to delete exit times")?;

    Ok(result.rows_affected())
}
