//! Database query functions for the `time_blocks` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{BlockStatus, BlockTiming, NewExitTime, NewTimeBlock, TimeBlock};
use crate::queries::exit_times;

/// Insert all blocks for a plan in one transaction, returning the stored rows
/// in `sequence_order`.
pub async fn insert_time_blocks(
    pool: &PgPool,
    plan_id: Uuid,
    blocks: &[NewTimeBlock],
) -> Result<Vec<TimeBlock>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let rows = insert_time_blocks_in(&mut *tx, plan_id, blocks).await?;
    tx.commit().await.context("failed to commit transaction")?;
    Ok(rows)
}

/// Insert blocks on an open connection or transaction.
pub(crate) async fn insert_time_blocks_in(
    conn: &mut PgConnection,
    plan_id: Uuid,
    blocks: &[NewTimeBlock],
) -> Result<Vec<TimeBlock>> {
    let mut rows = Vec::with_capacity(blocks.len());

    for block in blocks {
        let row = sqlx::query_as::<_, TimeBlock>(
            "INSERT INTO time_blocks \
             (plan_id, activity_type, activity_id, activity_name, start_time, end_time, \
              sequence_order, status, skip_reason, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING *",
        )
        .bind(plan_id)
        .bind(block.activity_type)
        .bind(&block.activity_id)
        .bind(&block.activity_name)
        .bind(block.start_time)
        .bind(block.end_time)
        .bind(block.sequence_order)
        .bind(block.status)
        .bind(&block.skip_reason)
        .bind(block.metadata.to_value())
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to insert time block {:?}", block.activity_name))?;
        rows.push(row);
    }

    rows.sort_by_key(|b| (b.sequence_order, b.start_time));
    Ok(rows)
}

/// List a plan's blocks ordered by `sequence_order`, then start.
pub async fn list_time_blocks_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<TimeBlock>> {
    let rows = sqlx::query_as::<_, TimeBlock>(
        "SELECT * FROM time_blocks WHERE plan_id = $1 ORDER BY sequence_order ASC, start_time ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list time blocks for plan")?;

    Ok(rows)
}

/// Fetch a block, but only if it belongs to one of `user_id`'s plans.
pub async fn get_time_block_for_user(
    pool: &PgPool,
    block_id: Uuid,
    user_id: &str,
) -> Result<Option<TimeBlock>> {
    let row = sqlx::query_as::<_, TimeBlock>(
        "SELECT tb.* FROM time_blocks tb \
         JOIN daily_plans dp ON dp.id = tb.plan_id \
         WHERE tb.id = $1 AND dp.user_id = $2",
    )
    .bind(block_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch time block")?;

    Ok(row)
}

/// Overwrite the mutable fields of a block (status, skip reason, metadata).
pub async fn update_time_block(
    pool: &PgPool,
    id: Uuid,
    status: BlockStatus,
    skip_reason: Option<&str>,
    metadata: &Value,
) -> Result<TimeBlock> {
    let row = sqlx::query_as::<_, TimeBlock>(
        "UPDATE time_blocks SET status = $1, skip_reason = $2, metadata = $3 \
         WHERE id = $4 \
         RETURNING *",
    )
    .bind(status)
    .bind(skip_reason)
    .bind(metadata)
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to update time block")?;

    row.with_context(|| format!("time block {id} not found"))
}

/// Apply new placements to a set of blocks of one plan and replace the
/// plan's exit times, all in a single transaction.
///
/// Every referenced block must exist in `plan_id`; otherwise nothing is
/// written. Returns the IDs that did not match, which is empty on success.
pub async fn apply_block_timings(
    pool: &PgPool,
    plan_id: Uuid,
    timings: &[BlockTiming],
    exits: &[NewExitTime],
) -> Result<Vec<Uuid>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let mut missing = Vec::new();

    for t in timings {
        let result = sqlx::query(
            "UPDATE time_blocks SET start_time = $1, end_time = $2, sequence_order = $3 \
             WHERE id = $4 AND plan_id = $5",
        )
        .bind(t.start_time)
        .bind(t.end_time)
        .bind(t.sequence_order)
        .bind(t.block_id)
        .bind(plan_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to update timing of block {}", t.block_id))?;

        if result.rows_affected() == 0 {
            missing.push(t.block_id);
        }
    }

    if !missing.is_empty() {
        // Dropping the transaction rolls back the partial batch.
        return Ok(missing);
    }

    exit_times::delete_exit_times_in(&mut *tx, plan_id).await?;
    exit_times::insert_exit_times_in(&mut *tx, plan_id, exits).await?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(missing)
}

/// Delete every block of a plan. Returns the number of rows removed.
pub async fn delete_time_blocks_by_plan(pool: &PgPool, plan_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM time_blocks WHERE plan_id = $1")
        .bind(plan_id)
        .execute(pool)
        .await
        .context("failed to delete time blocks")?;

    Ok(result.rows_affected())
}

/// Count a plan's blocks.
pub async fn count_time_blocks(pool: &PgPool, plan_id: Uuid) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM time_blocks WHERE plan_id = $1")
        .bind(plan_id)
        .fetch_one(pool)
        .await
        .context("failed to count time blocks")?;

    Ok(count)
}
