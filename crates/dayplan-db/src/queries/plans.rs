//! Database query functions for the `daily_plans` table.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{DailyPlanRow, NewDailyPlan, NewExitTime, NewTimeBlock, StoredPlan};
use crate::queries::{exit_times, time_blocks};

/// Name of the unique constraint guarding one plan per user and date.
pub const USER_DATE_CONSTRAINT: &str = "daily_plans_user_date_key";

/// Insert a new plan row, stamped with the application clock.
///
/// Fails with a unique violation on [`USER_DATE_CONSTRAINT`] when a plan for
/// the same user and date already exists; see [`is_duplicate_plan`].
pub async fn insert_daily_plan(pool: &PgPool, plan: &NewDailyPlan) -> Result<DailyPlanRow> {
    let mut conn = pool.acquire().await.context("failed to acquire connection")?;
    insert_daily_plan_in(&mut *conn, plan).await
}

async fn insert_daily_plan_in(conn: &mut PgConnection, plan: &NewDailyPlan) -> Result<DailyPlanRow> {
    let row = sqlx::query_as::<_, DailyPlanRow>(
        "INSERT INTO daily_plans \
         (user_id, plan_date, wake_time, sleep_time, plan_start, energy_state, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&plan.user_id)
    .bind(plan.plan_date)
    .bind(plan.wake_time)
    .bind(plan.sleep_time)
    .bind(plan.plan_start)
    .bind(plan.energy_state)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| {
        format!(
            "failed to insert daily plan for user {} on {}",
            plan.user_id, plan.plan_date
        )
    })?;

    Ok(row)
}

/// Fetch a plan by its ID.
pub async fn get_daily_plan(pool: &PgPool, id: Uuid) -> Result<Option<DailyPlanRow>> {
    let row = sqlx::query_as::<_, DailyPlanRow>("SELECT * FROM daily_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch daily plan")?;

    Ok(row)
}

/// Fetch a user's plan for a date.
pub async fn get_daily_plan_by_date(
    pool: &PgPool,
    user_id: &str,
    plan_date: NaiveDate,
) -> Result<Option<DailyPlanRow>> {
    let row = sqlx::query_as::<_, DailyPlanRow>(
        "SELECT * FROM daily_plans WHERE user_id = $1 AND plan_date = $2",
    )
    .bind(user_id)
    .bind(plan_date)
    .fetch_optional(pool)
    .await
    .context("failed to fetch daily plan by date")?;

    Ok(row)
}

/// List a user's plans, newest date first.
pub async fn list_daily_plans(pool: &PgPool, user_id: &str) -> Result<Vec<DailyPlanRow>> {
    let rows = sqlx::query_as::<_, DailyPlanRow>(
        "SELECT * FROM daily_plans WHERE user_id = $1 ORDER BY plan_date DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list daily plans")?;

    Ok(rows)
}

/// Write a whole plan in one transaction.
///
/// Deletes `replaced` first when given (its blocks and exit times cascade),
/// then inserts the plan row, its blocks and its exit times. Other
/// connections see either the old plan or the complete new one. A plan for
/// the same user and date other than `replaced` fails the insert; see
/// [`is_duplicate_plan`].
pub async fn replace_daily_plan(
    pool: &PgPool,
    replaced: Option<Uuid>,
    plan: &NewDailyPlan,
    blocks: &[NewTimeBlock],
    exits: &[NewExitTime],
) -> Result<StoredPlan> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    if let Some(old) = replaced {
        sqlx::query("DELETE FROM daily_plans WHERE id = $1")
            .bind(old)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to delete replaced plan {old}"))?;
    }

    let row = insert_daily_plan_in(&mut *tx, plan).await?;
    let stored_blocks = time_blocks::insert_time_blocks_in(&mut *tx, row.id, blocks).await?;
    let stored_exits = exit_times::insert_exit_times_in(&mut *tx, row.id, exits).await?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(StoredPlan {
        plan: row,
        blocks: stored_blocks,
        exit_times: stored_exits,
    })
}

/// Delete a plan. Returns `false` when no such plan existed. Time blocks and
/// exit times cascade.
pub async fn delete_daily_plan(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM daily_plans WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete daily plan")?;

    Ok(result.rows_affected() > 0)
}

/// Whether `err` was caused by a second plan for the same user and date.
pub fn is_duplicate_plan(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<sqlx::Error>())
        .filter_map(|e| e.as_database_error())
        .any(|db| db.is_unique_violation() && db.constraint() == Some(USER_DATE_CONSTRAINT))
}
