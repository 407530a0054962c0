//! [`PlanStore`] over PostgreSQL.

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use dayplan_db::models::{
    BlockTiming, DailyPlanRow, ExitTime, NewDailyPlan, NewExitTime, NewTimeBlock, StoredPlan,
    TimeBlock,
};
use dayplan_db::queries::{exit_times, plans, time_blocks};

use super::{PlanStore, StoreError};

#[derive(Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn create_daily_plan(&self, plan: &NewDailyPlan) -> Result<DailyPlanRow, StoreError> {
        plans::insert_daily_plan(&self.pool, plan)
            .await
            .map_err(plan_write_error)
    }

    async fn replace_daily_plan(
        &self,
        replaced: Option<Uuid>,
        plan: &NewDailyPlan,
        blocks: &[NewTimeBlock],
        exits: &[NewExitTime],
    ) -> Result<StoredPlan, StoreError> {
        plans::replace_daily_plan(&self.pool, replaced, plan, blocks, exits)
            .await
            .map_err(plan_write_error)
    }

    async fn get_daily_plan_by_date_with_blocks(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<(DailyPlanRow, Vec<TimeBlock>)>, StoreError> {
        let Some(plan) = plans::get_daily_plan_by_date(&self.pool, user_id, date).await? else {
            return Ok(None);
        };
        let blocks = time_blocks::list_time_blocks_for_plan(&self.pool, plan.id).await?;
        Ok(Some((plan, blocks)))
    }

    async fn delete_daily_plan(&self, plan_id: Uuid) -> Result<(), StoreError> {
        if plans::delete_daily_plan(&self.pool, plan_id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("plan {plan_id}")))
        }
    }

    async fn delete_time_blocks_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError> {
        Ok(time_blocks::delete_time_blocks_by_plan(&self.pool, plan_id).await?)
    }

    async fn delete_exit_times_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError> {
        Ok(exit_times::delete_exit_times_by_plan(&self.pool, plan_id).await?)
    }

    async fn create_time_blocks(
        &self,
        plan_id: Uuid,
        blocks: &[NewTimeBlock],
    ) -> Result<Vec<TimeBlock>, StoreError> {
        Ok(time_blocks::insert_time_blocks(&self.pool, plan_id, blocks).await?)
    }

    async fn create_exit_times(
        &self,
        plan_id: Uuid,
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError> {
        Ok(exit_times::insert_exit_times(&self.pool, plan_id, exits).await?)
    }

    async fn list_exit_times(&self, plan_id: Uuid) -> Result<Vec<ExitTime>, StoreError> {
        Ok(exit_times::list_exit_times_for_plan(&self.pool, plan_id).await?)
    }

    async fn get_time_block_for_user(
        &self,
        block_id: Uuid,
        user_id: &str,
    ) -> Result<Option<TimeBlock>, StoreError> {
        Ok(time_blocks::get_time_block_for_user(&self.pool, block_id, user_id).await?)
    }

    async fn update_time_block(&self, block: &TimeBlock) -> Result<TimeBlock, StoreError> {
        Ok(time_blocks::update_time_block(
            &self.pool,
            block.id,
            block.status,
            block.skip_reason.as_deref(),
            &block.metadata,
        )
        .await?)
    }

    async fn apply_block_timings(
        &self,
        plan_id: Uuid,
        timings: &[BlockTiming],
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError> {
        let missing = time_blocks::apply_block_timings(&self.pool, plan_id, timings, exits)
            .await
            .with_context(|| format!("failed to reflow blocks of plan {plan_id}"))?;
        if let Some(id) = missing.first() {
            return Err(StoreError::NotFound(format!("time block {id}")));
        }
        Ok(exit_times::list_exit_times_for_plan(&self.pool, plan_id).await?)
    }
}

fn plan_write_error(e: anyhow::Error) -> StoreError {
    if plans::is_duplicate_plan(&e) {
        StoreError::DuplicatePlan
    } else {
        StoreError::Backend(e)
    }
}
