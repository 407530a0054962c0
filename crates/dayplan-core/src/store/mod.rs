//! Plan persistence.
//!
//! [`PlanStore`] is the storage seam of the scheduler. [`PgPlanStore`]
//! backs it with the `dayplan-db` queries; [`MemoryPlanStore`] keeps
//! everything in process and enforces the same one-plan-per-user-and-date
//! rule.

mod memory;
mod postgres;

pub use memory::MemoryPlanStore;
pub use postgres::PgPlanStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use dayplan_db::models::{
    BlockTiming, DailyPlanRow, ExitTime, NewDailyPlan, NewExitTime, NewTimeBlock, StoredPlan,
    TimeBlock,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A plan for the same user and date already exists.
    #[error("a plan for this user and date already exists")]
    DuplicatePlan,

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Fails with [`StoreError::DuplicatePlan`] when the user already has a
    /// plan for `plan.plan_date`.
    async fn create_daily_plan(&self, plan: &NewDailyPlan) -> Result<DailyPlanRow, StoreError>;

    /// Write `plan` together with its blocks and exit times as one unit,
    /// deleting `replaced` first. Readers see either the previous plan or
    /// the complete new one.
    ///
    /// Fails with [`StoreError::DuplicatePlan`] when the user has a plan for
    /// the date other than `replaced`.
    async fn replace_daily_plan(
        &self,
        replaced: Option<Uuid>,
        plan: &NewDailyPlan,
        blocks: &[NewTimeBlock],
        exits: &[NewExitTime],
    ) -> Result<StoredPlan, StoreError>;

    /// The plan and its blocks in `sequence_order`.
    async fn get_daily_plan_by_date_with_blocks(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<(DailyPlanRow, Vec<TimeBlock>)>, StoreError>;

    async fn delete_daily_plan(&self, plan_id: Uuid) -> Result<(), StoreError>;

    async fn delete_time_blocks_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError>;

    async fn delete_exit_times_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError>;

    async fn create_time_blocks(
        &self,
        plan_id: Uuid,
        blocks: &[NewTimeBlock],
    ) -> Result<Vec<TimeBlock>, StoreError>;

    async fn create_exit_times(
        &self,
        plan_id: Uuid,
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError>;

    async fn list_exit_times(&self, plan_id: Uuid) -> Result<Vec<ExitTime>, StoreError>;

    /// A block, only if it belongs to one of `user_id`'s plans.
    async fn get_time_block_for_user(
        &self,
        block_id: Uuid,
        user_id: &str,
    ) -> Result<Option<TimeBlock>, StoreError>;

    /// Persist the status, skip reason and metadata of `block`.
    async fn update_time_block(&self, block: &TimeBlock) -> Result<TimeBlock, StoreError>;

    /// Move several blocks of one plan at once and replace the plan's exit
    /// times with `exits`. Either everything is applied or nothing is; an
    /// unknown block yields [`StoreError::NotFound`]. Returns the stored exit
    /// times.
    async fn apply_block_timings(
        &self,
        plan_id: Uuid,
        timings: &[BlockTiming],
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore) {}
};
