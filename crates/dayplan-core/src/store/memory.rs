//! In-process [`PlanStore`] for tests and dry runs.

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use dayplan_db::models::{
    BlockTiming, DailyPlanRow, ExitTime, NewDailyPlan, NewExitTime, NewTimeBlock, StoredPlan,
    TimeBlock,
};

use super::{PlanStore, StoreError};

#[derive(Default)]
struct Tables {
    plans: HashMap<Uuid, DailyPlanRow>,
    blocks: HashMap<Uuid, TimeBlock>,
    exits: HashMap<Uuid, ExitTime>,
}

impl Tables {
    fn plan_blocks(&self, plan_id: Uuid) -> Vec<TimeBlock> {
        let mut blocks: Vec<TimeBlock> = self
            .blocks
            .values()
            .filter(|b| b.plan_id == plan_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| (b.sequence_order, b.start_time));
        blocks
    }

    fn plan_exits(&self, plan_id: Uuid) -> Vec<ExitTime> {
        let mut rows: Vec<ExitTime> = self
            .exits
            .values()
            .filter(|e| e.plan_id == plan_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.exit_at);
        rows
    }

    fn has_plan_for(&self, user_id: &str, date: NaiveDate) -> bool {
        self.plans
            .values()
            .any(|p| p.user_id == user_id && p.plan_date == date)
    }

    fn insert_plan(&mut self, plan: &NewDailyPlan) -> DailyPlanRow {
        let row = DailyPlanRow {
            id: Uuid::new_v4(),
            user_id: plan.user_id.clone(),
            plan_date: plan.plan_date,
            wake_time: plan.wake_time,
            sleep_time: plan.sleep_time,
            plan_start: plan.plan_start,
            energy_state: plan.energy_state,
            created_at: Utc::now(),
        };
        self.plans.insert(row.id, row.clone());
        row
    }

    fn insert_blocks(&mut self, plan_id: Uuid, blocks: &[NewTimeBlock]) {
        for block in blocks {
            let row = block.clone().into_time_block(Uuid::new_v4(), plan_id);
            self.blocks.insert(row.id, row);
        }
    }

    fn insert_exits(&mut self, plan_id: Uuid, exits: &[NewExitTime]) -> Vec<ExitTime> {
        let rows: Vec<ExitTime> = exits
            .iter()
            .map(|e| ExitTime {
                id: Uuid::new_v4(),
                plan_id,
                chain_id: e.chain_id.clone(),
                anchor_id: e.anchor_id.clone(),
                exit_at: e.exit_at,
            })
            .collect();
        for row in &rows {
            self.exits.insert(row.id, row.clone());
        }
        rows
    }

    fn remove_plan(&mut self, plan_id: Uuid) -> bool {
        let removed = self.plans.remove(&plan_id).is_some();
        self.blocks.retain(|_, b| b.plan_id != plan_id);
        self.exits.retain(|_, e| e.plan_id != plan_id);
        removed
    }
}

/// Reject what the database constraints would: empty spans and two exits
/// for one chain.
fn check_rows(blocks: &[NewTimeBlock], exits: &[NewExitTime]) -> Result<(), StoreError> {
    if let Some(bad) = blocks.iter().find(|b| b.end_time <= b.start_time) {
        return Err(StoreError::Backend(anyhow!(
            "time block {:?} does not end after it starts",
            bad.activity_name
        )));
    }
    let mut chains = HashSet::new();
    if let Some(dup) = exits.iter().find(|e| !chains.insert(e.chain_id.as_str())) {
        return Err(StoreError::Backend(anyhow!(
            "duplicate exit time for chain {}",
            dup.chain_id
        )));
    }
    Ok(())
}

/// Every operation takes one lock, so each call is atomic.
#[derive(Default)]
pub struct MemoryPlanStore {
    tables: Mutex<Tables>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn plan_count(&self) -> usize {
        self.tables.lock().await.plans.len()
    }

    pub async fn block_count(&self) -> usize {
        self.tables.lock().await.blocks.len()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn create_daily_plan(&self, plan: &NewDailyPlan) -> Result<DailyPlanRow, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.has_plan_for(&plan.user_id, plan.plan_date) {
            return Err(StoreError::DuplicatePlan);
        }
        Ok(tables.insert_plan(plan))
    }

    async fn replace_daily_plan(
        &self,
        replaced: Option<Uuid>,
        plan: &NewDailyPlan,
        blocks: &[NewTimeBlock],
        exits: &[NewExitTime],
    ) -> Result<StoredPlan, StoreError> {
        check_rows(blocks, exits)?;
        let mut tables = self.tables.lock().await;

        let conflicting = tables.plans.values().any(|p| {
            p.user_id == plan.user_id && p.plan_date == plan.plan_date && Some(p.id) != replaced
        });
        if conflicting {
            return Err(StoreError::DuplicatePlan);
        }
        if let Some(old) = replaced {
            tables.remove_plan(old);
        }

        let row = tables.insert_plan(plan);
        tables.insert_blocks(row.id, blocks);
        let exit_times = tables.insert_exits(row.id, exits);
        Ok(StoredPlan {
            blocks: tables.plan_blocks(row.id),
            exit_times,
            plan: row,
        })
    }

    async fn get_daily_plan_by_date_with_blocks(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<(DailyPlanRow, Vec<TimeBlock>)>, StoreError> {
        let tables = self.tables.lock().await;
        let plan = tables
            .plans
            .values()
            .find(|p| p.user_id == user_id && p.plan_date == date)
            .cloned();
        Ok(plan.map(|p| {
            let blocks = tables.plan_blocks(p.id);
            (p, blocks)
        }))
    }

    async fn delete_daily_plan(&self, plan_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.remove_plan(plan_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("plan {plan_id}")))
        }
    }

    async fn delete_time_blocks_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.blocks.len();
        tables.blocks.retain(|_, b| b.plan_id != plan_id);
        Ok((before - tables.blocks.len()) as u64)
    }

    async fn delete_exit_times_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.exits.len();
        tables.exits.retain(|_, e| e.plan_id != plan_id);
        Ok((before - tables.exits.len()) as u64)
    }

    async fn create_time_blocks(
        &self,
        plan_id: Uuid,
        blocks: &[NewTimeBlock],
    ) -> Result<Vec<TimeBlock>, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.plans.contains_key(&plan_id) {
            return Err(StoreError::NotFound(format!("plan {plan_id}")));
        }
        tables.insert_blocks(plan_id, blocks);
        Ok(tables.plan_blocks(plan_id))
    }

    async fn create_exit_times(
        &self,
        plan_id: Uuid,
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.plans.contains_key(&plan_id) {
            return Err(StoreError::NotFound(format!("plan {plan_id}")));
        }
        Ok(tables.insert_exits(plan_id, exits))
    }

    async fn list_exit_times(&self, plan_id: Uuid) -> Result<Vec<ExitTime>, StoreError> {
        Ok(self.tables.lock().await.plan_exits(plan_id))
    }

    async fn get_time_block_for_user(
        &self,
        block_id: Uuid,
        user_id: &str,
    ) -> Result<Option<TimeBlock>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .blocks
            .get(&block_id)
            .filter(|b| {
                tables
                    .plans
                    .get(&b.plan_id)
                    .is_some_and(|p| p.user_id == user_id)
            })
            .cloned())
    }

    async fn update_time_block(&self, block: &TimeBlock) -> Result<TimeBlock, StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .blocks
            .get_mut(&block.id)
            .ok_or_else(|| StoreError::NotFound(format!("time block {}", block.id)))?;
        stored.status = block.status;
        stored.skip_reason = block.skip_reason.clone();
        stored.metadata = block.metadata.clone();
        Ok(stored.clone())
    }

    async fn apply_block_timings(
        &self,
        plan_id: Uuid,
        timings: &[BlockTiming],
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError> {
        check_rows(&[], exits)?;
        let mut tables = self.tables.lock().await;
        if let Some(missing) = timings.iter().find(|t| {
            tables
                .blocks
                .get(&t.block_id)
                .is_none_or(|b| b.plan_id != plan_id)
        }) {
            return Err(StoreError::NotFound(format!("time block {}", missing.block_id)));
        }
        for t in timings {
            if let Some(block) = tables.blocks.get_mut(&t.block_id) {
                block.start_time = t.start_time;
                block.end_time = t.end_time;
                block.sequence_order = t.sequence_order;
            }
        }
        tables.exits.retain(|_, e| e.plan_id != plan_id);
        tables.insert_exits(plan_id, exits);
        Ok(tables.plan_exits(plan_id))
    }
}
