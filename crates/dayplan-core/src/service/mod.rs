//! Plan service layer.
//!
//! The application-facing operations: generate a day, read it back,
//! reorder steps within a chain, and merge client metadata into a block.

mod metadata;

pub use metadata::merge_metadata_patch;

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use dayplan_db::models::{
    BlockMetadata, BlockRole, BlockTiming, DailyPlanRow, NewExitTime, TimeBlock,
};

use crate::collab::{
    AnchorProvider, FixedTravelEstimator, PrepTimeEstimator, TablePrepEstimator, TravelEstimator,
};
use crate::config::SchedulerConfig;
use crate::domain::{DailyPlan, PlanInput};
use crate::error::PlanError;
use crate::schedule::PlanBuilder;
use crate::schedule::reflow::{StepDuration, move_step, reflow};
use crate::store::{PlanStore, StoreError};

pub struct PlanService {
    builder: PlanBuilder,
    store: Arc<dyn PlanStore>,
}

impl PlanService {
    pub fn new(
        anchors: Arc<dyn AnchorProvider>,
        travel: Arc<dyn TravelEstimator>,
        prep: Arc<dyn PrepTimeEstimator>,
        store: Arc<dyn PlanStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            builder: PlanBuilder::new(anchors, travel, prep, Arc::clone(&store), config),
            store,
        }
    }

    /// Service with the built-in estimators: fixed travel time and the
    /// per-type preparation table from `config`.
    pub fn with_default_estimators(
        anchors: Arc<dyn AnchorProvider>,
        store: Arc<dyn PlanStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::new(
            anchors,
            Arc::new(FixedTravelEstimator::new(config.default_travel_minutes)),
            Arc::new(TablePrepEstimator::new(config.prep.clone())),
            store,
            config,
        )
    }

    pub async fn generate(
        &self,
        input: &PlanInput,
        current_location: Option<&str>,
    ) -> Result<DailyPlan, PlanError> {
        self.builder.generate_daily_plan(input, current_location).await
    }

    /// The stored plan with chains rebuilt from its blocks.
    pub async fn get_plan(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyPlan>, PlanError> {
        match self
            .store
            .get_daily_plan_by_date_with_blocks(user_id, date)
            .await?
        {
            Some((row, blocks)) => Ok(Some(self.builder.assemble_stored(row, blocks).await?)),
            None => Ok(None),
        }
    }

    /// Move `source_step_id` to `target_step_id`'s position within their
    /// chain and reflow the chain backward from its deadline.
    pub async fn reorder_step(
        &self,
        user_id: &str,
        date: NaiveDate,
        source_step_id: &str,
        target_step_id: &str,
    ) -> Result<DailyPlan, PlanError> {
        let (row, blocks) = self.load(user_id, date).await?;

        let steps = chain_step_blocks(&blocks);
        let chain_of = |step_id: &str| {
            steps
                .iter()
                .find(|(_, m)| m.role.step_id() == Some(step_id))
                .and_then(|(_, m)| m.role.chain_id())
                .map(str::to_owned)
                .ok_or_else(|| PlanError::StaleTimeBlockReference(step_id.to_owned()))
        };
        let source_chain = chain_of(source_step_id)?;
        let target_chain = chain_of(target_step_id)?;
        if source_chain != target_chain {
            return Err(PlanError::CrossChainReorder {
                source_step: source_step_id.to_owned(),
                target_step: target_step_id.to_owned(),
            });
        }
        if source_step_id == target_step_id {
            debug!(user_id, step_id = source_step_id, "reorder onto itself, nothing to do");
            return self.builder.assemble_stored(row, blocks).await;
        }

        let mut chain: Vec<&(&TimeBlock, BlockMetadata)> = steps
            .iter()
            .filter(|(_, m)| m.role.chain_id() == Some(source_chain.as_str()))
            .collect();
        chain.sort_by_key(|(b, _)| (b.start_time, b.sequence_order));

        let order: Vec<String> = chain
            .iter()
            .filter_map(|(_, m)| m.role.step_id().map(str::to_owned))
            .collect();
        let new_order = move_step(&order, source_step_id, target_step_id)?;
        let durations: Vec<StepDuration> = chain
            .iter()
            .filter_map(|(b, m)| {
                m.role.step_id().map(|id| StepDuration {
                    id: id.to_owned(),
                    duration_minutes: b.duration_minutes(),
                })
            })
            .collect();
        let Some(deadline) = chain.iter().map(|(b, _)| b.end_time).max() else {
            return Err(PlanError::StaleTimeBlockReference(source_step_id.to_owned()));
        };

        let timings = reflow(&durations, &new_order, deadline)?;

        let mut slots: Vec<i32> = chain.iter().map(|(b, _)| b.sequence_order).collect();
        slots.sort_unstable();
        let mut updates = Vec::with_capacity(timings.len());
        for (timing, slot) in timings.iter().zip(slots) {
            let block = chain
                .iter()
                .find(|(_, m)| m.role.step_id() == Some(timing.id.as_str()))
                .map(|(b, _)| *b)
                .ok_or_else(|| PlanError::StaleTimeBlockReference(timing.id.clone()))?;
            updates.push(BlockTiming {
                block_id: block.id,
                start_time: timing.start,
                end_time: timing.end,
                sequence_order: slot,
            });
        }

        let exits = exit_times_after(&blocks, &updates);
        self.store
            .apply_block_timings(row.id, &updates, &exits)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(what) => PlanError::StaleTimeBlockReference(what),
                other => other.into(),
            })?;

        info!(
            user_id,
            plan_id = %row.id,
            chain_id = %source_chain,
            source = source_step_id,
            target = target_step_id,
            "reordered chain steps"
        );

        let (row, blocks) = self.load(user_id, date).await?;
        self.builder.assemble_stored(row, blocks).await
    }

    /// Merge a client patch into a block's metadata.
    ///
    /// Blocks of other users' plans are reported as not found.
    pub async fn merge_block_metadata(
        &self,
        user_id: &str,
        block_id: Uuid,
        patch: &Value,
    ) -> Result<TimeBlock, PlanError> {
        let mut block = self
            .store
            .get_time_block_for_user(block_id, user_id)
            .await?
            .ok_or(PlanError::TimeBlockNotFound(block_id))?;

        let mut metadata = block.typed_metadata().map_err(|e| {
            PlanError::InvalidMetadataPatch(format!("stored metadata is unreadable: {e}"))
        })?;
        merge_metadata_patch(&mut metadata, patch)?;
        block.metadata = metadata.to_value();

        let updated = self.store.update_time_block(&block).await?;
        info!(user_id, block_id = %block_id, "merged block metadata");
        Ok(updated)
    }

    async fn load(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<(DailyPlanRow, Vec<TimeBlock>), PlanError> {
        self.store
            .get_daily_plan_by_date_with_blocks(user_id, date)
            .await?
            .ok_or_else(|| PlanError::PlanNotFound {
                user_id: user_id.to_owned(),
                date,
            })
    }
}

/// Exit times once `updates` are applied: each chain leaves when its
/// exit-gate block starts.
fn exit_times_after(blocks: &[TimeBlock], updates: &[BlockTiming]) -> Vec<NewExitTime> {
    chain_step_blocks(blocks)
        .into_iter()
        .filter_map(|(b, m)| match m.role {
            BlockRole::ExitGate {
                chain_id,
                anchor_id,
                ..
            } => Some(NewExitTime {
                chain_id,
                anchor_id,
                exit_at: updates
                    .iter()
                    .find(|u| u.block_id == b.id)
                    .map_or(b.start_time, |u| u.start_time),
            }),
            _ => None,
        })
        .collect()
}

/// Blocks that project into chain steps, with their parsed metadata.
fn chain_step_blocks(blocks: &[TimeBlock]) -> Vec<(&TimeBlock, BlockMetadata)> {
    blocks
        .iter()
        .filter_map(|b| b.typed_metadata().ok().map(|m| (b, m)))
        .filter(|(_, m)| m.chain_view_only && m.role.is_chain_step())
        .collect()
}
