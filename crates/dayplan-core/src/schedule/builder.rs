//! Plan generation for one user and day.
//!
//! Fetch anchors, build chains and the wake ramp, flatten to blocks, and
//! write them in place of whatever plan the user had for the date as one
//! unit. Concurrent generations for the same user and date race on the
//! store's uniqueness rule; the loser reads back the winner's plan.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use dayplan_db::models::{ActivityType, DailyPlanRow, EnergyState, NewDailyPlan, TimeBlock};

use crate::collab::{AnchorProvider, PrepTimeEstimator, TravelEstimator};
use crate::config::{RetryConfig, SchedulerConfig};
use crate::domain::{
    Anchor, DailyPlan, ExecutionChain, PlanInput, RampStep, WakeRamp, floor_to_minute,
};
use crate::error::PlanError;
use crate::store::{PlanStore, StoreError};

use super::chain::{ChainGenerator, GenerationConfig};
use super::flatten::{exit_times, flatten_plan};
use super::location::LocationStateTracker;
use super::ramp::WakeRampGenerator;
use super::reconstruct::ChainReconstructor;

pub struct PlanBuilder {
    anchors: Arc<dyn AnchorProvider>,
    store: Arc<dyn PlanStore>,
    chains: ChainGenerator,
    ramp: WakeRampGenerator,
    reconstructor: ChainReconstructor,
    retry: RetryConfig,
}

impl PlanBuilder {
    pub fn new(
        anchors: Arc<dyn AnchorProvider>,
        travel: Arc<dyn TravelEstimator>,
        prep: Arc<dyn PrepTimeEstimator>,
        store: Arc<dyn PlanStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            anchors,
            store,
            chains: ChainGenerator::new(travel, prep, config),
            ramp: WakeRampGenerator::new(config.ramp.clone()),
            reconstructor: ChainReconstructor::new(config.reconstruction.clone()),
            retry: config.retry.clone(),
        }
    }

    /// Generate and persist the plan for `input.user_id` on `input.date`,
    /// replacing any plan that existed before this call.
    ///
    /// A plan that appears after the call started belongs to a concurrent
    /// generation; it is returned instead of being replaced.
    pub async fn generate_daily_plan(
        &self,
        input: &PlanInput,
        current_location: Option<&str>,
    ) -> Result<DailyPlan, PlanError> {
        let started = Utc::now();
        let (wake_time, sleep_time) = resolve_window(input)?;
        let plan_start = floor_to_minute(input.now)
            .max(self.ramp.earliest_plan_start(wake_time))
            .min(sleep_time);

        let replaced = match self
            .store
            .get_daily_plan_by_date_with_blocks(&input.user_id, input.date)
            .await?
        {
            Some((row, blocks)) if row.created_at >= started => {
                debug!(user_id = %input.user_id, plan_id = %row.id, "plan generated concurrently");
                return self.assemble_stored(row, blocks).await;
            }
            Some((row, _)) => Some(row.id),
            None => None,
        };

        let anchors = self.fetch_anchors(input).await?;
        let gen_config = GenerationConfig {
            user_id: input.user_id.clone(),
            date: input.date,
            current_location: current_location.map(str::to_owned),
            user_energy: input.energy_state.level(),
            earliest_start: Some(plan_start),
        };
        let chains = self.chains.generate_all(&anchors, &gen_config).await;
        let ramp = self.ramp.generate(plan_start, wake_time, input.energy_state);
        let blocks = flatten_plan(&ramp, &chains);
        let exits = exit_times(&chains);

        let new_plan = NewDailyPlan {
            user_id: input.user_id.clone(),
            plan_date: input.date,
            wake_time,
            sleep_time,
            plan_start,
            energy_state: input.energy_state,
        };

        let stored = match self
            .store
            .replace_daily_plan(replaced, &new_plan, &blocks, &exits)
            .await
        {
            Ok(stored) => stored,
            Err(StoreError::DuplicatePlan) => {
                warn!(
                    user_id = %input.user_id,
                    date = %input.date,
                    "plan created concurrently, reading back the winner"
                );
                let (row, blocks) = self.await_concurrent_plan(&input.user_id, input.date).await?;
                return self.assemble_stored(row, blocks).await;
            }
            Err(e) => return Err(e.into()),
        };
        let row = stored.plan;

        if let Some(old) = replaced {
            info!(user_id = %row.user_id, old_plan_id = %old, "replaced existing plan");
        }
        info!(
            user_id = %row.user_id,
            plan_id = %row.id,
            date = %row.plan_date,
            chains = chains.len(),
            blocks = stored.blocks.len(),
            ramp_skipped = ramp.skipped,
            "generated daily plan"
        );

        let home_intervals =
            LocationStateTracker::track(&chains, row.plan_start, row.sleep_time).home_intervals();
        Ok(DailyPlan {
            id: row.id,
            user_id: row.user_id,
            date: row.plan_date,
            wake_time: row.wake_time,
            sleep_time: row.sleep_time,
            plan_start: row.plan_start,
            energy_state: row.energy_state,
            time_blocks: stored.blocks,
            chains,
            wake_ramp: ramp,
            home_intervals,
            exit_times: stored.exit_times,
        })
    }

    /// Read projection of a stored plan: chains rebuilt from blocks, the
    /// wake ramp from its blocks, home intervals recomputed.
    ///
    /// A failed reconstruction is logged and yields no chains.
    pub async fn assemble_stored(
        &self,
        row: DailyPlanRow,
        blocks: Vec<TimeBlock>,
    ) -> Result<DailyPlan, PlanError> {
        let chains = self.reconstruct_or_empty(&row, &blocks);
        let wake_ramp = ramp_from_blocks(&row, &blocks);
        let home_intervals =
            LocationStateTracker::track(&chains, row.plan_start, row.sleep_time).home_intervals();
        let exit_times = self.store.list_exit_times(row.id).await?;

        Ok(DailyPlan {
            id: row.id,
            user_id: row.user_id,
            date: row.plan_date,
            wake_time: row.wake_time,
            sleep_time: row.sleep_time,
            plan_start: row.plan_start,
            energy_state: row.energy_state,
            time_blocks: blocks,
            chains,
            wake_ramp,
            home_intervals,
            exit_times,
        })
    }

    fn reconstruct_or_empty(&self, row: &DailyPlanRow, blocks: &[TimeBlock]) -> Vec<ExecutionChain> {
        match self.reconstructor.reconstruct(blocks) {
            Ok(chains) => chains,
            Err(e) => {
                warn!(plan_id = %row.id, user_id = %row.user_id, "chain reconstruction failed: {e}");
                Vec::new()
            }
        }
    }

    async fn fetch_anchors(&self, input: &PlanInput) -> Result<Vec<Anchor>, PlanError> {
        let fetched = match self
            .anchors
            .get_anchors_for_date(input.date, &input.user_id)
            .await
        {
            Ok(anchors) => anchors,
            Err(e) => {
                warn!(user_id = %input.user_id, date = %input.date, "anchor lookup failed: {e:#}");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let mut anchors: Vec<Anchor> = fetched
            .into_iter()
            .filter(|a| {
                if a.end <= a.start {
                    warn!(anchor_id = %a.id, "skipping anchor that ends before it starts");
                    return false;
                }
                // Chain and step ids derive from the anchor id.
                if !seen.insert(a.id.clone()) {
                    warn!(anchor_id = %a.id, start = %a.start, "skipping anchor with a duplicate id");
                    return false;
                }
                true
            })
            .collect();

        if anchors.is_empty() {
            match &input.manual_anchor {
                Some(manual) if manual.end > manual.start => {
                    debug!(user_id = %input.user_id, "no calendar anchors, using manual anchor");
                    anchors.push(manual.clone());
                }
                _ => return Err(PlanError::ManualAnchorRequired),
            }
        }
        Ok(anchors)
    }

    /// Re-read the plan a concurrent request wrote, backing off until it is
    /// visible.
    async fn await_concurrent_plan(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<(DailyPlanRow, Vec<TimeBlock>), PlanError> {
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            if let Some(found) = self.store.get_daily_plan_by_date_with_blocks(user_id, date).await? {
                return Ok(found);
            }
            if attempt < attempts {
                let delay = backoff_delay(&self.retry, attempt);
                debug!(user_id, %date, attempt, ?delay, "plan not visible yet, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(PlanError::DuplicatePlanRace {
            user_id: user_id.to_owned(),
            date,
        })
    }
}

/// Wake and sleep as instants on the plan date. Sleep at or before wake
/// means the next day; equal times leave no day at all.
pub fn resolve_window(input: &PlanInput) -> Result<(NaiveDateTime, NaiveDateTime), PlanError> {
    if input.sleep_time == input.wake_time {
        return Err(PlanError::InvalidSleepWindow {
            wake: input.wake_time,
            sleep: input.sleep_time,
        });
    }
    let wake = input.date.and_time(input.wake_time);
    let mut sleep = input.date.and_time(input.sleep_time);
    if sleep <= wake {
        sleep += Duration::days(1);
    }
    Ok((wake, sleep))
}

/// Parse a user-supplied energy state.
pub fn parse_energy_state(value: &str) -> Result<EnergyState, PlanError> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| PlanError::UnsupportedEnergyState(value.to_owned()))
}

/// Exponential backoff with jitter: `base * 2^(attempt-1) + rand(0..=jitter)`.
fn backoff_delay(retry: &RetryConfig, attempt: u32) -> StdDuration {
    let exp = retry
        .base_delay_ms
        .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let jitter = if retry.jitter_ms > 0 {
        rand::rng().random_range(0..=retry.jitter_ms)
    } else {
        0
    };
    StdDuration::from_millis(exp + jitter)
}

fn ramp_from_blocks(row: &DailyPlanRow, blocks: &[TimeBlock]) -> WakeRamp {
    let steps: Vec<RampStep> = blocks
        .iter()
        .filter(|b| b.activity_type == ActivityType::WakeRamp)
        .map(|b| RampStep {
            name: b.activity_name.clone(),
            start: b.start_time,
            end: b.end_time,
            duration_minutes: b.duration_minutes(),
        })
        .collect();

    if steps.is_empty() {
        WakeRamp::skipped(row.plan_start, row.wake_time)
    } else {
        WakeRamp {
            plan_start: row.plan_start,
            wake_time: row.wake_time,
            skipped: false,
            steps,
        }
    }
}
