//! Concurrent plan generation for the same user and date.
//!
//! Two requests that both see "no plan yet" race on the store's
//! uniqueness rule. A request that arrives once the other's plan is written
//! takes that plan instead of replacing it. Either way exactly one plan
//! survives and both callers get it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::sync::Barrier;
use uuid::Uuid;

use dayplan_core::collab::{FixedTravelEstimator, StaticAnchorProvider, TablePrepEstimator};
use dayplan_core::config::RetryConfig;
use dayplan_core::domain::{Anchor, PlanInput};
use dayplan_core::store::{MemoryPlanStore, PlanStore, StoreError};
use dayplan_core::{PlanService, SchedulerConfig};
use dayplan_db::models::{
    AnchorType, BlockTiming, DailyPlanRow, EnergyState, ExitTime, NewDailyPlan, NewExitTime,
    NewTimeBlock, StoredPlan, TimeBlock,
};

// ===========================================================================
// Scripted store
// ===========================================================================

/// Delegates to a [`MemoryPlanStore`], holding the first `gate` plan reads
/// at a barrier so every racer sees the same empty state. With
/// `phantom_winner`, every write reports a duplicate that never shows up.
/// `op_delay` slows every read and write down.
struct ScriptedStore {
    inner: MemoryPlanStore,
    barrier: Barrier,
    gate: usize,
    reads: AtomicUsize,
    phantom_winner: bool,
    op_delay: Duration,
}

impl ScriptedStore {
    fn racing(racers: usize) -> Self {
        Self {
            inner: MemoryPlanStore::new(),
            barrier: Barrier::new(racers),
            gate: racers,
            reads: AtomicUsize::new(0),
            phantom_winner: false,
            op_delay: Duration::ZERO,
        }
    }

    fn slow(op_delay: Duration) -> Self {
        Self {
            gate: 0,
            op_delay,
            ..Self::racing(1)
        }
    }

    fn phantom() -> Self {
        Self {
            phantom_winner: true,
            gate: 0,
            ..Self::racing(1)
        }
    }
}

#[async_trait]
impl PlanStore for ScriptedStore {
    async fn create_daily_plan(&self, plan: &NewDailyPlan) -> Result<DailyPlanRow, StoreError> {
        if self.phantom_winner {
            return Err(StoreError::DuplicatePlan);
        }
        self.inner.create_daily_plan(plan).await
    }

    async fn replace_daily_plan(
        &self,
        replaced: Option<Uuid>,
        plan: &NewDailyPlan,
        blocks: &[NewTimeBlock],
        exits: &[NewExitTime],
    ) -> Result<StoredPlan, StoreError> {
        tokio::time::sleep(self.op_delay).await;
        if self.phantom_winner {
            return Err(StoreError::DuplicatePlan);
        }
        self.inner.replace_daily_plan(replaced, plan, blocks, exits).await
    }

    async fn get_daily_plan_by_date_with_blocks(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<(DailyPlanRow, Vec<TimeBlock>)>, StoreError> {
        tokio::time::sleep(self.op_delay).await;
        let result = self.inner.get_daily_plan_by_date_with_blocks(user_id, date).await;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.gate {
            self.barrier.wait().await;
        }
        result
    }

    async fn delete_daily_plan(&self, plan_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_daily_plan(plan_id).await
    }

    async fn delete_time_blocks_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError> {
        self.inner.delete_time_blocks_by_plan(plan_id).await
    }

    async fn delete_exit_times_by_plan(&self, plan_id: Uuid) -> Result<u64, StoreError> {
        self.inner.delete_exit_times_by_plan(plan_id).await
    }

    async fn create_time_blocks(
        &self,
        plan_id: Uuid,
        blocks: &[NewTimeBlock],
    ) -> Result<Vec<TimeBlock>, StoreError> {
        self.inner.create_time_blocks(plan_id, blocks).await
    }

    async fn create_exit_times(
        &self,
        plan_id: Uuid,
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError> {
        self.inner.create_exit_times(plan_id, exits).await
    }

    async fn list_exit_times(&self, plan_id: Uuid) -> Result<Vec<ExitTime>, StoreError> {
        self.inner.list_exit_times(plan_id).await
    }

    async fn get_time_block_for_user(
        &self,
        block_id: Uuid,
        user_id: &str,
    ) -> Result<Option<TimeBlock>, StoreError> {
        self.inner.get_time_block_for_user(block_id, user_id).await
    }

    async fn update_time_block(&self, block: &TimeBlock) -> Result<TimeBlock, StoreError> {
        self.inner.update_time_block(block).await
    }

    async fn apply_block_timings(
        &self,
        plan_id: Uuid,
        timings: &[BlockTiming],
        exits: &[NewExitTime],
    ) -> Result<Vec<ExitTime>, StoreError> {
        self.inner.apply_block_timings(plan_id, timings, exits).await
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    date().and_hms_opt(h, m, 0).unwrap()
}

fn input() -> PlanInput {
    PlanInput {
        user_id: "u1".to_owned(),
        date: date(),
        wake_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        sleep_time: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
        energy_state: EnergyState::Low,
        manual_anchor: None,
        now: at(6, 0),
    }
}

fn service(store: Arc<ScriptedStore>) -> PlanService {
    let anchor = Anchor {
        id: "calc-101".to_owned(),
        title: "Calculus".to_owned(),
        start: at(9, 0),
        end: at(10, 0),
        location: None,
        anchor_type: AnchorType::Class,
        must_attend: true,
        calendar_event_id: None,
    };
    let config = SchedulerConfig {
        retry: RetryConfig {
            attempts: 3,
            base_delay_ms: 5,
            jitter_ms: 2,
        },
        ..SchedulerConfig::default()
    };
    PlanService::new(
        Arc::new(StaticAnchorProvider::new(vec![anchor])),
        Arc::new(FixedTravelEstimator::new(18)),
        Arc::new(TablePrepEstimator::default()),
        store,
        &config,
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn concurrent_generation_yields_one_plan() {
    let store = Arc::new(ScriptedStore::racing(2));
    let a = service(store.clone());
    let b = service(store.clone());
    let req = input();

    let (first, second) = tokio::join!(a.generate(&req, None), b.generate(&req, None));
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.time_blocks, second.time_blocks);
    assert_eq!(store.inner.plan_count().await, 1);
    assert_eq!(store.inner.block_count().await, first.time_blocks.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_generation_on_multi_thread_runtime() {
    let store = Arc::new(ScriptedStore::racing(2));
    let a = Arc::new(service(store.clone()));
    let b = Arc::new(service(store.clone()));

    let ha = tokio::spawn(async move { a.generate(&input(), None).await });
    let hb = tokio::spawn(async move { b.generate(&input(), None).await });
    let first = ha.await.unwrap().unwrap();
    let second = hb.await.unwrap().unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(store.inner.plan_count().await, 1);
}

#[tokio::test]
async fn later_request_takes_the_plan_written_meanwhile() {
    // Every store call takes 20ms. A reads at 20ms and writes at 40ms; B
    // starts at 30ms and reads at 50ms, after A's plan is in.
    let store = Arc::new(ScriptedStore::slow(Duration::from_millis(20)));
    let a = service(store.clone());
    let b = service(store.clone());
    let req = input();

    let late = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        b.generate(&req, None).await
    };
    let (first, second) = tokio::join!(a.generate(&req, None), late);
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.time_blocks, second.time_blocks);
    assert_eq!(store.inner.plan_count().await, 1);
    let (row, _) = store
        .inner
        .get_daily_plan_by_date_with_blocks("u1", date())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.id, first.id);
}

#[tokio::test]
async fn regeneration_after_completion_replaces() {
    let store = Arc::new(ScriptedStore::slow(Duration::ZERO));
    let first = service(store.clone()).generate(&input(), None).await.unwrap();
    let second = service(store.clone()).generate(&input(), None).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(store.inner.plan_count().await, 1);
}

#[tokio::test]
async fn unreadable_winner_surfaces_race_error() {
    let store = Arc::new(ScriptedStore::phantom());
    let err = service(store).generate(&input(), None).await.unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_PLAN_RACE");
}
