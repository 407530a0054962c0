//! Plan service over PostgreSQL.
//!
//! Each test gets its own migrated database on the shared server from
//! `dayplan-test-utils`.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::json;

use dayplan_core::collab::{FixedTravelEstimator, StaticAnchorProvider, TablePrepEstimator};
use dayplan_core::domain::{Anchor, PlanInput};
use dayplan_core::store::{PgPlanStore, PlanStore, StoreError};
use dayplan_core::{PlanService, SchedulerConfig};
use dayplan_db::models::{AnchorType, EnergyState, NewDailyPlan};
use dayplan_db::queries::{exit_times, plans, time_blocks};
use dayplan_test_utils::{create_test_db, drop_test_db};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    date().and_hms_opt(h, m, 0).unwrap()
}

fn class(start: NaiveDateTime, end: NaiveDateTime) -> Anchor {
    Anchor {
        id: "calc-101".to_owned(),
        title: "Calculus".to_owned(),
        start,
        end,
        location: Some("North Campus".to_owned()),
        anchor_type: AnchorType::Class,
        must_attend: true,
        calendar_event_id: None,
    }
}

fn input() -> PlanInput {
    PlanInput {
        user_id: "u1".to_owned(),
        date: date(),
        wake_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        sleep_time: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
        energy_state: EnergyState::Medium,
        manual_anchor: None,
        now: at(5, 0),
    }
}

fn service(store: PgPlanStore, anchor: Anchor, travel: i64) -> PlanService {
    PlanService::new(
        Arc::new(StaticAnchorProvider::new(vec![anchor])),
        Arc::new(FixedTravelEstimator::new(travel)),
        Arc::new(TablePrepEstimator::default()),
        Arc::new(store),
        &SchedulerConfig::default(),
    )
}

#[tokio::test]
async fn generate_persists_plan_blocks_and_exit_times() {
    let (pool, db_name) = create_test_db().await;
    let svc = service(PgPlanStore::new(pool.clone()), class(at(9, 0), at(10, 0)), 18);

    let plan = svc.generate(&input(), None).await.unwrap();

    let row = plans::get_daily_plan_by_date(&pool, "u1", date())
        .await
        .unwrap()
        .expect("plan row should exist");
    assert_eq!(row.id, plan.id);
    assert_eq!(row.plan_start, at(6, 30));

    let blocks = time_blocks::list_time_blocks_for_plan(&pool, plan.id).await.unwrap();
    assert_eq!(blocks, plan.time_blocks);

    let exits = exit_times::list_exit_times_for_plan(&pool, plan.id).await.unwrap();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].exit_at, at(8, 42));

    let stored = svc.get_plan("u1", date()).await.unwrap().unwrap();
    assert_eq!(stored.chains.len(), 1);
    assert_eq!(stored.chains[0].steps, plan.chains[0].steps);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn regenerate_replaces_rows() {
    let (pool, db_name) = create_test_db().await;
    let svc = service(PgPlanStore::new(pool.clone()), class(at(9, 0), at(10, 0)), 18);

    let first = svc.generate(&input(), None).await.unwrap();
    let second = svc.generate(&input(), None).await.unwrap();
    assert_ne!(first.id, second.id);

    assert!(plans::get_daily_plan(&pool, first.id).await.unwrap().is_none());
    assert_eq!(time_blocks::count_time_blocks(&pool, first.id).await.unwrap(), 0);
    assert_eq!(plans::list_daily_plans(&pool, "u1").await.unwrap().len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn duplicate_insert_maps_to_duplicate_plan() {
    let (pool, db_name) = create_test_db().await;
    let store = PgPlanStore::new(pool.clone());
    let new_plan = NewDailyPlan {
        user_id: "u1".to_owned(),
        plan_date: date(),
        wake_time: at(7, 0),
        sleep_time: at(23, 0),
        plan_start: at(6, 30),
        energy_state: EnergyState::Low,
    };

    store.create_daily_plan(&new_plan).await.unwrap();
    let err = store.create_daily_plan(&new_plan).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicatePlan), "{err:?}");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reorder_and_merge_metadata_round_trip() {
    let (pool, db_name) = create_test_db().await;
    let svc = service(PgPlanStore::new(pool.clone()), class(at(10, 0), at(11, 0)), 15);
    svc.generate(&input(), None).await.unwrap();

    let plan = svc
        .reorder_step("u1", date(), "chain-calc-101-travel-there", "chain-calc-101-prep")
        .await
        .unwrap();
    let steps = &plan.chains[0].steps;
    assert_eq!((steps[0].start_time, steps[0].end_time), (at(9, 35), at(9, 50)));
    assert_eq!((steps[1].start_time, steps[1].end_time), (at(9, 50), at(10, 0)));

    let block_id = plan.time_blocks[0].id;
    let updated = svc
        .merge_block_metadata("u1", block_id, &json!({"note": "water"}))
        .await
        .unwrap();
    assert_eq!(updated.metadata["note"], json!("water"));

    let err = svc
        .merge_block_metadata("someone-else", block_id, &json!({"note": "x"}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TIME_BLOCK_NOT_FOUND");

    pool.close().await;
    drop_test_db(&db_name).await;
}
