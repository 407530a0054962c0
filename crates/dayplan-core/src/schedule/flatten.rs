//! Flattening the structured plan into storable time blocks.

use dayplan_db::models::{
    ActivityType, BlockMetadata, BlockRole, BlockStatus, NewExitTime, NewTimeBlock,
};

use crate::domain::{ChainStepInstance, ExecutionChain, StepRole, WakeRamp};

/// Every block of a plan: wake-ramp steps plus all five phases of every
/// chain, with `sequence_order` assigned by start time.
///
/// Only the pre-anchor steps are tagged chain-view-only; they are what
/// [`super::ChainReconstructor`] reads back.
pub fn flatten_plan(ramp: &WakeRamp, chains: &[ExecutionChain]) -> Vec<NewTimeBlock> {
    let mut blocks: Vec<NewTimeBlock> = Vec::new();

    for step in &ramp.steps {
        blocks.push(NewTimeBlock {
            activity_type: ActivityType::WakeRamp,
            activity_id: None,
            activity_name: step.name.clone(),
            start_time: step.start,
            end_time: step.end,
            sequence_order: 0,
            status: BlockStatus::Pending,
            skip_reason: None,
            metadata: BlockMetadata::plain(),
        });
    }

    for chain in chains {
        for step in &chain.steps {
            blocks.push(chain_step_block(chain, step));
        }
        let env = &chain.commitment_envelope;
        blocks.push(anchor_block(chain));
        blocks.push(step_block(
            ActivityType::Travel,
            &env.travel_back,
            BlockMetadata::with_role(chain_step_role(chain, &env.travel_back), false),
        ));
        blocks.push(step_block(
            ActivityType::Recovery,
            &env.recovery,
            BlockMetadata::with_role(
                BlockRole::Recovery {
                    chain_id: chain.chain_id.clone(),
                    step_id: env.recovery.step_id.clone(),
                },
                false,
            ),
        ));
    }

    // Stable: equal starts keep ramp-then-chain, phase order.
    blocks.sort_by_key(|b| b.start_time);
    for (i, block) in blocks.iter_mut().enumerate() {
        block.sequence_order = i as i32;
    }
    blocks
}

/// One exit time per chain: when the user must leave.
pub fn exit_times(chains: &[ExecutionChain]) -> Vec<NewExitTime> {
    chains
        .iter()
        .map(|c| NewExitTime {
            chain_id: c.chain_id.clone(),
            anchor_id: c.anchor_id.clone(),
            exit_at: c.commitment_envelope.travel_there.start_time,
        })
        .collect()
}

fn chain_step_block(chain: &ExecutionChain, step: &ChainStepInstance) -> NewTimeBlock {
    match step.role {
        StepRole::ExitGate => step_block(
            ActivityType::Travel,
            step,
            BlockMetadata::with_role(
                BlockRole::ExitGate {
                    chain_id: chain.chain_id.clone(),
                    step_id: step.step_id.clone(),
                    anchor_id: chain.anchor_id.clone(),
                    is_required: step.is_required,
                    can_skip_when_late: step.can_skip_when_late,
                    gate_conditions: step.metadata.gate_conditions.clone(),
                },
                true,
            ),
        ),
        _ => step_block(
            ActivityType::ChainStep,
            step,
            BlockMetadata::with_role(chain_step_role(chain, step), true),
        ),
    }
}

fn chain_step_role(chain: &ExecutionChain, step: &ChainStepInstance) -> BlockRole {
    BlockRole::ChainStep {
        chain_id: chain.chain_id.clone(),
        step_id: step.step_id.clone(),
        anchor_id: chain.anchor_id.clone(),
        is_required: step.is_required,
        can_skip_when_late: step.can_skip_when_late,
    }
}

fn anchor_block(chain: &ExecutionChain) -> NewTimeBlock {
    let anchor = &chain.anchor;
    let mut block = step_block(
        ActivityType::Commitment,
        &chain.commitment_envelope.anchor,
        BlockMetadata::with_role(
            BlockRole::Anchor {
                chain_id: chain.chain_id.clone(),
                anchor_id: anchor.id.clone(),
                anchor_type: anchor.anchor_type,
                location: anchor.location.clone(),
                must_attend: anchor.must_attend,
                calendar_event_id: anchor.calendar_event_id.clone(),
            },
            false,
        ),
    );
    block.activity_id = Some(anchor.id.clone());
    block
}

fn step_block(
    activity_type: ActivityType,
    step: &ChainStepInstance,
    metadata: BlockMetadata,
) -> NewTimeBlock {
    NewTimeBlock {
        activity_type,
        activity_id: Some(step.step_id.clone()),
        activity_name: step.name.clone(),
        start_time: step.start_time,
        end_time: step.end_time,
        sequence_order: 0,
        status: step.status.into(),
        skip_reason: step.skip_reason.clone(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveDateTime};
    use dayplan_db::models::{AnchorType, EnergyState};

    use crate::collab::{FixedTravelEstimator, TablePrepEstimator};
    use crate::config::{RampConfig, SchedulerConfig};
    use crate::domain::Anchor;
    use crate::schedule::chain::{ChainGenerator, GenerationConfig};
    use crate::schedule::ramp::WakeRampGenerator;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    async fn calc_chain() -> ExecutionChain {
        let generator = ChainGenerator::new(
            Arc::new(FixedTravelEstimator::new(18)),
            Arc::new(TablePrepEstimator::default()),
            &SchedulerConfig::default(),
        );
        let anchor = Anchor {
            id: "calc".to_owned(),
            title: "Calculus".to_owned(),
            start: at(9, 0),
            end: at(10, 0),
            location: Some("North Campus".to_owned()),
            anchor_type: AnchorType::Class,
            must_attend: true,
            calendar_event_id: Some("evt-9".to_owned()),
        };
        let config = GenerationConfig {
            user_id: "u1".to_owned(),
            date: at(0, 0).date(),
            current_location: None,
            user_energy: 3,
            earliest_start: Some(at(6, 30)),
        };
        generator.generate(&anchor, &config).await
    }

    #[tokio::test]
    async fn blocks_sorted_with_sequence_order() {
        let ramp = WakeRampGenerator::new(RampConfig::default()).generate(
            at(6, 30),
            at(7, 0),
            EnergyState::High,
        );
        let blocks = flatten_plan(&ramp, &[calc_chain().await]);

        assert_eq!(blocks.len(), 2 + 5);
        for (i, b) in blocks.iter().enumerate() {
            assert_eq!(b.sequence_order, i as i32);
            assert!(b.end_time > b.start_time);
        }
        for pair in blocks.windows(2) {
            assert!(pair[0].start_time <= pair[1].start_time);
        }
        assert_eq!(blocks[0].activity_type, ActivityType::WakeRamp);
        assert_eq!(blocks[0].metadata.role, BlockRole::Plain);
    }

    #[tokio::test]
    async fn roles_and_view_flags() {
        let ramp = WakeRamp::skipped(at(7, 0), at(7, 0));
        let blocks = flatten_plan(&ramp, &[calc_chain().await]);
        let kinds: Vec<(ActivityType, bool)> = blocks
            .iter()
            .map(|b| (b.activity_type, b.metadata.chain_view_only))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ActivityType::ChainStep, true),
                (ActivityType::Travel, true),
                (ActivityType::Commitment, false),
                (ActivityType::Travel, false),
                (ActivityType::Recovery, false),
            ]
        );

        let BlockRole::ExitGate { gate_conditions, .. } = &blocks[1].metadata.role else {
            panic!("expected exit gate, got {:?}", blocks[1].metadata.role);
        };
        assert!(gate_conditions.contains(&"arrive at North Campus".to_owned()));

        assert_eq!(blocks[2].activity_id.as_deref(), Some("calc"));
        let BlockRole::Anchor { calendar_event_id, .. } = &blocks[2].metadata.role else {
            panic!("expected anchor role");
        };
        assert_eq!(calendar_event_id.as_deref(), Some("evt-9"));
    }

    #[tokio::test]
    async fn one_exit_time_per_chain() {
        let exits = exit_times(&[calc_chain().await]);
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].chain_id, "chain-calc");
        assert_eq!(exits[0].exit_at, at(8, 42));
    }
}
