//! Rebuilding execution chains from stored time blocks.
//!
//! Blocks are the system of record; this is the projection that turns the
//! chain-view-only blocks of a plan back into [`ExecutionChain`]s. It is
//! pure and idempotent: the same blocks always give the same chains.

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;
use uuid::Uuid;

use dayplan_db::models::{
    ActivityType, AnchorType, BlockMetadata, BlockRole, BlockStatus, TimeBlock,
};

use crate::config::ReconstructionConfig;
use crate::domain::{
    Anchor, ChainMetadata, ChainStatus, ChainStepInstance, CommitmentEnvelope, ExecutionChain,
    StepMetadata, StepRole, StepStatus, step_id_for,
};

pub const SYNTHETIC_ANCHOR_TITLE: &str = "Planned commitment";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructError {
    #[error("block {block_id} ends at or before its start")]
    InvalidSpan { block_id: Uuid },

    #[error("chain {chain_id:?} has step {step_id:?} more than once")]
    DuplicateStep { chain_id: String, step_id: String },

    #[error("block {block_id} has unreadable metadata: {message}")]
    InvalidMetadata { block_id: Uuid, message: String },
}

struct TaggedBlock<'a> {
    block: &'a TimeBlock,
    role: BlockRole,
}

pub struct ChainReconstructor {
    config: ReconstructionConfig,
}

impl ChainReconstructor {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self { config }
    }

    /// Chains projected from `blocks`, sorted by anchor start then chain id.
    pub fn reconstruct(&self, blocks: &[TimeBlock]) -> Result<Vec<ExecutionChain>, ReconstructError> {
        let mut groups: BTreeMap<String, Vec<TaggedBlock<'_>>> = BTreeMap::new();
        let mut anchors: Vec<(&TimeBlock, BlockMetadata)> = Vec::new();
        // Stored travel-back and recovery phases, by chain.
        let mut after_anchor: BTreeMap<String, Vec<ChainStepInstance>> = BTreeMap::new();

        for block in blocks {
            let tagged = is_chain_tagged(&block.metadata);
            let metadata = match block.typed_metadata() {
                Ok(m) => m,
                Err(e) if tagged => {
                    return Err(ReconstructError::InvalidMetadata {
                        block_id: block.id,
                        message: e.to_string(),
                    });
                }
                Err(_) => continue,
            };

            if block.activity_type == ActivityType::Commitment {
                anchors.push((block, metadata));
                continue;
            }
            if !metadata.chain_view_only {
                let owner = metadata
                    .role
                    .chain_id()
                    .zip(metadata.role.step_id())
                    .map(|(chain_id, _)| chain_id.to_owned());
                if let Some(chain_id) = owner {
                    if block.end_time > block.start_time {
                        let tagged = TaggedBlock {
                            block,
                            role: metadata.role,
                        };
                        let step = step_from_block(&chain_id, &tagged);
                        after_anchor.entry(chain_id).or_default().push(step);
                    }
                }
                continue;
            }
            if !metadata.role.is_chain_step() {
                continue;
            }
            let Some(chain_id) = metadata.role.chain_id().map(str::to_owned) else {
                continue;
            };
            if block.end_time <= block.start_time {
                return Err(ReconstructError::InvalidSpan { block_id: block.id });
            }
            groups.entry(chain_id).or_default().push(TaggedBlock {
                block,
                role: metadata.role,
            });
        }

        let mut chains = Vec::with_capacity(groups.len());
        for (chain_id, mut group) in groups {
            group.sort_by_key(|t| (t.block.start_time, t.block.sequence_order));
            let stored_phases = after_anchor.get(&chain_id).map(Vec::as_slice).unwrap_or(&[]);
            chains.push(self.rebuild_chain(chain_id, &group, &anchors, stored_phases)?);
        }
        chains.sort_by(|a, b| {
            (a.anchor.start, &a.chain_id).cmp(&(b.anchor.start, &b.chain_id))
        });
        Ok(chains)
    }

    fn rebuild_chain(
        &self,
        chain_id: String,
        group: &[TaggedBlock<'_>],
        anchors: &[(&TimeBlock, BlockMetadata)],
        stored_phases: &[ChainStepInstance],
    ) -> Result<ExecutionChain, ReconstructError> {
        let mut seen = HashSet::with_capacity(group.len());
        let mut steps = Vec::with_capacity(group.len());
        for tagged in group {
            let step = step_from_block(&chain_id, tagged);
            if !seen.insert(step.step_id.clone()) {
                return Err(ReconstructError::DuplicateStep {
                    chain_id,
                    step_id: step.step_id,
                });
            }
            steps.push(step);
        }

        // Both are present: groups are never empty.
        let chain_start = steps.iter().map(|s| s.start_time).min().unwrap_or_default();
        let deadline = steps.iter().map(|s| s.end_time).max().unwrap_or_default();

        let anchor_id = group
            .iter()
            .find_map(|t| t.role.anchor_id())
            .unwrap_or_default()
            .to_owned();
        let anchor = find_anchor(&anchor_id, anchors).unwrap_or_else(|| Anchor {
            id: anchor_id.clone(),
            title: SYNTHETIC_ANCHOR_TITLE.to_owned(),
            start: deadline + Duration::minutes(self.config.synthetic_anchor_offset_minutes),
            end: deadline
                + Duration::minutes(
                    self.config.synthetic_anchor_offset_minutes
                        + self.config.synthetic_anchor_minutes.max(1),
                ),
            location: None,
            anchor_type: AnchorType::Other,
            must_attend: true,
            calendar_event_id: None,
        });

        let status = chain_status(&steps);
        let commitment_envelope =
            self.envelope(&chain_id, &anchor, chain_start, &steps, stored_phases);

        Ok(ExecutionChain {
            chain_id,
            anchor_id,
            anchor,
            chain_completion_deadline: deadline,
            steps,
            commitment_envelope,
            status,
            metadata: ChainMetadata {
                compressed: false,
                reconstructed_from_time_blocks: true,
                chain_start,
            },
        })
    }

    /// Envelope around the anchor. Each phase takes its span from the stored
    /// step or block when there is one; missing phases get the configured
    /// travel and recovery durations, with prep from the chain start up to
    /// travel and at least a minute long.
    fn envelope(
        &self,
        chain_id: &str,
        anchor: &Anchor,
        chain_start: NaiveDateTime,
        steps: &[ChainStepInstance],
        stored_phases: &[ChainStepInstance],
    ) -> CommitmentEnvelope {
        let travel = Duration::minutes(self.config.travel_minutes.max(1));
        let recovery = Duration::minutes(self.config.recovery_minutes.max(1));

        let find = |name: &str| {
            let step_id = step_id_for(chain_id, name);
            steps
                .iter()
                .chain(stored_phases)
                .find(|s| s.step_id == step_id)
        };
        let span = |name: &str| find(name).map(|s| (s.start_time, s.end_time));

        let there = span("travel-there").unwrap_or((anchor.start - travel, anchor.start));
        let prep = span("prep")
            .unwrap_or((chain_start.min(there.0 - Duration::minutes(1)), there.0));
        let back = span("travel-back").unwrap_or((anchor.end, anchor.end + travel));
        let rest = span("recovery").unwrap_or((back.1, back.1 + recovery));

        let phase = |name: &str, label: String, (start, end): (NaiveDateTime, NaiveDateTime), role| {
            let step_id = step_id_for(chain_id, name);
            let existing = find(name);
            ChainStepInstance {
                step_id,
                chain_id: chain_id.to_owned(),
                name: existing.map(|s| s.name.clone()).unwrap_or(label),
                start_time: start,
                end_time: end,
                duration_minutes: (end - start).num_minutes(),
                is_required: existing.map(|s| s.is_required).unwrap_or(true),
                can_skip_when_late: existing.map(|s| s.can_skip_when_late).unwrap_or(false),
                status: existing.map(|s| s.status).unwrap_or(StepStatus::Pending),
                role,
                skip_reason: existing.and_then(|s| s.skip_reason.clone()),
                metadata: existing.map(|s| s.metadata.clone()).unwrap_or_default(),
            }
        };

        CommitmentEnvelope {
            prep: phase(
                "prep",
                format!("Prepare for {}", anchor.title),
                prep,
                StepRole::ChainStep,
            ),
            travel_there: phase(
                "travel-there",
                format!("Travel to {}", anchor.destination()),
                there,
                StepRole::ExitGate,
            ),
            anchor: ChainStepInstance {
                is_required: anchor.must_attend,
                can_skip_when_late: !anchor.must_attend,
                ..phase(
                    "anchor",
                    anchor.title.clone(),
                    (anchor.start, anchor.end),
                    StepRole::Anchor,
                )
            },
            travel_back: phase(
                "travel-back",
                format!("Travel back from {}", anchor.destination()),
                back,
                StepRole::ChainStep,
            ),
            recovery: ChainStepInstance {
                is_required: false,
                can_skip_when_late: true,
                ..phase(
                    "recovery",
                    format!("Recover after {}", anchor.title),
                    rest,
                    StepRole::Recovery,
                )
            },
        }
    }
}

/// Whether raw metadata claims a chain role, even if it does not parse.
fn is_chain_tagged(metadata: &serde_json::Value) -> bool {
    metadata
        .get("role")
        .and_then(|r| r.get("type"))
        .and_then(|t| t.as_str())
        .is_some_and(|t| t == "chain-step" || t == "exit-gate")
}

fn step_from_block(chain_id: &str, tagged: &TaggedBlock<'_>) -> ChainStepInstance {
    let block = tagged.block;
    let (role, step_id, is_required, can_skip_when_late, gate_conditions) = match &tagged.role {
        BlockRole::ExitGate {
            step_id,
            is_required,
            can_skip_when_late,
            gate_conditions,
            ..
        } => (
            StepRole::ExitGate,
            step_id.clone(),
            *is_required,
            *can_skip_when_late,
            gate_conditions.clone(),
        ),
        BlockRole::ChainStep {
            step_id,
            is_required,
            can_skip_when_late,
            ..
        } => (
            StepRole::ChainStep,
            step_id.clone(),
            *is_required,
            *can_skip_when_late,
            Vec::new(),
        ),
        BlockRole::Recovery { step_id, .. } => {
            (StepRole::Recovery, step_id.clone(), false, true, Vec::new())
        }
        // Filtered out before grouping.
        _ => (StepRole::ChainStep, block.id.to_string(), true, false, Vec::new()),
    };

    ChainStepInstance {
        step_id,
        chain_id: chain_id.to_owned(),
        name: block.activity_name.clone(),
        start_time: block.start_time,
        end_time: block.end_time,
        duration_minutes: block.duration_minutes(),
        is_required,
        can_skip_when_late,
        status: step_status(block.status),
        role,
        skip_reason: block.skip_reason.clone(),
        metadata: StepMetadata { gate_conditions },
    }
}

fn step_status(status: BlockStatus) -> StepStatus {
    StepStatus::from(status)
}

fn chain_status(steps: &[ChainStepInstance]) -> ChainStatus {
    if steps.iter().all(|s| s.status == StepStatus::Completed) {
        ChainStatus::Completed
    } else if steps.iter().any(|s| s.status == StepStatus::InProgress) {
        ChainStatus::InProgress
    } else {
        ChainStatus::Pending
    }
}

fn find_anchor(anchor_id: &str, anchors: &[(&TimeBlock, BlockMetadata)]) -> Option<Anchor> {
    let (block, metadata) = anchors
        .iter()
        .find(|(_, m)| m.role.anchor_id() == Some(anchor_id))
        .or_else(|| {
            anchors
                .iter()
                .find(|(b, _)| b.activity_id.as_deref() == Some(anchor_id))
        })?;

    let (anchor_type, location, must_attend, calendar_event_id) = match &metadata.role {
        BlockRole::Anchor {
            anchor_type,
            location,
            must_attend,
            calendar_event_id,
            ..
        } => (
            *anchor_type,
            location.clone(),
            *must_attend,
            calendar_event_id.clone(),
        ),
        _ => (AnchorType::Other, None, true, None),
    };

    Some(Anchor {
        id: anchor_id.to_owned(),
        title: block.activity_name.clone(),
        start: block.start_time,
        end: block.end_time,
        location,
        anchor_type,
        must_attend,
        calendar_event_id,
    })
}
