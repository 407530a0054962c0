//! Execution chain generation: prep, travel, attend, travel back and
//! recover around one anchor.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::collab::{PrepTimeEstimator, TravelEstimator};
use crate::config::SchedulerConfig;
use crate::domain::{
    Anchor, ChainMetadata, ChainStatus, ChainStepInstance, CommitmentEnvelope, ExecutionChain,
    StepMetadata, StepRole, StepStatus, chain_id_for, step_id_for,
};

/// Per-day parameters shared by every chain of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub user_id: String,
    pub date: NaiveDate,
    /// Where the user departs from; the home location when `None`.
    pub current_location: Option<String>,
    /// Energy on the 1-5 scale.
    pub user_energy: u8,
    /// Nothing may be scheduled before this instant (the plan start).
    pub earliest_start: Option<NaiveDateTime>,
}

pub struct ChainGenerator {
    travel: Arc<dyn TravelEstimator>,
    prep: Arc<dyn PrepTimeEstimator>,
    recovery_minutes: i64,
    fallback_travel_minutes: i64,
    home_location: String,
}

impl ChainGenerator {
    pub fn new(
        travel: Arc<dyn TravelEstimator>,
        prep: Arc<dyn PrepTimeEstimator>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            travel,
            prep,
            recovery_minutes: config.recovery_minutes.max(1),
            fallback_travel_minutes: config.fallback_travel_minutes.max(1),
            home_location: config.home_location.clone(),
        }
    }

    /// One chain per anchor, sorted by anchor start.
    pub async fn generate_all(
        &self,
        anchors: &[Anchor],
        config: &GenerationConfig,
    ) -> Vec<ExecutionChain> {
        let mut chains = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            chains.push(self.generate(anchor, config).await);
        }
        chains.sort_by(|a, b| {
            (a.anchor.start, &a.chain_id).cmp(&(b.anchor.start, &b.chain_id))
        });
        chains
    }

    /// Build the chain for one anchor.
    ///
    /// Travel-there ends exactly at `anchor.start` and prep ends exactly
    /// where travel-there begins. When the lead time from
    /// `earliest_start` cannot hold both, travel and prep are shrunk (each
    /// to at least one minute) and the chain is marked compressed.
    pub async fn generate(&self, anchor: &Anchor, config: &GenerationConfig) -> ExecutionChain {
        let chain_id = chain_id_for(&anchor.id);
        let origin = config
            .current_location
            .as_deref()
            .unwrap_or(&self.home_location);
        let destination = anchor.destination();

        let mut travel_minutes = self.travel_minutes(origin, destination).await;
        // The return trip is the outbound route reversed.
        let travel_back_minutes = self.travel_minutes(destination, origin).await;
        let mut prep_minutes = self
            .prep
            .estimate(anchor.anchor_type, config.user_energy)
            .max(1);

        let mut compressed = false;
        if let Some(earliest) = config.earliest_start {
            let lead = (anchor.start - earliest).num_minutes();
            if prep_minutes + travel_minutes > lead {
                compressed = true;
                travel_minutes = travel_minutes.min(lead - 1).max(1);
                prep_minutes = (lead - travel_minutes).max(1);
                debug!(
                    chain_id = %chain_id,
                    lead,
                    travel_minutes,
                    prep_minutes,
                    "compressed chain to fit lead time"
                );
            }
        }

        let travel_start = anchor.start - Duration::minutes(travel_minutes);
        let prep_start = travel_start - Duration::minutes(prep_minutes);
        let back_end = anchor.end + Duration::minutes(travel_back_minutes);
        let recovery_end = back_end + Duration::minutes(self.recovery_minutes);

        let step = |phase: &str,
                    name: String,
                    start: NaiveDateTime,
                    end: NaiveDateTime,
                    role: StepRole| ChainStepInstance {
            step_id: step_id_for(&chain_id, phase),
            chain_id: chain_id.clone(),
            name,
            start_time: start,
            end_time: end,
            duration_minutes: (end - start).num_minutes(),
            is_required: true,
            can_skip_when_late: false,
            status: StepStatus::Pending,
            role,
            skip_reason: None,
            metadata: StepMetadata::default(),
        };

        let prep = ChainStepInstance {
            is_required: anchor.must_attend,
            can_skip_when_late: true,
            ..step(
                "prep",
                format!("Prepare for {}", anchor.title),
                prep_start,
                travel_start,
                StepRole::ChainStep,
            )
        };
        let travel_there = ChainStepInstance {
            metadata: StepMetadata {
                gate_conditions: gate_conditions(anchor.location.as_deref()),
            },
            ..step(
                "travel-there",
                format!("Travel to {destination}"),
                travel_start,
                anchor.start,
                StepRole::ExitGate,
            )
        };
        let attend = ChainStepInstance {
            is_required: anchor.must_attend,
            can_skip_when_late: !anchor.must_attend,
            ..step(
                "anchor",
                anchor.title.clone(),
                anchor.start,
                anchor.end,
                StepRole::Anchor,
            )
        };
        let travel_back = step(
            "travel-back",
            format!("Travel back from {destination}"),
            anchor.end,
            back_end,
            StepRole::ChainStep,
        );
        let recovery = ChainStepInstance {
            is_required: false,
            can_skip_when_late: true,
            ..step(
                "recovery",
                format!("Recover after {}", anchor.title),
                back_end,
                recovery_end,
                StepRole::Recovery,
            )
        };

        debug!(
            chain_id = %chain_id,
            user_id = %config.user_id,
            prep_start = %prep_start,
            "generated chain"
        );

        ExecutionChain {
            chain_id: chain_id.clone(),
            anchor_id: anchor.id.clone(),
            anchor: anchor.clone(),
            chain_completion_deadline: anchor.start,
            steps: vec![prep.clone(), travel_there.clone()],
            commitment_envelope: CommitmentEnvelope {
                prep,
                travel_there,
                anchor: attend,
                travel_back,
                recovery,
            },
            status: ChainStatus::Pending,
            metadata: ChainMetadata {
                compressed,
                reconstructed_from_time_blocks: false,
                chain_start: prep_start,
            },
        }
    }

    async fn travel_minutes(&self, from: &str, to: &str) -> i64 {
        match self.travel.estimate(from, to).await {
            Ok(est) => est.minutes.max(1),
            Err(e) => {
                warn!(
                    from,
                    to,
                    fallback = self.fallback_travel_minutes,
                    "travel estimate failed: {e:#}"
                );
                self.fallback_travel_minutes
            }
        }
    }
}

/// Checklist for the exit gate.
pub fn gate_conditions(location: Option<&str>) -> Vec<String> {
    let mut conditions: Vec<String> = ["keys", "phone", "wallet"]
        .into_iter()
        .map(String::from)
        .collect();
    if let Some(location) = location {
        conditions.push(format!("arrive at {location}"));
    }
    conditions
}
