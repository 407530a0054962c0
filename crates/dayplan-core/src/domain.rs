//! Structured day-plan model: anchors, execution chains, wake ramps and the
//! home/away timeline.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dayplan_db::models::{AnchorType, BlockStatus, EnergyState, ExitTime, TimeBlock};

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

/// A fixed calendar commitment. Read-only to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "type", default = "default_anchor_type")]
    pub anchor_type: AnchorType,
    #[serde(default = "default_must_attend")]
    pub must_attend: bool,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
}

fn default_anchor_type() -> AnchorType {
    AnchorType::Other
}

fn default_must_attend() -> bool {
    true
}

impl Anchor {
    /// Where the user travels to: the location, or the title when the
    /// calendar entry carries none.
    pub fn destination(&self) -> &str {
        self.location.as_deref().unwrap_or(&self.title)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepRole {
    ChainStep,
    ExitGate,
    Anchor,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl From<BlockStatus> for StepStatus {
    fn from(status: BlockStatus) -> Self {
        match status {
            BlockStatus::Pending => Self::Pending,
            BlockStatus::InProgress => Self::InProgress,
            BlockStatus::Completed => Self::Completed,
            BlockStatus::Skipped => Self::Skipped,
        }
    }
}

impl From<StepStatus> for BlockStatus {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Pending => Self::Pending,
            StepStatus::InProgress => Self::InProgress,
            StepStatus::Completed => Self::Completed,
            StepStatus::Skipped => Self::Skipped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    /// Checklist for leaving the house; only set on exit-gate steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gate_conditions: Vec<String>,
}

/// One scheduled step of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStepInstance {
    pub step_id: String,
    pub chain_id: String,
    pub name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_minutes: i64,
    pub is_required: bool,
    pub can_skip_when_late: bool,
    pub status: StepStatus,
    pub role: StepRole,
    #[serde(default)]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub metadata: StepMetadata,
}

/// The canonical five phases around one anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentEnvelope {
    pub prep: ChainStepInstance,
    pub travel_there: ChainStepInstance,
    pub anchor: ChainStepInstance,
    pub travel_back: ChainStepInstance,
    pub recovery: ChainStepInstance,
}

impl CommitmentEnvelope {
    pub fn phases(&self) -> [&ChainStepInstance; 5] {
        [
            &self.prep,
            &self.travel_there,
            &self.anchor,
            &self.travel_back,
            &self.recovery,
        ]
    }

    /// The phases during which the user is away from home.
    pub fn away_phases(&self) -> [&ChainStepInstance; 3] {
        [&self.travel_there, &self.anchor, &self.travel_back]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    /// Prep and travel were shrunk to fit the available lead time.
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub reconstructed_from_time_blocks: bool,
    pub chain_start: NaiveDateTime,
}

/// Everything required to satisfy one anchor.
///
/// `steps` are the steps that must finish by `chain_completion_deadline`;
/// the full five-phase picture is in `commitment_envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionChain {
    pub chain_id: String,
    pub anchor_id: String,
    pub anchor: Anchor,
    pub chain_completion_deadline: NaiveDateTime,
    pub steps: Vec<ChainStepInstance>,
    pub commitment_envelope: CommitmentEnvelope,
    pub status: ChainStatus,
    pub metadata: ChainMetadata,
}

/// Deterministic chain id for an anchor.
pub fn chain_id_for(anchor_id: &str) -> String {
    format!("chain-{anchor_id}")
}

/// Deterministic step id for one phase of a chain.
pub fn step_id_for(chain_id: &str, phase: &str) -> String {
    format!("{chain_id}-{phase}")
}

// ---------------------------------------------------------------------------
// Wake ramp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampStep {
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_minutes: i64,
}

/// Graduated steps spanning `[plan_start, wake_time)`, or skipped when the
/// plan starts at or after wake time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeRamp {
    pub plan_start: NaiveDateTime,
    pub wake_time: NaiveDateTime,
    pub skipped: bool,
    pub steps: Vec<RampStep>,
}

impl WakeRamp {
    pub fn skipped(plan_start: NaiveDateTime, wake_time: NaiveDateTime) -> Self {
        Self {
            plan_start,
            wake_time,
            skipped: true,
            steps: Vec::new(),
        }
    }

    pub fn total_minutes(&self) -> i64 {
        self.steps.iter().map(|s| (s.end - s.start).num_minutes()).sum()
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationState {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub state: LocationState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Alternating home/away intervals tiling a plan window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationTimeline {
    pub intervals: Vec<LocationInterval>,
}

impl LocationTimeline {
    pub fn home_intervals(&self) -> Vec<HomeInterval> {
        self.of_state(LocationState::Home)
    }

    pub fn away_intervals(&self) -> Vec<HomeInterval> {
        self.of_state(LocationState::Away)
    }

    fn of_state(&self, state: LocationState) -> Vec<HomeInterval> {
        self.intervals
            .iter()
            .filter(|i| i.state == state)
            .map(|i| HomeInterval {
                start: i.start,
                end: i.end,
            })
            .collect()
    }

    /// Where the user is at `at`, if it falls inside the window.
    pub fn state_at(&self, at: NaiveDateTime) -> Option<LocationState> {
        self.intervals
            .iter()
            .find(|i| i.start <= at && at < i.end)
            .map(|i| i.state)
    }
}

// ---------------------------------------------------------------------------
// Daily plan
// ---------------------------------------------------------------------------

/// Input to plan generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanInput {
    pub user_id: String,
    pub date: NaiveDate,
    pub wake_time: NaiveTime,
    /// Rolled to the next day when not after `wake_time`.
    pub sleep_time: NaiveTime,
    pub energy_state: EnergyState,
    /// Used only when the calendar yields no anchors for the date.
    pub manual_anchor: Option<Anchor>,
    /// Wall-clock time of the request, in the same local frame as the plan.
    pub now: NaiveDateTime,
}

/// One user's plan for one date, with its derived views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPlan {
    pub id: Uuid,
    pub user_id: String,
    pub date: NaiveDate,
    pub wake_time: NaiveDateTime,
    pub sleep_time: NaiveDateTime,
    pub plan_start: NaiveDateTime,
    pub energy_state: EnergyState,
    pub time_blocks: Vec<TimeBlock>,
    pub chains: Vec<ExecutionChain>,
    pub wake_ramp: WakeRamp,
    pub home_intervals: Vec<HomeInterval>,
    pub exit_times: Vec<ExitTime>,
}

/// Drop seconds and sub-second precision.
pub fn floor_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t.time());
    NaiveDateTime::new(t.date(), time)
}
