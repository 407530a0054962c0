use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Error returned when a stored or user-supplied string does not name a
/// variant of one of the text-backed enums below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Self-reported energy for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EnergyState {
    Low,
    Medium,
    High,
}

impl EnergyState {
    /// Position on the 1-5 energy scale used by duration estimators.
    pub fn level(self) -> u8 {
        match self {
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
        }
    }
}

impl fmt::Display for EnergyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for EnergyState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ParseEnumError::new("energy state", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// What a time block is for. Stored in `time_blocks.activity_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    WakeRamp,
    ChainStep,
    Travel,
    Commitment,
    Recovery,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WakeRamp => "wake_ramp",
            Self::ChainStep => "chain_step",
            Self::Travel => "travel",
            Self::Commitment => "commitment",
            Self::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

impl FromStr for ActivityType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wake_ramp" => Ok(Self::WakeRamp),
            "chain_step" => Ok(Self::ChainStep),
            "travel" => Ok(Self::Travel),
            "commitment" => Ok(Self::Commitment),
            "recovery" => Ok(Self::Recovery),
            other => Err(ParseEnumError::new("activity type", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Progress of a time block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for BlockStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            other => Err(ParseEnumError::new("block status", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Kind of calendar commitment an anchor represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorType {
    Class,
    Seminar,
    Workshop,
    Appointment,
    Other,
}

impl fmt::Display for AnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Class => "class",
            Self::Seminar => "seminar",
            Self::Workshop => "workshop",
            Self::Appointment => "appointment",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl FromStr for AnchorType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "class" => Ok(Self::Class),
            "seminar" => Ok(Self::Seminar),
            "workshop" => Ok(Self::Workshop),
            "appointment" => Ok(Self::Appointment),
            "other" => Ok(Self::Other),
            other => Err(ParseEnumError::new("anchor type", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Block metadata
// ---------------------------------------------------------------------------

/// The role a block plays in the chain view, stored under `metadata.role`
/// and discriminated by `metadata.role.type`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BlockRole {
    ChainStep {
        chain_id: String,
        step_id: String,
        anchor_id: String,
        is_required: bool,
        can_skip_when_late: bool,
    },
    ExitGate {
        chain_id: String,
        step_id: String,
        anchor_id: String,
        is_required: bool,
        can_skip_when_late: bool,
        #[serde(default)]
        gate_conditions: Vec<String>,
    },
    Anchor {
        chain_id: String,
        anchor_id: String,
        anchor_type: AnchorType,
        #[serde(default)]
        location: Option<String>,
        must_attend: bool,
        #[serde(default)]
        calendar_event_id: Option<String>,
    },
    Recovery {
        chain_id: String,
        step_id: String,
    },
    #[default]
    Plain,
}

impl BlockRole {
    pub fn chain_id(&self) -> Option<&str> {
        match self {
            Self::ChainStep { chain_id, .. }
            | Self::ExitGate { chain_id, .. }
            | Self::Anchor { chain_id, .. }
            | Self::Recovery { chain_id, .. } => Some(chain_id),
            Self::Plain => None,
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::ChainStep { step_id, .. }
            | Self::ExitGate { step_id, .. }
            | Self::Recovery { step_id, .. } => Some(step_id),
            Self::Anchor { .. } | Self::Plain => None,
        }
    }

    pub fn anchor_id(&self) -> Option<&str> {
        match self {
            Self::ChainStep { anchor_id, .. }
            | Self::ExitGate { anchor_id, .. }
            | Self::Anchor { anchor_id, .. } => Some(anchor_id),
            Self::Recovery { .. } | Self::Plain => None,
        }
    }

    /// Roles that project into an execution chain's step list.
    pub fn is_chain_step(&self) -> bool {
        matches!(self, Self::ChainStep { .. } | Self::ExitGate { .. })
    }
}

/// Typed view of `time_blocks.metadata`.
///
/// Keys other than `role` and `chain_view_only` are preserved verbatim in
/// `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockMetadata {
    #[serde(default)]
    pub role: BlockRole,
    #[serde(default)]
    pub chain_view_only: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockMetadata {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_role(role: BlockRole, chain_view_only: bool) -> Self {
        Self {
            role,
            chain_view_only,
            extra: Map::new(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::plain());
        }
        Self::deserialize(value)
    }

    pub fn to_value(&self) -> Value {
        // A struct of strings, bools and JSON values always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One user's plan for one date. Unique per `(user_id, plan_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DailyPlanRow {
    pub id: Uuid,
    pub user_id: String,
    pub plan_date: NaiveDate,
    pub wake_time: NaiveDateTime,
    pub sleep_time: NaiveDateTime,
    pub plan_start: NaiveDateTime,
    pub energy_state: EnergyState,
    pub created_at: DateTime<Utc>,
}

/// A flattened, persisted slot of the day's schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TimeBlock {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub activity_type: ActivityType,
    pub activity_id: Option<String>,
    pub activity_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub sequence_order: i32,
    pub status: BlockStatus,
    pub skip_reason: Option<String>,
    pub metadata: Value,
}

impl TimeBlock {
    pub fn typed_metadata(&self) -> Result<BlockMetadata, serde_json::Error> {
        BlockMetadata::from_value(&self.metadata)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// When the user has to leave home for a chain's anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExitTime {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub chain_id: String,
    pub anchor_id: String,
    pub exit_at: NaiveDateTime,
}

/// A plan with the blocks and exit times written alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPlan {
    pub plan: DailyPlanRow,
    pub blocks: Vec<TimeBlock>,
    pub exit_times: Vec<ExitTime>,
}

// ---------------------------------------------------------------------------
// Insert / update payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct NewDailyPlan {
    pub user_id: String,
    pub plan_date: NaiveDate,
    pub wake_time: NaiveDateTime,
    pub sleep_time: NaiveDateTime,
    pub plan_start: NaiveDateTime,
    pub energy_state: EnergyState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimeBlock {
    pub activity_type: ActivityType,
    pub activity_id: Option<String>,
    pub activity_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub sequence_order: i32,
    pub status: BlockStatus,
    pub skip_reason: Option<String>,
    pub metadata: BlockMetadata,
}

impl NewTimeBlock {
    /// The row this payload becomes once stored under `plan_id`.
    pub fn into_time_block(self, id: Uuid, plan_id: Uuid) -> TimeBlock {
        TimeBlock {
            id,
            plan_id,
            activity_type: self.activity_type,
            activity_id: self.activity_id,
            activity_name: self.activity_name,
            start_time: self.start_time,
            end_time: self.end_time,
            sequence_order: self.sequence_order,
            status: self.status,
            skip_reason: self.skip_reason,
            metadata: self.metadata.to_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExitTime {
    pub chain_id: String,
    pub anchor_id: String,
    pub exit_at: NaiveDateTime,
}

/// New placement for one block, applied as part of an atomic reflow batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTiming {
    pub block_id: Uuid,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub sequence_order: i32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn energy_state_parse_and_level() {
        for (s, level) in [("low", 2), ("medium", 3), ("high", 4)] {
            let e: EnergyState = s.parse().expect("should parse");
            assert_eq!(e.to_string(), s);
            assert_eq!(e.level(), level);
        }
        let err = "exhausted".parse::<EnergyState>().unwrap_err();
        assert_eq!(err.kind, "energy state");
        assert_eq!(err.to_string(), "invalid energy state: \"exhausted\"");
    }

    #[test]
    fn block_status_uses_snake_case() {
        assert_eq!(BlockStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            "in_progress".parse::<BlockStatus>().unwrap(),
            BlockStatus::InProgress
        );
        assert!("done".parse::<BlockStatus>().is_err());
    }

    #[test]
    fn activity_and_anchor_types_reject_unknown() {
        assert!("nap".parse::<ActivityType>().is_err());
        assert!("party".parse::<AnchorType>().is_err());
        assert_eq!("wake_ramp".parse::<ActivityType>().unwrap(), ActivityType::WakeRamp);
        assert_eq!("seminar".parse::<AnchorType>().unwrap(), AnchorType::Seminar);
    }

    #[test]
    fn role_is_tagged_by_type() {
        let meta = BlockMetadata::with_role(
            BlockRole::ExitGate {
                chain_id: "chain-a1".into(),
                step_id: "chain-a1-travel-there".into(),
                anchor_id: "a1".into(),
                is_required: true,
                can_skip_when_late: false,
                gate_conditions: vec!["keys".into()],
            },
            true,
        );
        let value = meta.to_value();
        assert_eq!(value["role"]["type"], "exit-gate");
        assert_eq!(value["role"]["chain_id"], "chain-a1");
        assert_eq!(value["chain_view_only"], true);

        let back = BlockMetadata::from_value(&value).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn unknown_keys_survive_in_extra() {
        let value = json!({
            "role": { "type": "plain" },
            "notes": "bring charger",
            "mood": 4
        });
        let meta = BlockMetadata::from_value(&value).unwrap();
        assert_eq!(meta.role, BlockRole::Plain);
        assert!(!meta.chain_view_only);
        assert_eq!(meta.extra["notes"], "bring charger");

        let out = meta.to_value();
        assert_eq!(out["notes"], "bring charger");
        assert_eq!(out["mood"], 4);
        assert_eq!(out["chain_view_only"], false);
    }

    #[test]
    fn null_and_empty_metadata_are_plain() {
        assert_eq!(BlockMetadata::from_value(&Value::Null).unwrap(), BlockMetadata::plain());
        assert_eq!(BlockMetadata::from_value(&json!({})).unwrap(), BlockMetadata::plain());
    }

    #[test]
    fn malformed_role_is_an_error() {
        let value = json!({ "role": { "type": "chain-step" } });
        assert!(BlockMetadata::from_value(&value).is_err());
    }

    #[test]
    fn role_accessors() {
        let anchor = BlockRole::Anchor {
            chain_id: "chain-x".into(),
            anchor_id: "x".into(),
            anchor_type: AnchorType::Class,
            location: None,
            must_attend: true,
            calendar_event_id: None,
        };
        assert_eq!(anchor.chain_id(), Some("chain-x"));
        assert_eq!(anchor.anchor_id(), Some("x"));
        assert_eq!(anchor.step_id(), None);
        assert!(!anchor.is_chain_step());
        assert_eq!(BlockRole::Plain.chain_id(), None);
    }
}
