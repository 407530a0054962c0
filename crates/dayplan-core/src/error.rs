//! Error types for plan generation, reads and mutations.

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

use crate::schedule::reflow::ReflowError;
use crate::store::StoreError;

/// Error surfaced by [`crate::PlanService`] operations.
///
/// Every variant except [`PlanError::Store`] maps to a stable code via
/// [`PlanError::code`] that outer surfaces return to clients.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no calendar anchors for this date; a manual anchor is required")]
    ManualAnchorRequired,

    #[error("sleep time {sleep} must differ from wake time {wake}")]
    InvalidSleepWindow { wake: NaiveTime, sleep: NaiveTime },

    #[error("unsupported energy state {0:?} (expected low, medium, or high)")]
    UnsupportedEnergyState(String),

    #[error("time block reference {0:?} is not part of this plan")]
    StaleTimeBlockReference(String),

    #[error("cannot move step {source_step:?} into another chain (target {target_step:?})")]
    CrossChainReorder {
        source_step: String,
        target_step: String,
    },

    #[error("invalid reorder: {0}")]
    InvalidReorder(String),

    #[error("no plan for user {user_id:?} on {date}")]
    PlanNotFound { user_id: String, date: NaiveDate },

    #[error("time block {0} not found")]
    TimeBlockNotFound(Uuid),

    #[error("metadata patch may not set identity field {0:?}")]
    IdentityFieldRejected(String),

    #[error("invalid metadata patch: {0}")]
    InvalidMetadataPatch(String),

    #[error("plan for user {user_id:?} on {date} was created concurrently and could not be read back")]
    DuplicatePlanRace { user_id: String, date: NaiveDate },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PlanError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ManualAnchorRequired => "MANUAL_ANCHOR_REQUIRED",
            Self::InvalidSleepWindow { .. } => "INVALID_SLEEP_WINDOW",
            Self::UnsupportedEnergyState(_) => "UNSUPPORTED_ENERGY_STATE",
            Self::StaleTimeBlockReference(_) => "STALE_TIME_BLOCK_REFERENCE",
            Self::CrossChainReorder { .. } => "CROSS_CHAIN_REORDER",
            Self::InvalidReorder(_) => "INVALID_REORDER",
            Self::PlanNotFound { .. } => "PLAN_NOT_FOUND",
            Self::TimeBlockNotFound(_) => "TIME_BLOCK_NOT_FOUND",
            Self::IdentityFieldRejected(_) => "IDENTITY_FIELD_REJECTED",
            Self::InvalidMetadataPatch(_) => "INVALID_METADATA_PATCH",
            Self::DuplicatePlanRace { .. } => "DUPLICATE_PLAN_RACE",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether the caller supplied something wrong, as opposed to a fault
    /// in storage.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::DuplicatePlanRace { .. })
    }

    /// Whether the error means the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PlanNotFound { .. } | Self::TimeBlockNotFound(_)
        )
    }
}

impl From<ReflowError> for PlanError {
    fn from(err: ReflowError) -> Self {
        match err {
            ReflowError::UnknownStep(id) => Self::StaleTimeBlockReference(id),
            other => Self::InvalidReorder(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            PlanError::ManualAnchorRequired.code(),
            "MANUAL_ANCHOR_REQUIRED"
        );
        assert_eq!(
            PlanError::IdentityFieldRejected("user_id".into()).code(),
            "IDENTITY_FIELD_REJECTED"
        );
        assert_eq!(
            PlanError::CrossChainReorder {
                source_step: "a".into(),
                target_step: "b".into()
            }
            .code(),
            "CROSS_CHAIN_REORDER"
        );
    }

    #[test]
    fn reflow_errors_map_to_codes() {
        let stale: PlanError = ReflowError::UnknownStep("x".into()).into();
        assert_eq!(stale.code(), "STALE_TIME_BLOCK_REFERENCE");

        let dup: PlanError = ReflowError::DuplicateStep("x".into()).into();
        assert_eq!(dup.code(), "INVALID_REORDER");
    }

    #[test]
    fn store_errors_are_server_side() {
        let err = PlanError::Store(StoreError::Backend(anyhow::anyhow!("boom")));
        assert!(!err.is_client_error());
        assert!(PlanError::ManualAnchorRequired.is_client_error());
        assert!(
            PlanError::TimeBlockNotFound(Uuid::nil()).is_not_found()
        );
    }
}
