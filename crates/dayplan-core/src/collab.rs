//! External collaborators the scheduler consults: the calendar, the
//! travel-time estimator and the preparation-time estimator.
//!
//! All three are object-safe so services can hold them as `Arc<dyn ...>`
//! and tests can swap in fakes.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use dayplan_db::models::AnchorType;

use crate::config::PrepConfig;
use crate::domain::Anchor;

/// Source of a user's fixed commitments for a date.
#[async_trait]
pub trait AnchorProvider: Send + Sync {
    async fn get_anchors_for_date(&self, date: NaiveDate, user_id: &str) -> Result<Vec<Anchor>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TravelEstimate {
    pub minutes: i64,
}

/// Travel time between two named places.
#[async_trait]
pub trait TravelEstimator: Send + Sync {
    async fn estimate(&self, from: &str, to: &str) -> Result<TravelEstimate>;
}

/// Preparation time for an anchor, given the user's energy on a 1-5 scale.
pub trait PrepTimeEstimator: Send + Sync {
    fn estimate(&self, anchor_type: AnchorType, energy: u8) -> i64;
}

const _: () = {
    fn _assert_object_safe(
        _: &dyn AnchorProvider,
        _: &dyn TravelEstimator,
        _: &dyn PrepTimeEstimator,
    ) {
    }
};

// ---------------------------------------------------------------------------
// Static anchors
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnchorsFile {
    #[serde(default)]
    anchors: Vec<Anchor>,
}

/// Anchors from a fixed list, typically loaded from a TOML file:
///
/// ```toml
/// [[anchors]]
/// id = "calc-101"
/// title = "Calculus"
/// start = "2026-10-16T09:00:00"
/// end = "2026-10-16T10:00:00"
/// location = "North Campus"
/// type = "class"
/// ```
///
/// Returns the anchors that start on the requested date, for any user.
#[derive(Debug, Clone, Default)]
pub struct StaticAnchorProvider {
    anchors: Vec<Anchor>,
}

impl StaticAnchorProvider {
    pub fn new(anchors: Vec<Anchor>) -> Self {
        Self { anchors }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: AnchorsFile = toml::from_str(s).context("failed to parse anchors TOML")?;
        Ok(Self::new(file.anchors))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read anchors file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("invalid anchors file {}", path.display()))
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }
}

#[async_trait]
impl AnchorProvider for StaticAnchorProvider {
    async fn get_anchors_for_date(&self, date: NaiveDate, _user_id: &str) -> Result<Vec<Anchor>> {
        Ok(self
            .anchors
            .iter()
            .filter(|a| a.start.date() == date)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Estimators
// ---------------------------------------------------------------------------

/// Reports the same travel time for every trip.
#[derive(Debug, Clone, Copy)]
pub struct FixedTravelEstimator {
    pub minutes: i64,
}

impl FixedTravelEstimator {
    pub fn new(minutes: i64) -> Self {
        Self { minutes }
    }
}

#[async_trait]
impl TravelEstimator for FixedTravelEstimator {
    async fn estimate(&self, _from: &str, _to: &str) -> Result<TravelEstimate> {
        Ok(TravelEstimate {
            minutes: self.minutes,
        })
    }
}

/// Base minutes per anchor type, adjusted by energy: tired users get more
/// time, energetic users slightly less.
#[derive(Debug, Clone, Default)]
pub struct TablePrepEstimator {
    pub base: PrepConfig,
}

impl TablePrepEstimator {
    pub fn new(base: PrepConfig) -> Self {
        Self { base }
    }
}

impl PrepTimeEstimator for TablePrepEstimator {
    fn estimate(&self, anchor_type: AnchorType, energy: u8) -> i64 {
        let adjustment = match energy {
            0 | 1 => 10,
            2 => 5,
            3 => 0,
            4 => -2,
            _ => -4,
        };
        (self.base.base_minutes(anchor_type) + adjustment).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANCHORS: &str = r#"
[[anchors]]
id = "calc-101"
title = "Calculus"
start = "2026-10-16T09:00:00"
end = "2026-10-16T10:00:00"
location = "North Campus"
type = "class"

[[anchors]]
id = "dentist"
title = "Dentist"
start = "2026-10-17T14:00:00"
end = "2026-10-17T14:30:00"
type = "appointment"
must_attend = false
"#;

    #[tokio::test]
    async fn static_provider_filters_by_date() {
        let provider = StaticAnchorProvider::from_toml_str(ANCHORS).unwrap();
        assert_eq!(provider.anchors().len(), 2);

        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let anchors = provider.get_anchors_for_date(date, "u1").await.unwrap();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].id, "calc-101");
        assert_eq!(anchors[0].anchor_type, AnchorType::Class);
        assert_eq!(anchors[0].location.as_deref(), Some("North Campus"));
    }

    #[test]
    fn static_provider_reads_must_attend() {
        let provider = StaticAnchorProvider::from_toml_str(ANCHORS).unwrap();
        assert!(provider.anchors()[0].must_attend);
        assert!(!provider.anchors()[1].must_attend);
    }

    #[test]
    fn static_provider_rejects_bad_toml() {
        let err = StaticAnchorProvider::from_toml_str("[[anchors]]\nid = 3").unwrap_err();
        assert!(format!("{err:#}").contains("anchors TOML"));
    }

    #[test]
    fn static_provider_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchors.toml");
        std::fs::write(&path, ANCHORS).unwrap();
        let provider = StaticAnchorProvider::from_file(&path).unwrap();
        assert_eq!(provider.anchors().len(), 2);

        let missing = StaticAnchorProvider::from_file(&dir.path().join("nope.toml"));
        assert!(missing.is_err());
    }

    #[test]
    fn prep_estimate_adjusts_for_energy() {
        let prep = TablePrepEstimator::default();
        assert_eq!(prep.estimate(AnchorType::Class, 3), 10);
        assert_eq!(prep.estimate(AnchorType::Class, 1), 20);
        assert_eq!(prep.estimate(AnchorType::Class, 5), 6);
    }

    #[test]
    fn prep_estimate_never_below_one_minute() {
        let prep = TablePrepEstimator::new(PrepConfig {
            other: 0,
            ..PrepConfig::default()
        });
        assert_eq!(prep.estimate(AnchorType::Other, 5), 1);
    }

    #[tokio::test]
    async fn fixed_travel_estimate() {
        let travel = FixedTravelEstimator::new(18);
        let est = travel.estimate("home", "campus").await.unwrap();
        assert_eq!(est.minutes, 18);
    }
}
