//! Scheduler tuning knobs.
//!
//! Every field has a default, so an empty `[scheduler]` table (or none at
//! all) yields a working configuration.

use serde::{Deserialize, Serialize};

use dayplan_db::models::{AnchorType, EnergyState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Length of the recovery phase after each anchor.
    pub recovery_minutes: i64,
    /// Used when the travel estimator fails.
    pub fallback_travel_minutes: i64,
    /// Travel time reported by the built-in fixed estimator.
    pub default_travel_minutes: i64,
    /// Where the user starts and returns to.
    pub home_location: String,
    pub ramp: RampConfig,
    pub prep: PrepConfig,
    pub reconstruction: ReconstructionConfig,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recovery_minutes: 10,
            fallback_travel_minutes: 30,
            default_travel_minutes: 20,
            home_location: "home".to_owned(),
            ramp: RampConfig::default(),
            prep: PrepConfig::default(),
            reconstruction: ReconstructionConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

/// One named step of the wake ramp and its share of the ramp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampStepTemplate {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl RampStepTemplate {
    fn new(name: &str, weight: u32) -> Self {
        Self {
            name: name.to_owned(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// How long before wake time the plan (and the ramp) may begin.
    pub lead_minutes: i64,
    pub low: Vec<RampStepTemplate>,
    pub medium: Vec<RampStepTemplate>,
    pub high: Vec<RampStepTemplate>,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            lead_minutes: 30,
            low: vec![
                RampStepTemplate::new("Lights on", 1),
                RampStepTemplate::new("Hydrate", 1),
                RampStepTemplate::new("Gentle stretch", 2),
                RampStepTemplate::new("Fresh air", 2),
            ],
            medium: vec![
                RampStepTemplate::new("Lights on", 1),
                RampStepTemplate::new("Hydrate", 1),
                RampStepTemplate::new("Stretch", 2),
            ],
            high: vec![
                RampStepTemplate::new("Lights on and hydrate", 1),
                RampStepTemplate::new("Quick mobility", 1),
            ],
        }
    }
}

impl RampConfig {
    pub fn templates(&self, energy: EnergyState) -> &[RampStepTemplate] {
        match energy {
            EnergyState::Low => &self.low,
            EnergyState::Medium => &self.medium,
            EnergyState::High => &self.high,
        }
    }
}

/// Base preparation minutes per anchor type, before energy adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    pub class: i64,
    pub seminar: i64,
    pub workshop: i64,
    pub appointment: i64,
    pub other: i64,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            class: 10,
            seminar: 15,
            workshop: 20,
            appointment: 15,
            other: 10,
        }
    }
}

impl PrepConfig {
    pub fn base_minutes(&self, anchor_type: AnchorType) -> i64 {
        match anchor_type {
            AnchorType::Class => self.class,
            AnchorType::Seminar => self.seminar,
            AnchorType::Workshop => self.workshop,
            AnchorType::Appointment => self.appointment,
            AnchorType::Other => self.other,
        }
    }
}

/// Durations assumed when rebuilding chains from stored blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub travel_minutes: i64,
    pub recovery_minutes: i64,
    /// Gap between the last chain step and a synthesized anchor.
    pub synthetic_anchor_offset_minutes: i64,
    pub synthetic_anchor_minutes: i64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            travel_minutes: 30,
            recovery_minutes: 10,
            synthetic_anchor_offset_minutes: 75,
            synthetic_anchor_minutes: 60,
        }
    }
}

/// Backoff for re-reading a plan that a concurrent request created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 50,
            jitter_ms: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = SchedulerConfig::from_toml_str(
            r#"
recovery_minutes = 15

[ramp]
lead_minutes = 45

[[ramp.high]]
name = "Jump up"
"#,
        )
        .unwrap();
        assert_eq!(config.recovery_minutes, 15);
        assert_eq!(config.fallback_travel_minutes, 30);
        assert_eq!(config.ramp.lead_minutes, 45);
        assert_eq!(config.ramp.high, vec![RampStepTemplate::new("Jump up", 1)]);
        assert_eq!(config.ramp.low.len(), 4);
        assert_eq!(config.reconstruction.travel_minutes, 30);
    }

    #[test]
    fn ramp_templates_by_energy() {
        let ramp = RampConfig::default();
        assert_eq!(ramp.templates(EnergyState::Low).len(), 4);
        assert_eq!(ramp.templates(EnergyState::Medium).len(), 3);
        assert_eq!(ramp.templates(EnergyState::High).len(), 2);
    }

    #[test]
    fn prep_base_by_type() {
        let prep = PrepConfig::default();
        assert_eq!(prep.base_minutes(AnchorType::Class), 10);
        assert_eq!(prep.base_minutes(AnchorType::Workshop), 20);
    }
}
