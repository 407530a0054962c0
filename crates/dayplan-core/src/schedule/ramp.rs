//! Wake ramp: graduated steps between plan start and wake time.

use chrono::{Duration, NaiveDateTime};

use dayplan_db::models::EnergyState;

use crate::config::{RampConfig, RampStepTemplate};
use crate::domain::{RampStep, WakeRamp};

pub struct WakeRampGenerator {
    config: RampConfig,
}

impl WakeRampGenerator {
    pub fn new(config: RampConfig) -> Self {
        Self { config }
    }

    /// Earliest start the ramp allows for a given wake time.
    pub fn earliest_plan_start(&self, wake_time: NaiveDateTime) -> NaiveDateTime {
        wake_time - Duration::minutes(self.config.lead_minutes.max(0))
    }

    /// Build the ramp covering `[plan_start, wake_time)`.
    ///
    /// Skipped when `plan_start >= wake_time`. Otherwise the steps are
    /// contiguous, each at least one minute (when the span allows), and the
    /// last one ends exactly at `wake_time`.
    pub fn generate(
        &self,
        plan_start: NaiveDateTime,
        wake_time: NaiveDateTime,
        energy: EnergyState,
    ) -> WakeRamp {
        if plan_start >= wake_time {
            return WakeRamp::skipped(plan_start, wake_time);
        }

        let fallback = [RampStepTemplate {
            name: "Wake up".to_owned(),
            weight: 1,
        }];
        let templates = match self.config.templates(energy) {
            [] => &fallback[..],
            t => t,
        };

        let total = (wake_time - plan_start).num_minutes();
        let count = (templates.len() as i64).min(total.max(1)) as usize;
        let chosen = &templates[..count];
        let minutes = distribute(total, chosen);

        let mut steps = Vec::with_capacity(count);
        let mut cursor = plan_start;
        for (i, (template, m)) in chosen.iter().zip(minutes).enumerate() {
            let end = if i + 1 == count {
                wake_time
            } else {
                cursor + Duration::minutes(m)
            };
            steps.push(RampStep {
                name: template.name.clone(),
                start: cursor,
                end,
                duration_minutes: (end - cursor).num_minutes(),
            });
            cursor = end;
        }

        WakeRamp {
            plan_start,
            wake_time,
            skipped: false,
            steps,
        }
    }
}

/// Split `total` minutes across the templates: one minute each, the rest by
/// weight, any remainder on the last step.
fn distribute(total: i64, templates: &[RampStepTemplate]) -> Vec<i64> {
    let n = templates.len() as i64;
    let spare = (total - n).max(0);
    let weight_sum: i64 = templates.iter().map(|t| i64::from(t.weight)).sum::<i64>().max(1);

    let mut minutes: Vec<i64> = templates
        .iter()
        .map(|t| 1 + spare * i64::from(t.weight) / weight_sum)
        .collect();
    let assigned: i64 = minutes.iter().sum();
    if let Some(last) = minutes.last_mut() {
        *last += total - assigned;
    }
    minutes
}
