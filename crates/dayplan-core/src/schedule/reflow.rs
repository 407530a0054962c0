//! Step reflow: recompute placements after a reorder, walking backward
//! from a fixed deadline so every duration and the total span survive.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflowError {
    #[error("unknown step {0:?}")]
    UnknownStep(String),

    #[error("step {0:?} appears more than once in the new order")]
    DuplicateStep(String),

    #[error("step {0:?} is missing from the new order")]
    MissingStep(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDuration {
    pub id: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTiming {
    pub id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Lay `steps` out in `new_order` so the last one ends at `fixed_deadline`.
///
/// `new_order` must be a permutation of the step ids. The result is in
/// `new_order`, i.e. ascending time.
pub fn reflow(
    steps: &[StepDuration],
    new_order: &[String],
    fixed_deadline: NaiveDateTime,
) -> Result<Vec<StepTiming>, ReflowError> {
    let durations: HashMap<&str, i64> = steps
        .iter()
        .map(|s| (s.id.as_str(), s.duration_minutes))
        .collect();

    let mut seen = HashSet::with_capacity(new_order.len());
    for id in new_order {
        if !durations.contains_key(id.as_str()) {
            return Err(ReflowError::UnknownStep(id.clone()));
        }
        if !seen.insert(id.as_str()) {
            return Err(ReflowError::DuplicateStep(id.clone()));
        }
    }
    if let Some(missing) = steps.iter().find(|s| !seen.contains(s.id.as_str())) {
        return Err(ReflowError::MissingStep(missing.id.clone()));
    }

    let mut timings = Vec::with_capacity(new_order.len());
    let mut cursor = fixed_deadline;
    for id in new_order.iter().rev() {
        let minutes = durations.get(id.as_str()).copied().unwrap_or_default();
        let start = cursor - Duration::minutes(minutes);
        timings.push(StepTiming {
            id: id.clone(),
            start,
            end: cursor,
        });
        cursor = start;
    }
    timings.reverse();
    Ok(timings)
}

/// The order after moving `source` to `target`'s position.
pub fn move_step(order: &[String], source: &str, target: &str) -> Result<Vec<String>, ReflowError> {
    let from = order
        .iter()
        .position(|id| id == source)
        .ok_or_else(|| ReflowError::UnknownStep(source.to_owned()))?;
    let to = order
        .iter()
        .position(|id| id == target)
        .ok_or_else(|| ReflowError::UnknownStep(target.to_owned()))?;

    let mut next = order.to_vec();
    let moved = next.remove(from);
    next.insert(to, moved);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn steps(durations: &[(&str, i64)]) -> Vec<StepDuration> {
        durations.iter()
            .map(|(id, m)| StepDuration {
                id: (*id).to_owned(),
                duration_minutes: *m,
            })
            .collect()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn swap_keeps_deadline_and_durations() {
        let steps = steps(&[("prep", 10), ("travel", 15)]);
        let timings = reflow(&steps, &ids(&["travel", "prep"]), at(10, 0)).unwrap();

        assert_eq!(timings[0].id, "travel");
        assert_eq!(timings[0].start, at(9, 35));
        assert_eq!(timings[0].end, at(9, 50));
        assert_eq!(timings[1].id, "prep");
        assert_eq!(timings[1].start, at(9, 50));
        assert_eq!(timings[1].end, at(10, 0));
    }

    #[test]
    fn any_permutation_preserves_span() {
        let steps = steps(&[("a", 5), ("b", 12), ("c", 3), ("d", 40)]);
        let orders = [
            ["a", "b", "c", "d"],
            ["d", "c", "b", "a"],
            ["b", "d", "a", "c"],
            ["c", "a", "d", "b"],
        ];
        for order in orders {
            let timings = reflow(&steps, &ids(&order), at(12, 0)).unwrap();
            assert_eq!(timings.last().unwrap().end, at(12, 0));
            assert_eq!(timings.first().unwrap().start, at(11, 0));
            for pair in timings.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            for t in &timings {
                let original = steps.iter().find(|s| s.id == t.id).unwrap();
                assert_eq!((t.end - t.start).num_minutes(), original.duration_minutes);
            }
        }
    }

    #[test]
    fn rejects_unknown_step() {
        let steps = steps(&[("a", 5)]);
        let err = reflow(&steps, &ids(&["ghost"]), at(9, 0)).unwrap_err();
        assert_eq!(err, ReflowError::UnknownStep("ghost".into()));
    }

    #[test]
    fn rejects_duplicates_and_omissions() {
        let steps = steps(&[("a", 5), ("b", 5)]);
        assert_eq!(
            reflow(&steps, &ids(&["a", "a"]), at(9, 0)).unwrap_err(),
            ReflowError::DuplicateStep("a".into())
        );
        assert_eq!(
            reflow(&steps, &ids(&["a"]), at(9, 0)).unwrap_err(),
            ReflowError::MissingStep("b".into())
        );
    }

    #[test]
    fn move_step_inserts_at_target_index() {
        let order = ids(&["a", "b", "c", "d"]);
        assert_eq!(move_step(&order, "a", "c").unwrap(), ids(&["b", "c", "a", "d"]));
        assert_eq!(move_step(&order, "d", "b").unwrap(), ids(&["a", "d", "b", "c"]));
        assert_eq!(move_step(&order, "b", "b").unwrap(), order);
    }

    #[test]
    fn move_step_unknown_id() {
        let order = ids(&["a", "b"]);
        assert_eq!(
            move_step(&order, "a", "zzz").unwrap_err(),
            ReflowError::UnknownStep("zzz".into())
        );
    }
}
