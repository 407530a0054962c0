//! Home/away timeline derived from execution chains.

use chrono::NaiveDateTime;

use crate::domain::{ExecutionChain, LocationInterval, LocationState, LocationTimeline};

pub struct LocationStateTracker;

impl LocationStateTracker {
    /// Tile `[plan_start, sleep_time]` with alternating home and away
    /// intervals.
    ///
    /// The user is away during each chain's travel-there, anchor and
    /// travel-back phases. Overlapping or touching away spans merge into
    /// one; everything else in the window is home.
    pub fn track(
        chains: &[ExecutionChain],
        plan_start: NaiveDateTime,
        sleep_time: NaiveDateTime,
    ) -> LocationTimeline {
        if plan_start >= sleep_time {
            return LocationTimeline::default();
        }

        let mut spans: Vec<(NaiveDateTime, NaiveDateTime)> = chains
            .iter()
            .flat_map(|c| c.commitment_envelope.away_phases())
            .map(|p| (p.start_time.max(plan_start), p.end_time.min(sleep_time)))
            .filter(|(start, end)| start < end)
            .collect();
        spans.sort();

        let mut away: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match away.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => away.push((start, end)),
            }
        }

        let mut intervals = Vec::with_capacity(away.len() * 2 + 1);
        let mut cursor = plan_start;
        for (start, end) in away {
            if start > cursor {
                intervals.push(LocationInterval {
                    start: cursor,
                    end: start,
                    state: LocationState::Home,
                });
            }
            intervals.push(LocationInterval {
                start,
                end,
                state: LocationState::Away,
            });
            cursor = end;
        }
        if cursor < sleep_time {
            intervals.push(LocationInterval {
                start: cursor,
                end: sleep_time,
                state: LocationState::Home,
            });
        }

        LocationTimeline { intervals }
    }
}
