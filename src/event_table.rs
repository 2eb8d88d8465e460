use ndarray::{Array1, ArrayView1};

use crate::data::SurvivalData;
use crate::error::{Result, SurvivalError};

/// one distinct time in the event table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRow {
    pub time: f64,
    pub removed: f64,  // deaths + censorings at this time
    pub observed: f64, // deaths
    pub censored: f64,
    pub entrance: f64, // subjects entering (becoming observable) at this time
    pub at_risk: f64,  // weighted count with entry <= time <= duration
}

/// per-distinct-time aggregate of the raw observations
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    rows: Vec<EventRow>,
}

impl EventTable {
    /// group subjects by time & sum weighted counts
    ///
    /// Without entry times everybody enters at the origin `min(0, min duration)`,
    /// which is always a row of the table.
    pub fn build(
        durations: ArrayView1<f64>,
        events: ArrayView1<bool>,
        entry: Option<ArrayView1<f64>>,
        weights: Option<ArrayView1<f64>>,
    ) -> Result<Self> {
        let n = durations.len();
        if events.len() != n {
            return Err(SurvivalError::invalid_dimensions(format!(
                "durations len ({}) != events len ({})",
                n,
                events.len()
            )));
        }
        if entry.is_some_and(|e| e.len() != n) || weights.is_some_and(|w| w.len() != n) {
            return Err(SurvivalError::invalid_dimensions(
                "entry/weights length must match durations",
            ));
        }
        if durations.iter().any(|d| !d.is_finite()) {
            return Err(SurvivalError::invalid_survival_data("durations must be finite"));
        }

        let origin = durations.iter().copied().fold(0.0_f64, f64::min);
        let entry_of = |i: usize| entry.map_or(origin, |e| e[i]);
        let weight_of = |i: usize| weights.map_or(1.0, |w| w[i]);

        let mut times: Vec<f64> = durations.to_vec();
        match entry {
            Some(e) => times.extend(e.iter().copied()),
            None => times.push(origin),
        }
        times.sort_by(f64::total_cmp);
        times.dedup();

        let mut rows: Vec<EventRow> = times
            .iter()
            .map(|&time| EventRow {
                time,
                removed: 0.0,
                observed: 0.0,
                censored: 0.0,
                entrance: 0.0,
                at_risk: 0.0,
            })
            .collect();
        let slot = |t: f64| times.partition_point(|&x| x < t);

        for i in 0..n {
            let w = weight_of(i);
            let row = &mut rows[slot(durations[i])];
            row.removed += w;
            if events[i] {
                row.observed += w;
            } else {
                row.censored += w;
            }
            rows[slot(entry_of(i))].entrance += w;
        }

        // at_risk(t) = sum of weights with entry <= t <= duration. subjects entering
        // after they leave are never observable; for the rest, leaving before t
        // implies having entered, so two sorted cursors are enough
        let observable: Vec<usize> = (0..n).filter(|&i| entry_of(i) <= durations[i]).collect();
        let mut by_entry: Vec<(f64, f64)> =
            observable.iter().map(|&i| (entry_of(i), weight_of(i))).collect();
        let mut by_exit: Vec<(f64, f64)> =
            observable.iter().map(|&i| (durations[i], weight_of(i))).collect();
        by_entry.sort_by(|a, b| a.0.total_cmp(&b.0));
        by_exit.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (mut entered, mut left) = (0.0, 0.0);
        let (mut ei, mut xi) = (0, 0);
        for row in rows.iter_mut() {
            while ei < by_entry.len() && by_entry[ei].0 <= row.time {
                entered += by_entry[ei].1;
                ei += 1;
            }
            while xi < by_exit.len() && by_exit[xi].0 < row.time {
                left += by_exit[xi].1;
                xi += 1;
            }
            row.at_risk = (entered - left).max(0.0);
        }

        Ok(Self { rows })
    }

    pub fn from_data(data: &SurvivalData) -> Result<Self> {
        Self::build(data.durations(), data.events(), data.entry(), data.weights())
    }

    pub fn rows(&self) -> &[EventRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn times(&self) -> Array1<f64> {
        self.rows.iter().map(|r| r.time).collect()
    }

    pub fn at_risk(&self) -> Array1<f64> {
        self.rows.iter().map(|r| r.at_risk).collect()
    }

    pub fn observed(&self) -> Array1<f64> {
        self.rows.iter().map(|r| r.observed).collect()
    }

    pub fn censored(&self) -> Array1<f64> {
        self.rows.iter().map(|r| r.censored).collect()
    }

    pub fn removed(&self) -> Array1<f64> {
        self.rows.iter().map(|r| r.removed).collect()
    }

    pub fn entrance(&self) -> Array1<f64> {
        self.rows.iter().map(|r| r.entrance).collect()
    }

    pub fn total_observed(&self) -> f64 {
        self.rows.iter().map(|r| r.observed).sum()
    }
}
