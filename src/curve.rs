//! time-indexed step curves & the helpers every estimator shares:
//! step lookup, shared-timeline arithmetic, percentile inversion,
//! step-curve integration, normal quantiles for confidence bands

use ndarray::{Array1, ArrayView1};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{check_confidence_level, Result, SurvivalError};

/// labelled step function over a timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    label: String,
    timeline: Array1<f64>,
    values: Array1<f64>,
}

impl Curve {
    pub fn new(label: impl Into<String>, timeline: Array1<f64>, values: Array1<f64>) -> Result<Self> {
        if timeline.len() != values.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "timeline len ({}) != values len ({})",
                timeline.len(),
                values.len()
            )));
        }
        Ok(Self {
            label: label.into(),
            timeline,
            values,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.timeline.view()
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// value of the step function at `t`; `None` before the first time point
    pub fn at(&self, t: f64) -> Option<f64> {
        step_lookup(self.timeline.view(), self.values.view(), t)
    }

    /// this curve minus `other`, both carried onto the union of their timelines
    pub fn subtract(&self, other: &Curve) -> Curve {
        self.combine(other, |a, b| a - b)
    }

    /// this curve over `other` on the union timeline; 0/0 counts as 1
    pub fn divide(&self, other: &Curve) -> Curve {
        self.combine(other, |a, b| if a == 0.0 && b == 0.0 { 1.0 } else { a / b })
    }

    fn combine(&self, other: &Curve, op: impl Fn(f64, f64) -> f64) -> Curve {
        let timeline = union_timeline(self.timeline.view(), other.timeline.view());
        let lhs = reindex(self.timeline.view(), self.values.view(), timeline.view(), 0.0);
        let rhs = reindex(other.timeline.view(), other.values.view(), timeline.view(), 0.0);
        let values = lhs.iter().zip(rhs.iter()).map(|(&a, &b)| op(a, b)).collect();
        Curve {
            label: self.label.clone(),
            timeline,
            values,
        }
    }
}

/// upper/lower bands sharing a timeline
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceInterval {
    labels: (String, String),
    timeline: Array1<f64>,
    upper: Array1<f64>,
    lower: Array1<f64>,
}

impl ConfidenceInterval {
    pub(crate) fn new(
        labels: (String, String),
        timeline: Array1<f64>,
        upper: Array1<f64>,
        lower: Array1<f64>,
    ) -> Self {
        Self {
            labels,
            timeline,
            upper,
            lower,
        }
    }

    /// (upper, lower) column labels
    pub fn labels(&self) -> (&str, &str) {
        (&self.labels.0, &self.labels.1)
    }

    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.timeline.view()
    }

    pub fn upper(&self) -> ArrayView1<'_, f64> {
        self.upper.view()
    }

    pub fn lower(&self) -> ArrayView1<'_, f64> {
        self.lower.view()
    }
}

/// default band labels: `<label>_upper_<level>` / `<label>_lower_<level>`
pub(crate) fn ci_labels(label: &str, level: f64, custom: Option<&(String, String)>) -> (String, String) {
    match custom {
        Some((upper, lower)) => (upper.clone(), lower.clone()),
        None => (
            format!("{label}_upper_{level:.2}"),
            format!("{label}_lower_{level:.2}"),
        ),
    }
}

/// two-sided standard normal quantile for a confidence level
pub(crate) fn z_quantile(level: f64) -> Result<f64> {
    let level = check_confidence_level(level)?;
    let normal = Normal::new(0.0, 1.0).map_err(|e| SurvivalError::numerical_error(e.to_string()))?;
    Ok(normal.inverse_cdf((1.0 + level) / 2.0))
}

/// two-sided p-value of a z statistic
pub(crate) fn two_sided_p_value(z: f64) -> Result<f64> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| SurvivalError::numerical_error(e.to_string()))?;
    Ok(2.0 * normal.sf(z.abs()))
}

/// sorted, deduplicated, finite timeline
pub(crate) fn normalize_timeline(timeline: &[f64]) -> Result<Array1<f64>> {
    if timeline.iter().any(|t| !t.is_finite()) {
        return Err(SurvivalError::invalid_parameter("timeline", "non-finite time point"));
    }
    let mut sorted = timeline.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    Ok(Array1::from(sorted))
}

/// the caller's timeline when there is one, else the fitted time points
pub(crate) fn resolve_timeline(custom: Option<&[f64]>, fitted: ArrayView1<f64>) -> Result<Array1<f64>> {
    match custom {
        Some(timeline) => normalize_timeline(timeline),
        None => Ok(fitted.to_owned()),
    }
}

pub(crate) fn union_timeline(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let mut times: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    times.sort_by(f64::total_cmp);
    times.dedup();
    Array1::from(times)
}

/// last value at or before `t`
pub(crate) fn step_lookup(times: ArrayView1<f64>, values: ArrayView1<f64>, t: f64) -> Option<f64> {
    let idx = times.as_slice().map_or_else(
        || times.iter().take_while(|&&x| x <= t).count(),
        |s| s.partition_point(|&x| x <= t),
    );
    (idx > 0).then(|| values[idx - 1])
}

/// forward-fill a step function onto `target`, `before` ahead of its first point
pub(crate) fn reindex(
    times: ArrayView1<f64>,
    values: ArrayView1<f64>,
    target: ArrayView1<f64>,
    before: f64,
) -> Array1<f64> {
    target
        .iter()
        .map(|&t| step_lookup(times, values, t).unwrap_or(before))
        .collect()
}

/// first time the survival curve drops to `q` or below, +inf if it never does
pub fn qth_survival_time(q: f64, timeline: ArrayView1<f64>, survival: ArrayView1<f64>) -> f64 {
    timeline
        .iter()
        .zip(survival.iter())
        .find(|(_, &s)| s <= q)
        .map_or(f64::INFINITY, |(&t, _)| t)
}

/// area under the step curve `y` over `x`: each value holds until the next time point
pub fn step_integral(y: ArrayView1<f64>, x: ArrayView1<f64>) -> f64 {
    x.windows(2)
        .into_iter()
        .zip(y.iter())
        .map(|(xs, &v)| (xs[1] - xs[0]) * v)
        .sum()
}
