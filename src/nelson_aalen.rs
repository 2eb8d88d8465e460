use log::{debug, warn};
use ndarray::{Array1, ArrayView1};

use crate::{
    curve::{ci_labels, reindex, resolve_timeline, z_quantile, ConfidenceInterval, Curve},
    data::SurvivalData,
    error::{check_confidence_level, Result, SurvivalError},
    event_table::EventTable,
};

/// epanechnikov kernel, zero outside (-1, 1)
fn epanechnikov(u: f64) -> f64 {
    if u.abs() < 1.0 {
        0.75 * (1.0 - u * u)
    } else {
        0.0
    }
}

/// fitted cumulative hazard plus the per-event-time jumps kept for smoothing
#[derive(Debug, Clone, PartialEq)]
pub struct NelsonAalenResult {
    cumulative_hazard: Curve,
    confidence_interval: ConfidenceInterval,
    event_table: EventTable,
    jumps: Array1<f64>,
    jump_variances: Array1<f64>,
    confidence_level: f64,
    ci_labels: Option<(String, String)>,
}

impl NelsonAalenResult {
    pub fn cumulative_hazard(&self) -> &Curve {
        &self.cumulative_hazard
    }

    pub fn confidence_interval(&self) -> &ConfidenceInterval {
        &self.confidence_interval
    }

    pub fn event_table(&self) -> &EventTable {
        &self.event_table
    }

    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.cumulative_hazard.timeline()
    }

    /// cumulative hazard at an arbitrary time, 0 before the first point
    pub fn predict(&self, t: f64) -> f64 {
        self.cumulative_hazard.at(t).unwrap_or(0.0)
    }

    /// kernel-smoothed hazard rate on the result timeline
    ///
    /// `h(t) = (1/b) * sum_j K((t - t_j)/b) * dH_j` with jumps taken at the
    /// event-table times, so mass before a custom timeline never piles up on
    /// its first point.
    pub fn smoothed_hazard(&self, bandwidth: f64) -> Result<Curve> {
        let bandwidth = check_bandwidth(bandwidth)?;
        let values = self.kernel_sum(bandwidth, self.jumps.view(), |k| k) / bandwidth;
        Curve::new(
            self.smoothed_label(),
            self.timeline().to_owned(),
            values,
        )
    }

    /// bands for [`smoothed_hazard`](Self::smoothed_hazard): `var h(t) = (1/b^2) sum K^2 dV_j`
    pub fn smoothed_hazard_confidence_interval(&self, bandwidth: f64) -> Result<ConfidenceInterval> {
        let bandwidth = check_bandwidth(bandwidth)?;
        let hazard = self.kernel_sum(bandwidth, self.jumps.view(), |k| k) / bandwidth;
        let variance = self.kernel_sum(bandwidth, self.jump_variances.view(), |k| k * k)
            / (bandwidth * bandwidth);

        let z = z_quantile(self.confidence_level)?;
        let (upper, lower) = log_bounds(hazard.view(), variance.view(), z);
        let labels = ci_labels(&self.smoothed_label(), self.confidence_level, self.ci_labels.as_ref());
        Ok(ConfidenceInterval::new(labels, self.timeline().to_owned(), upper, lower))
    }

    pub fn subtract(&self, other: &NelsonAalenResult) -> Curve {
        self.cumulative_hazard.subtract(&other.cumulative_hazard)
    }

    pub fn divide(&self, other: &NelsonAalenResult) -> Curve {
        self.cumulative_hazard.divide(&other.cumulative_hazard)
    }

    fn smoothed_label(&self) -> String {
        format!("differenced-{}", self.cumulative_hazard.label())
    }

    fn kernel_sum(&self, bandwidth: f64, masses: ArrayView1<f64>, weight: impl Fn(f64) -> f64) -> Array1<f64> {
        let times = self.event_table.times();
        self.timeline()
            .iter()
            .map(|&t| {
                times
                    .iter()
                    .zip(masses.iter())
                    .map(|(&tj, &m)| match weight(epanechnikov((t - tj) / bandwidth)) {
                        // out-of-window jumps contribute nothing, infinite ones included
                        k if k == 0.0 => 0.0,
                        k => k * m,
                    })
                    .sum()
            })
            .collect()
    }
}

fn check_bandwidth(bandwidth: f64) -> Result<f64> {
    if bandwidth.is_finite() && bandwidth > 0.0 {
        Ok(bandwidth)
    } else {
        Err(SurvivalError::invalid_parameter("bandwidth", bandwidth))
    }
}

/// cumulative hazard estimator
#[derive(Debug, Clone)]
pub struct NelsonAalenFitter {
    confidence_level: f64,
    label: String,
    ci_labels: Option<(String, String)>,
    timeline: Option<Vec<f64>>,
    bias_correction: bool,
    fitted: Option<NelsonAalenResult>,
}

impl Default for NelsonAalenFitter {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            label: "NA_estimate".to_string(),
            ci_labels: None,
            timeline: None,
            bias_correction: true,
            fitted: None,
        }
    }
}

impl NelsonAalenFitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confidence_level(mut self, level: f64) -> Result<Self> {
        self.confidence_level = check_confidence_level(level)?;
        Ok(self)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_ci_labels(mut self, upper: impl Into<String>, lower: impl Into<String>) -> Self {
        self.ci_labels = Some((upper.into(), lower.into()));
        self
    }

    pub fn with_timeline(mut self, timeline: Vec<f64>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// tie-corrected increments sum(1/(n-i)) instead of d/n
    pub fn with_bias_correction(mut self, on: bool) -> Self {
        self.bias_correction = on;
        self
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        if data.n_samples() == 0 {
            return Err(SurvivalError::invalid_survival_data("no observations to fit"));
        }
        let table = EventTable::from_data(data)?;

        let mut jumps = Array1::zeros(table.len());
        let mut jump_variances = Array1::zeros(table.len());
        let mut unbounded_from = None;
        for (k, row) in table.rows().iter().enumerate() {
            let (n, d) = (row.at_risk, row.observed);
            if d <= 0.0 {
                continue;
            }
            let (dh, dv) = if n <= 0.0 || n < d {
                // more deaths than subjects at risk: the hazard is unbounded from here on
                if unbounded_from.is_none() {
                    unbounded_from = Some(row.time);
                }
                (f64::INFINITY, f64::INFINITY)
            } else if self.bias_correction {
                corrected_increment(n, d)
            } else {
                (d / n, (n - d) * d / n.powi(3))
            };
            jumps[k] = dh;
            jump_variances[k] = dv;
        }

        if let Some(t) = unbounded_from {
            warn!("risk set too small for its deaths at t={t}, cumulative hazard is infinite from there");
        }

        let cumulative = cumsum(jumps.view());
        let variance = cumsum(jump_variances.view());
        let z = z_quantile(self.confidence_level)?;
        let (upper, lower) = log_bounds(cumulative.view(), variance.view(), z);

        let table_times = table.times();
        let timeline = resolve_timeline(self.timeline.as_deref(), table_times.view())?;
        let on_timeline =
            |v: &Array1<f64>| reindex(table_times.view(), v.view(), timeline.view(), 0.0);

        let labels = ci_labels(&self.label, self.confidence_level, self.ci_labels.as_ref());
        let confidence_interval =
            ConfidenceInterval::new(labels, timeline.clone(), on_timeline(&upper), on_timeline(&lower));
        let cumulative_hazard = Curve::new(self.label.clone(), timeline.clone(), on_timeline(&cumulative))?;

        debug!(
            "nelson-aalen fit: {} subjects, {} events, final H = {:.4}",
            data.n_samples(),
            table.total_observed(),
            cumulative.last().copied().unwrap_or(0.0)
        );

        self.fitted = Some(NelsonAalenResult {
            cumulative_hazard,
            confidence_interval,
            event_table: table,
            jumps,
            jump_variances,
            confidence_level: self.confidence_level,
            ci_labels: self.ci_labels.clone(),
        });
        Ok(self)
    }

    pub fn result(&self) -> Result<&NelsonAalenResult> {
        self.fitted.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    pub fn cumulative_hazard(&self) -> Result<&Curve> {
        Ok(self.result()?.cumulative_hazard())
    }

    pub fn smoothed_hazard(&self, bandwidth: f64) -> Result<Curve> {
        self.result()?.smoothed_hazard(bandwidth)
    }

    pub fn smoothed_hazard_confidence_interval(&self, bandwidth: f64) -> Result<ConfidenceInterval> {
        self.result()?.smoothed_hazard_confidence_interval(bandwidth)
    }

    pub fn predict(&self, t: f64) -> Result<f64> {
        Ok(self.result()?.predict(t))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// sum_{i<d} 1/(n-i) with a fractional last term for weighted deaths
fn corrected_increment(n: f64, d: f64) -> (f64, f64) {
    let whole = d.floor();
    let mut dh = 0.0;
    let mut dv = 0.0;
    let mut i = 0.0;
    while i < whole {
        dh += 1.0 / (n - i);
        dv += 1.0 / (n - i).powi(2);
        i += 1.0;
    }
    let frac = d - whole;
    if frac > 0.0 {
        dh += frac / (n - whole);
        dv += frac / (n - whole).powi(2);
    }
    (dh, dv)
}

fn cumsum(values: ArrayView1<f64>) -> Array1<f64> {
    let mut acc = 0.0;
    values
        .iter()
        .map(|v| {
            acc += v;
            acc
        })
        .collect()
}

/// H * exp(+-z*sigma/H); zero where H is zero
fn log_bounds(values: ArrayView1<f64>, variance: ArrayView1<f64>, z: f64) -> (Array1<f64>, Array1<f64>) {
    let bound = |sign: f64| -> Array1<f64> {
        values
            .iter()
            .zip(variance.iter())
            .map(|(&h, &v)| {
                if h <= 0.0 {
                    0.0
                } else if h.is_infinite() {
                    h
                } else {
                    h * (sign * z * v.sqrt() / h).exp()
                }
            })
            .collect()
    };
    (bound(1.0), bound(-1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_data() -> SurvivalData {
        SurvivalData::new(
            vec![3.0, 5.0, 5.0, 5.0, 6.0, 6.0, 10.0, 12.0],
            vec![true, false, false, true, true, true, false, true],
        )
        .unwrap()
    }

    #[test]
    fn test_uncorrected_increments() {
        let mut naf = NelsonAalenFitter::new().with_bias_correction(false);
        naf.fit(&create_test_data()).unwrap();
        let h = naf.cumulative_hazard().unwrap();

        assert_eq!(h.label(), "NA_estimate");
        assert_relative_eq!(h.values()[0], 0.0);
        assert_relative_eq!(h.values()[1], 1.0 / 8.0, epsilon = 1e-12);
        assert_relative_eq!(h.values()[3], 1.0 / 8.0 + 1.0 / 7.0 + 2.0 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_corrected_increments_split_ties() {
        let mut naf = NelsonAalenFitter::new();
        naf.fit(&create_test_data()).unwrap();
        let h = naf.cumulative_hazard().unwrap();
        // two deaths among 4 at t=6 -> 1/4 + 1/3
        assert_relative_eq!(
            h.values()[3],
            1.0 / 8.0 + 1.0 / 7.0 + 1.0 / 4.0 + 1.0 / 3.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(naf.predict(-1.0).unwrap(), 0.0);
    }

    #[test]
    fn test_fractional_deaths() {
        let (dh, dv) = corrected_increment(4.0, 1.5);
        assert_relative_eq!(dh, 1.0 / 4.0 + 0.5 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(dv, 1.0 / 16.0 + 0.5 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bands_bracket_estimate() {
        let mut naf = NelsonAalenFitter::new();
        naf.fit(&create_test_data()).unwrap();
        let result = naf.result().unwrap();
        let ci = result.confidence_interval();
        let h = result.cumulative_hazard();
        assert_eq!(ci.labels(), ("NA_estimate_upper_0.95", "NA_estimate_lower_0.95"));
        assert_relative_eq!(ci.upper()[0], 0.0);
        for ((&v, &u), &l) in h.values().iter().zip(ci.upper()).zip(ci.lower()) {
            assert!(l <= v && v <= u);
        }
    }

    #[test]
    fn test_band_values() {
        let mut naf = NelsonAalenFitter::new();
        naf.fit(&create_test_data()).unwrap();
        let ci = naf.result().unwrap().confidence_interval();
        // t=3: H = 1/8, var = 1/64 -> H * exp(+-z * sigma / H)
        assert_relative_eq!(ci.upper()[1], 0.887383923028917, epsilon = 1e-7);
        assert_relative_eq!(ci.lower()[1], 0.017607936761652, epsilon = 1e-7);
    }

    #[test]
    fn test_smoothed_hazard() {
        let mut naf = NelsonAalenFitter::new();
        naf.fit(&create_test_data()).unwrap();
        let smooth = naf.smoothed_hazard(2.0).unwrap();
        assert_eq!(smooth.label(), "differenced-NA_estimate");
        assert!(smooth.values().iter().all(|&v| v >= 0.0));
        // nothing within a bandwidth of the origin
        assert_relative_eq!(smooth.values()[0], 0.0);

        let ci = naf.smoothed_hazard_confidence_interval(2.0).unwrap();
        for ((&v, &u), &l) in smooth.values().iter().zip(ci.upper()).zip(ci.lower()) {
            assert!(l <= v + 1e-12 && v <= u + 1e-12);
        }
        assert!(naf.smoothed_hazard(0.0).is_err());
        assert!(naf.smoothed_hazard(f64::NAN).is_err());
    }

    #[test]
    fn test_empty_risk_set_makes_hazard_infinite() {
        // the first death happens before anybody has entered
        let data = SurvivalData::new(vec![1.0, 4.0], vec![true, true])
            .unwrap()
            .with_entry(vec![2.0, 3.0])
            .unwrap();
        let mut naf = NelsonAalenFitter::new();
        naf.fit(&data).unwrap();
        let result = naf.result().unwrap();

        assert_eq!(result.predict(0.5), 0.0);
        assert_eq!(result.predict(1.0), f64::INFINITY);
        assert_eq!(result.predict(10.0), f64::INFINITY);
        assert_eq!(result.confidence_interval().upper()[1], f64::INFINITY);
        assert_eq!(result.confidence_interval().lower()[1], f64::INFINITY);

        // jumps outside the kernel window stay out of the smoothed hazard
        let smooth = naf.smoothed_hazard(0.5).unwrap();
        assert_eq!(smooth.at(3.0), Some(0.0));
        assert!(smooth.values().iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_kernel_shape() {
        assert_relative_eq!(epanechnikov(0.0), 0.75);
        assert_relative_eq!(epanechnikov(0.5), 0.5625);
        assert_eq!(epanechnikov(1.0), 0.0);
        assert_eq!(epanechnikov(-3.0), 0.0);
    }
}
