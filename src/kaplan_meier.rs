use log::debug;
use ndarray::{Array1, ArrayView1};

use crate::{
    curve::{ci_labels, qth_survival_time, reindex, resolve_timeline, z_quantile, ConfidenceInterval, Curve},
    data::SurvivalData,
    error::{check_confidence_level, Result, SurvivalError},
    event_table::EventTable,
};

/// which side of the observation the censoring sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Censoring {
    /// event happened after the recorded duration (the usual case)
    #[default]
    Right,
    /// event happened before the recorded duration
    Left,
}

/// right censoring estimates survival, left censoring the cumulative density - never both
#[derive(Debug, Clone, PartialEq)]
pub enum KaplanMeierEstimate {
    Survival(Curve),
    CumulativeDensity(Curve),
}

impl KaplanMeierEstimate {
    pub fn curve(&self) -> &Curve {
        match self {
            Self::Survival(curve) | Self::CumulativeDensity(curve) => curve,
        }
    }
}

/// everything a kaplan-meier fit produces
#[derive(Debug, Clone, PartialEq)]
pub struct KaplanMeierResult {
    estimate: KaplanMeierEstimate,
    confidence_interval: ConfidenceInterval,
    event_table: EventTable,
    median: f64,
}

impl KaplanMeierResult {
    pub fn estimate(&self) -> &KaplanMeierEstimate {
        &self.estimate
    }

    /// `None` for a left-censored fit
    pub fn survival_function(&self) -> Option<&Curve> {
        match &self.estimate {
            KaplanMeierEstimate::Survival(curve) => Some(curve),
            KaplanMeierEstimate::CumulativeDensity(_) => None,
        }
    }

    /// `None` for a right-censored fit
    pub fn cumulative_density(&self) -> Option<&Curve> {
        match &self.estimate {
            KaplanMeierEstimate::CumulativeDensity(curve) => Some(curve),
            KaplanMeierEstimate::Survival(_) => None,
        }
    }

    pub fn confidence_interval(&self) -> &ConfidenceInterval {
        &self.confidence_interval
    }

    pub fn event_table(&self) -> &EventTable {
        &self.event_table
    }

    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.estimate.curve().timeline()
    }

    /// first time survival drops to 0.5 (cumulative density reaches it), +inf if never
    pub fn median(&self) -> f64 {
        self.median
    }

    /// estimate at an arbitrary time
    pub fn predict(&self, t: f64) -> f64 {
        let before = match self.estimate {
            KaplanMeierEstimate::Survival(_) => 1.0,
            KaplanMeierEstimate::CumulativeDensity(_) => 0.0,
        };
        self.estimate.curve().at(t).unwrap_or(before)
    }

    pub fn subtract(&self, other: &KaplanMeierResult) -> Curve {
        self.estimate.curve().subtract(other.estimate.curve())
    }

    pub fn divide(&self, other: &KaplanMeierResult) -> Curve {
        self.estimate.curve().divide(other.estimate.curve())
    }
}

/// product-limit estimator w/ greenwood variance & log(-log) bands
#[derive(Debug, Clone)]
pub struct KaplanMeierFitter {
    confidence_level: f64,
    label: String,
    ci_labels: Option<(String, String)>,
    timeline: Option<Vec<f64>>,
    censoring: Censoring,
    fitted: Option<KaplanMeierResult>,
}

impl Default for KaplanMeierFitter {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            label: "KM_estimate".to_string(),
            ci_labels: None,
            timeline: None,
            censoring: Censoring::Right,
            fitted: None,
        }
    }
}

impl KaplanMeierFitter {
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

    /// (upper, lower) band labels
    pub fn with_ci_labels(mut self, upper: impl Into<String>, lower: impl Into<String>) -> Self {
        self.ci_labels = Some((upper.into(), lower.into()));
        self
    }

    /// report the estimate on these times instead of the event times
    pub fn with_timeline(mut self, timeline: Vec<f64>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn with_censoring(mut self, censoring: Censoring) -> Self {
        self.censoring = censoring;
        self
    }

    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        if data.n_samples() == 0 {
            return Err(SurvivalError::invalid_survival_data("no observations to fit"));
        }
        let table = EventTable::from_data(data)?;

        let (values, greenwood) = match self.censoring {
            Censoring::Right => product_limit(&table)?,
            Censoring::Left => {
                if data.entry().is_some() {
                    return Err(SurvivalError::invalid_parameter(
                        "entry",
                        "left censoring doesn't support late entry",
                    ));
                }
                reverse_product_limit(&table)
            }
        };

        let z = z_quantile(self.confidence_level)?;
        let (upper, lower) = log_log_bounds(values.view(), greenwood.view(), z);

        let table_times = table.times();
        let timeline = resolve_timeline(self.timeline.as_deref(), table_times.view())?;
        let before = match self.censoring {
            Censoring::Right => 1.0,
            Censoring::Left => 0.0,
        };
        let on_timeline =
            |v: &Array1<f64>| reindex(table_times.view(), v.view(), timeline.view(), before);
        let values = on_timeline(&values);
        let labels = ci_labels(&self.label, self.confidence_level, self.ci_labels.as_ref());
        let confidence_interval =
            ConfidenceInterval::new(labels, timeline.clone(), on_timeline(&upper), on_timeline(&lower));

        let (estimate, median) = match self.censoring {
            Censoring::Right => {
                let median = qth_survival_time(0.5, timeline.view(), values.view());
                let curve = Curve::new(self.label.clone(), timeline, values)?;
                (KaplanMeierEstimate::Survival(curve), median)
            }
            Censoring::Left => {
                let survival = values.mapv(|f| 1.0 - f);
                let median = qth_survival_time(0.5, timeline.view(), survival.view());
                let curve = Curve::new(self.label.clone(), timeline, values)?;
                (KaplanMeierEstimate::CumulativeDensity(curve), median)
            }
        };

        debug!(
            "kaplan-meier fit: {} subjects, {} events, median {}",
            data.n_samples(),
            table.total_observed(),
            median
        );

        self.fitted = Some(KaplanMeierResult {
            estimate,
            confidence_interval,
            event_table: table,
            median,
        });
        Ok(self)
    }

    pub fn result(&self) -> Result<&KaplanMeierResult> {
        self.fitted.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    pub fn survival_function(&self) -> Result<&Curve> {
        self.result()?
            .survival_function()
            .ok_or_else(|| SurvivalError::invalid_parameter("censoring", "left-censored fit has no survival function"))
    }

    pub fn cumulative_density(&self) -> Result<&Curve> {
        self.result()?
            .cumulative_density()
            .ok_or_else(|| SurvivalError::invalid_parameter("censoring", "right-censored fit has no cumulative density"))
    }

    pub fn median(&self) -> Result<f64> {
        Ok(self.result()?.median())
    }

    pub fn predict(&self, t: f64) -> Result<f64> {
        Ok(self.result()?.predict(t))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// S(t) = prod (1 - d/n) over event rows, with the greenwood sum alongside
fn product_limit(table: &EventTable) -> Result<(Array1<f64>, Array1<f64>)> {
    let rows = table.rows();
    let mut deaths_left = table.total_observed();
    let mut survival = 1.0;
    let mut greenwood = 0.0;
    let mut values = Array1::zeros(rows.len());
    let mut variance = Array1::zeros(rows.len());

    for (k, row) in rows.iter().enumerate() {
        let (n, d) = (row.at_risk, row.observed);
        if d > 0.0 {
            if n <= 0.0 || n < d {
                return Err(SurvivalError::degeneracy(format!(
                    "{d} deaths with {n} at risk at t={}",
                    row.time
                )));
            }
            deaths_left -= d;
            if n == d && deaths_left > 0.0 {
                return Err(SurvivalError::degeneracy(format!(
                    "risk set emptied at t={} with {deaths_left} deaths still to come",
                    row.time
                )));
            }
            survival *= 1.0 - d / n;
            if n > d {
                greenwood += d / (n * (n - d));
            }
        }
        values[k] = survival;
        variance[k] = greenwood;
    }
    Ok((values, variance))
}

/// F(t) = prod over later event times of (1 - d_k/R_k), R_k = everyone removed by t_k
fn reverse_product_limit(table: &EventTable) -> (Array1<f64>, Array1<f64>) {
    let rows = table.rows();
    let removed_by: Vec<f64> = rows
        .iter()
        .scan(0.0, |acc, r| {
            *acc += r.removed;
            Some(*acc)
        })
        .collect();

    let mut density = 1.0;
    let mut greenwood = 0.0;
    let mut values = Array1::zeros(rows.len());
    let mut variance = Array1::zeros(rows.len());
    for k in (0..rows.len()).rev() {
        values[k] = density;
        variance[k] = greenwood;
        let (r, d) = (removed_by[k], rows[k].observed);
        if d > 0.0 && r > 0.0 {
            density *= 1.0 - d / r;
            if r > d {
                greenwood += d / (r * (r - d));
            }
        }
    }
    (values, variance)
}

/// exp(-exp(ln(-ln S) +- z*sigma/ln S)); pinned to the estimate where S is 0 or 1
fn log_log_bounds(
    values: ArrayView1<f64>,
    greenwood: ArrayView1<f64>,
    z: f64,
) -> (Array1<f64>, Array1<f64>) {
    let bound = |sign: f64| -> Array1<f64> {
        values
            .iter()
            .zip(greenwood.iter())
            .map(|(&s, &v)| {
                if s <= 0.0 || s >= 1.0 {
                    return s;
                }
                let log_s = s.ln();
                (-((-log_s).ln() + sign * z * v.sqrt() / log_s).exp()).exp()
            })
            .collect()
    };
    (bound(1.0), bound(-1.0))
}
