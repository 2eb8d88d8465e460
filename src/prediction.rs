//! shared prediction surface of the regression estimators
//!
//! Estimators only supply the cumulative hazard per row; survival curves,
//! percentiles, medians & expectations all derive from it.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{
    curve::{qth_survival_time, step_integral},
    data::CovariateTable,
    error::{Result, SurvivalError},
};

/// one number per input row, keyed by the row labels
#[derive(Debug, Clone, PartialEq)]
pub struct RowPrediction {
    index: Vec<String>,
    values: Array1<f64>,
}

impl RowPrediction {
    pub(crate) fn new(index: Vec<String>, values: Array1<f64>) -> Self {
        Self { index, values }
    }

    pub fn index(&self) -> &[String] {
        &self.index
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

    /// value for a row label
    pub fn get(&self, label: &str) -> Option<f64> {
        self.index.iter().position(|l| l == label).map(|i| self.values[i])
    }
}

/// one curve per input row: rows of `values` follow the timeline, columns the input rows
#[derive(Debug, Clone, PartialEq)]
pub struct CurvePrediction {
    timeline: Array1<f64>,
    columns: Vec<String>,
    values: Array2<f64>,
}

impl CurvePrediction {
    pub(crate) fn new(timeline: Array1<f64>, columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.dim() != (timeline.len(), columns.len()) {
            return Err(SurvivalError::invalid_dimensions(format!(
                "prediction of shape {:?} for {} times x {} rows",
                values.dim(),
                timeline.len(),
                columns.len()
            )));
        }
        Ok(Self {
            timeline,
            columns,
            values,
        })
    }

    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.timeline.view()
    }

    /// row labels of the input table
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// the curve for one input row
    pub fn column(&self, label: &str) -> Option<ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|c| c == label)
            .map(|j| self.values.column(j))
    }

    pub(crate) fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            timeline: self.timeline.clone(),
            columns: self.columns.clone(),
            values: self.values.mapv(f),
        }
    }

    /// reduce each input row's curve to a number
    pub(crate) fn per_row(&self, f: impl Fn(ArrayView1<f64>) -> f64) -> RowPrediction {
        let values = self.values.axis_iter(Axis(1)).map(f).collect();
        RowPrediction::new(self.columns.clone(), values)
    }
}

/// what every fitted regression estimator can predict for new covariate rows
///
/// Named tables are matched to the fitted columns by name (extra columns are
/// ignored); positional tables must have exactly the fitted column count.
/// Results keep the input's row labels & order.
///
/// Note that ranking subjects by [`predict_median`](Self::predict_median) or
/// [`predict_expectation`](Self::predict_expectation) need not agree with the
/// ranking by partial hazard when survival curves cross.
pub trait SurvivalRegression {
    fn predict_cumulative_hazard(&self, covariates: &CovariateTable) -> Result<CurvePrediction>;

    fn predict_survival_function(&self, covariates: &CovariateTable) -> Result<CurvePrediction> {
        Ok(self.predict_cumulative_hazard(covariates)?.map(|h| (-h).exp()))
    }

    /// first time each survival curve reaches `p` or below, +inf if it never does
    fn predict_percentile(&self, covariates: &CovariateTable, p: f64) -> Result<RowPrediction> {
        if !(0.0..=1.0).contains(&p) {
            return Err(SurvivalError::invalid_parameter("p", p));
        }
        let survival = self.predict_survival_function(covariates)?;
        let timeline = survival.timeline().to_owned();
        Ok(survival.per_row(|s| qth_survival_time(p, timeline.view(), s)))
    }

    fn predict_median(&self, covariates: &CovariateTable) -> Result<RowPrediction> {
        self.predict_percentile(covariates, 0.5)
    }

    /// area under each survival curve over the prediction timeline
    fn predict_expectation(&self, covariates: &CovariateTable) -> Result<RowPrediction> {
        let survival = self.predict_survival_function(covariates)?;
        let timeline = survival.timeline().to_owned();
        Ok(survival.per_row(|s| step_integral(s, timeline.view())))
    }

    /// predicted event time (the median)
    fn predict(&self, covariates: &CovariateTable) -> Result<RowPrediction> {
        self.predict_median(covariates)
    }
}
