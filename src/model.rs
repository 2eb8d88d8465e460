use std::fmt;

use log::info;
use ndarray::{Array1, Array2, ArrayView1};

use crate::{
    curve::{two_sided_p_value, z_quantile, Curve},
    data::{CovariateTable, RegressionColumns, RegressionData},
    error::{check_confidence_level, Result, SurvivalError},
    event_table::EventTable,
    metrics::concordance_index,
    optimization::{CoxOptimizer, OptimizationConfig},
    prediction::{CurvePrediction, RowPrediction, SurvivalRegression},
};

/// cox proportional hazards w/ efron ties
#[derive(Debug, Clone)]
pub struct CoxModel {
    normalize: bool,              // fit on standardized covariates
    confidence_level: f64,
    max_iterations: usize,        // newton-raphson limit
    tolerance: f64,               // convergence threshold on the step norm
    l2_penalty: f64,              // ridge penalty
    include_log_likelihood: bool, // keep the final log partial likelihood
    fitted: Option<CoxFit>,
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            normalize: true,
            confidence_level: 0.95,
            max_iterations: 50,
            tolerance: 1e-5,
            l2_penalty: 0.0,
            include_log_likelihood: false,
            fitted: None,
        }
    }
}

impl CoxModel {
    /// new cox model w/ defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// standardize covariates before fitting; coefficients come back on the original scale
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_confidence_level(mut self, level: f64) -> Result<Self> {
        self.confidence_level = check_confidence_level(level)?;
        Ok(self)
    }

    /// max newton iterations before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// how small a newton step counts as converged
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// add ridge penalty (L2) - shrinks coefficients
    pub fn with_l2_penalty(mut self, penalty: f64) -> Self {
        self.l2_penalty = penalty.max(0.0);
        self
    }

    /// report the log partial likelihood at the fitted coefficients
    pub fn with_log_likelihood(mut self, include: bool) -> Self {
        self.include_log_likelihood = include;
        self
    }

    /// fit the model to a table - every column not named in `columns` is a covariate
    pub fn fit(&mut self, table: &CovariateTable, columns: &RegressionColumns) -> Result<&mut Self> {
        if columns.id().is_some() {
            return Err(SurvivalError::invalid_parameter(
                "id",
                "cox regression takes one row per subject",
            ));
        }
        let data = RegressionData::extract(table, columns)?;
        if data.n_features() == 0 {
            return Err(SurvivalError::invalid_parameter("covariates", "no covariate columns"));
        }
        if data.n_events() == 0 {
            return Err(SurvivalError::invalid_survival_data("no events to fit"));
        }

        let (means, scale) = if self.normalize {
            let (means, stds) = data.column_moments()?;
            (Some(means), Some(stds))
        } else {
            (None, None)
        };
        let design = match (&means, &scale) {
            (Some(means), Some(stds)) => (&data.covariates - means) / stds,
            _ => data.covariates.clone(),
        };

        let optimizer = CoxOptimizer::new(OptimizationConfig {
            l2_penalty: self.l2_penalty,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            ..OptimizationConfig::default()
        });
        let result = optimizer.optimize(
            design.view(),
            data.durations.view(),
            &data.events,
            data.weights.view(),
        )?;

        // back to the original covariate scale
        let (coefficients, covariance) = match &scale {
            Some(stds) => {
                let coefficients = &result.beta / stds;
                let covariance = Array2::from_shape_fn(result.covariance.dim(), |(i, j)| {
                    result.covariance[[i, j]] / (stds[i] * stds[j])
                });
                (coefficients, covariance)
            }
            None => (result.beta.clone(), result.covariance.clone()),
        };

        let standard_errors = covariance.diag().mapv(f64::sqrt);
        let z_scores = &coefficients / &standard_errors;
        let p_values = z_scores
            .iter()
            .map(|&z| two_sided_p_value(z))
            .collect::<Result<Array1<f64>>>()?;
        let z = z_quantile(self.confidence_level)?;
        let lower_bounds = &coefficients - &(&standard_errors * z);
        let upper_bounds = &coefficients + &(&standard_errors * z);

        let partial_hazards = partial_hazard(&data.covariates, means.as_ref(), &coefficients);
        let baseline = BaselineHazard::estimate(&data, partial_hazards.view())?;
        let concordance = concordance_index(
            data.durations.view(),
            partial_hazards.mapv(|h| -h).view(),
            &data.events,
        )
        .ok();

        info!(
            "cox fit: {} subjects, {} events, {} iterations, converged = {}",
            data.n_samples(),
            data.n_events(),
            result.iterations,
            result.converged
        );

        self.fitted = Some(CoxFit {
            names: data.names.clone(),
            coefficients,
            covariance,
            standard_errors,
            z_scores,
            p_values,
            lower_bounds,
            upper_bounds,
            means,
            baseline,
            log_likelihood: self.include_log_likelihood.then_some(result.log_likelihood),
            iterations: result.iterations,
            converged: result.converged,
            durations: data.durations.clone(),
            events: data.events.clone(),
            partial_hazards,
            concordance,
            confidence_level: self.confidence_level,
        });
        Ok(self)
    }

    pub fn fitted(&self) -> Result<&CoxFit> {
        self.fitted.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    /// get the fitted coefficients (betas), original covariate scale
    pub fn coefficients(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.fitted()?.coefficients.view())
    }

    /// has this model been fit to data yet?
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// exp(x . beta) per row, centred on the training means when normalizing
    pub fn predict_partial_hazard(&self, covariates: &CovariateTable) -> Result<RowPrediction> {
        let fit = self.fitted()?;
        let x = covariates.aligned(&fit.names)?;
        let values = partial_hazard(&x, fit.means.as_ref(), &fit.coefficients);
        Ok(RowPrediction::new(covariates.index().to_vec(), values))
    }

    pub fn predict_log_partial_hazard(&self, covariates: &CovariateTable) -> Result<RowPrediction> {
        let hazards = self.predict_partial_hazard(covariates)?;
        Ok(RowPrediction::new(
            hazards.index().to_vec(),
            hazards.values().mapv(f64::ln),
        ))
    }

    /// coefficient table w/ standard errors, p-values & bounds
    pub fn summary(&self) -> Result<CoxSummary> {
        let fit = self.fitted()?;
        let rows = (0..fit.names.len())
            .map(|j| CoxSummaryRow {
                name: fit.names[j].clone(),
                coef: fit.coefficients[j],
                exp_coef: fit.coefficients[j].exp(),
                se: fit.standard_errors[j],
                z: fit.z_scores[j],
                p: fit.p_values[j],
                lower: fit.lower_bounds[j],
                upper: fit.upper_bounds[j],
                significance: significance_code(fit.p_values[j]),
            })
            .collect();

        Ok(CoxSummary {
            rows,
            n_samples: fit.durations.len(),
            n_events: fit.events.iter().filter(|&&e| e).count(),
            concordance: fit.concordance,
            confidence_level: fit.confidence_level,
        })
    }
}

impl SurvivalRegression for CoxModel {
    /// baseline cumulative hazard scaled by each row's partial hazard
    fn predict_cumulative_hazard(&self, covariates: &CovariateTable) -> Result<CurvePrediction> {
        let fit = self.fitted()?;
        let hazards = self.predict_partial_hazard(covariates)?;
        let baseline = fit.baseline.cumulative.values();
        let values = Array2::from_shape_fn((baseline.len(), hazards.len()), |(t, i)| {
            baseline[t] * hazards.values()[i]
        });
        CurvePrediction::new(
            fit.baseline.cumulative.timeline().to_owned(),
            covariates.index().to_vec(),
            values,
        )
    }
}

fn partial_hazard(x: &Array2<f64>, means: Option<&Array1<f64>>, beta: &Array1<f64>) -> Array1<f64> {
    let linear = match means {
        Some(means) => (x - means).dot(beta),
        None => x.dot(beta),
    };
    linear.mapv(f64::exp)
}

/// breslow baseline: observed / sum of partial hazards still at risk, per event-table time
#[derive(Debug, Clone)]
struct BaselineHazard {
    hazard: Curve,
    cumulative: Curve,
    survival: Curve,
}

impl BaselineHazard {
    fn estimate(data: &RegressionData, partial_hazards: ArrayView1<f64>) -> Result<Self> {
        let table = EventTable::build(
            data.durations.view(),
            Array1::from(data.events.clone()).view(),
            None,
            Some(data.weights.view()),
        )?;

        // risk sums by descending duration, so each time is a prefix lookup
        let mut order = data.duration_order();
        order.reverse();
        let mut risk_sum = 0.0;
        let mut cursor = 0;
        let mut hazard = Array1::zeros(table.len());
        for (k, row) in table.rows().iter().enumerate().rev() {
            while cursor < order.len() && data.durations[order[cursor]] >= row.time {
                let i = order[cursor];
                risk_sum += data.weights[i] * partial_hazards[i];
                cursor += 1;
            }
            hazard[k] = if risk_sum > 0.0 { row.observed / risk_sum } else { 0.0 };
        }

        let times = table.times();
        let mut acc = 0.0;
        let cumulative: Array1<f64> = hazard
            .iter()
            .map(|h| {
                acc += h;
                acc
            })
            .collect();
        let survival = cumulative.mapv(|h| (-h).exp());

        Ok(Self {
            hazard: Curve::new("baseline hazard", times.clone(), hazard)?,
            cumulative: Curve::new("baseline cumulative hazard", times.clone(), cumulative)?,
            survival: Curve::new("baseline survival", times, survival)?,
        })
    }
}

/// everything a cox fit produces
#[derive(Debug, Clone)]
pub struct CoxFit {
    names: Vec<String>,
    coefficients: Array1<f64>, // the betas, original scale
    covariance: Array2<f64>,
    standard_errors: Array1<f64>,
    z_scores: Array1<f64>,
    p_values: Array1<f64>,
    lower_bounds: Array1<f64>,
    upper_bounds: Array1<f64>,
    means: Option<Array1<f64>>, // centring for partial hazards when normalized
    baseline: BaselineHazard,
    log_likelihood: Option<f64>,
    iterations: usize,
    converged: bool,
    durations: Array1<f64>,
    events: Vec<bool>,
    partial_hazards: Array1<f64>,
    concordance: Option<f64>,
    confidence_level: f64,
}

impl CoxFit {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// fitted coefficients (a.k.a. hazards)
    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    pub fn hazard_ratios(&self) -> Array1<f64> {
        self.coefficients.mapv(f64::exp)
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn standard_errors(&self) -> ArrayView1<'_, f64> {
        self.standard_errors.view()
    }

    pub fn z_scores(&self) -> ArrayView1<'_, f64> {
        self.z_scores.view()
    }

    pub fn p_values(&self) -> ArrayView1<'_, f64> {
        self.p_values.view()
    }

    /// (lower, upper) coefficient bounds at the configured level
    pub fn confidence_intervals(&self) -> (ArrayView1<'_, f64>, ArrayView1<'_, f64>) {
        (self.lower_bounds.view(), self.upper_bounds.view())
    }

    pub fn baseline_hazard(&self) -> &Curve {
        &self.baseline.hazard
    }

    pub fn baseline_cumulative_hazard(&self) -> &Curve {
        &self.baseline.cumulative
    }

    pub fn baseline_survival(&self) -> &Curve {
        &self.baseline.survival
    }

    /// only kept when the model was built `with_log_likelihood(true)`
    pub fn log_likelihood(&self) -> Option<f64> {
        self.log_likelihood
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn durations(&self) -> ArrayView1<'_, f64> {
        self.durations.view()
    }

    pub fn events(&self) -> &[bool] {
        &self.events
    }

    /// partial hazards of the training rows
    pub fn partial_hazards(&self) -> ArrayView1<'_, f64> {
        self.partial_hazards.view()
    }

    /// training concordance of the partial hazards, `None` without comparable pairs
    pub fn concordance(&self) -> Option<f64> {
        self.concordance
    }
}

fn significance_code(p: f64) -> &'static str {
    match p {
        p if p < 0.001 => "***",
        p if p < 0.01 => "**",
        p if p < 0.05 => "*",
        p if p < 0.1 => ".",
        _ => " ",
    }
}

/// `{:.3e}` but with a signed two-digit exponent: -1.897e-01
fn sci(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }
    let raw = format!("{v:.3e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(e) => format!("{mantissa}e{}{:02}", if e < 0 { '-' } else { '+' }, e.abs()),
            Err(_) => raw,
        },
        None => raw,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoxSummaryRow {
    pub name: String,
    pub coef: f64,
    pub exp_coef: f64,
    pub se: f64,
    pub z: f64,
    pub p: f64,
    pub lower: f64,
    pub upper: f64,
    pub significance: &'static str,
}

/// printable coefficient table
#[derive(Debug, Clone, PartialEq)]
pub struct CoxSummary {
    pub rows: Vec<CoxSummaryRow>,
    pub n_samples: usize,
    pub n_events: usize,
    pub concordance: Option<f64>,
    pub confidence_level: f64,
}

impl fmt::Display for CoxSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "n={}, number of events={}", self.n_samples, self.n_events)?;
        writeln!(f)?;

        let name_width = self.rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
        let lower = format!("lower {:.2}", self.confidence_level);
        let upper = format!("upper {:.2}", self.confidence_level);
        writeln!(
            f,
            "{:<nw$} {:>10} {:>10} {:>10} {:>10} {:>10} {:>11} {:>11}",
            "",
            "coef",
            "exp(coef)",
            "se(coef)",
            "z",
            "p",
            lower,
            upper,
            nw = name_width
        )?;
        for row in &self.rows {
            let line = format!(
                "{:<nw$} {:>10} {:>10} {:>10} {:>10} {:>10} {:>11} {:>11}   {}",
                row.name,
                sci(row.coef),
                sci(row.exp_coef),
                sci(row.se),
                sci(row.z),
                sci(row.p),
                sci(row.lower),
                sci(row.upper),
                row.significance,
                nw = name_width
            );
            writeln!(f, "{}", line.trim_end())?;
        }
        writeln!(f, "---")?;
        writeln!(f, "Signif. codes:  0 '***' 0.001 '**' 0.01 '*' 0.05 '.' 0.1 ' ' 1")?;
        writeln!(f)?;
        match self.concordance {
            Some(c) => write!(f, "Concordance = {c:.3}"),
            None => write!(f, "Concordance = NA"),
        }
    }
}
