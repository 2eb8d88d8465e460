use log::{debug, info, warn};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{
    curve::{reindex, resolve_timeline, z_quantile},
    data::{CovariateTable, RegressionColumns, RegressionData},
    error::{check_confidence_level, Result, SurvivalError},
    linalg::pseudo_inverse,
    prediction::{CurvePrediction, SurvivalRegression},
};

const INTERCEPT: &str = "baseline";

/// one value per (time, covariate) - rows follow the timeline, columns the covariates
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientSurface {
    timeline: Array1<f64>,
    columns: Vec<String>,
    values: Array2<f64>,
}

impl CoefficientSurface {
    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.timeline.view()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// one covariate's coefficient over time
    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|j| self.values.column(j))
            .ok_or_else(|| SurvivalError::unknown_column(name))
    }

    fn reindexed(&self, timeline: &Array1<f64>) -> Self {
        let mut values = Array2::zeros((timeline.len(), self.columns.len()));
        for (j, column) in self.values.axis_iter(Axis(1)).enumerate() {
            values
                .column_mut(j)
                .assign(&reindex(self.timeline.view(), column, timeline.view(), 0.0));
        }
        Self {
            timeline: timeline.clone(),
            columns: self.columns.clone(),
            values,
        }
    }
}

/// everything an aalen additive fit produces
#[derive(Debug, Clone, PartialEq)]
pub struct AalenFit {
    hazards: CoefficientSurface,            // increments at the origin & each event time
    cumulative_hazards: CoefficientSurface, // on the result timeline
    variance: CoefficientSurface,
    lower: CoefficientSurface,
    upper: CoefficientSurface,
    names: Vec<String>, // covariates only, no intercept
    fit_intercept: bool,
    n_samples: usize,
    n_events: usize,
}

impl AalenFit {
    pub fn hazards(&self) -> &CoefficientSurface {
        &self.hazards
    }

    pub fn cumulative_hazards(&self) -> &CoefficientSurface {
        &self.cumulative_hazards
    }

    pub fn variance(&self) -> &CoefficientSurface {
        &self.variance
    }

    /// (lower, upper) pointwise bands on the cumulative coefficients
    pub fn confidence_intervals(&self) -> (&CoefficientSurface, &CoefficientSurface) {
        (&self.lower, &self.upper)
    }

    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.cumulative_hazards.timeline()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_events(&self) -> usize {
        self.n_events
    }
}

/// one subject's covariate history: row k covers (stop_{k-1}, stop_k]
struct Subject {
    exit: f64,
    event: bool,
    segments: Vec<(f64, usize)>, // (stop, table row), sorted by stop
}

impl Subject {
    /// the row whose interval contains `t`, if the subject is still at risk
    fn row_at(&self, t: f64) -> Option<usize> {
        if t > self.exit {
            return None;
        }
        let k = self.segments.partition_point(|&(stop, _)| stop < t);
        self.segments.get(k).map(|&(_, row)| row)
    }
}

fn static_subjects(data: &RegressionData) -> Vec<Subject> {
    (0..data.n_samples())
        .map(|i| Subject {
            exit: data.durations[i],
            event: data.events[i],
            segments: vec![(data.durations[i], i)],
        })
        .collect()
}

fn panel_subjects(data: &RegressionData, ids: &[f64]) -> Result<Vec<Subject>> {
    if ids.iter().any(|id| !id.is_finite()) {
        return Err(SurvivalError::invalid_survival_data("subject ids must be finite"));
    }
    let mut order: Vec<usize> = (0..data.n_samples()).collect();
    order.sort_by(|&a, &b| {
        ids[a]
            .total_cmp(&ids[b])
            .then(data.durations[a].total_cmp(&data.durations[b]))
    });

    let mut subjects: Vec<Subject> = Vec::new();
    let mut current: Option<f64> = None;
    for i in order {
        let stop = data.durations[i];
        match subjects.last_mut() {
            Some(subject) if current == Some(ids[i]) => {
                subject.exit = stop;
                subject.event |= data.events[i];
                subject.segments.push((stop, i));
            }
            _ => {
                current = Some(ids[i]);
                subjects.push(Subject {
                    exit: stop,
                    event: data.events[i],
                    segments: vec![(stop, i)],
                });
            }
        }
    }
    Ok(subjects)
}

fn cumsum_rows(values: &Array2<f64>) -> Array2<f64> {
    let mut out = values.clone();
    for mut column in out.axis_iter_mut(Axis(1)) {
        let mut acc = 0.0;
        for v in column.iter_mut() {
            acc += *v;
            *v = acc;
        }
    }
    out
}

/// aalen's additive hazards regression, fit by least squares at every event time
#[derive(Debug, Clone)]
pub struct AalenAdditiveModel {
    fit_intercept: bool,
    coef_penalizer: f64,
    confidence_level: f64,
    timeline: Option<Vec<f64>>,
    fitted: Option<AalenFit>,
}

impl Default for AalenAdditiveModel {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            coef_penalizer: 0.0,
            confidence_level: 0.95,
            timeline: None,
            fitted: None,
        }
    }
}

impl AalenAdditiveModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a `baseline` column of ones (appended last)
    pub fn with_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    /// ridge on the per-time least squares
    pub fn with_coef_penalizer(mut self, penalizer: f64) -> Result<Self> {
        if !penalizer.is_finite() || penalizer < 0.0 {
            return Err(SurvivalError::invalid_parameter("coef_penalizer", penalizer));
        }
        self.coef_penalizer = penalizer;
        Ok(self)
    }

    pub fn with_confidence_level(mut self, level: f64) -> Result<Self> {
        self.confidence_level = check_confidence_level(level)?;
        Ok(self)
    }

    pub fn with_timeline(mut self, timeline: Vec<f64>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// fit on a table; an id column switches to panel (repeated-measurement) input
    pub fn fit(&mut self, table: &CovariateTable, columns: &RegressionColumns) -> Result<&mut Self> {
        let data = RegressionData::extract(table, columns)?;

        let mut names = data.names.clone();
        if self.fit_intercept {
            if names.iter().any(|n| n == INTERCEPT) {
                return Err(SurvivalError::invalid_parameter(
                    "columns",
                    format!("'{INTERCEPT}' is reserved for the intercept"),
                ));
            }
            names.push(INTERCEPT.to_string());
        }
        if names.is_empty() {
            return Err(SurvivalError::invalid_parameter(
                "covariates",
                "no covariate columns and no intercept",
            ));
        }
        let design = self.design(data.covariates.view())?;

        let subjects = match &data.ids {
            Some(ids) => panel_subjects(&data, ids)?,
            None => static_subjects(&data),
        };
        let mut death_times: Vec<f64> = subjects.iter().filter(|s| s.event).map(|s| s.exit).collect();
        death_times.sort_by(f64::total_cmp);
        death_times.dedup();
        if death_times.is_empty() {
            return Err(SurvivalError::invalid_survival_data("no events to fit"));
        }

        // the fitted timeline opens at the origin, where every coefficient is still zero
        let origin = data.durations.iter().copied().fold(0.0_f64, f64::min);
        let offset = usize::from(origin < death_times[0]);
        let mut fitted_times = Vec::with_capacity(death_times.len() + offset);
        if offset == 1 {
            fitted_times.push(origin);
        }
        fitted_times.extend_from_slice(&death_times);

        let p = names.len();
        let mut hazards = Array2::zeros((fitted_times.len(), p));
        let mut variance = Array2::zeros((fitted_times.len(), p));
        let mut rank_deficient = 0;

        for (k, &t) in death_times.iter().enumerate() {
            // (row, sqrt weight, dies now) for everyone still at risk
            let at_risk: Vec<(usize, f64, bool)> = subjects
                .iter()
                .filter_map(|s| {
                    s.row_at(t)
                        .map(|row| (row, data.weights[row].sqrt(), s.event && s.exit == t))
                })
                .collect();

            let mut system = Array2::zeros((at_risk.len(), p));
            for (r, &(row, sqrt_w, _)) in at_risk.iter().enumerate() {
                system.row_mut(r).assign(&(&design.row(row) * sqrt_w));
            }
            if self.coef_penalizer > 0.0 {
                let ridge = Array2::eye(p) * self.coef_penalizer.sqrt();
                system = concatenate(Axis(0), &[system.view(), ridge.view()])
                    .map_err(|e| SurvivalError::invalid_dimensions(e.to_string()))?;
            }

            let (pinv, rank) = pseudo_inverse(system.view())?;
            if rank < p {
                rank_deficient += 1;
            }
            for (r, &(_, sqrt_w, dies)) in at_risk.iter().enumerate() {
                if dies {
                    let contribution = &pinv.column(r) * sqrt_w;
                    hazards.row_mut(k + offset).scaled_add(1.0, &contribution);
                    variance
                        .row_mut(k + offset)
                        .scaled_add(1.0, &contribution.mapv(|c| c * c));
                }
            }
        }

        if rank_deficient > 0 {
            warn!(
                "aalen design was rank deficient at {rank_deficient} of {} event times",
                death_times.len()
            );
        }

        let fitted_times = Array1::from(fitted_times);
        let surface = |values: Array2<f64>| CoefficientSurface {
            timeline: fitted_times.clone(),
            columns: names.clone(),
            values,
        };
        let cumulative = surface(cumsum_rows(&hazards));
        let cumulative_variance = surface(cumsum_rows(&variance));
        let hazards = surface(hazards);

        let timeline = resolve_timeline(self.timeline.as_deref(), fitted_times.view())?;
        let cumulative = cumulative.reindexed(&timeline);
        let cumulative_variance = cumulative_variance.reindexed(&timeline);

        let z = z_quantile(self.confidence_level)?;
        let spread = cumulative_variance.values.mapv(|v| z * v.sqrt());
        let lower = CoefficientSurface {
            values: &cumulative.values - &spread,
            ..cumulative.clone()
        };
        let upper = CoefficientSurface {
            values: &cumulative.values + &spread,
            ..cumulative.clone()
        };

        debug!(
            "aalen fit over {} event times, {} coefficients",
            hazards.timeline.len(),
            p
        );
        info!(
            "aalen fit: {} subjects, {} events",
            subjects.len(),
            data.n_events()
        );

        self.fitted = Some(AalenFit {
            hazards,
            cumulative_hazards: cumulative,
            variance: cumulative_variance,
            lower,
            upper,
            names: data.names.clone(),
            fit_intercept: self.fit_intercept,
            n_samples: subjects.len(),
            n_events: data.n_events(),
        });
        Ok(self)
    }

    /// covariates with the intercept column appended when fitting one
    fn design(&self, covariates: ArrayView2<f64>) -> Result<Array2<f64>> {
        if !self.fit_intercept {
            return Ok(covariates.to_owned());
        }
        let ones = Array2::ones((covariates.nrows(), 1));
        concatenate(Axis(1), &[covariates.view(), ones.view()])
            .map_err(|e| SurvivalError::invalid_dimensions(e.to_string()))
    }

    pub fn fitted(&self) -> Result<&AalenFit> {
        self.fitted.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    pub fn cumulative_hazards(&self) -> Result<&CoefficientSurface> {
        Ok(self.fitted()?.cumulative_hazards())
    }

    pub fn hazards(&self) -> Result<&CoefficientSurface> {
        Ok(self.fitted()?.hazards())
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

impl SurvivalRegression for AalenAdditiveModel {
    /// H_i(t) = sum_j B_j(t) x_ij
    fn predict_cumulative_hazard(&self, covariates: &CovariateTable) -> Result<CurvePrediction> {
        let fit = self.fitted()?;
        let x = covariates.aligned(&fit.names)?;
        let design = if fit.fit_intercept {
            let ones = Array2::ones((x.nrows(), 1));
            concatenate(Axis(1), &[x.view(), ones.view()])
                .map_err(|e| SurvivalError::invalid_dimensions(e.to_string()))?
        } else {
            x
        };
        let values = fit.cumulative_hazards.values.dot(&design.t());
        CurvePrediction::new(
            fit.cumulative_hazards.timeline.clone(),
            covariates.index().to_vec(),
            values,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_table() -> CovariateTable {
        CovariateTable::from_columns(vec![
            ("T", vec![1.0, 2.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]),
            ("E", vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]),
            ("group", vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_intercept_only_is_nelson_aalen() {
        let table = create_test_table().drop_columns(&["group"]).unwrap();
        let mut model = AalenAdditiveModel::new();
        model.fit(&table, &RegressionColumns::new("T").with_event("E")).unwrap();
        let fit = model.fitted().unwrap();

        let baseline = fit.cumulative_hazards().column("baseline").unwrap();
        // death times 1,2,3,4,6,7 with 8,7,5,4,2,1 at risk
        let expected = [1.0 / 8.0, 1.0 / 7.0, 1.0 / 5.0, 1.0 / 4.0, 1.0 / 2.0, 1.0];
        let mut acc = 0.0;
        let mut acc_var = 0.0;
        let variance = fit.variance().column("baseline").unwrap();
        assert_eq!(baseline[0], 0.0);
        for (k, inc) in expected.iter().enumerate() {
            acc += inc;
            acc_var += inc * inc;
            assert_relative_eq!(baseline[k + 1], acc, epsilon = 1e-10);
            assert_relative_eq!(variance[k + 1], acc_var, epsilon = 1e-10);
        }
        assert_eq!(fit.timeline().to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 6.0, 7.0]);
    }

    #[test]
    fn test_binary_covariate_splits_groups() {
        let mut model = AalenAdditiveModel::new();
        model
            .fit(&create_test_table(), &RegressionColumns::new("T").with_event("E"))
            .unwrap();
        let fit = model.fitted().unwrap();
        assert_eq!(fit.cumulative_hazards().columns(), &["group".to_string(), "baseline".to_string()]);

        // row 0 is the origin; t=1: four at risk per group, the death is in group 0
        let baseline = fit.hazards().column("baseline").unwrap();
        assert_eq!(baseline[0], 0.0);
        assert_relative_eq!(baseline[1], 0.25, epsilon = 1e-10);
        // t=2: group 1 death among 4 at risk, group 0 has none
        let group = fit.hazards().column("group").unwrap();
        assert_relative_eq!(baseline[2], 0.0, epsilon = 1e-10);
        assert_relative_eq!(group[2], 0.25, epsilon = 1e-10);
    }

    #[test]
    fn test_panel_rows_match_static_rows() {
        let static_table = create_test_table();
        // subject 6 (T=6) observed in two rows w/ the same covariates
        let panel_table = CovariateTable::from_columns(vec![
            ("id", vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 6.0, 7.0]),
            ("T", vec![1.0, 2.0, 2.0, 3.0, 4.0, 5.0, 2.5, 6.0, 7.0]),
            ("E", vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]),
            ("group", vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0]),
        ])
        .unwrap();

        let columns = RegressionColumns::new("T").with_event("E");
        let mut static_model = AalenAdditiveModel::new();
        static_model.fit(&static_table, &columns).unwrap();
        let mut panel_model = AalenAdditiveModel::new();
        panel_model.fit(&panel_table, &columns.clone().with_id("id")).unwrap();

        let a = static_model.cumulative_hazards().unwrap();
        let b = panel_model.cumulative_hazards().unwrap();
        assert_eq!(a.timeline(), b.timeline());
        for (x, y) in a.values().iter().zip(b.values()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-10);
        }
        assert_eq!(panel_model.fitted().unwrap().n_samples(), 8);
    }

    #[test]
    fn test_custom_timeline_forward_fills() {
        let table = create_test_table();
        let mut model = AalenAdditiveModel::new().with_timeline(vec![0.5, 2.5, 10.0]);
        model.fit(&table, &RegressionColumns::new("T").with_event("E")).unwrap();
        let baseline = model.cumulative_hazards().unwrap().column("baseline").unwrap().to_vec();
        assert_eq!(baseline[0], 0.0);
        assert!(baseline[2] >= baseline[1]);
    }

    #[test]
    fn test_prediction() {
        let table = create_test_table();
        let mut model = AalenAdditiveModel::new();
        model.fit(&table, &RegressionColumns::new("T").with_event("E")).unwrap();
        let fit = model.fitted().unwrap();

        let h = model.predict_cumulative_hazard(&table).unwrap();
        let b = fit.cumulative_hazards();
        let (group, baseline) = (b.column("group").unwrap(), b.column("baseline").unwrap());
        let last = h.timeline().len() - 1;
        assert_relative_eq!(h.values()[[last, 1]], group[last] + baseline[last], epsilon = 1e-10);
        assert_relative_eq!(h.values()[[last, 0]], baseline[last], epsilon = 1e-10);

        let positional = CovariateTable::from_array(Array2::zeros((1, 2)));
        assert!(matches!(
            model.predict_survival_function(&positional),
            Err(SurvivalError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_penalizer_shrinks() {
        let table = create_test_table();
        let columns = RegressionColumns::new("T").with_event("E");
        let mut plain = AalenAdditiveModel::new();
        plain.fit(&table, &columns).unwrap();
        let mut ridge = AalenAdditiveModel::new().with_coef_penalizer(10.0).unwrap();
        ridge.fit(&table, &columns).unwrap();

        let norm = |m: &AalenAdditiveModel| {
            m.cumulative_hazards().unwrap().values().iter().map(|v| v * v).sum::<f64>()
        };
        assert!(norm(&ridge) < norm(&plain));
        assert!(AalenAdditiveModel::new().with_coef_penalizer(-1.0).is_err());
    }

    #[test]
    fn test_expectation_counts_time_before_first_death() {
        let table = CovariateTable::from_columns(vec![
            ("T", vec![10.0, 11.0, 12.0, 13.0]),
            ("x", vec![0.0, 1.0, 0.0, 1.0]),
        ])
        .unwrap();
        let mut model = AalenAdditiveModel::new();
        model.fit(&table, &RegressionColumns::new("T")).unwrap();
        assert_eq!(model.fitted().unwrap().timeline()[0], 0.0);

        // nobody dies before t=10
        let expectation = model.predict_expectation(&table).unwrap();
        for &e in expectation.values() {
            assert!(e >= 10.0, "expectation {e} below the first death time");
        }
        let survival = model.predict_survival_function(&table).unwrap();
        assert!(survival.values().row(0).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_prediction_ignores_column_order() {
        let table = create_test_table()
            .with_column("age", vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0])
            .unwrap();
        let mut model = AalenAdditiveModel::new();
        model.fit(&table, &RegressionColumns::new("T").with_event("E")).unwrap();
        let expected = model.predict_cumulative_hazard(&table).unwrap();

        let shuffled = table.select_columns(&["age", "E", "group", "T"]).unwrap();
        let from_shuffled = model.predict_cumulative_hazard(&shuffled).unwrap();
        assert_eq!(expected, from_shuffled);

        // a bare matrix in fitted column order predicts the same curves
        let matrix = CovariateTable::from_array(
            table.select_columns(&["group", "age"]).unwrap().values().to_owned(),
        );
        let from_matrix = model.predict_cumulative_hazard(&matrix).unwrap();
        assert_eq!(from_matrix.columns(), expected.columns());
        for (a, b) in from_matrix.values().iter().zip(expected.values()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_reserved_intercept_name() {
        let table = create_test_table()
            .with_column("baseline", vec![1.0; 8])
            .unwrap();
        let mut model = AalenAdditiveModel::new();
        assert!(model.fit(&table, &RegressionColumns::new("T").with_event("E")).is_err());
    }
}
