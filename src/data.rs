use std::borrow::Borrow;
use std::collections::HashSet;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, SurvivalError};

/// raw per-subject observations - durations, event flags, optional entry times & weights
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalData {
    durations: Array1<f64>,       // time to event/censoring
    events: Array1<bool>,         // true = event, false = censored
    entry: Option<Array1<f64>>,   // left-truncation times
    weights: Option<Array1<f64>>, // per-subject weights, 1 when absent
}

impl SurvivalData {
    /// make survival data from durations & event flags (anything iterable: vecs, slices, arrays)
    pub fn new<D, E>(durations: D, events: E) -> Result<Self>
    where
        D: IntoIterator,
        D::Item: Borrow<f64>,
        E: IntoIterator,
        E::Item: Borrow<bool>,
    {
        let durations: Array1<f64> = durations.into_iter().map(|d| *d.borrow()).collect();
        let events: Array1<bool> = events.into_iter().map(|e| *e.borrow()).collect();

        if events.len() != durations.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "durations len ({}) != events len ({})",
                durations.len(),
                events.len()
            )));
        }

        if durations.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "durations must be non-negative & finite",
            ));
        }

        Ok(Self {
            durations,
            events,
            entry: None,
            weights: None,
        })
    }

    /// every subject observed (no censoring)
    pub fn from_durations<D>(durations: D) -> Result<Self>
    where
        D: IntoIterator,
        D::Item: Borrow<f64>,
    {
        let durations: Vec<f64> = durations.into_iter().map(|d| *d.borrow()).collect();
        let events = vec![true; durations.len()];
        Self::new(durations, events)
    }

    /// attach left-truncation (entry) times
    pub fn with_entry<T>(mut self, entry: T) -> Result<Self>
    where
        T: IntoIterator,
        T::Item: Borrow<f64>,
    {
        let entry: Array1<f64> = entry.into_iter().map(|e| *e.borrow()).collect();
        if entry.len() != self.n_samples() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "entry len ({}) != n_samples ({})",
                entry.len(),
                self.n_samples()
            )));
        }
        if entry.iter().any(|e| !e.is_finite()) {
            return Err(SurvivalError::invalid_survival_data("entry times must be finite"));
        }
        self.entry = Some(entry);
        Ok(self)
    }

    /// attach per-subject weights
    pub fn with_weights<W>(mut self, weights: W) -> Result<Self>
    where
        W: IntoIterator,
        W::Item: Borrow<f64>,
    {
        let weights: Array1<f64> = weights.into_iter().map(|w| *w.borrow()).collect();
        if weights.len() != self.n_samples() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "weights len ({}) != n_samples ({})",
                weights.len(),
                self.n_samples()
            )));
        }
        if weights.iter().any(|&w| w <= 0.0 || !w.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "weights must be positive & finite",
            ));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn n_samples(&self) -> usize {
        self.durations.len()
    }

    pub fn durations(&self) -> ArrayView1<'_, f64> {
        self.durations.view()
    }

    pub fn events(&self) -> ArrayView1<'_, bool> {
        self.events.view()
    }

    pub fn entry(&self) -> Option<ArrayView1<'_, f64>> {
        self.entry.as_ref().map(|e| e.view())
    }

    pub fn weights(&self) -> Option<ArrayView1<'_, f64>> {
        self.weights.as_ref().map(|w| w.view())
    }

    /// grab a subset of subjects by indices
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(SurvivalError::invalid_dimensions("subset index out of bounds"));
        }

        let mut data = Self::new(
            indices.iter().map(|&i| self.durations[i]),
            indices.iter().map(|&i| self.events[i]),
        )?;
        if let Some(entry) = &self.entry {
            data = data.with_entry(indices.iter().map(|&i| entry[i]))?;
        }
        if let Some(weights) = &self.weights {
            data = data.with_weights(indices.iter().map(|&i| weights[i]))?;
        }
        Ok(data)
    }
}

/// row-indexed numeric table - the regression estimators' input
///
/// Columns are either named (order preserved) or positional, which is what a
/// bare matrix gives you. Row labels travel through to every prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateTable {
    index: Vec<String>,
    columns: Option<Vec<String>>,
    values: Array2<f64>,
}

impl CovariateTable {
    /// named columns over a value matrix, positional row labels
    pub fn new<S: Into<String>>(columns: Vec<S>, values: Array2<f64>) -> Result<Self> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.len() != values.ncols() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} column names for {} columns",
                columns.len(),
                values.ncols()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(SurvivalError::invalid_parameter("columns", format!("duplicate '{dup}'")));
        }

        Ok(Self {
            index: positional_index(values.nrows()),
            columns: Some(columns),
            values,
        })
    }

    /// build column by column: `[("t", vec![..]), ("x", vec![..])]`
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<f64>)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut values = Array2::zeros((n_rows, columns.len()));

        for (j, (name, column)) in columns.into_iter().enumerate() {
            let name = name.into();
            if column.len() != n_rows {
                return Err(SurvivalError::invalid_dimensions(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    column.len(),
                    n_rows
                )));
            }
            values.column_mut(j).assign(&Array1::from(column));
            names.push(name);
        }

        Self::new(names, values)
    }

    /// bare matrix - positional columns and rows
    pub fn from_array(values: Array2<f64>) -> Self {
        Self {
            index: positional_index(values.nrows()),
            columns: None,
            values,
        }
    }

    /// replace the row labels
    pub fn with_index<S: Into<String>>(mut self, index: Vec<S>) -> Result<Self> {
        if index.len() != self.values.nrows() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "index len ({}) != n_rows ({})",
                index.len(),
                self.values.nrows()
            )));
        }
        self.index = index.into_iter().map(Into::into).collect();
        Ok(self)
    }

    /// append a named column
    pub fn with_column(mut self, name: impl Into<String>, column: Vec<f64>) -> Result<Self> {
        let name = name.into();
        let columns = self.columns.as_mut().ok_or_else(|| {
            SurvivalError::invalid_parameter("columns", "can't add a named column to a positional table")
        })?;
        if columns.contains(&name) {
            return Err(SurvivalError::invalid_parameter("columns", format!("duplicate '{name}'")));
        }
        if column.len() != self.values.nrows() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "column '{}' has {} rows, expected {}",
                name,
                column.len(),
                self.values.nrows()
            )));
        }
        let column = Array1::from(column).insert_axis(Axis(1));
        self.values = ndarray::concatenate(Axis(1), &[self.values.view(), column.view()])
            .map_err(|e| SurvivalError::invalid_dimensions(e.to_string()))?;
        columns.push(name);
        Ok(self)
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// column names, `None` for a positional table
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.columns
            .as_ref()
            .and_then(|cols| cols.iter().position(|c| c == name))
            .ok_or_else(|| SurvivalError::unknown_column(name))
    }

    /// one column by name
    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        Ok(self.values.column(self.position(name)?))
    }

    /// keep (and reorder to) the given columns
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let positions = names
            .iter()
            .map(|n| self.position(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            index: self.index.clone(),
            columns: Some(names.iter().map(|n| n.as_ref().to_string()).collect()),
            values: self.values.select(Axis(1), &positions),
        })
    }

    /// everything but the given columns
    pub fn drop_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        for name in names {
            self.position(name.as_ref())?;
        }
        let keep: Vec<String> = self
            .columns
            .iter()
            .flatten()
            .filter(|c| !names.iter().any(|n| n.as_ref() == c.as_str()))
            .cloned()
            .collect();
        self.select_columns(&keep)
    }

    /// keep (and reorder to) the given rows, labels included
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        if rows.iter().any(|&r| r >= self.n_rows()) {
            return Err(SurvivalError::invalid_dimensions("row index out of bounds"));
        }
        Ok(Self {
            index: rows.iter().map(|&r| self.index[r].clone()).collect(),
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), rows),
        })
    }

    /// values laid out in the fitted column order
    ///
    /// Named tables are matched by name (extra columns are ignored); positional
    /// tables must carry exactly the fitted number of columns.
    pub(crate) fn aligned(&self, names: &[String]) -> Result<Array2<f64>> {
        match &self.columns {
            Some(_) => {
                let positions = names
                    .iter()
                    .map(|n| self.position(n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.values.select(Axis(1), &positions))
            }
            None => {
                if self.n_columns() != names.len() {
                    return Err(SurvivalError::invalid_dimensions(format!(
                        "feature count mismatch: expected {}, got {}",
                        names.len(),
                        self.n_columns()
                    )));
                }
                Ok(self.values.clone())
            }
        }
    }
}

fn positional_index(n: usize) -> Vec<String> {
    (0..n).map(|i| i.to_string()).collect()
}

/// which table columns play which role in a regression fit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionColumns {
    duration: String,
    event: Option<String>,
    id: Option<String>,
    weights: Option<String>,
}

impl RegressionColumns {
    pub fn new(duration: impl Into<String>) -> Self {
        Self {
            duration: duration.into(),
            event: None,
            id: None,
            weights: None,
        }
    }

    /// event flag column (0/1); absent means every row is an event
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// subject id column for panel (repeated-measurement) input
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_weights(mut self, weights: impl Into<String>) -> Self {
        self.weights = Some(weights.into());
        self
    }

    pub fn duration(&self) -> &str {
        &self.duration
    }

    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn weights(&self) -> Option<&str> {
        self.weights.as_deref()
    }

    fn roles(&self) -> Vec<&str> {
        std::iter::once(self.duration.as_str())
            .chain(self.event.as_deref())
            .chain(self.id.as_deref())
            .chain(self.weights.as_deref())
            .collect()
    }
}

/// a regression table split into its roles
#[derive(Debug, Clone)]
pub(crate) struct RegressionData {
    pub durations: Array1<f64>,
    pub events: Vec<bool>,
    pub weights: Array1<f64>,
    pub ids: Option<Vec<f64>>,
    pub covariates: Array2<f64>,
    pub names: Vec<String>,
}

impl RegressionData {
    pub fn extract(table: &CovariateTable, columns: &RegressionColumns) -> Result<Self> {
        if table.columns().is_none() {
            return Err(SurvivalError::invalid_parameter(
                "table",
                "fitting needs named columns",
            ));
        }
        if table.n_rows() == 0 {
            return Err(SurvivalError::invalid_survival_data("table has no rows"));
        }

        let durations = table.column(columns.duration())?.to_owned();
        if durations.iter().any(|t| !t.is_finite()) {
            return Err(SurvivalError::invalid_survival_data("durations must be finite"));
        }

        let events = match columns.event() {
            Some(name) => table
                .column(name)?
                .iter()
                .map(|&e| match e {
                    v if v == 1.0 => Ok(true),
                    v if v == 0.0 => Ok(false),
                    v => Err(SurvivalError::invalid_survival_data(format!(
                        "event column '{name}' must hold 0/1, found {v}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![true; table.n_rows()],
        };

        let weights = match columns.weights() {
            Some(name) => {
                let w = table.column(name)?.to_owned();
                if w.iter().any(|&w| w <= 0.0 || !w.is_finite()) {
                    return Err(SurvivalError::invalid_survival_data(
                        "weights must be positive & finite",
                    ));
                }
                w
            }
            None => Array1::ones(table.n_rows()),
        };

        let ids = match columns.id() {
            Some(name) => Some(table.column(name)?.to_vec()),
            None => None,
        };

        let covariate_table = table.drop_columns(&columns.roles())?;
        let names = covariate_table.columns().map(<[String]>::to_vec).unwrap_or_default();
        if covariate_table.values().iter().any(|v| !v.is_finite()) {
            return Err(SurvivalError::invalid_survival_data("covariates must be finite"));
        }

        Ok(Self {
            durations,
            events,
            weights,
            ids,
            covariates: covariate_table.values().to_owned(),
            names,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.durations.len()
    }

    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    /// row order by ascending duration (stable)
    pub fn duration_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.n_samples()).collect();
        order.sort_by(|&a, &b| self.durations[a].total_cmp(&self.durations[b]));
        order
    }

    /// column means & sample std devs (ddof = 1)
    pub fn column_moments(&self) -> Result<(Array1<f64>, Array1<f64>)> {
        if self.n_samples() < 2 {
            return Err(SurvivalError::invalid_survival_data(
                "need at least 2 rows to normalize covariates",
            ));
        }
        let means = self
            .covariates
            .mean_axis(Axis(0))
            .ok_or_else(|| SurvivalError::invalid_survival_data("no rows to average"))?;
        let stds = self.covariates.std_axis(Axis(0), 1.0);

        if let Some(j) = stds.iter().position(|&s| s == 0.0) {
            return Err(SurvivalError::numerical_error(format!(
                "feature '{}' has zero variance - can't standardize",
                self.names[j]
            )));
        }
        Ok((means, stds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn create_test_table() -> CovariateTable {
        CovariateTable::from_columns(vec![
            ("t", vec![5.0, 1.0, 3.0, 4.0, 2.0]),
            ("E", vec![1.0, 0.0, 1.0, 1.0, 0.0]),
            ("x1", vec![1.0, 3.0, 5.0, 7.0, 9.0]),
            ("x2", vec![2.0, 4.0, 6.0, 8.0, 10.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_survival_data_creation() {
        let data = SurvivalData::new(vec![1.0, 2.0, 3.0], vec![true, false, true]).unwrap();
        assert_eq!(data.n_samples(), 3);
        assert!(data.entry().is_none());
        assert!(data.weights().is_none());
    }

    #[test]
    fn test_list_and_array_inputs_agree() {
        let durations = array![3.0, 1.0, 2.0];
        let events = array![true, false, true];
        let from_array = SurvivalData::new(&durations, &events).unwrap();
        let from_list = SurvivalData::new(vec![3.0, 1.0, 2.0], vec![true, false, true]).unwrap();
        assert_eq!(from_array, from_list);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(
            SurvivalData::new(vec![1.0, 2.0], vec![true]),
            Err(SurvivalError::InvalidDimensions { .. })
        ));
        let data = SurvivalData::from_durations(vec![1.0, 2.0]).unwrap();
        assert!(data.clone().with_entry(vec![0.0]).is_err());
        assert!(data.with_weights(vec![1.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert!(SurvivalData::from_durations(vec![-1.0, 2.0]).is_err());
        assert!(SurvivalData::from_durations(vec![f64::NAN]).is_err());
        let data = SurvivalData::from_durations(vec![1.0, 2.0]).unwrap();
        assert!(data.with_weights(vec![1.0, 0.0]).is_err());
    }

    #[test]
    fn test_subset_carries_entry_and_weights() {
        let data = SurvivalData::new(vec![1.0, 2.0, 3.0], vec![true, false, true])
            .unwrap()
            .with_entry(vec![0.0, 0.5, 1.0])
            .unwrap()
            .with_weights(vec![1.0, 2.0, 3.0])
            .unwrap();
        let subset = data.subset(&[2, 0]).unwrap();
        assert_eq!(subset.durations().to_vec(), vec![3.0, 1.0]);
        assert_eq!(subset.entry().unwrap().to_vec(), vec![1.0, 0.0]);
        assert_eq!(subset.weights().unwrap().to_vec(), vec![3.0, 1.0]);
        assert!(data.subset(&[3]).is_err());
    }

    #[test]
    fn test_table_column_selection() {
        let table = create_test_table();
        let reordered = table.select_columns(&["x2", "x1"]).unwrap();
        assert_eq!(reordered.columns().unwrap(), &["x2".to_string(), "x1".to_string()]);
        assert_eq!(reordered.values()[[0, 0]], 2.0);

        let dropped = table.drop_columns(&["t", "E"]).unwrap();
        assert_eq!(dropped.n_columns(), 2);
        assert!(matches!(
            table.column("nope"),
            Err(SurvivalError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_table_rows_keep_labels() {
        let table = create_test_table()
            .with_index(vec!["a", "b", "c", "d", "e"])
            .unwrap();
        let rows = table.select_rows(&[3, 0]).unwrap();
        assert_eq!(rows.index(), &["d".to_string(), "a".to_string()]);
        assert_eq!(rows.column("x1").unwrap().to_vec(), vec![7.0, 1.0]);
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let values = Array2::zeros((2, 2));
        assert!(CovariateTable::new(vec!["a", "a"], values).is_err());
        let table = create_test_table();
        assert!(table.with_column("x1", vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_alignment() {
        let table = create_test_table();
        let names = vec!["x2".to_string(), "x1".to_string()];
        let aligned = table.aligned(&names).unwrap();
        assert_eq!(aligned.row(0).to_vec(), vec![2.0, 1.0]);

        let positional = CovariateTable::from_array(Array2::zeros((3, 2)));
        assert!(positional.aligned(&names).is_ok());
        let wrong = CovariateTable::from_array(Array2::zeros((3, 3)));
        assert!(matches!(
            wrong.aligned(&names),
            Err(SurvivalError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_regression_extraction() {
        let table = create_test_table();
        let columns = RegressionColumns::new("t").with_event("E");
        let data = RegressionData::extract(&table, &columns).unwrap();
        assert_eq!(data.names, vec!["x1".to_string(), "x2".to_string()]);
        assert_eq!(data.events, vec![true, false, true, true, false]);
        assert_eq!(data.n_events(), 3);
        assert_eq!(data.duration_order(), vec![1, 4, 2, 3, 0]);
    }

    #[test]
    fn test_regression_bad_event_values() {
        let table = create_test_table()
            .with_column("bad", vec![0.0, 2.0, 1.0, 1.0, 0.0])
            .unwrap();
        let columns = RegressionColumns::new("t").with_event("bad");
        assert!(matches!(
            RegressionData::extract(&table, &columns),
            Err(SurvivalError::InvalidSurvivalData { .. })
        ));
    }

    #[test]
    fn test_column_moments() {
        let table = create_test_table();
        let data = RegressionData::extract(&table, &RegressionColumns::new("t").with_event("E")).unwrap();
        let (means, stds) = data.column_moments().unwrap();
        assert_relative_eq!(means[0], 5.0, epsilon = 1e-10);
        assert_relative_eq!(means[1], 6.0, epsilon = 1e-10);
        assert_relative_eq!(stds[0], 10.0_f64.sqrt(), epsilon = 1e-10);
    }
}
