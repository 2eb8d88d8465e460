use ndarray::ArrayView1;

use crate::{
    curve::{ci_labels, qth_survival_time, ConfidenceInterval, Curve},
    data::SurvivalData,
    error::{Result, SurvivalError},
    event_table::EventTable,
    nelson_aalen::NelsonAalenFitter,
};

/// survival curve S = exp(-H) on top of a nelson-aalen fit
#[derive(Debug, Clone, PartialEq)]
pub struct BreslowFlemingHarringtonResult {
    survival_function: Curve,
    confidence_interval: ConfidenceInterval,
    event_table: EventTable,
    median: f64,
}

impl BreslowFlemingHarringtonResult {
    pub fn survival_function(&self) -> &Curve {
        &self.survival_function
    }

    pub fn confidence_interval(&self) -> &ConfidenceInterval {
        &self.confidence_interval
    }

    pub fn event_table(&self) -> &EventTable {
        &self.event_table
    }

    pub fn timeline(&self) -> ArrayView1<'_, f64> {
        self.survival_function.timeline()
    }

    pub fn median(&self) -> f64 {
        self.median
    }

    pub fn predict(&self, t: f64) -> f64 {
        self.survival_function.at(t).unwrap_or(1.0)
    }

    pub fn subtract(&self, other: &BreslowFlemingHarringtonResult) -> Curve {
        self.survival_function.subtract(&other.survival_function)
    }

    pub fn divide(&self, other: &BreslowFlemingHarringtonResult) -> Curve {
        self.survival_function.divide(&other.survival_function)
    }
}

#[derive(Debug, Clone)]
pub struct BreslowFlemingHarringtonFitter {
    hazard: NelsonAalenFitter,
    label: String,
    ci_labels: Option<(String, String)>,
    fitted: Option<BreslowFlemingHarringtonResult>,
}

impl Default for BreslowFlemingHarringtonFitter {
    fn default() -> Self {
        Self {
            hazard: NelsonAalenFitter::new(),
            label: "BFH_estimate".to_string(),
            ci_labels: None,
            fitted: None,
        }
    }
}

impl BreslowFlemingHarringtonFitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confidence_level(mut self, level: f64) -> Result<Self> {
        self.hazard = self.hazard.with_confidence_level(level)?;
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
        self.hazard = self.hazard.with_timeline(timeline);
        self
    }

    pub fn with_bias_correction(mut self, on: bool) -> Self {
        self.hazard = self.hazard.with_bias_correction(on);
        self
    }

    /// errors from the underlying nelson-aalen fit propagate as is
    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        self.hazard.fit(data)?;
        let hazard = self.hazard.result()?;
        let h = hazard.cumulative_hazard();
        let ci = hazard.confidence_interval();

        let timeline = h.timeline().to_owned();
        let survival = h.values().mapv(|v| (-v).exp());
        // the transform is decreasing, so the bands swap
        let upper = ci.lower().mapv(|v| (-v).exp());
        let lower = ci.upper().mapv(|v| (-v).exp());

        let median = qth_survival_time(0.5, timeline.view(), survival.view());
        let labels = ci_labels(&self.label, self.hazard.confidence_level(), self.ci_labels.as_ref());

        self.fitted = Some(BreslowFlemingHarringtonResult {
            confidence_interval: ConfidenceInterval::new(labels, timeline.clone(), upper, lower),
            survival_function: Curve::new(self.label.clone(), timeline, survival)?,
            event_table: hazard.event_table().clone(),
            median,
        });
        Ok(self)
    }

    pub fn result(&self) -> Result<&BreslowFlemingHarringtonResult> {
        self.fitted.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    pub fn survival_function(&self) -> Result<&Curve> {
        Ok(self.result()?.survival_function())
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
