//! # survival hazards
//!
//! survival & hazard estimation for censored time-to-event data
//!
//! ## what you get
//!
//! - kaplan-meier (right & left censoring, late entry, weights)
//! - nelson-aalen cumulative hazard w/ kernel smoothing
//! - breslow-fleming-harrington survival from the cumulative hazard
//! - cox proportional hazards (efron ties, damped newton-raphson)
//! - aalen additive hazards regression, incl. repeated measurements per subject
//! - one prediction trait for both regression models
//!
//! ## quick start
//!
//! ```rust
//! use survival_hazards::{
//!     CoxModel, CovariateTable, KaplanMeierFitter, RegressionColumns, SurvivalData,
//!     SurvivalRegression,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // durations & whether the event was seen (false = censored)
//! let data = SurvivalData::new(vec![1.0, 2.5, 3.2, 4.1, 5.0], vec![true, false, true, true, false])?;
//! let mut kmf = KaplanMeierFitter::new();
//! kmf.fit(&data)?;
//! let median = kmf.median()?;
//!
//! // regression: every column that isn't a role column is a covariate
//! let table = CovariateTable::from_columns(vec![
//!     ("T", vec![1.0, 2.5, 3.2, 4.1, 5.0, 6.3]),
//!     ("E", vec![1.0, 0.0, 1.0, 1.0, 0.0, 1.0]),
//!     ("age", vec![61.0, 50.0, 58.0, 47.0, 44.0, 52.0]),
//! ])?;
//! let mut cox = CoxModel::new();
//! cox.fit(&table, &RegressionColumns::new("T").with_event("E"))?;
//! let survival = cox.predict_survival_function(&table)?;
//! println!("{}", cox.summary()?);
//! # Ok(())
//! # }
//! ```

pub mod aalen;
pub mod breslow_fleming_harrington;
pub mod curve;
pub mod data;
pub mod error;
pub mod event_table;
pub mod kaplan_meier;
pub mod linalg;
pub mod metrics;
pub mod model;
pub mod nelson_aalen;
pub mod optimization;
pub mod prediction;

pub use aalen::{AalenAdditiveModel, AalenFit, CoefficientSurface};
pub use breslow_fleming_harrington::{BreslowFlemingHarringtonFitter, BreslowFlemingHarringtonResult};
pub use curve::{ConfidenceInterval, Curve};
pub use data::{CovariateTable, RegressionColumns, SurvivalData};
pub use error::{Result, SurvivalError};
pub use event_table::{EventRow, EventTable};
pub use kaplan_meier::{Censoring, KaplanMeierEstimate, KaplanMeierFitter, KaplanMeierResult};
pub use metrics::concordance_index;
pub use model::{CoxFit, CoxModel, CoxSummary};
pub use nelson_aalen::{NelsonAalenFitter, NelsonAalenResult};
pub use prediction::{CurvePrediction, RowPrediction, SurvivalRegression};
