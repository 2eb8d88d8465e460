use thiserror::Error;

pub type Result<T> = std::result::Result<T, SurvivalError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurvivalError {
    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("bad parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    #[error("no column named '{name}'")]
    UnknownColumn { name: String },

    #[error("survival data is broken: {message}")]
    InvalidSurvivalData { message: String },

    /// risk set emptied (or collapsed) while events were still pending
    #[error("statistical degeneracy: {message}")]
    StatisticalDegeneracy { message: String },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },

    #[error("model not fitted yet - call fit() first")]
    ModelNotFitted,
}

impl SurvivalError {
    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    pub fn unknown_column(name: impl Into<String>) -> Self {
        Self::UnknownColumn { name: name.into() }
    }

    pub fn invalid_survival_data(message: impl Into<String>) -> Self {
        Self::InvalidSurvivalData { message: message.into() }
    }

    pub fn degeneracy(message: impl Into<String>) -> Self {
        Self::StatisticalDegeneracy { message: message.into() }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }

    /// true for the configuration family (bad lengths, names, parameters, values)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions { .. }
                | Self::InvalidParameter { .. }
                | Self::UnknownColumn { .. }
                | Self::InvalidSurvivalData { .. }
        )
    }
}

/// confidence levels live strictly inside (0, 1)
pub(crate) fn check_confidence_level(level: f64) -> Result<f64> {
    if level.is_finite() && level > 0.0 && level < 1.0 {
        Ok(level)
    } else {
        Err(SurvivalError::invalid_parameter("confidence_level", level))
    }
}
