//! Error types for conformal forecasting.

use thiserror::Error;

/// Result type for conformal forecasting operations.
pub type Result<T> = std::result::Result<T, ConformalError>;

/// Identifies which series failed to provide enough calibration history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSource {
    /// Residuals were replayed on the target series itself.
    Target,
    /// Residuals were replayed on an explicit calibration series.
    Calibration,
}

impl std::fmt::Display for CalibrationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationSource::Target => write!(f, "target series"),
            CalibrationSource::Calibration => write!(f, "calibration series"),
        }
    }
}

/// Error types for conformal forecasting operations.
///
/// Wrapped forecasting models report their failures through the same enum,
/// so model errors propagate to the caller unchanged.
#[derive(Error, Debug)]
pub enum ConformalError {
    #[error("Invalid quantiles: {0}")]
    InvalidQuantiles(String),

    #[error("Wrapped forecasting model must be pre-trained")]
    NotFitted,

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    // the field is not named `source`: thiserror would chain it as the
    // error's source(), which CalibrationSource is not
    #[error(
        "Insufficient history in {series}: could not build a calibration window \
         of at least {needed} residual(s), got {got}"
    )]
    InsufficientHistory {
        series: CalibrationSource,
        needed: usize,
        got: usize,
    },
}

impl ConformalError {
    /// True when the error indicates missing calibration history.
    pub fn is_insufficient_history(&self) -> bool {
        matches!(self, ConformalError::InsufficientHistory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConformalError::InvalidQuantiles("median quantile 0.5 missing".into());
        assert_eq!(
            format!("{}", err),
            "Invalid quantiles: median quantile 0.5 missing"
        );

        let err = ConformalError::DimensionMismatch {
            what: "series components".into(),
            expected: 2,
            got: 3,
        };
        assert_eq!(
            format!("{}", err),
            "Dimension mismatch for series components: expected 2, got 3"
        );
    }

    #[test]
    fn test_insufficient_history_names_series() {
        let err = ConformalError::InsufficientHistory {
            series: CalibrationSource::Calibration,
            needed: 1,
            got: 0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("calibration series"));
        assert!(err.is_insufficient_history());
        // the offending series is a plain field, not a chained error
        assert!(std::error::Error::source(&err).is_none());

        let err = ConformalError::InsufficientHistory {
            series: CalibrationSource::Target,
            needed: 3,
            got: 1,
        };
        assert!(format!("{}", err).contains("target series"));
    }
}
