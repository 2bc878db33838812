//! Conformal calibration engine for time-series forecasting.
//!
//! This crate wraps any pre-trained forecasting model (behind the
//! [`ForecastingModel`] trait) and turns its point or probabilistic
//! forecasts into calibrated prediction intervals with distribution-free
//! coverage, via split conformal prediction and conformalized quantile
//! regression. Calibration replays the model over past data, scores each
//! replayed forecast against the actuals, and corrects new forecasts with
//! empirical quantiles of those scores, honoring causality during
//! backtests.

pub mod calibrate;
pub mod conformal;
pub mod error;
pub mod model;
pub mod residuals;
pub mod score;
pub mod series;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use calibrate::{calibrate_window, calibration_level, empirical_quantile, QuantileSet};
pub use conformal::{
    evaluate_intervals, ConformalModel, ConformalOptions, HistoricalForecastOptions,
    IntervalEvaluation, IntervalMetrics, PredictOptions, Start,
};
pub use error::{CalibrationSource, ConformalError, Result};
pub use model::{ExtremeLags, ForecastingModel, HistoricalForecasts};
pub use residuals::ResidualMatrix;
pub use score::{CalibrationPlan, DerivedForecast, ScoreKind, Scorer};
pub use series::{SeriesInput, TimeSeries};
