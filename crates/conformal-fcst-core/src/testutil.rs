//! Reference forecasting models for tests.

use crate::error::{CalibrationSource, ConformalError, Result};
use crate::model::{ExtremeLags, ForecastingModel};
use crate::series::{SeriesInput, TimeSeries};

/// Deterministic window-mean forecaster: predicts the mean of the last
/// `lookback` target values, held constant over the horizon.
///
/// On an exactly linear series with an odd `lookback` the forecast equals
/// the value `(lookback - 1) / 2 + 1` steps before the predicted point, so
/// residuals are constant and calibrated bounds can be computed by hand.
#[derive(Debug)]
pub(crate) struct WindowMeanModel {
    training: SeriesInput,
    lookback: usize,
    output_chunk_length: usize,
    shift: usize,
    probabilistic: bool,
    fitted: bool,
}

impl WindowMeanModel {
    pub fn fit(series: TimeSeries, lookback: usize, output_chunk_length: usize) -> Self {
        Self {
            training: SeriesInput::new(series),
            lookback,
            output_chunk_length,
            shift: 0,
            probabilistic: false,
            fitted: true,
        }
    }

    /// Leaves a gap of `shift` steps between the input end and the first
    /// predicted point.
    pub fn with_shift(mut self, shift: usize) -> Self {
        self.shift = shift;
        self
    }

    /// Emits a fan of samples spaced one unit apart and centered on the
    /// window mean, so sample medians and quantiles are exactly predictable.
    pub fn probabilistic(mut self) -> Self {
        self.probabilistic = true;
        self
    }

    pub fn unfitted(mut self) -> Self {
        self.fitted = false;
        self
    }
}

impl ForecastingModel for WindowMeanModel {
    fn output_chunk_length(&self) -> usize {
        self.output_chunk_length
    }

    fn output_chunk_shift(&self) -> usize {
        self.shift
    }

    fn extreme_lags(&self) -> ExtremeLags {
        ExtremeLags {
            lookback: self.lookback,
            lookahead: 0,
        }
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn supports_probabilistic_prediction(&self) -> bool {
        self.probabilistic
    }

    fn training_input(&self) -> Option<&SeriesInput> {
        Some(&self.training)
    }

    fn predict(&self, n: usize, input: &SeriesInput, num_samples: usize) -> Result<TimeSeries> {
        let series = &input.series;
        let n_components = self.training.series.n_components();
        if series.n_components() != n_components {
            return Err(ConformalError::DimensionMismatch {
                what: "series components".to_string(),
                expected: n_components,
                got: series.n_components(),
            });
        }
        if series.len() < self.lookback {
            return Err(ConformalError::InsufficientHistory {
                series: CalibrationSource::Target,
                needed: self.lookback,
                got: series.len(),
            });
        }
        let n_samples = if self.probabilistic { num_samples.max(1) } else { 1 };
        let mut means = vec![0.0; n_components];
        for c in 0..n_components {
            for t in series.len() - self.lookback..series.len() {
                means[c] += series.value(t, c);
            }
            means[c] /= self.lookback as f64;
        }
        let half = (n_samples as f64 - 1.0) / 2.0;
        let mut values = Vec::with_capacity(n * n_components * n_samples);
        for _ in 0..n {
            for &mean in &means {
                for s in 0..n_samples {
                    values.push(mean + s as f64 - half);
                }
            }
        }
        let start = series.end_time() + series.freq() * (1 + self.shift as i64);
        TimeSeries::new(values, n_components, n_samples, start, series.freq())?
            .with_component_names(series.component_names().to_vec())
    }
}
