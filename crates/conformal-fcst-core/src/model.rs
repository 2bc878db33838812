//! Wrapped forecasting model interface.
//!
//! The conformal engine performs no parameter learning of its own. It wraps
//! a pre-trained forecasting model behind the [`ForecastingModel`] trait and
//! only consumes its `predict` / `historical_forecasts` surface. Residual
//! bookkeeping happens on top of these calls (see [`crate::residuals`]).

use crate::error::Result;
use crate::series::{SeriesInput, TimeSeries};

/// Minimum lookback/lookahead a model requires around the forecast origin.
///
/// `lookback` is the number of target points the model consumes as input;
/// `lookahead` is the number of future covariate points it needs beyond the
/// origin (zero for models without future covariates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtremeLags {
    pub lookback: usize,
    pub lookahead: usize,
}

/// Output of a historical-forecast replay.
#[derive(Debug, Clone)]
pub enum HistoricalForecasts {
    /// Only the final predicted step of each re-forecast, collapsed into one
    /// contiguous series.
    LastPoints(TimeSeries),
    /// Every re-forecast retained in full.
    All(Vec<TimeSeries>),
}

impl HistoricalForecasts {
    /// The retained forecasts, when every re-forecast was kept.
    pub fn all(self) -> Option<Vec<TimeSeries>> {
        match self {
            HistoricalForecasts::All(forecasts) => Some(forecasts),
            HistoricalForecasts::LastPoints(_) => None,
        }
    }

    /// The collapsed last-points series, when only last points were kept.
    pub fn last_points(self) -> Option<TimeSeries> {
        match self {
            HistoricalForecasts::LastPoints(series) => Some(series),
            HistoricalForecasts::All(_) => None,
        }
    }

    /// Number of forecasts (time steps for the last-points form).
    pub fn len(&self) -> usize {
        match self {
            HistoricalForecasts::LastPoints(series) => series.len(),
            HistoricalForecasts::All(forecasts) => forecasts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pre-trained forecasting model the conformal engine can wrap.
///
/// Implementations must be side-effect free: `predict` and
/// `historical_forecasts` are treated as idempotent, read-only operations.
pub trait ForecastingModel: Send + Sync {
    /// Maximum horizon the model predicts in one shot.
    fn output_chunk_length(&self) -> usize;

    /// Number of steps between the end of the input and the first predicted
    /// point.
    fn output_chunk_shift(&self) -> usize {
        0
    }

    /// Input requirements around the forecast origin.
    fn extreme_lags(&self) -> ExtremeLags;

    /// True once the model has been trained.
    fn is_fitted(&self) -> bool;

    fn supports_past_covariates(&self) -> bool {
        false
    }

    fn supports_future_covariates(&self) -> bool {
        false
    }

    /// True when the model can emit more than one sample per predicted point.
    fn supports_probabilistic_prediction(&self) -> bool {
        false
    }

    /// The fit-time input, when the model was trained on exactly one series.
    fn training_input(&self) -> Option<&SeriesInput> {
        None
    }

    /// Forecasts `n` steps past the end of `input.series`.
    ///
    /// The returned series starts `output_chunk_shift() + 1` steps after the
    /// last input point and carries `num_samples` samples per value for
    /// probabilistic models (`num_samples = 1` keeps it deterministic).
    fn predict(&self, n: usize, input: &SeriesInput, num_samples: usize) -> Result<TimeSeries>;

    /// Repeatedly re-forecasts as time advances over `input.series`.
    ///
    /// The default implementation slides the forecast origin one step at a
    /// time and calls [`predict`](ForecastingModel::predict) on the growing
    /// input prefix. With `overlap_end` the final forecasts may extend past
    /// the series end. Implementors may override with an optimized replay,
    /// keeping these semantics.
    fn historical_forecasts(
        &self,
        input: &SeriesInput,
        horizon: usize,
        stride: usize,
        overlap_end: bool,
        last_points_only: bool,
        num_samples: usize,
    ) -> Result<HistoricalForecasts> {
        let series = &input.series;
        let lookback = self.extreme_lags().lookback;
        let mut forecasts = Vec::new();
        if series.len() >= lookback {
            for j in (0..=series.len() - lookback).step_by(stride.max(1)) {
                let prefix = input.with_series(series.slice(0, lookback + j));
                let forecast = self.predict(horizon, &prefix, num_samples)?;
                if !overlap_end && forecast.end_time() > series.end_time() {
                    break;
                }
                forecasts.push(forecast);
            }
        }
        if !last_points_only {
            return Ok(HistoricalForecasts::All(forecasts));
        }
        let mut values = Vec::new();
        let mut start = 0;
        for (idx, forecast) in forecasts.iter().enumerate() {
            let last = forecast.len() - 1;
            if idx == 0 {
                start = forecast.time_index(last);
            }
            for c in 0..forecast.n_components() {
                values.extend_from_slice(forecast.samples(last, c));
            }
        }
        let (n_components, n_samples) = match forecasts.first() {
            Some(f) => (f.n_components(), f.n_samples()),
            None => (series.n_components(), 1),
        };
        let collapsed = TimeSeries::new(
            values,
            n_components,
            n_samples,
            start,
            series.freq() * stride.max(1) as i64,
        )?;
        Ok(HistoricalForecasts::LastPoints(collapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::WindowMeanModel;

    #[test]
    fn test_default_historical_forecasts_overlap_end() {
        // series of length 8, lookback 3 -> 6 possible origins with overlap_end
        let series = TimeSeries::from_values((0..8).map(|v| v as f64).collect());
        let model = WindowMeanModel::fit(series.clone(), 3, 2);
        let input = SeriesInput::new(series.clone());

        let all = model
            .historical_forecasts(&input, 2, 1, true, false, 1)
            .unwrap()
            .all()
            .unwrap();
        assert_eq!(all.len(), 6);
        // first forecast starts right after the first full lookback window
        assert_eq!(all[0].start_time(), 3);
        assert_eq!(all[0].len(), 2);
        // last forecast extends past the series end
        assert!(all[5].end_time() > series.end_time());

        // without overlap_end, forecasts must stay inside the series
        let trimmed = model
            .historical_forecasts(&input, 2, 1, false, false, 1)
            .unwrap()
            .all()
            .unwrap();
        assert_eq!(trimmed.len(), 4);
        assert!(trimmed.iter().all(|f| f.end_time() <= series.end_time()));
    }

    #[test]
    fn test_default_historical_forecasts_last_points() {
        let series = TimeSeries::from_values((0..8).map(|v| v as f64).collect());
        let model = WindowMeanModel::fit(series.clone(), 3, 2);
        let input = SeriesInput::new(series);

        let all = model
            .historical_forecasts(&input, 2, 1, true, false, 1)
            .unwrap()
            .all()
            .unwrap();
        let last = model
            .historical_forecasts(&input, 2, 1, true, true, 1)
            .unwrap()
            .last_points()
            .unwrap();
        assert_eq!(last.len(), all.len());
        assert_eq!(last.start_time(), all[0].time_index(1));
        for (j, forecast) in all.iter().enumerate() {
            assert_eq!(last.value(j, 0), forecast.value(1, 0));
        }
    }

    #[test]
    fn test_too_short_series_yields_no_forecasts() {
        let series = TimeSeries::from_values(vec![1.0, 2.0]);
        let model = WindowMeanModel::fit(series.clone(), 3, 1);
        let input = SeriesInput::new(series);
        let hfcs = model
            .historical_forecasts(&input, 1, 1, true, false, 1)
            .unwrap();
        assert!(hfcs.is_empty());
    }
}
