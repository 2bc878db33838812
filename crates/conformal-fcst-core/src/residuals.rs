//! Residual bookkeeping for conformal calibration.
//!
//! A [`ResidualMatrix`] holds the nonconformity scores of a historical
//! forecast replay: one cell per (forecast origin, horizon step, component,
//! score column). Cells whose actual value does not exist are NaN. Windows
//! served from the matrix respect causality through a single predicate:
//! the residual of origin `j` at step `h` is visible when correcting the
//! forecast at origin index `k` iff `j + h + shift < k`, where `shift` is
//! the wrapped model's output chunk shift. No future information can enter
//! a calibration window.

use crate::error::{ConformalError, Result};
use crate::score::{DerivedForecast, Scorer};
use crate::series::TimeSeries;

/// Nonconformity scores of a historical forecast replay, organized per
/// horizon step.
#[derive(Debug, Clone)]
pub struct ResidualMatrix {
    /// Flat buffer, index `(j * horizon + step) * n_cols + col`.
    values: Vec<f64>,
    n_forecasts: usize,
    horizon: usize,
    n_cols: usize,
    shift: usize,
    /// Per step: number of leading origins whose actual value exists.
    avail: Vec<usize>,
}

impl ResidualMatrix {
    /// Scores every derived forecast against the ground-truth series.
    ///
    /// `derived` must come from a stride-1, full-horizon replay with
    /// `overlap_end` enabled, so every partial horizon at the series end is
    /// represented (those cells stay NaN).
    pub fn build(
        derived: &[DerivedForecast],
        actuals: &TimeSeries,
        scorer: &Scorer,
        shift: usize,
    ) -> Result<Self> {
        let horizon = derived.first().map(|d| d.len).unwrap_or(0);
        let n_components = actuals.n_components();
        let score_cols = scorer.score_columns();
        let n_cols = n_components * score_cols;
        let n_forecasts = derived.len();

        let mut values = vec![f64::NAN; n_forecasts * horizon * n_cols];
        let mut avail = vec![0usize; horizon];
        for (j, forecast) in derived.iter().enumerate() {
            if forecast.len != horizon {
                return Err(ConformalError::InvalidInput(
                    "Historical forecasts must share the same horizon".to_string(),
                ));
            }
            if forecast.n_components != n_components {
                return Err(ConformalError::DimensionMismatch {
                    what: "historical forecast components".to_string(),
                    expected: n_components,
                    got: forecast.n_components,
                });
            }
            for step in 0..horizon {
                let Some(pos) = actuals.position_of(forecast.time_index(step)) else {
                    continue;
                };
                avail[step] = avail[step].max(j + 1);
                let base = (j * horizon + step) * n_cols;
                for c in 0..n_components {
                    let out = &mut values[base + c * score_cols..base + (c + 1) * score_cols];
                    scorer.score_into(actuals.value(pos, c), forecast.row(step, c), out);
                }
            }
        }
        Ok(Self {
            values,
            n_forecasts,
            horizon,
            n_cols,
            shift,
            avail,
        })
    }

    pub fn n_forecasts(&self) -> usize {
        self.n_forecasts
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Score of forecast origin `j`, horizon step `step`, column `col`.
    /// NaN when the actual value was not available.
    pub fn get(&self, j: usize, step: usize, col: usize) -> f64 {
        self.values[(j * self.horizon + step) * self.n_cols + col]
    }

    /// True when the residual of origin `j` at `step` was observable before
    /// the forecast at origin index `target` was made.
    pub fn visible_as_of(&self, j: usize, step: usize, target: usize) -> bool {
        j + step + self.shift < target
    }

    /// Number of origins whose residual at `step` is defined.
    pub fn available(&self, step: usize) -> usize {
        self.avail[step]
    }

    /// Calibration window for a single forecast made at the series end.
    ///
    /// Every defined residual lies strictly in the past here. Without
    /// `cal_length` the window start is shifted per step so that all steps
    /// calibrate on equally many scores.
    pub fn predict_window(&self, step: usize, col: usize, cal_length: Option<usize>) -> Vec<f64> {
        let end = self.avail[step];
        let start = match cal_length {
            Some(n) => end.saturating_sub(n),
            None => self.horizon - 1 - step,
        };
        self.collect(start, end, step, col)
    }

    /// Calibration window for the backtest forecast at origin index `k`,
    /// full-horizon mode.
    ///
    /// Applies the visibility predicate, bounds the window to `cal_length`
    /// scores when set, and equalizes the score count across horizon steps.
    pub fn backtest_window(
        &self,
        k: usize,
        step: usize,
        col: usize,
        cal_length: Option<usize>,
    ) -> Vec<f64> {
        let base = match cal_length {
            Some(n) => k.saturating_sub(self.shift + n + self.horizon - 1),
            None => 0,
        };
        let start = base + (self.horizon - 1 - step);
        let end = k
            .saturating_sub(self.shift + step)
            .min(self.avail[step])
            .min(self.n_forecasts);
        self.collect(start, end, step, col)
    }

    /// Calibration window for the backtest forecast at origin index `k`,
    /// last-points-only mode: only residuals of the final horizon step.
    pub fn last_points_window(
        &self,
        k: usize,
        col: usize,
        cal_length: Option<usize>,
    ) -> Vec<f64> {
        let step = self.horizon - 1;
        let end = k
            .saturating_sub(self.shift + step)
            .min(self.avail[step])
            .min(self.n_forecasts);
        let start = match cal_length {
            Some(n) => end.saturating_sub(n),
            None => 0,
        };
        self.collect(start, end, step, col)
    }

    fn collect(&self, start: usize, end: usize, step: usize, col: usize) -> Vec<f64> {
        if start >= end {
            return Vec::new();
        }
        (start..end).map(|j| self.get(j, step, col)).collect()
    }
}
