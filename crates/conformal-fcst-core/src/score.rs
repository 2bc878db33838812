//! Nonconformity scoring.
//!
//! A scorer maps an (actual, forecast) pair to one or more scalar scores
//! measuring how wrong the forecast was. Two families exist: naive scores
//! on the point forecast (absolute or signed error) and conformalized
//! quantile regression (CQR) scores on the model's own predicted quantile
//! band. Each family comes in a symmetric and an asymmetric variant; the
//! variant decides how many score columns a residual cell carries and which
//! column calibrates which interval tail.

use crate::calibrate::{calibration_level, linear_quantile, QuantileSet};
use crate::series::TimeSeries;

/// Nonconformity score family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    /// Absolute (symmetric) or signed (asymmetric) error of the point
    /// forecast.
    Naive,
    /// Distance outside the predicted quantile band.
    QuantileRegression,
}

/// Raw forecast values reduced to the quantile levels the scorer consumes.
///
/// Naive scorers keep a single level (the sample median); CQR scorers keep
/// one value per requested quantile level. Layout is time-major:
/// `(t * n_components + c) * n_levels + l`.
#[derive(Debug, Clone)]
pub struct DerivedForecast {
    pub start: i64,
    pub freq: i64,
    pub len: usize,
    pub n_components: usize,
    pub n_levels: usize,
    values: Vec<f64>,
}

impl DerivedForecast {
    /// Derived values of component `c` at time step `t`, one per level.
    pub fn row(&self, t: usize, c: usize) -> &[f64] {
        let base = (t * self.n_components + c) * self.n_levels;
        &self.values[base..base + self.n_levels]
    }

    pub fn level_value(&self, t: usize, c: usize, level: usize) -> f64 {
        self.row(t, c)[level]
    }

    /// Timestamp of step `t`.
    pub fn time_index(&self, t: usize) -> i64 {
        self.start + (t as i64) * self.freq
    }
}

/// Which residual columns calibrate an interval, and at which level.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationPlan {
    pub lo_col: usize,
    pub hi_col: usize,
    pub level: f64,
}

/// Tagged nonconformity scorer (see module docs).
#[derive(Debug, Clone)]
pub struct Scorer {
    kind: ScoreKind,
    symmetric: bool,
    levels: Vec<f64>,
    n_intervals: usize,
}

impl Scorer {
    pub fn new(kind: ScoreKind, symmetric: bool, quantiles: &QuantileSet) -> Self {
        Self {
            kind,
            symmetric,
            levels: quantiles.levels().to_vec(),
            n_intervals: quantiles.n_intervals(),
        }
    }

    pub fn kind(&self) -> ScoreKind {
        self.kind
    }

    pub fn symmetric(&self) -> bool {
        self.symmetric
    }

    /// Number of score values stored per (forecast, step, component) cell.
    pub fn score_columns(&self) -> usize {
        match (self.kind, self.symmetric) {
            (ScoreKind::Naive, true) => 1,
            (ScoreKind::Naive, false) => 2,
            (ScoreKind::QuantileRegression, true) => self.n_intervals,
            (ScoreKind::QuantileRegression, false) => 2 * self.n_intervals,
        }
    }

    /// Number of derived quantile levels per forecast value.
    pub fn n_levels(&self) -> usize {
        match self.kind {
            ScoreKind::Naive => 1,
            ScoreKind::QuantileRegression => self.levels.len(),
        }
    }

    /// Index of the median within the derived levels.
    pub fn median_level(&self) -> usize {
        match self.kind {
            ScoreKind::Naive => 0,
            ScoreKind::QuantileRegression => self.levels.len() / 2,
        }
    }

    /// Derived level indices carrying the pre-correction lower/upper bound
    /// of interval `i`.
    pub fn base_levels(&self, interval: usize) -> (usize, usize) {
        match self.kind {
            ScoreKind::Naive => (0, 0),
            ScoreKind::QuantileRegression => (interval, self.levels.len() - 1 - interval),
        }
    }

    /// Column/level mapping for calibrating interval `i` with coverage
    /// `alpha`.
    pub fn plan(&self, interval: usize, alpha: f64) -> CalibrationPlan {
        let level = calibration_level(alpha, self.symmetric);
        match (self.kind, self.symmetric) {
            (ScoreKind::Naive, true) => CalibrationPlan {
                lo_col: 0,
                hi_col: 0,
                level,
            },
            (ScoreKind::Naive, false) => CalibrationPlan {
                lo_col: 0,
                hi_col: 1,
                level,
            },
            (ScoreKind::QuantileRegression, true) => CalibrationPlan {
                lo_col: interval,
                hi_col: interval,
                level,
            },
            (ScoreKind::QuantileRegression, false) => CalibrationPlan {
                lo_col: 2 * interval,
                hi_col: 2 * interval + 1,
                level,
            },
        }
    }

    /// Collapses a raw (possibly probabilistic) forecast into the derived
    /// levels: the sample median for naive scoring, empirical sample
    /// quantiles at every requested level for CQR.
    pub fn derive(&self, forecast: &TimeSeries) -> DerivedForecast {
        let len = forecast.len();
        let n_components = forecast.n_components();
        let n_levels = self.n_levels();
        let mut values = Vec::with_capacity(len * n_components * n_levels);
        let mut sorted = Vec::new();
        for t in 0..len {
            for c in 0..n_components {
                let samples = forecast.samples(t, c);
                if forecast.n_samples() == 1 {
                    for _ in 0..n_levels {
                        values.push(samples[0]);
                    }
                    continue;
                }
                sorted.clear();
                sorted.extend_from_slice(samples);
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                match self.kind {
                    ScoreKind::Naive => values.push(linear_quantile(&sorted, 0.5)),
                    ScoreKind::QuantileRegression => {
                        for &level in &self.levels {
                            values.push(linear_quantile(&sorted, level));
                        }
                    }
                }
            }
        }
        DerivedForecast {
            start: forecast.start_time(),
            freq: forecast.freq(),
            len,
            n_components,
            n_levels,
            values,
        }
    }

    /// Scores one component cell: `derived` holds the derived levels of the
    /// forecast, `out` receives `score_columns()` values.
    pub fn score_into(&self, actual: f64, derived: &[f64], out: &mut [f64]) {
        match (self.kind, self.symmetric) {
            (ScoreKind::Naive, true) => {
                out[0] = (actual - derived[0]).abs();
            }
            (ScoreKind::Naive, false) => {
                // lower-tail score first, upper-tail second
                out[0] = derived[0] - actual;
                out[1] = actual - derived[0];
            }
            (ScoreKind::QuantileRegression, true) => {
                for i in 0..self.n_intervals {
                    let lo = derived[i];
                    let hi = derived[derived.len() - 1 - i];
                    out[i] = (lo - actual).max(actual - hi);
                }
            }
            (ScoreKind::QuantileRegression, false) => {
                for i in 0..self.n_intervals {
                    let lo = derived[i];
                    let hi = derived[derived.len() - 1 - i];
                    out[2 * i] = lo - actual;
                    out[2 * i + 1] = actual - hi;
                }
            }
        }
    }
}
