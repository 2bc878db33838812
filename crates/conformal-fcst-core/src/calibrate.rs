//! Quantile sets and calibrated quantile corrections.
//!
//! The calibrator turns a window of historical nonconformity scores into a
//! correction value ("q-hat"): the empirical quantile of the window at the
//! level derived from the requested prediction interval. Quantiles use
//! linear interpolation between order statistics, the standard percentile
//! convention; not-yet-available scores (NaN) are excluded first.

use crate::error::{CalibrationSource, ConformalError, Result};

/// A validated, ordered set of quantile levels.
///
/// The set must contain the median `0.5`, every level must lie within
/// `[0, 1]`, and levels must be symmetric around the median: each `p < 0.5`
/// is paired with `1 - p`. The pairs define the prediction intervals the
/// conformal model produces.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileSet {
    levels: Vec<f64>,
}

impl QuantileSet {
    pub fn new(mut levels: Vec<f64>) -> Result<Self> {
        if levels.is_empty() {
            return Err(ConformalError::InvalidQuantiles(
                "at least one quantile level is required".to_string(),
            ));
        }
        if levels.iter().any(|q| !(0.0..=1.0).contains(q)) {
            return Err(ConformalError::InvalidQuantiles(
                "all quantile levels must be between 0 and 1".to_string(),
            ));
        }
        levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        levels.dedup();
        let median_idx = levels.len() / 2;
        if levels.len() % 2 == 0 || (levels[median_idx] - 0.5).abs() > 1e-12 {
            return Err(ConformalError::InvalidQuantiles(
                "median quantile 0.5 must be included".to_string(),
            ));
        }
        for i in 0..median_idx {
            let lo = levels[i];
            let hi = levels[levels.len() - 1 - i];
            if ((1.0 - hi) - lo).abs() > 1e-9 {
                return Err(ConformalError::InvalidQuantiles(format!(
                    "quantile levels must be symmetric around 0.5; {} has no matching {}",
                    lo,
                    1.0 - lo
                )));
            }
        }
        Ok(Self { levels })
    }

    /// Sorted quantile levels, median included.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Index of the median level.
    pub fn median_index(&self) -> usize {
        self.levels.len() / 2
    }

    /// Number of `(q_lo, q_hi)` interval pairs.
    pub fn n_intervals(&self) -> usize {
        self.levels.len() / 2
    }

    /// Interval pairs ordered by ascending lower level (widest first).
    pub fn interval(&self, i: usize) -> (f64, f64) {
        (self.levels[i], self.levels[self.levels.len() - 1 - i])
    }

    /// Nominal coverage `q_hi - q_lo` of interval `i`.
    pub fn alpha(&self, i: usize) -> f64 {
        let (lo, hi) = self.interval(i);
        hi - lo
    }
}

/// Calibration level for one interval tail.
///
/// Symmetric scores use the interval coverage `alpha = q_hi - q_lo`
/// directly; asymmetric scores calibrate each tail on its own signed
/// residuals at `1 - (1 - alpha) / 2`.
pub fn calibration_level(alpha: f64, symmetric: bool) -> f64 {
    if symmetric {
        alpha
    } else {
        1.0 - (1.0 - alpha) / 2.0
    }
}

/// Quantile of sorted data using linear interpolation between order
/// statistics.
pub(crate) fn linear_quantile(sorted: &[f64], level: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if level <= 0.0 {
        return sorted[0];
    }
    if level >= 1.0 {
        return sorted[sorted.len() - 1];
    }
    let index = level * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = index - lower as f64;
    sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
}

/// Empirical `level`-quantile of `values`, ignoring NaN entries.
///
/// Returns `None` when no finite value remains.
pub fn empirical_quantile(values: &[f64], level: f64) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(linear_quantile(&finite, level))
}

/// Computes the q-hat correction for one residual window.
///
/// Fails with [`ConformalError::InsufficientHistory`] when the window holds
/// no usable score, naming the series the window came from.
pub fn calibrate_window(window: &[f64], level: f64, source: CalibrationSource) -> Result<f64> {
    empirical_quantile(window, level).ok_or(ConformalError::InsufficientHistory {
        series: source,
        needed: 1,
        got: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_set_valid() {
        let qs = QuantileSet::new(vec![0.9, 0.5, 0.1]).unwrap();
        assert_eq!(qs.levels(), &[0.1, 0.5, 0.9]);
        assert_eq!(qs.n_intervals(), 1);
        assert_eq!(qs.median_index(), 1);
        assert_eq!(qs.interval(0), (0.1, 0.9));
        assert_relative_eq!(qs.alpha(0), 0.8, epsilon = 1e-12);

        let qs = QuantileSet::new(vec![0.05, 0.1, 0.5, 0.9, 0.95]).unwrap();
        assert_eq!(qs.n_intervals(), 2);
        assert_eq!(qs.interval(0), (0.05, 0.95));
        assert_eq!(qs.interval(1), (0.1, 0.9));
    }

    #[test]
    fn test_quantile_set_missing_median() {
        let err = QuantileSet::new(vec![0.1, 0.9]).unwrap_err();
        assert!(format!("{}", err).contains("median"));
    }

    #[test]
    fn test_quantile_set_not_symmetric() {
        let err = QuantileSet::new(vec![0.2, 0.5, 0.6]).unwrap_err();
        assert!(format!("{}", err).contains("symmetric"));
    }

    #[test]
    fn test_quantile_set_out_of_range() {
        assert!(QuantileSet::new(vec![-0.1, 0.5, 1.1]).is_err());
        assert!(QuantileSet::new(vec![]).is_err());
    }

    #[test]
    fn test_calibration_level() {
        assert_relative_eq!(calibration_level(0.8, true), 0.8);
        // each tail of an 80% interval keeps half the miscoverage
        assert_relative_eq!(calibration_level(0.8, false), 0.9);
    }

    #[test]
    fn test_linear_quantile() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(linear_quantile(&data, 0.0), 1.0);
        assert_relative_eq!(linear_quantile(&data, 0.25), 2.0);
        assert_relative_eq!(linear_quantile(&data, 0.5), 3.0);
        assert_relative_eq!(linear_quantile(&data, 0.75), 4.0);
        assert_relative_eq!(linear_quantile(&data, 1.0), 5.0);
        // interpolation between order statistics
        assert_relative_eq!(linear_quantile(&data, 0.1), 1.4);
    }

    #[test]
    fn test_empirical_quantile_skips_nan() {
        let data = vec![f64::NAN, 3.0, 1.0, f64::NAN, 2.0];
        assert_relative_eq!(empirical_quantile(&data, 0.5).unwrap(), 2.0);
        assert_eq!(empirical_quantile(&[f64::NAN, f64::NAN], 0.5), None);
        assert_eq!(empirical_quantile(&[], 0.5), None);
    }

    #[test]
    fn test_calibrate_window_insufficient() {
        let err = calibrate_window(&[f64::NAN], 0.8, CalibrationSource::Calibration).unwrap_err();
        assert!(err.is_insufficient_history());
        assert!(format!("{}", err).contains("calibration series"));

        let q = calibrate_window(&[1.0], 0.8, CalibrationSource::Target).unwrap();
        assert_relative_eq!(q, 1.0);
    }

    #[test]
    fn test_degenerate_window_of_one() {
        // a single score pins every quantile level to that score
        for level in [0.0, 0.3, 0.8, 1.0] {
            assert_relative_eq!(
                calibrate_window(&[2.5], level, CalibrationSource::Target).unwrap(),
                2.5
            );
        }
    }
}
