//! Time series container used by the conformal engine.
//!
//! A [`TimeSeries`] is a dense, time-major buffer of `f64` values with a
//! fixed number of components (dimensions) and an optional stochastic
//! sample dimension. Timestamps form an evenly spaced integer index
//! (`start + i * freq`), which is all the calibration arithmetic needs.

use crate::error::{ConformalError, Result};

/// An ordered, evenly indexed sequence of numeric vectors.
///
/// Values are stored time-major: index `(t * n_components + c) * n_samples + s`
/// holds sample `s` of component `c` at time step `t`. Deterministic series
/// have `n_samples == 1`; probabilistic forecasts carry `n_samples > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    values: Vec<f64>,
    n_components: usize,
    n_samples: usize,
    start: i64,
    freq: i64,
    components: Vec<String>,
}

impl TimeSeries {
    /// Creates a series from a flat time-major value buffer.
    pub fn new(
        values: Vec<f64>,
        n_components: usize,
        n_samples: usize,
        start: i64,
        freq: i64,
    ) -> Result<Self> {
        if n_components == 0 || n_samples == 0 {
            return Err(ConformalError::InvalidInput(
                "Series must have at least one component and one sample".to_string(),
            ));
        }
        if freq <= 0 {
            return Err(ConformalError::InvalidInput(format!(
                "Series frequency must be positive, got {}",
                freq
            )));
        }
        let row = n_components * n_samples;
        if values.len() % row != 0 {
            return Err(ConformalError::InvalidInput(format!(
                "Value buffer length {} is not a multiple of components x samples ({})",
                values.len(),
                row
            )));
        }
        let components = (0..n_components).map(|c| format!("component_{}", c)).collect();
        Ok(Self {
            values,
            n_components,
            n_samples,
            start,
            freq,
            components,
        })
    }

    /// Creates a deterministic univariate series starting at time 0 with unit frequency.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            values,
            n_components: 1,
            n_samples: 1,
            start: 0,
            freq: 1,
            components: vec!["component_0".to_string()],
        }
    }

    /// Replaces the component names. Must match the component count.
    pub fn with_component_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.n_components {
            return Err(ConformalError::DimensionMismatch {
                what: "component names".to_string(),
                expected: self.n_components,
                got: names.len(),
            });
        }
        self.components = names;
        Ok(self)
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.values.len() / (self.n_components * self.n_samples)
    }

    /// True when the series holds no time steps.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Timestamp of the first entry.
    pub fn start_time(&self) -> i64 {
        self.start
    }

    /// Sampling frequency (index step between consecutive entries).
    pub fn freq(&self) -> i64 {
        self.freq
    }

    /// Timestamp of entry `i`.
    pub fn time_index(&self, i: usize) -> i64 {
        self.start + (i as i64) * self.freq
    }

    /// Timestamp of the last entry.
    pub fn end_time(&self) -> i64 {
        self.time_index(self.len().saturating_sub(1))
    }

    /// Position of `time` in the index, when it falls exactly on a step.
    pub fn position_of(&self, time: i64) -> Option<usize> {
        let delta = time - self.start;
        if delta < 0 || delta % self.freq != 0 {
            return None;
        }
        let pos = (delta / self.freq) as usize;
        (pos < self.len()).then_some(pos)
    }

    pub fn component_names(&self) -> &[String] {
        &self.components
    }

    /// First sample of component `c` at time step `t`.
    pub fn value(&self, t: usize, c: usize) -> f64 {
        self.values[(t * self.n_components + c) * self.n_samples]
    }

    /// All samples of component `c` at time step `t`.
    pub fn samples(&self, t: usize, c: usize) -> &[f64] {
        let base = (t * self.n_components + c) * self.n_samples;
        &self.values[base..base + self.n_samples]
    }

    /// Contiguous sub-series over time-step positions `[begin, end)`.
    pub fn slice(&self, begin: usize, end: usize) -> TimeSeries {
        let row = self.n_components * self.n_samples;
        let end = end.min(self.len());
        let begin = begin.min(end);
        TimeSeries {
            values: self.values[begin * row..end * row].to_vec(),
            n_components: self.n_components,
            n_samples: self.n_samples,
            start: self.time_index(begin),
            freq: self.freq,
            components: self.components.clone(),
        }
    }

    /// Stacks the components of `other` onto `self`.
    ///
    /// Both series must share length, index and sample count.
    pub fn stack(&self, other: &TimeSeries) -> Result<TimeSeries> {
        if other.len() != self.len() || other.start != self.start || other.freq != self.freq {
            return Err(ConformalError::InvalidInput(
                "Stacked series must share the same time index".to_string(),
            ));
        }
        if other.n_samples != self.n_samples {
            return Err(ConformalError::DimensionMismatch {
                what: "stacked series samples".to_string(),
                expected: self.n_samples,
                got: other.n_samples,
            });
        }
        let n_components = self.n_components + other.n_components;
        let mut values = Vec::with_capacity(self.values.len() + other.values.len());
        for t in 0..self.len() {
            for c in 0..self.n_components {
                values.extend_from_slice(self.samples(t, c));
            }
            for c in 0..other.n_components {
                values.extend_from_slice(other.samples(t, c));
            }
        }
        let mut components = self.components.clone();
        for name in &other.components {
            let name = if components.contains(name) {
                format!("{}_1", name)
            } else {
                name.clone()
            };
            components.push(name);
        }
        Ok(TimeSeries {
            values,
            n_components,
            n_samples: self.n_samples,
            start: self.start,
            freq: self.freq,
            components,
        })
    }

    /// Raw value buffer.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Target series bundled with the covariates the wrapped model consumes.
#[derive(Debug, Clone)]
pub struct SeriesInput {
    pub series: TimeSeries,
    pub past_covariates: Option<TimeSeries>,
    pub future_covariates: Option<TimeSeries>,
}

impl SeriesInput {
    pub fn new(series: TimeSeries) -> Self {
        Self {
            series,
            past_covariates: None,
            future_covariates: None,
        }
    }

    pub fn with_past_covariates(mut self, covariates: TimeSeries) -> Self {
        self.past_covariates = Some(covariates);
        self
    }

    pub fn with_future_covariates(mut self, covariates: TimeSeries) -> Self {
        self.future_covariates = Some(covariates);
        self
    }

    /// Bundle with the target series replaced and covariates kept.
    pub fn with_series(&self, series: TimeSeries) -> Self {
        Self {
            series,
            past_covariates: self.past_covariates.clone(),
            future_covariates: self.future_covariates.clone(),
        }
    }
}

impl From<TimeSeries> for SeriesInput {
    fn from(series: TimeSeries) -> Self {
        Self::new(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_accessors() {
        let ts = TimeSeries::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 1, 10, 2).unwrap();
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.n_components(), 2);
        assert_eq!(ts.time_index(0), 10);
        assert_eq!(ts.time_index(2), 14);
        assert_eq!(ts.end_time(), 14);
        assert_eq!(ts.value(1, 0), 3.0);
        assert_eq!(ts.value(1, 1), 4.0);
        assert_eq!(ts.position_of(12), Some(1));
        assert_eq!(ts.position_of(13), None);
        assert_eq!(ts.position_of(16), None);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(TimeSeries::new(vec![1.0, 2.0, 3.0], 2, 1, 0, 1).is_err());
        assert!(TimeSeries::new(vec![1.0, 2.0], 1, 1, 0, 0).is_err());
        assert!(TimeSeries::new(vec![1.0, 2.0], 0, 1, 0, 1).is_err());
    }

    #[test]
    fn test_samples_layout() {
        // 2 time steps, 1 component, 3 samples
        let ts = TimeSeries::new(vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0], 1, 3, 0, 1).unwrap();
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.samples(0, 0), &[1.0, 2.0, 3.0]);
        assert_eq!(ts.samples(1, 0), &[10.0, 20.0, 30.0]);
        assert_eq!(ts.value(1, 0), 10.0);
    }

    #[test]
    fn test_slice() {
        let ts = TimeSeries::from_values(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let sub = ts.slice(1, 4);
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.start_time(), 1);
        assert_eq!(sub.value(0, 0), 2.0);
        assert_eq!(sub.value(2, 0), 4.0);

        // end clamps to the series length
        let tail = ts.slice(3, 10);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.value(0, 0), 4.0);
    }

    #[test]
    fn test_stack() {
        let a = TimeSeries::from_values(vec![1.0, 2.0, 3.0]);
        let b = TimeSeries::from_values(vec![10.0, 20.0, 30.0]);
        let stacked = a.stack(&b).unwrap();
        assert_eq!(stacked.n_components(), 2);
        assert_eq!(stacked.value(1, 0), 2.0);
        assert_eq!(stacked.value(1, 1), 20.0);
        // clashing names are de-duplicated
        assert_ne!(stacked.component_names()[0], stacked.component_names()[1]);

        let c = TimeSeries::new(vec![0.0; 4], 1, 1, 1, 1).unwrap();
        assert!(a.stack(&c).is_err());
    }
}
