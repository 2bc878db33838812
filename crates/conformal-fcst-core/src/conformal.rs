//! Conformal prediction intervals around a wrapped forecasting model.
//!
//! [`ConformalModel`] performs no parameter learning of its own: it replays
//! a pre-trained model over past data, scores the replayed forecasts against
//! the actual values, and widens (or tightens) new forecasts by empirical
//! quantiles of those scores. Intervals produced this way carry a
//! distribution-free coverage guarantee under exchangeable residuals.
//!
//! Two calibration strategies are available: [`ConformalModel::naive`]
//! calibrates on point-forecast errors, [`ConformalModel::quantile_regression`]
//! conformalizes the quantile band of a probabilistic model (CQR). Both
//! support backtesting through `historical_forecasts`, where every corrected
//! forecast only ever sees residuals that were observable before its own
//! origin.

use rayon::prelude::*;

use crate::calibrate::{empirical_quantile, QuantileSet};
use crate::error::{CalibrationSource, ConformalError, Result};
use crate::model::{ForecastingModel, HistoricalForecasts};
use crate::residuals::ResidualMatrix;
use crate::score::{DerivedForecast, ScoreKind, Scorer};
use crate::series::{SeriesInput, TimeSeries};

/// Calibration settings fixed at construction.
#[derive(Debug, Clone)]
pub struct ConformalOptions {
    /// Quantile levels of the output columns; must contain the median and be
    /// symmetric around it.
    pub quantiles: Vec<f64>,
    /// Calibrate both interval tails on one score (symmetric) or each tail
    /// on its own signed score (asymmetric).
    pub symmetric: bool,
    /// Bound every calibration window to the most recent `cal_length`
    /// scores. `None` uses all available history.
    pub cal_length: Option<usize>,
}

impl Default for ConformalOptions {
    fn default() -> Self {
        Self {
            quantiles: vec![0.1, 0.5, 0.9],
            symmetric: true,
            cal_length: None,
        }
    }
}

/// Per-call settings for [`ConformalModel::predict`].
#[derive(Debug, Clone)]
pub struct PredictOptions {
    /// Samples drawn from the wrapped model per predicted value.
    pub num_samples: usize,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self { num_samples: 1 }
    }
}

/// Where a backtest should begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    /// Position in the target index at which the first prediction starts.
    Position(usize),
    /// Timestamp at which the first prediction starts.
    Time(i64),
}

/// Per-call settings for [`ConformalModel::historical_forecasts`].
#[derive(Debug, Clone)]
pub struct HistoricalForecastOptions {
    pub forecast_horizon: usize,
    /// Number of origins between consecutive retained forecasts.
    pub stride: usize,
    /// First prediction point. Too-early or unmappable values are replaced
    /// by the first eligible point with a warning, never an error.
    pub start: Option<Start>,
    /// Keep forecasts whose horizon extends past the series end.
    pub overlap_end: bool,
    /// Collapse the run to the final step of each forecast.
    pub last_points_only: bool,
    pub num_samples: usize,
}

impl Default for HistoricalForecastOptions {
    fn default() -> Self {
        Self {
            forecast_horizon: 1,
            stride: 1,
            start: None,
            overlap_end: false,
            last_points_only: true,
            num_samples: 1,
        }
    }
}

/// A forecasting model wrapped with conformal calibration.
#[derive(Debug)]
pub struct ConformalModel<M> {
    model: M,
    quantiles: QuantileSet,
    scorer: Scorer,
    cal_length: Option<usize>,
}

impl<M: ForecastingModel> ConformalModel<M> {
    /// Conformal calibration on point-forecast errors: absolute errors when
    /// symmetric, signed errors per tail otherwise.
    pub fn naive(model: M, options: ConformalOptions) -> Result<Self> {
        Self::with_kind(model, ScoreKind::Naive, options)
    }

    /// Conformalized quantile regression: calibrates the wrapped model's own
    /// predicted quantile band. Requires a probabilistic model.
    pub fn quantile_regression(model: M, options: ConformalOptions) -> Result<Self> {
        if !model.supports_probabilistic_prediction() {
            return Err(ConformalError::UnsupportedModel(
                "conformalized quantile regression requires a probabilistic wrapped model"
                    .to_string(),
            ));
        }
        Self::with_kind(model, ScoreKind::QuantileRegression, options)
    }

    fn with_kind(model: M, kind: ScoreKind, options: ConformalOptions) -> Result<Self> {
        if !model.is_fitted() {
            return Err(ConformalError::NotFitted);
        }
        if options.cal_length == Some(0) {
            return Err(ConformalError::InvalidInput(
                "cal_length must be at least 1".to_string(),
            ));
        }
        let quantiles = QuantileSet::new(options.quantiles)?;
        let scorer = Scorer::new(kind, options.symmetric, &quantiles);
        Ok(Self {
            model,
            quantiles,
            scorer,
            cal_length: options.cal_length,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn quantiles(&self) -> &QuantileSet {
        &self.quantiles
    }

    /// Forecasts `n` steps past the end of the target series, with
    /// calibrated quantile columns around the wrapped model's forecast.
    ///
    /// With `input` omitted the model's fit-time series is used. With
    /// `cal_input` given, residuals are replayed on that series instead of
    /// the target.
    pub fn predict(
        &self,
        n: usize,
        input: Option<&SeriesInput>,
        cal_input: Option<&SeriesInput>,
        options: &PredictOptions,
    ) -> Result<TimeSeries> {
        if n == 0 {
            return Err(ConformalError::InvalidInput(
                "forecast horizon must be at least 1".to_string(),
            ));
        }
        if options.num_samples == 0 {
            return Err(ConformalError::InvalidInput(
                "num_samples must be at least 1".to_string(),
            ));
        }
        let target = input.or_else(|| self.model.training_input()).ok_or_else(|| {
            ConformalError::InvalidInput(
                "no target series given and the wrapped model was not fit on a single series"
                    .to_string(),
            )
        })?;
        let cal = cal_input.unwrap_or(target);
        let source = Self::source_of(cal_input);
        let lookback = self.model.extreme_lags().lookback;
        let shift = self.model.output_chunk_shift();

        // at least one residual must exist for the final horizon step
        let needed = lookback + shift + n;
        if cal.series.len() < needed {
            return Err(ConformalError::InsufficientHistory {
                series: source,
                needed,
                got: cal.series.len(),
            });
        }

        let derived_cal = self.replay(cal, n, options.num_samples)?;
        let residuals = ResidualMatrix::build(&derived_cal, &cal.series, &self.scorer, shift)?;
        let forecast = self.model.predict(n, target, options.num_samples)?;
        let derived = self.scorer.derive(&forecast);

        let n_out = self.quantiles.levels().len();
        let mut values = Vec::with_capacity(derived.len * derived.n_components * n_out);
        for t in 0..derived.len {
            for c in 0..derived.n_components {
                self.corrected_row(
                    &derived,
                    t,
                    c,
                    source,
                    false,
                    &mut |step, col| residuals.predict_window(step, col, self.cal_length),
                    &mut values,
                )?;
            }
        }
        TimeSeries::new(
            values,
            derived.n_components * n_out,
            1,
            derived.start,
            derived.freq,
        )?
        .with_component_names(self.output_names(forecast.component_names()))
    }

    /// [`predict`](Self::predict) over several independent series, processed
    /// in parallel. Results align positionally with `inputs`.
    pub fn predict_multi(
        &self,
        n: usize,
        inputs: &[SeriesInput],
        cal_inputs: Option<&[SeriesInput]>,
        options: &PredictOptions,
    ) -> Result<Vec<TimeSeries>> {
        if let Some(cal) = cal_inputs {
            if cal.len() != inputs.len() {
                return Err(ConformalError::DimensionMismatch {
                    what: "calibration inputs".to_string(),
                    expected: inputs.len(),
                    got: cal.len(),
                });
            }
        }
        inputs
            .par_iter()
            .enumerate()
            .map(|(i, input)| self.predict(n, Some(input), cal_inputs.map(|cal| &cal[i]), options))
            .collect()
    }

    /// Backtests the conformal model over the target series.
    ///
    /// Raw forecasts are replayed at every origin; each retained forecast is
    /// then corrected using only residuals observable before its own origin.
    /// With `cal_input` the calibration windows come from the calibration
    /// series instead, anchored at its end and identical for every forecast.
    pub fn historical_forecasts(
        &self,
        input: &SeriesInput,
        cal_input: Option<&SeriesInput>,
        options: &HistoricalForecastOptions,
    ) -> Result<HistoricalForecasts> {
        let horizon = options.forecast_horizon;
        if horizon == 0 {
            return Err(ConformalError::InvalidInput(
                "forecast horizon must be at least 1".to_string(),
            ));
        }
        if options.stride == 0 {
            return Err(ConformalError::InvalidInput(
                "stride must be at least 1".to_string(),
            ));
        }
        if options.num_samples == 0 {
            return Err(ConformalError::InvalidInput(
                "num_samples must be at least 1".to_string(),
            ));
        }
        let series = &input.series;
        let source = Self::source_of(cal_input);
        let lookback = self.model.extreme_lags().lookback;
        let shift = self.model.output_chunk_shift();
        let span = horizon + shift;
        let cal_extra = self.cal_length.map_or(0, |c| c - 1);

        // enough history for at least one eligible corrected forecast
        let needed = match cal_input {
            None => lookback + span * if options.overlap_end { 1 } else { 2 } + cal_extra - 1,
            Some(_) => lookback + if options.overlap_end { 0 } else { span },
        };
        if series.len() < needed {
            return Err(ConformalError::InsufficientHistory {
                series: CalibrationSource::Target,
                needed,
                got: series.len(),
            });
        }
        if let Some(cal) = cal_input {
            let cal_needed = lookback + span;
            if cal.series.len() < cal_needed {
                return Err(ConformalError::InsufficientHistory {
                    series: CalibrationSource::Calibration,
                    needed: cal_needed,
                    got: cal.series.len(),
                });
            }
        }

        let derived = self.replay(input, horizon, options.num_samples)?;
        let residuals = match cal_input {
            Some(cal) => {
                let derived_cal = self.replay(cal, horizon, options.num_samples)?;
                ResidualMatrix::build(&derived_cal, &cal.series, &self.scorer, shift)?
            }
            None => ResidualMatrix::build(&derived, series, &self.scorer, shift)?,
        };

        let anchored = cal_input.is_some();
        // backtests begin one origin before the first full calibration
        // window; that first forecast gets a zero-width band
        let first_k = if anchored { 0 } else { span + cal_extra - 1 };
        let last_k = if options.overlap_end {
            derived.len() - 1
        } else {
            // keep only forecasts fully inside the target index
            derived.len() - 1 - span
        };
        let begin = match options.start {
            Some(start) => self.resolve_start(series, start, lookback, shift, first_k, last_k),
            None => first_k,
        };
        let ks: Vec<usize> = (begin..=last_k).step_by(options.stride).collect();
        let names = self.output_names(series.component_names());
        let n_out = self.quantiles.levels().len();
        let n_components = series.n_components();

        if options.last_points_only {
            let step = horizon - 1;
            let mut values = Vec::with_capacity(ks.len() * n_components * n_out);
            for &k in &ks {
                for c in 0..n_components {
                    self.corrected_row(
                        &derived[k],
                        step,
                        c,
                        source,
                        !anchored && k == first_k,
                        &mut |s, col| {
                            if anchored {
                                residuals.predict_window(s, col, self.cal_length)
                            } else {
                                residuals.last_points_window(k, col, self.cal_length)
                            }
                        },
                        &mut values,
                    )?;
                }
            }
            let start = derived[ks[0]].time_index(step);
            let collapsed = TimeSeries::new(
                values,
                n_components * n_out,
                1,
                start,
                series.freq() * options.stride as i64,
            )?
            .with_component_names(names)?;
            return Ok(HistoricalForecasts::LastPoints(collapsed));
        }

        let mut out = Vec::with_capacity(ks.len());
        for &k in &ks {
            let mut values = Vec::with_capacity(horizon * n_components * n_out);
            for t in 0..horizon {
                for c in 0..n_components {
                    self.corrected_row(
                        &derived[k],
                        t,
                        c,
                        source,
                        !anchored && k == first_k,
                        &mut |s, col| {
                            if anchored {
                                residuals.predict_window(s, col, self.cal_length)
                            } else {
                                residuals.backtest_window(k, s, col, self.cal_length)
                            }
                        },
                        &mut values,
                    )?;
                }
            }
            out.push(
                TimeSeries::new(
                    values,
                    n_components * n_out,
                    1,
                    derived[k].start,
                    derived[k].freq,
                )?
                .with_component_names(names.clone())?,
            );
        }
        Ok(HistoricalForecasts::All(out))
    }

    /// [`historical_forecasts`](Self::historical_forecasts) over several
    /// independent series, processed in parallel.
    pub fn historical_forecasts_multi(
        &self,
        inputs: &[SeriesInput],
        cal_inputs: Option<&[SeriesInput]>,
        options: &HistoricalForecastOptions,
    ) -> Result<Vec<HistoricalForecasts>> {
        if let Some(cal) = cal_inputs {
            if cal.len() != inputs.len() {
                return Err(ConformalError::DimensionMismatch {
                    what: "calibration inputs".to_string(),
                    expected: inputs.len(),
                    got: cal.len(),
                });
            }
        }
        inputs
            .par_iter()
            .enumerate()
            .map(|(i, input)| {
                self.historical_forecasts(input, cal_inputs.map(|cal| &cal[i]), options)
            })
            .collect()
    }

    fn source_of(cal_input: Option<&SeriesInput>) -> CalibrationSource {
        if cal_input.is_some() {
            CalibrationSource::Calibration
        } else {
            CalibrationSource::Target
        }
    }

    /// Stride-1 full replay of the wrapped model, reduced to the quantile
    /// levels the scorer consumes.
    fn replay(
        &self,
        input: &SeriesInput,
        horizon: usize,
        num_samples: usize,
    ) -> Result<Vec<DerivedForecast>> {
        match self
            .model
            .historical_forecasts(input, horizon, 1, true, false, num_samples)?
        {
            HistoricalForecasts::All(forecasts) => {
                Ok(forecasts.iter().map(|f| self.scorer.derive(f)).collect())
            }
            HistoricalForecasts::LastPoints(_) => Err(ConformalError::InvalidInput(
                "wrapped model returned a collapsed replay for a full historical run".to_string(),
            )),
        }
    }

    fn resolve_start(
        &self,
        series: &TimeSeries,
        start: Start,
        lookback: usize,
        shift: usize,
        first_k: usize,
        last_k: usize,
    ) -> usize {
        let offset = (lookback + shift) as i64;
        let position = match start {
            Start::Position(p) => Some(p as i64),
            Start::Time(t) => {
                let delta = t - series.start_time();
                (delta % series.freq() == 0).then(|| delta / series.freq())
            }
        };
        if let Some(k) = position.map(|p| p - offset) {
            if k >= first_k as i64 && k <= last_k as i64 {
                return k as usize;
            }
        }
        log::warn!(
            "`start` does not map to an eligible forecast origin; \
             beginning at the first eligible point (time {})",
            series.start_time() + (lookback + first_k + shift) as i64 * series.freq()
        );
        first_k
    }

    /// Writes the corrected quantile columns of one (step, component) cell,
    /// ordered low to high with the untouched median in the middle.
    fn corrected_row(
        &self,
        derived: &DerivedForecast,
        t: usize,
        c: usize,
        source: CalibrationSource,
        allow_zero_width: bool,
        window: &mut dyn FnMut(usize, usize) -> Vec<f64>,
        out: &mut Vec<f64>,
    ) -> Result<()> {
        let n_intervals = self.quantiles.n_intervals();
        let score_cols = self.scorer.score_columns();
        let median = derived.level_value(t, c, self.scorer.median_level());
        let mut lowers = vec![0.0; n_intervals];
        let mut uppers = vec![0.0; n_intervals];
        for i in 0..n_intervals {
            let plan = self.scorer.plan(i, self.quantiles.alpha(i));
            let q_lo = empirical_quantile(&window(t, c * score_cols + plan.lo_col), plan.level);
            let q_hi = if plan.hi_col == plan.lo_col {
                q_lo
            } else {
                empirical_quantile(&window(t, c * score_cols + plan.hi_col), plan.level)
            };
            match (q_lo, q_hi) {
                (Some(q_lo), Some(q_hi)) => {
                    let (lo_level, hi_level) = self.scorer.base_levels(i);
                    lowers[i] = derived.level_value(t, c, lo_level) - q_lo;
                    uppers[i] = derived.level_value(t, c, hi_level) + q_hi;
                }
                // the very first eligible backtest forecast may have nothing
                // to calibrate on; everything later must
                _ if allow_zero_width => {
                    lowers[i] = median;
                    uppers[i] = median;
                }
                _ => {
                    return Err(ConformalError::InsufficientHistory {
                        series: source,
                        needed: 1,
                        got: 0,
                    });
                }
            }
        }
        out.extend_from_slice(&lowers);
        out.push(median);
        out.extend(uppers.iter().rev());
        Ok(())
    }

    fn output_names(&self, components: &[String]) -> Vec<String> {
        let mut names = Vec::with_capacity(components.len() * self.quantiles.levels().len());
        for comp in components {
            for &level in self.quantiles.levels() {
                names.push(format!("{}_q{:.2}", comp, level));
            }
        }
        names
    }
}

/// Mean width and miscoverage of one prediction interval.
#[derive(Debug, Clone)]
pub struct IntervalMetrics {
    pub q_lo: f64,
    pub q_hi: f64,
    pub mean_width: f64,
    /// Fraction of actual values falling outside `[lower, upper]`.
    pub miscoverage: f64,
}

/// Per-interval quality metrics of a quantile forecast.
#[derive(Debug, Clone)]
pub struct IntervalEvaluation {
    pub intervals: Vec<IntervalMetrics>,
}

/// Evaluates the prediction intervals of a quantile forecast (as produced by
/// [`ConformalModel`]) against the actual values, over the overlapping part
/// of their indexes.
pub fn evaluate_intervals(
    actuals: &TimeSeries,
    forecast: &TimeSeries,
    quantiles: &QuantileSet,
) -> Result<IntervalEvaluation> {
    let n_out = quantiles.levels().len();
    if forecast.n_components() % n_out != 0 {
        return Err(ConformalError::DimensionMismatch {
            what: "forecast quantile columns".to_string(),
            expected: n_out,
            got: forecast.n_components(),
        });
    }
    let n_components = forecast.n_components() / n_out;
    if actuals.n_components() != n_components {
        return Err(ConformalError::DimensionMismatch {
            what: "series components".to_string(),
            expected: n_components,
            got: actuals.n_components(),
        });
    }
    let n_intervals = quantiles.n_intervals();
    let mut width = vec![0.0; n_intervals];
    let mut missed = vec![0usize; n_intervals];
    let mut count = 0usize;
    for t in 0..forecast.len() {
        let Some(pos) = actuals.position_of(forecast.time_index(t)) else {
            continue;
        };
        count += 1;
        for c in 0..n_components {
            let actual = actuals.value(pos, c);
            for i in 0..n_intervals {
                let lo = forecast.value(t, c * n_out + i);
                let hi = forecast.value(t, c * n_out + (n_out - 1 - i));
                width[i] += hi - lo;
                if actual < lo || actual > hi {
                    missed[i] += 1;
                }
            }
        }
    }
    if count == 0 {
        return Err(ConformalError::InvalidInput(
            "forecast and series do not overlap in time".to_string(),
        ));
    }
    let denom = (count * n_components) as f64;
    let intervals = (0..n_intervals)
        .map(|i| {
            let (q_lo, q_hi) = quantiles.interval(i);
            IntervalMetrics {
                q_lo,
                q_hi,
                mean_width: width[i] / denom,
                miscoverage: missed[i] as f64 / denom,
            }
        })
        .collect();
    Ok(IntervalEvaluation { intervals })
}
