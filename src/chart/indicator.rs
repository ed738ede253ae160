use crate::chart::types::{Bar, IndicatorValue};
use crate::error::ChartError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

pub const DEFAULT_PERIOD: usize = 14;
pub const DEFAULT_FAST_PERIOD: usize = 12;
pub const DEFAULT_SLOW_PERIOD: usize = 26;
pub const DEFAULT_SIGNAL_PERIOD: usize = 9;
pub const DEFAULT_BAND_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_LINE_COLOR: &str = "#2962ff";
pub const DEFAULT_LINE_THICKNESS: f64 = 1.0;
pub const MIN_PERIOD: usize = 1;
pub const MAX_PERIOD: usize = 500;

// A windowed average still counts when at least this share of its points is
// usable, so sparse gaps upstream do not blank the whole line.
const WINDOW_VALID_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Macd,
    #[serde(rename = "bb")]
    BollingerBands,
    Atr,
}

impl IndicatorKind {
    pub fn default_category(self) -> IndicatorCategory {
        match self {
            Self::Sma | Self::Ema | Self::BollingerBands => IndicatorCategory::Main,
            Self::Rsi | Self::Macd | Self::Atr => IndicatorCategory::Sub,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorCategory {
    Main,
    Sub,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Open,
    High,
    Low,
    #[default]
    Close,
}

impl PriceSource {
    pub fn extract(self, bar: &Bar) -> f64 {
        match self {
            Self::Open => bar.open,
            Self::High => bar.high,
            Self::Low => bar.low,
            Self::Close => bar.close,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSettings {
    #[serde(default = "default_period")]
    pub period: usize,
    #[serde(default)]
    pub source: PriceSource,
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    #[serde(default = "default_signal_period")]
    pub signal_period: usize,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_thickness")]
    pub thickness: f64,
}

fn default_period() -> usize {
    DEFAULT_PERIOD
}

fn default_fast_period() -> usize {
    DEFAULT_FAST_PERIOD
}

fn default_slow_period() -> usize {
    DEFAULT_SLOW_PERIOD
}

fn default_signal_period() -> usize {
    DEFAULT_SIGNAL_PERIOD
}

fn default_multiplier() -> f64 {
    DEFAULT_BAND_MULTIPLIER
}

fn default_color() -> String {
    DEFAULT_LINE_COLOR.to_string()
}

fn default_thickness() -> f64 {
    DEFAULT_LINE_THICKNESS
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            source: PriceSource::default(),
            fast_period: DEFAULT_FAST_PERIOD,
            slow_period: DEFAULT_SLOW_PERIOD,
            signal_period: DEFAULT_SIGNAL_PERIOD,
            multiplier: DEFAULT_BAND_MULTIPLIER,
            color: DEFAULT_LINE_COLOR.to_string(),
            thickness: DEFAULT_LINE_THICKNESS,
        }
    }
}

impl IndicatorSettings {
    pub fn validate_for(&self, kind: IndicatorKind) -> Result<(), ChartError> {
        let period_range = MIN_PERIOD..=MAX_PERIOD;

        match kind {
            IndicatorKind::Macd => {
                for (name, value) in [
                    ("fastPeriod", self.fast_period),
                    ("slowPeriod", self.slow_period),
                    ("signalPeriod", self.signal_period),
                ] {
                    if !period_range.contains(&value) {
                        return Err(ChartError::InvalidArgument(format!(
                            "{name} must be between {MIN_PERIOD} and {MAX_PERIOD}"
                        )));
                    }
                }
            }
            _ => {
                if !period_range.contains(&self.period) {
                    return Err(ChartError::InvalidArgument(format!(
                        "period must be between {MIN_PERIOD} and {MAX_PERIOD}"
                    )));
                }
            }
        }

        if kind == IndicatorKind::BollingerBands
            && (!self.multiplier.is_finite() || self.multiplier <= 0.0)
        {
            return Err(ChartError::InvalidArgument(
                "multiplier must be a finite positive number".to_string(),
            ));
        }

        if !self.thickness.is_finite() || self.thickness <= 0.0 {
            return Err(ChartError::InvalidArgument(
                "thickness must be a finite positive number".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSpec {
    pub id: u64,
    pub kind: IndicatorKind,
    pub category: IndicatorCategory,
    pub settings: IndicatorSettings,
}

impl IndicatorSpec {
    // Bars required before the first non-null value appears.
    pub fn lookback(&self) -> usize {
        match self.kind {
            IndicatorKind::Sma | IndicatorKind::Ema | IndicatorKind::BollingerBands
            | IndicatorKind::Atr => self.settings.period.saturating_sub(1),
            IndicatorKind::Rsi => self.settings.period,
            IndicatorKind::Macd => {
                self.settings
                    .fast_period
                    .max(self.settings.slow_period)
                    .saturating_sub(1)
                    + self.settings.signal_period.saturating_sub(1)
            }
        }
    }
}

pub fn max_lookback(specs: &[IndicatorSpec]) -> usize {
    specs.iter().map(IndicatorSpec::lookback).max().unwrap_or(0)
}

fn source_series(bars: &[Bar], source: PriceSource) -> Vec<f64> {
    bars.iter().map(|bar| source.extract(bar)).collect()
}

fn window_mean(window: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = window.iter().copied().filter(|v| v.is_finite()).collect();
    if (valid.len() as f64) < window.len() as f64 * WINDOW_VALID_RATIO || valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..values.len() {
        out[i] = window_mean(&values[i + 1 - period..=i]);
    }
    out
}

pub fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let seed_window = &values[..period];
    if seed_window.iter().any(|v| !v.is_finite()) {
        return out;
    }
    let mut prev = seed_window.iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);

    let k = 2.0 / (period as f64 + 1.0);
    for i in period..values.len() {
        // A gap upstream halts propagation for the rest of the series.
        if !values[i].is_finite() {
            break;
        }
        prev = values[i] * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

fn rsi_point(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

pub fn rsi_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period + 1 {
        return out;
    }

    let deltas: Vec<f64> = values.windows(2).map(|pair| pair[1] - pair[0]).collect();

    let mut avg_gain = deltas[..period]
        .iter()
        .map(|delta| delta.max(0.0))
        .sum::<f64>()
        / period as f64;
    let mut avg_loss = deltas[..period]
        .iter()
        .map(|delta| (-delta).max(0.0))
        .sum::<f64>()
        / period as f64;
    out[period] = Some(rsi_point(avg_gain, avg_loss));

    for (delta_index, delta) in deltas.iter().enumerate().skip(period) {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[delta_index + 1] = Some(rsi_point(avg_gain, avg_loss));
    }
    out
}

pub fn macd_series(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Vec<Option<IndicatorValue>> {
    let len = values.len();
    let fast_ema = ema_series(values, fast_period);
    let slow_ema = ema_series(values, slow_period);

    let macd_line: Vec<Option<f64>> = (0..len)
        .map(|i| match (fast_ema[i], slow_ema[i]) {
            (Some(fast), Some(slow)) => Some(fast - slow),
            _ => None,
        })
        .collect();

    let mut signal_line: Vec<Option<f64>> = vec![None; len];
    if signal_period > 0 {
        if let Some(start) = macd_line.iter().position(Option::is_some) {
            let seed_end = start + signal_period;
            if seed_end <= len && macd_line[start..seed_end].iter().all(Option::is_some) {
                // Seed the signal as a simple average of the first
                // signal_period macd values, then switch to the EMA recurrence.
                let mut prev = macd_line[start..seed_end]
                    .iter()
                    .map(|value| value.unwrap_or(0.0))
                    .sum::<f64>()
                    / signal_period as f64;
                signal_line[seed_end - 1] = Some(prev);

                let k = 2.0 / (signal_period as f64 + 1.0);
                for i in seed_end..len {
                    let Some(macd) = macd_line[i] else {
                        break;
                    };
                    prev = macd * k + prev * (1.0 - k);
                    signal_line[i] = Some(prev);
                }
            }
        }
    }

    (0..len)
        .map(|i| {
            macd_line[i].map(|macd| IndicatorValue::Macd {
                macd,
                signal: signal_line[i],
                histogram: signal_line[i].map(|signal| macd - signal),
            })
        })
        .collect()
}

pub fn bollinger_series(
    values: &[f64],
    period: usize,
    multiplier: f64,
) -> Vec<Option<IndicatorValue>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }

    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let Some(middle) = window_mean(window) else {
            continue;
        };
        let valid: Vec<f64> = window.iter().copied().filter(|v| v.is_finite()).collect();
        let variance =
            valid.iter().map(|v| (v - middle) * (v - middle)).sum::<f64>() / valid.len() as f64;
        let band = multiplier * variance.sqrt();
        out[i] = Some(IndicatorValue::Bands {
            upper: middle + band,
            middle,
            lower: middle - band,
        });
    }
    out
}

pub fn atr_series(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }

    let true_ranges: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                let prev_close = bars[i - 1].close;
                (bar.high - bar.low)
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            }
        })
        .collect();

    let mut prev = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..bars.len() {
        prev = (prev * (period as f64 - 1.0) + true_ranges[i]) / period as f64;
        out[i] = Some(prev);
    }
    out
}

pub fn compute_series(
    bars: &[Bar],
    spec: &IndicatorSpec,
) -> Result<Vec<Option<IndicatorValue>>, ChartError> {
    spec.settings.validate_for(spec.kind)?;

    let series = match spec.kind {
        IndicatorKind::Sma => {
            let values = source_series(bars, spec.settings.source);
            sma_series(&values, spec.settings.period)
                .into_iter()
                .map(|value| value.map(IndicatorValue::Scalar))
                .collect()
        }
        IndicatorKind::Ema => {
            let values = source_series(bars, spec.settings.source);
            ema_series(&values, spec.settings.period)
                .into_iter()
                .map(|value| value.map(IndicatorValue::Scalar))
                .collect()
        }
        IndicatorKind::Rsi => {
            let values = source_series(bars, spec.settings.source);
            rsi_series(&values, spec.settings.period)
                .into_iter()
                .map(|value| value.map(IndicatorValue::Scalar))
                .collect()
        }
        IndicatorKind::Macd => {
            let values = source_series(bars, spec.settings.source);
            macd_series(
                &values,
                spec.settings.fast_period,
                spec.settings.slow_period,
                spec.settings.signal_period,
            )
        }
        IndicatorKind::BollingerBands => {
            let values = source_series(bars, spec.settings.source);
            bollinger_series(&values, spec.settings.period, spec.settings.multiplier)
        }
        IndicatorKind::Atr => atr_series(bars, spec.settings.period)
            .into_iter()
            .map(|value| value.map(IndicatorValue::Scalar))
            .collect(),
    };

    Ok(series)
}

// Full-array recompute; one failing indicator never blocks the others.
pub fn recompute_indicators(bars: &mut [Bar], specs: &[IndicatorSpec]) {
    let active_ids: BTreeSet<u64> = specs.iter().map(|spec| spec.id).collect();
    for bar in bars.iter_mut() {
        bar.indicator_values.retain(|id, _| active_ids.contains(id));
    }

    for spec in specs {
        match compute_series(bars, spec) {
            Ok(series) => {
                for (bar, value) in bars.iter_mut().zip(series) {
                    match value {
                        Some(value) => {
                            bar.indicator_values.insert(spec.id, value);
                        }
                        None => {
                            bar.indicator_values.remove(&spec.id);
                        }
                    }
                }
            }
            Err(error) => {
                warn!(indicator_id = spec.id, %error, "indicator recompute failed");
                for bar in bars.iter_mut() {
                    bar.indicator_values.remove(&spec.id);
                }
            }
        }
    }
}
