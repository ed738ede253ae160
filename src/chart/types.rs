use crate::error::ChartError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_TIMEFRAME: ChartTimeframe = ChartTimeframe::M1;
pub const MIN_DISPLAY_CANDLES: usize = 20;
pub const MAX_DISPLAY_CANDLES: usize = 200;
pub const DEFAULT_DISPLAY_CANDLES: usize = 100;
pub const DEFAULT_BUFFER_CANDLES: usize = 100;
pub const MIN_BUFFER_CANDLES: usize = 10;
pub const MAX_BUFFER_CANDLES: usize = 2_000;
pub const DEFAULT_FETCH_THRESHOLD: usize = 50;
pub const MIN_FETCH_THRESHOLD: usize = 1;
pub const MAX_FETCH_THRESHOLD: usize = 500;
pub const DEFAULT_DEBOUNCE_MS: u64 = 150;
pub const MIN_DEBOUNCE_MS: u64 = 10;
pub const MAX_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_EMIT_INTERVAL_MS: u64 = 16;
pub const MIN_EMIT_INTERVAL_MS: u64 = 8;
pub const MAX_EMIT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_LIVE_WAIT_MS: u64 = 2_000;
pub const MIN_LIVE_WAIT_MS: u64 = 50;
pub const MAX_LIVE_WAIT_MS: u64 = 30_000;
pub const DEFAULT_INITIAL_FETCH_COUNT: usize = 300;
pub const MIN_INITIAL_FETCH_COUNT: usize = 50;
pub const MAX_INITIAL_FETCH_COUNT: usize = 10_000;
pub const DEFAULT_OLDEST_AVAILABLE_SEQUENCE: i64 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChartTimeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl ChartTimeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    pub fn duration_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
            Self::W1 => 604_800_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IndicatorValue {
    Macd {
        macd: f64,
        signal: Option<f64>,
        histogram: Option<f64>,
    },
    Bands {
        upper: f64,
        middle: f64,
        lower: f64,
    },
    Scalar(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    pub sequence: i64,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indicator_values: BTreeMap<u64, IndicatorValue>,
}

impl Bar {
    pub fn new(
        sequence: i64,
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicator_values: BTreeMap::new(),
        }
    }

    // Scalar fields overwrite; indicator values survive unless the incoming
    // bar explicitly carries its own.
    pub fn merge_from(&mut self, incoming: Bar) {
        self.timestamp = incoming.timestamp;
        self.open = incoming.open;
        self.high = incoming.high;
        self.low = incoming.low;
        self.close = incoming.close;
        self.volume = incoming.volume;
        if !incoming.indicator_values.is_empty() {
            self.indicator_values.extend(incoming.indicator_values);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarBatchDecode {
    pub bars: Vec<Bar>,
    pub dropped: usize,
}

fn wire_f64(value: &simd_json::OwnedValue, field: &str) -> Option<f64> {
    use simd_json::prelude::*;

    let raw = value.get(field)?;
    // Feeds disagree on numeric vs string-encoded prices; accept both.
    let parsed = match raw.cast_f64() {
        Some(number) => number,
        None => raw.as_str()?.parse::<f64>().ok()?,
    };
    parsed.is_finite().then_some(parsed)
}

fn wire_i64(value: &simd_json::OwnedValue, field: &str) -> Option<i64> {
    use simd_json::prelude::*;

    let raw = value.get(field)?;
    match raw.as_i64() {
        Some(number) => Some(number),
        None => raw.as_str()?.parse::<i64>().ok(),
    }
}

fn bar_from_wire(value: &simd_json::OwnedValue) -> Option<Bar> {
    let sequence = wire_i64(value, "sequence")?;
    let timestamp = wire_i64(value, "timestamp")?;
    let open = wire_f64(value, "open")?;
    let high = wire_f64(value, "high")?;
    let low = wire_f64(value, "low")?;
    let close = wire_f64(value, "close")?;
    let volume = wire_f64(value, "volume")?.max(0.0);

    Some(Bar::new(sequence, timestamp, open, high, low, close, volume))
}

// Element-tolerant: one malformed bar never poisons the batch.
pub fn decode_bar_batch(payload: &mut [u8]) -> Result<BarBatchDecode, ChartError> {
    use simd_json::prelude::*;

    let parsed = simd_json::to_owned_value(payload)?;
    let Some(elements) = parsed.as_array() else {
        return Err(ChartError::InvalidArgument(
            "bar batch payload must be a JSON array".to_string(),
        ));
    };

    let mut decode = BarBatchDecode {
        bars: Vec::with_capacity(elements.len()),
        dropped: 0,
    };
    for element in elements {
        match bar_from_wire(element) {
            Some(bar) => decode.bars.push(bar),
            None => decode.dropped += 1,
        }
    }

    Ok(decode)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChartSubscriptionArgs {
    pub symbol: Option<String>,
    pub timeframe: Option<ChartTimeframe>,
    pub display_count: Option<usize>,
    pub buffer_candles: Option<usize>,
    pub fetch_threshold: Option<usize>,
    pub oldest_available_sequence: Option<i64>,
    pub debounce_ms: Option<u64>,
    pub emit_interval_ms: Option<u64>,
    pub live_wait_ms: Option<u64>,
    pub initial_fetch_count: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub symbol: String,
    pub timeframe: ChartTimeframe,
    pub display_count: usize,
    pub buffer_candles: usize,
    pub fetch_threshold: usize,
    pub oldest_available_sequence: i64,
    pub debounce_ms: u64,
    pub emit_interval_ms: u64,
    pub live_wait_ms: u64,
    pub initial_fetch_count: usize,
}

impl ChartSubscriptionArgs {
    pub fn normalize(self) -> Result<ChartConfig, ChartError> {
        let symbol = self
            .symbol
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string())
            .trim()
            .to_ascii_uppercase();

        if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(ChartError::InvalidArgument(
                "symbol must be non-empty alphanumeric ASCII".to_string(),
            ));
        }

        let timeframe = self.timeframe.unwrap_or(DEFAULT_TIMEFRAME);

        let display_count = self.display_count.unwrap_or(DEFAULT_DISPLAY_CANDLES);
        if !(MIN_DISPLAY_CANDLES..=MAX_DISPLAY_CANDLES).contains(&display_count) {
            return Err(ChartError::InvalidArgument(format!(
                "displayCount must be between {MIN_DISPLAY_CANDLES} and {MAX_DISPLAY_CANDLES}"
            )));
        }

        let buffer_candles = self.buffer_candles.unwrap_or(DEFAULT_BUFFER_CANDLES);
        if !(MIN_BUFFER_CANDLES..=MAX_BUFFER_CANDLES).contains(&buffer_candles) {
            return Err(ChartError::InvalidArgument(format!(
                "bufferCandles must be between {MIN_BUFFER_CANDLES} and {MAX_BUFFER_CANDLES}"
            )));
        }

        let fetch_threshold = self.fetch_threshold.unwrap_or(DEFAULT_FETCH_THRESHOLD);
        if !(MIN_FETCH_THRESHOLD..=MAX_FETCH_THRESHOLD).contains(&fetch_threshold) {
            return Err(ChartError::InvalidArgument(format!(
                "fetchThreshold must be between {MIN_FETCH_THRESHOLD} and {MAX_FETCH_THRESHOLD}"
            )));
        }

        let oldest_available_sequence = self
            .oldest_available_sequence
            .unwrap_or(DEFAULT_OLDEST_AVAILABLE_SEQUENCE);
        if oldest_available_sequence < 0 {
            return Err(ChartError::InvalidArgument(
                "oldestAvailableSequence must be non-negative".to_string(),
            ));
        }

        let debounce_ms = self.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS);
        if !(MIN_DEBOUNCE_MS..=MAX_DEBOUNCE_MS).contains(&debounce_ms) {
            return Err(ChartError::InvalidArgument(format!(
                "debounceMs must be between {MIN_DEBOUNCE_MS} and {MAX_DEBOUNCE_MS}"
            )));
        }

        let emit_interval_ms = self.emit_interval_ms.unwrap_or(DEFAULT_EMIT_INTERVAL_MS);
        if !(MIN_EMIT_INTERVAL_MS..=MAX_EMIT_INTERVAL_MS).contains(&emit_interval_ms) {
            return Err(ChartError::InvalidArgument(format!(
                "emitIntervalMs must be between {MIN_EMIT_INTERVAL_MS} and {MAX_EMIT_INTERVAL_MS}"
            )));
        }

        let live_wait_ms = self.live_wait_ms.unwrap_or(DEFAULT_LIVE_WAIT_MS);
        if !(MIN_LIVE_WAIT_MS..=MAX_LIVE_WAIT_MS).contains(&live_wait_ms) {
            return Err(ChartError::InvalidArgument(format!(
                "liveWaitMs must be between {MIN_LIVE_WAIT_MS} and {MAX_LIVE_WAIT_MS}"
            )));
        }

        let initial_fetch_count = self
            .initial_fetch_count
            .unwrap_or(DEFAULT_INITIAL_FETCH_COUNT);
        if !(MIN_INITIAL_FETCH_COUNT..=MAX_INITIAL_FETCH_COUNT).contains(&initial_fetch_count) {
            return Err(ChartError::InvalidArgument(format!(
                "initialFetchCount must be between {MIN_INITIAL_FETCH_COUNT} and {MAX_INITIAL_FETCH_COUNT}"
            )));
        }

        Ok(ChartConfig {
            symbol,
            timeframe,
            display_count,
            buffer_candles,
            fetch_threshold,
            oldest_available_sequence,
            debounce_ms,
            emit_interval_ms,
            live_wait_ms,
            initial_fetch_count,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSubscriptionSession {
    pub running: bool,
    pub symbol: String,
    pub timeframe: ChartTimeframe,
    pub display_count: usize,
    pub buffer_candles: usize,
    pub fetch_threshold: usize,
    pub debounce_ms: u64,
    pub emit_interval_ms: u64,
    pub live_wait_ms: u64,
    pub initial_fetch_count: usize,
}

impl ChartSubscriptionSession {
    pub fn from_config(config: &ChartConfig) -> Self {
        Self {
            running: true,
            symbol: config.symbol.clone(),
            timeframe: config.timeframe,
            display_count: config.display_count,
            buffer_candles: config.buffer_candles,
            fetch_threshold: config.fetch_threshold,
            debounce_ms: config.debounce_ms,
            emit_interval_ms: config.emit_interval_ms,
            live_wait_ms: config.live_wait_ms,
            initial_fetch_count: config.initial_fetch_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartStreamState {
    Initializing,
    Live,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatusSnapshot {
    pub state: ChartStreamState,
    pub symbol: String,
    pub timeframe: ChartTimeframe,
    pub store_len: usize,
    pub latest_known_sequence: Option<i64>,
    pub reason: Option<String>,
}

impl ChartStatusSnapshot {
    pub fn stopped(symbol: String, reason: Option<String>) -> Self {
        Self {
            state: ChartStreamState::Stopped,
            symbol,
            timeframe: DEFAULT_TIMEFRAME,
            store_len: 0,
            latest_known_sequence: None,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartFrame {
    pub symbol: String,
    pub timeframe: ChartTimeframe,
    pub bars: Vec<Bar>,
    pub start_index: usize,
    pub display_count: usize,
    pub store_len: usize,
    pub min_loaded_sequence: Option<i64>,
    pub max_loaded_sequence: Option<i64>,
    pub latest_known_sequence: Option<i64>,
    pub is_initializing: bool,
    pub loading_past: bool,
    pub loading_future: bool,
    pub at_latest_edge: bool,
    pub following_latest: bool,
}
