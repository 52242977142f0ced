//! This module provides the definition of the domain entities held by the
//! data store: quotes, candles and Pine studies, plus the indicator
//! descriptor fetched from the metadata provider.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of a symbol's latest traded state, keyed by the bare symbol
/// (e.g. `"THYAO"`, with the exchange prefix stripped).
///
/// Created on first server push, mutated in place by every subsequent
/// `qsd` update, and destroyed on unsubscribe or disconnect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub symbol: String,
    pub last: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub volume: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub prev_close: Option<f64>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub beta: Option<f64>,
    pub high_52_week: Option<f64>,
    pub low_52_week: Option<f64>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub description: Option<String>,
    /// Server-reported timestamp of the underlying tick (`lp_time`).
    pub server_time: Option<i64>,
    /// Wall-clock time this record was last mutated.
    pub updated_at: Option<DateTime<Utc>>,
}

impl QuoteRecord {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), ..Default::default() }
    }
}

/// One OHLCV bar in a candle buffer keyed by `(symbol, interval)`.
///
/// Invariant: within a buffer, `time` is strictly increasing except that
/// the tail entry may be rewritten in place when an incoming update shares
/// its timestamp (an intra-bar refresh).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The type of a Pine input value, inferred from the effective value at
/// `create_study` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Boolean,
    Integer,
    Float,
    String,
}

/// A single effective input value carried by a study, tagged with the
/// wire type it should be encoded as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl InputValue {
    pub fn wire_type(&self) -> InputType {
        match self {
            InputValue::Boolean(_) => InputType::Boolean,
            InputValue::Integer(_) => InputType::Integer,
            InputValue::Float(_) => InputType::Float,
            InputValue::String(_) => InputType::String,
        }
    }
}

/// Definition of one Pine input slot as reported by the metadata provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InputType,
    pub default: Option<InputValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub options: Option<Vec<String>>,
}

/// Definition of one output plot as reported by the metadata provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotDef {
    pub id: String,
    pub title: Option<String>,
}

/// The schema of an indicator, fetched once per `(indicator id, version,
/// auth fingerprint)` and shared immutably afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorDescriptor {
    pub pine_id: String,
    pub pine_version: String,
    pub inputs: Vec<InputDef>,
    pub plots: Vec<PlotDef>,
    /// `plot_N` -> friendly output name, known only for standard indicators.
    pub output_mapping: HashMap<String, String>,
}

/// A Pine Script study bound to a live candle series, keyed by
/// `(symbol, interval, display_name)` in the registry.
#[derive(Debug, Clone)]
pub struct StudyRecord {
    pub indicator_id: String,
    pub study_id: String,
    pub descriptor: std::sync::Arc<IndicatorDescriptor>,
    pub inputs: HashMap<String, InputValue>,
    pub values: HashMap<String, f64>,
    pub ready: bool,
}

impl StudyRecord {
    pub fn new(
        indicator_id: impl Into<String>,
        study_id: impl Into<String>,
        descriptor: std::sync::Arc<IndicatorDescriptor>,
        inputs: HashMap<String, InputValue>,
    ) -> Self {
        Self {
            indicator_id: indicator_id.into(),
            study_id: study_id.into(),
            descriptor,
            inputs,
            values: HashMap::new(),
            ready: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_record_defaults_to_absent_fields() {
        let q = QuoteRecord::new("THYAO");
        assert_eq!(q.symbol, "THYAO");
        assert!(q.last.is_none());
    }

    #[test]
    fn input_value_reports_its_own_wire_type() {
        assert_eq!(InputValue::Integer(14).wire_type(), InputType::Integer);
        assert_eq!(InputValue::Boolean(true).wire_type(), InputType::Boolean);
        assert_eq!(InputValue::Float(1.5).wire_type(), InputType::Float);
        assert_eq!(InputValue::String("x".into()).wire_type(), InputType::String);
    }
}
