//! Tracks what the client is currently subscribed to — quote symbols,
//! candle series, and studies — and translates subscribe/unsubscribe
//! calls into the wire messages that keep the server's view in sync.
//!
//! All state here is pure bookkeeping: series tags and study ids are
//! generated per connection, so a reconnect starts this registry's tag
//! counters fresh and replays every live subscription under new tags (see
//! [`Registry::resubscribe_messages`]).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::entities::{IndicatorDescriptor, InputValue, StudyRecord};
use crate::errors::Error;
use crate::protocol::{envelope, full_symbol, method, symbol_resolve_config, wire_interval};
use crate::session::SessionIds;

/// Identifies one subscribed candle series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

/// Identifies one subscribed study.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudyKey {
    pub symbol: String,
    pub interval: String,
    pub display_name: String,
}

#[derive(Default)]
pub struct Registry {
    /// Bare symbol -> the exchange it was subscribed under, so a
    /// reconnect can rebuild the exact `EXCHANGE:SYMBOL` wire form.
    quote_symbols: HashMap<String, String>,
    candle_series: HashMap<CandleKey, String>,
    candle_exchange: HashMap<CandleKey, String>,
    candle_bar_count: HashMap<CandleKey, u32>,
    series_by_tag: HashMap<String, CandleKey>,
    studies: HashMap<StudyKey, StudyRecord>,
    study_id_by_tag: HashMap<String, StudyKey>,
    series_counter: u64,
    study_counter: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-series symbol-resolution reference (`resolve_symbol`'s own id,
    /// later quoted back in `create_series`) and destination tag (what
    /// `timescale_update`/`du` frames key their candle data under) share
    /// one counter so they're easy to correlate when reading a capture.
    fn next_series_tags(&mut self) -> (String, String) {
        self.series_counter += 1;
        (format!("sym_{}", self.series_counter), format!("sds_{}", self.series_counter))
    }

    fn next_study_tag(&mut self) -> String {
        self.study_counter += 1;
        format!("st{}", self.study_counter)
    }

    /// Adds a quote symbol. Returns `None` if already subscribed (the call
    /// is a no-op), otherwise the `quote_add_symbols` message to send.
    pub fn subscribe_quote(&mut self, ids: &SessionIds, symbol: &str, exchange: &str) -> Option<Value> {
        if self.quote_symbols.insert(symbol.to_string(), exchange.to_string()).is_some() {
            return None;
        }
        Some(envelope(
            method::QUOTE_ADD_SYMBOLS,
            vec![Value::String(ids.quote_session.clone()), Value::String(full_symbol(exchange, symbol))],
        ))
    }

    pub fn unsubscribe_quote(&mut self, ids: &SessionIds, symbol: &str) -> Option<Value> {
        let exchange = self.quote_symbols.remove(symbol)?;
        Some(envelope(
            method::QUOTE_REMOVE_SYMBOLS,
            vec![Value::String(ids.quote_session.clone()), Value::String(full_symbol(&exchange, symbol))],
        ))
    }

    pub fn is_subscribed_quote(&self, symbol: &str) -> bool {
        self.quote_symbols.contains_key(symbol)
    }

    pub fn quote_symbols(&self) -> impl Iterator<Item = &String> {
        self.quote_symbols.keys()
    }

    /// Subscribes a candle series. Idempotent: resubscribing the same
    /// `(symbol, interval)` returns an empty message list rather than
    /// re-sending `resolve_symbol`/`create_series`. A fresh subscription
    /// sends both: the server must resolve the symbol before a series can
    /// reference it.
    pub fn subscribe_candle(
        &mut self,
        ids: &SessionIds,
        symbol: &str,
        interval: &str,
        exchange: &str,
        bar_count: u32,
    ) -> Result<Vec<Value>, Error> {
        let wire_interval = wire_interval(interval)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown interval {interval}")))?;
        let key = CandleKey { symbol: symbol.to_string(), interval: interval.to_string() };
        if self.candle_series.contains_key(&key) {
            return Ok(Vec::new());
        }

        let (resolve_tag, dest_tag) = self.next_series_tags();
        self.series_by_tag.insert(dest_tag.clone(), key.clone());
        self.candle_series.insert(key.clone(), dest_tag.clone());
        self.candle_exchange.insert(key.clone(), exchange.to_string());
        self.candle_bar_count.insert(key, bar_count);

        let resolve_symbol = envelope(
            method::RESOLVE_SYMBOL,
            vec![
                Value::String(ids.chart_session.clone()),
                Value::String(resolve_tag.clone()),
                Value::String(symbol_resolve_config(exchange, symbol)),
            ],
        );
        let create_series = envelope(
            method::CREATE_SERIES,
            vec![
                Value::String(ids.chart_session.clone()),
                Value::String(dest_tag),
                Value::String("s1".to_string()),
                Value::String(resolve_tag),
                Value::String(wire_interval.to_string()),
                Value::from(bar_count),
            ],
        );
        Ok(vec![resolve_symbol, create_series])
    }

    pub fn unsubscribe_candle(
        &mut self,
        ids: &SessionIds,
        symbol: &str,
        interval: &str,
    ) -> Option<Value> {
        let key = CandleKey { symbol: symbol.to_string(), interval: interval.to_string() };
        let tag = self.candle_series.remove(&key)?;
        self.series_by_tag.remove(&tag);
        self.candle_exchange.remove(&key);
        self.candle_bar_count.remove(&key);
        Some(envelope(
            method::REMOVE_SERIES,
            vec![Value::String(ids.chart_session.clone()), Value::String(tag)],
        ))
    }

    /// Resolves a series tag from an inbound frame to the `(symbol,
    /// interval)` it belongs to. Unknown tags are the caller's problem to
    /// log and drop; this never falls back to guessing.
    pub fn candle_key_for_tag(&self, tag: &str) -> Option<&CandleKey> {
        self.series_by_tag.get(tag)
    }

    pub fn tag_for_candle(&self, symbol: &str, interval: &str) -> Option<&str> {
        self.candle_series
            .get(&CandleKey { symbol: symbol.to_string(), interval: interval.to_string() })
            .map(|s| s.as_str())
    }

    pub fn candle_keys(&self) -> impl Iterator<Item = &CandleKey> {
        self.candle_series.keys()
    }

    /// Registers a new study and returns the `create_study` message.
    /// `"st1"` is a literal wire constant unrelated to the generated study
    /// tag, and the source series is the destination tag of the candle
    /// series this study rides on, not a fixed literal — each candle
    /// subscription gets its own destination tag (see
    /// [`Registry::subscribe_candle`]), so a study reads from exactly the
    /// one it was added against. Input encoding follows the `in_0, in_1,
    /// ...` convention with each slot carrying `{v, f: true, t}`.
    pub fn add_study(
        &mut self,
        ids: &SessionIds,
        symbol: &str,
        interval: &str,
        display_name: &str,
        descriptor: Arc<IndicatorDescriptor>,
        inputs: HashMap<String, InputValue>,
    ) -> Result<Option<Value>, Error> {
        let series_tag = self.tag_for_candle(symbol, interval).map(str::to_string).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cannot add study {display_name} without a subscribed candle series for {symbol}@{interval}"
            ))
        })?;

        let key = StudyKey {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            display_name: display_name.to_string(),
        };
        if self.studies.contains_key(&key) {
            return Ok(None);
        }

        let study_tag = self.next_study_tag();
        let indicator_id = descriptor.pine_id.clone();
        let params = vec![
            Value::String(ids.chart_session.clone()),
            Value::String(study_tag.clone()),
            Value::String("st1".to_string()),
            Value::String(series_tag),
            Value::String("Script@tv-scripting-101!".to_string()),
            encode_study_inputs(&descriptor, &inputs),
        ];

        self.study_id_by_tag.insert(study_tag.clone(), key.clone());
        self.studies.insert(
            key,
            StudyRecord::new(indicator_id, study_tag, descriptor, inputs),
        );

        Ok(Some(envelope(method::CREATE_STUDY, params)))
    }

    pub fn remove_study(
        &mut self,
        ids: &SessionIds,
        symbol: &str,
        interval: &str,
        display_name: &str,
    ) -> Option<Value> {
        let key = StudyKey {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            display_name: display_name.to_string(),
        };
        let record = self.studies.remove(&key)?;
        self.study_id_by_tag.remove(&record.study_id);
        Some(envelope(
            method::REMOVE_STUDY,
            vec![Value::String(ids.chart_session.clone()), Value::String(record.study_id)],
        ))
    }

    pub fn study_key_for_tag(&self, tag: &str) -> Option<&StudyKey> {
        self.study_id_by_tag.get(tag)
    }

    pub fn study(&self, key: &StudyKey) -> Option<&StudyRecord> {
        self.studies.get(key)
    }

    pub fn study_mut(&mut self, key: &StudyKey) -> Option<&mut StudyRecord> {
        self.studies.get_mut(key)
    }

    pub fn studies_for(&self, symbol: &str, interval: &str) -> impl Iterator<Item = &StudyRecord> {
        self.studies.iter().filter_map(move |(k, v)| {
            (k.symbol == symbol && k.interval == interval).then_some(v)
        })
    }

    /// Rebuilds every wire subscription from scratch against a fresh set
    /// of session ids, clearing and regenerating all tag bookkeeping. This
    /// is the re-bootstrap path: the old tags are meaningless to a new
    /// connection, but the logical subscriptions (what the caller asked
    /// for) must reappear exactly once each.
    pub fn resubscribe_messages(&mut self, ids: &SessionIds) -> Vec<Value> {
        let mut messages = Vec::new();

        for (symbol, exchange) in self.quote_symbols.clone() {
            messages.push(envelope(
                method::QUOTE_ADD_SYMBOLS,
                vec![Value::String(ids.quote_session.clone()), Value::String(full_symbol(&exchange, &symbol))],
            ));
        }

        let candle_keys: Vec<(CandleKey, String, u32)> = self
            .candle_series
            .keys()
            .map(|key| {
                let exchange = self.candle_exchange.get(key).cloned().unwrap_or_default();
                let bar_count = self
                    .candle_bar_count
                    .get(key)
                    .copied()
                    .unwrap_or(crate::protocol::DEFAULT_BAR_COUNT);
                (key.clone(), exchange, bar_count)
            })
            .collect();
        self.candle_series.clear();
        self.series_by_tag.clear();
        self.candle_exchange.clear();
        self.candle_bar_count.clear();
        for (key, exchange, bar_count) in candle_keys {
            if let Ok(msgs) =
                self.subscribe_candle(ids, &key.symbol, &key.interval, &exchange, bar_count)
            {
                messages.extend(msgs);
            }
        }

        let studies: Vec<(StudyKey, StudyRecord)> = self.studies.drain().collect();
        self.study_id_by_tag.clear();
        for (key, record) in studies {
            if let Ok(Some(msg)) = self.add_study(
                ids,
                &key.symbol,
                &key.interval,
                &key.display_name,
                record.descriptor,
                record.inputs,
            ) {
                messages.push(msg);
            }
        }

        messages
    }
}

/// Encodes the `create_study` inputs object: `pineId`/`pineVersion` plus
/// one `in_N` slot per descriptor input in declared order, each carrying
/// `{v, f: true, t}`. Falls back to the input's declared default when the
/// caller didn't override it; inputs with neither an override nor a
/// default are omitted, matching the original client's merge-then-index
/// behavior.
fn encode_study_inputs(descriptor: &IndicatorDescriptor, inputs: &HashMap<String, InputValue>) -> Value {
    let mut object = serde_json::Map::new();
    object.insert("pineId".to_string(), Value::String(descriptor.pine_id.clone()));
    object.insert("pineVersion".to_string(), Value::String(descriptor.pine_version.clone()));

    let mut slot = 0;
    for input_def in &descriptor.inputs {
        let value = inputs.get(&input_def.name).cloned().or_else(|| input_def.default.clone());
        let Some(value) = value else { continue };
        let wire_type = value.wire_type();
        let v = match &value {
            InputValue::Boolean(b) => Value::Bool(*b),
            InputValue::Integer(i) => Value::from(*i),
            InputValue::Float(f) => Value::from(*f),
            InputValue::String(s) => Value::String(s.clone()),
        };
        object.insert(format!("in_{slot}"), serde_json::json!({ "v": v, "f": true, "t": wire_type }));
        slot += 1;
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> SessionIds {
        SessionIds { quote_session: "qs_test".into(), chart_session: "cs_test".into() }
    }

    #[test]
    fn subscribing_the_same_symbol_twice_is_a_no_op_the_second_time() {
        let mut registry = Registry::new();
        let ids = ids();
        assert!(registry.subscribe_quote(&ids, "THYAO", "BIST").is_some());
        assert!(registry.subscribe_quote(&ids, "THYAO", "BIST").is_none());
    }

    #[test]
    fn candle_subscription_sends_resolve_then_create_and_assigns_a_resolvable_tag() {
        let mut registry = Registry::new();
        let ids = ids();
        let messages = registry.subscribe_candle(&ids, "THYAO", "1d", "BIST", 300).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["m"], "resolve_symbol");
        assert_eq!(messages[1]["m"], "create_series");
        let tag = registry.tag_for_candle("THYAO", "1d").unwrap().to_string();
        let key = registry.candle_key_for_tag(&tag).unwrap();
        assert_eq!(key.symbol, "THYAO");
        assert_eq!(key.interval, "1d");
    }

    #[test]
    fn resubscribing_the_same_candle_series_is_a_no_op() {
        let mut registry = Registry::new();
        let ids = ids();
        registry.subscribe_candle(&ids, "THYAO", "1d", "BIST", 300).unwrap();
        let messages = registry.subscribe_candle(&ids, "THYAO", "1d", "BIST", 300).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn unknown_interval_is_rejected() {
        let mut registry = Registry::new();
        let ids = ids();
        assert!(registry.subscribe_candle(&ids, "THYAO", "3m", "BIST", 300).is_err());
    }

    #[test]
    fn resubscribe_reemits_every_live_subscription_exactly_once() {
        let mut registry = Registry::new();
        let ids = ids();
        registry.subscribe_quote(&ids, "THYAO", "BIST").unwrap();
        registry.subscribe_candle(&ids, "THYAO", "1d", "BIST", 300).unwrap();

        let new_ids = SessionIds { quote_session: "qs_new".into(), chart_session: "cs_new".into() };
        let messages = registry.resubscribe_messages(&new_ids);
        // 1 quote_add_symbols + 2 candle messages (resolve_symbol + create_series).
        assert_eq!(messages.len(), 3);
        assert!(registry.tag_for_candle("THYAO", "1d").is_some());
    }

    #[test]
    fn adding_a_study_without_a_candle_subscription_is_rejected() {
        let mut registry = Registry::new();
        let ids = ids();
        let descriptor = Arc::new(crate::metadata::standard_descriptor("RSI").unwrap());
        let result = registry.add_study(&ids, "THYAO", "1d", "RSI", descriptor, HashMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn a_study_reads_from_its_own_candle_series_tag() {
        let mut registry = Registry::new();
        let ids = ids();
        registry.subscribe_candle(&ids, "THYAO", "1d", "BIST", 300).unwrap();
        let series_tag = registry.tag_for_candle("THYAO", "1d").unwrap().to_string();
        let descriptor = Arc::new(crate::metadata::standard_descriptor("RSI").unwrap());
        let msg = registry
            .add_study(&ids, "THYAO", "1d", "RSI", descriptor, HashMap::new())
            .unwrap()
            .unwrap();
        assert_eq!(msg["p"][3], series_tag);
    }
}
