//! Routes decoded inbound frames to the registry/store/study-binder and
//! answers heartbeats. This is the single place where a `qsd`, a
//! `timescale_update`, a `study_completed`, or any other server push gets
//! turned into a mutation of local state.

use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;

use crate::entities::{Candle, QuoteRecord};
use crate::framer::{Frame, Framer};
use crate::protocol::inbound;
use crate::registry::Registry;
use crate::store::DataStore;
use crate::study;

/// Result of dispatching one frame: either nothing to send back, or an
/// outbound frame the caller must write to the transport (currently only
/// the heartbeat echo).
pub enum Dispatched {
    None,
    Reply(String),
}

/// Routes frames and tracks the last time any heartbeat was seen, so a
/// stalled connection can be detected even when no data frames arrive.
pub struct Dispatcher {
    last_heartbeat: Mutex<Option<std::time::Instant>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self { last_heartbeat: Mutex::new(None) }
    }

    pub fn last_heartbeat(&self) -> Option<std::time::Instant> {
        *self.last_heartbeat.lock().unwrap()
    }

    pub fn handle(&self, frame: Frame, registry: &Mutex<Registry>, store: &DataStore) -> Dispatched {
        match frame {
            Frame::Heartbeat(counter) => {
                *self.last_heartbeat.lock().unwrap() = Some(std::time::Instant::now());
                Dispatched::Reply(Framer::encode_heartbeat(counter))
            }
            Frame::Data(payload) => {
                self.handle_data(payload, registry, store);
                Dispatched::None
            }
        }
    }

    fn handle_data(&self, payload: Value, registry: &Mutex<Registry>, store: &DataStore) {
        let Some(method) = payload.get("m").and_then(Value::as_str) else {
            tracing::warn!(?payload, "inbound frame missing method name");
            return;
        };
        let params = payload.get("p").and_then(Value::as_array).cloned().unwrap_or_default();

        match method {
            inbound::QSD => self.handle_qsd(&params, store),
            inbound::QUOTE_COMPLETED => {}
            inbound::SYMBOL_RESOLVED => {}
            inbound::TIMESCALE_UPDATE | inbound::DU => self.handle_series_update(&params, registry, store),
            inbound::SERIES_COMPLETED => {}
            inbound::SERIES_ERROR => {
                tracing::warn!(?params, "series_error: retaining subscription without retry");
            }
            inbound::SYMBOL_ERROR => {
                tracing::warn!(?params, "symbol_error");
            }
            inbound::CRITICAL_ERROR => {
                tracing::error!(?params, "critical_error from server");
            }
            // Loading/completed/error here are bare readiness signals with
            // no value payload; the actual values arrive embedded in a
            // timescale_update/du frame (see handle_series_update).
            inbound::STUDY_LOADING => {
                tracing::debug!(?params, "study_loading");
            }
            inbound::STUDY_COMPLETED => {
                tracing::debug!(?params, "study_completed");
            }
            inbound::STUDY_ERROR => {
                tracing::warn!(?params, "study_error");
            }
            other => {
                tracing::debug!(method = other, "unhandled inbound method");
            }
        }
    }

    /// `qsd` carries `[quote_session, { n: symbol, v: { field: value, ... } }]`.
    /// Fields arrive incrementally, so this merges into the existing record
    /// rather than replacing it.
    fn handle_qsd(&self, params: &[Value], store: &DataStore) {
        let Some(payload) = params.get(1) else { return };
        let Some(symbol) = payload.get("n").and_then(Value::as_str) else { return };
        let values = payload.get("v").cloned().unwrap_or_default();

        let mut record = store.get_quote(symbol).unwrap_or_else(|| QuoteRecord::new(symbol));
        merge_quote_fields(&mut record, &values);
        record.updated_at = Some(Utc::now());
        store.put_quote(record);
    }

    /// `timescale_update`/`du` carry `[chart_session, { tag: {s: [...] } }]`
    /// where `tag` is either a candle series tag (points shaped `{i, v:
    /// [time, open, high, low, close, volume]}`) or a study tag (points
    /// shaped `{i, v: [time, plot values...]}`). Both kinds of tag are
    /// routed strictly through the registry's maps; an unrecognized tag is
    /// logged and dropped rather than guessed at.
    fn handle_series_update(&self, params: &[Value], registry: &Mutex<Registry>, store: &DataStore) {
        let Some(payload) = params.get(1) else { return };
        let Some(object) = payload.as_object() else { return };

        for (tag, body) in object {
            let mut registry = registry.lock().unwrap();
            if let Some(key) = registry.candle_key_for_tag(tag).cloned() {
                drop(registry);
                self.apply_candle_points(&key, body, store);
                continue;
            }

            if let Some(study_key) = registry.study_key_for_tag(tag).cloned() {
                if let Some(record) = registry.study_mut(&study_key) {
                    if study::apply_update(record, body) {
                        record.ready = true;
                        let record = record.clone();
                        drop(registry);
                        store.put_study(study_key, record);
                    }
                }
                continue;
            }

            tracing::warn!(tag, "dropping series update for unknown tag");
        }
    }

    fn apply_candle_points(&self, key: &crate::registry::CandleKey, body: &Value, store: &DataStore) {
        let Some(points) = body.get("s").and_then(Value::as_array) else { return };
        for point in points {
            let Some(values) = point.get("v").and_then(Value::as_array) else { continue };
            if let Some(candle) = parse_candle(values) {
                store.put_candle(&key.symbol, &key.interval, candle);
            }
        }
    }

}

fn parse_candle(values: &[Value]) -> Option<Candle> {
    let get = |i: usize| values.get(i).and_then(Value::as_f64);
    Some(Candle {
        time: get(0)? as i64,
        open: get(1)?,
        high: get(2)?,
        low: get(3)?,
        close: get(4)?,
        volume: get(5).unwrap_or(0.0),
    })
}

fn merge_quote_fields(record: &mut QuoteRecord, values: &Value) {
    let f = |key: &str| values.get(key).and_then(Value::as_f64);
    let s = |key: &str| values.get(key).and_then(Value::as_str).map(str::to_string);

    if let Some(v) = f("lp") { record.last = Some(v); }
    if let Some(v) = f("ch") { record.change = Some(v); }
    if let Some(v) = f("chp") { record.change_percent = Some(v); }
    if let Some(v) = f("bid") { record.bid = Some(v); }
    if let Some(v) = f("ask") { record.ask = Some(v); }
    if let Some(v) = f("bid_size") { record.bid_size = Some(v); }
    if let Some(v) = f("ask_size") { record.ask_size = Some(v); }
    if let Some(v) = f("volume") { record.volume = Some(v); }
    if let Some(v) = f("open_price") { record.open = Some(v); }
    if let Some(v) = f("high_price") { record.high = Some(v); }
    if let Some(v) = f("low_price") { record.low = Some(v); }
    if let Some(v) = f("prev_close_price") { record.prev_close = Some(v); }
    if let Some(v) = f("market_cap_basic") { record.market_cap = Some(v); }
    if let Some(v) = f("price_earnings_ttm") { record.pe_ratio = Some(v); }
    if let Some(v) = f("earnings_per_share_basic_ttm") { record.eps = Some(v); }
    if let Some(v) = f("dividends_yield") { record.dividend_yield = Some(v); }
    if let Some(v) = f("beta_1_year") { record.beta = Some(v); }
    if let Some(v) = f("high_52_week") { record.high_52_week = Some(v); }
    if let Some(v) = f("low_52_week") { record.low_52_week = Some(v); }
    if let Some(v) = s("exchange") { record.exchange = Some(v); }
    if let Some(v) = s("currency_code") { record.currency = Some(v); }
    if let Some(v) = s("description") { record.description = Some(v); }
    if let Some(v) = f("lp_time") { record.server_time = Some(v as i64); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionIds;
    use serde_json::json;

    #[test]
    fn heartbeat_produces_exactly_one_echo_reply() {
        let dispatcher = Dispatcher::new();
        let registry = Mutex::new(Registry::new());
        let store = DataStore::new();
        match dispatcher.handle(Frame::Heartbeat(9), &registry, &store) {
            Dispatched::Reply(echo) => assert_eq!(echo, "~h~9"),
            Dispatched::None => panic!("expected an echo reply"),
        }
        assert!(dispatcher.last_heartbeat().is_some());
    }

    #[test]
    fn qsd_merges_incremental_fields_into_the_same_record() {
        let dispatcher = Dispatcher::new();
        let registry = Mutex::new(Registry::new());
        let store = DataStore::new();

        let first = json!({"m": "qsd", "p": ["qs_1", {"n": "THYAO", "v": {"lp": 300.0}}]});
        dispatcher.handle(Frame::Data(first), &registry, &store);
        let second = json!({"m": "qsd", "p": ["qs_1", {"n": "THYAO", "v": {"volume": 500.0}}]});
        dispatcher.handle(Frame::Data(second), &registry, &store);

        let record = store.get_quote("THYAO").unwrap();
        assert_eq!(record.last, Some(300.0));
        assert_eq!(record.volume, Some(500.0));
    }

    #[test]
    fn series_update_for_an_unknown_tag_is_dropped_not_guessed() {
        let dispatcher = Dispatcher::new();
        let registry = Mutex::new(Registry::new());
        let store = DataStore::new();
        let frame = json!({"m": "du", "p": ["cs_1", {"sds_9": {"s": [{"i": 0, "v": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]}]}}]});
        dispatcher.handle(Frame::Data(frame), &registry, &store);
        assert!(store.get_candle("THYAO", "1d").is_none());
    }

    #[test]
    fn series_update_for_a_known_tag_lands_in_the_right_candle_buffer() {
        let dispatcher = Dispatcher::new();
        let registry = Mutex::new(Registry::new());
        let store = DataStore::new();
        let ids = SessionIds { quote_session: "qs_1".into(), chart_session: "cs_1".into() };
        registry.lock().unwrap().subscribe_candle(&ids, "THYAO", "1d", "BIST", 300).unwrap();
        let tag = registry.lock().unwrap().tag_for_candle("THYAO", "1d").unwrap().to_string();

        let mut series_map = serde_json::Map::new();
        series_map.insert(
            tag,
            json!({"s": [{"i": 0, "v": [1690000000.0, 10.0, 11.0, 9.0, 10.5, 100.0]}]}),
        );
        let frame = json!({"m": "du", "p": ["cs_1", Value::Object(series_map)]});
        dispatcher.handle(Frame::Data(frame), &registry, &store);
        let candle = store.get_candle("THYAO", "1d").unwrap();
        assert_eq!(candle.close, 10.5);
    }

    #[test]
    fn study_update_arriving_in_a_du_frame_lands_in_the_right_study_record() {
        use crate::entities::StudyRecord;
        use std::collections::HashMap;
        use std::sync::Arc;

        let dispatcher = Dispatcher::new();
        let registry = Mutex::new(Registry::new());
        let store = DataStore::new();
        let ids = SessionIds { quote_session: "qs_1".into(), chart_session: "cs_1".into() };

        registry.lock().unwrap().subscribe_candle(&ids, "THYAO", "1d", "BIST", 300).unwrap();
        let descriptor = Arc::new(crate::metadata::standard_descriptor("RSI").unwrap());
        registry
            .lock()
            .unwrap()
            .add_study(&ids, "THYAO", "1d", "RSI", descriptor, HashMap::new())
            .unwrap();

        let tag = {
            let reg = registry.lock().unwrap();
            reg.studies_for("THYAO", "1d").next().map(|r: &StudyRecord| r.study_id.clone()).unwrap()
        };

        let mut series_map = serde_json::Map::new();
        series_map.insert(tag, json!({"st": [{"i": 0, "v": [1690000000.0, 71.5]}]}));
        let frame = json!({"m": "du", "p": ["cs_1", Value::Object(series_map)]});
        dispatcher.handle(Frame::Data(frame), &registry, &store);

        let key = crate::registry::StudyKey {
            symbol: "THYAO".to_string(),
            interval: "1d".to_string(),
            display_name: "RSI".to_string(),
        };
        let record = store.get_study(&key).unwrap();
        assert!(record.ready);
        assert_eq!(record.values.get("value"), Some(&71.5));
    }
}
