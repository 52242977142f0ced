//! Thread-safe storage of the latest known state for every subscribed
//! quote, candle series, and study, plus readiness signalling for the
//! blocking `wait_for_*` calls and callback dispatch for the push-style
//! `on_*` subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::entities::{Candle, QuoteRecord, StudyRecord};
use crate::errors::Error;
use crate::registry::StudyKey;

type QuoteCallback = Box<dyn Fn(&QuoteRecord) + Send + Sync>;
type CandleCallback = Box<dyn Fn(&str, &str, &Candle) + Send + Sync>;
type StudyCallback = Box<dyn Fn(&StudyKey, &StudyRecord) + Send + Sync>;

#[derive(Default)]
struct Tables {
    quotes: HashMap<String, QuoteRecord>,
    candles: HashMap<(String, String), Vec<Candle>>,
    studies: HashMap<StudyKey, StudyRecord>,
}

#[derive(Default)]
struct Callbacks {
    quote: HashMap<String, Vec<QuoteCallback>>,
    quote_any: Vec<QuoteCallback>,
    candle: HashMap<(String, String), Vec<CandleCallback>>,
    candle_any: Vec<CandleCallback>,
    study: HashMap<StudyKey, Vec<StudyCallback>>,
    study_any: Vec<StudyCallback>,
}

/// Holds the data every connected client call reads from. Reads and
/// writes go through the same mutex; the condvar wakes any blocking
/// `wait_for_*` call whenever a relevant table entry is written.
pub struct DataStore {
    tables: Mutex<Tables>,
    callbacks: Mutex<Callbacks>,
    ready: Condvar,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self { tables: Mutex::new(Tables::default()), callbacks: Mutex::new(Callbacks::default()), ready: Condvar::new() }
    }

    pub fn put_quote(&self, record: QuoteRecord) {
        let symbol = record.symbol.clone();
        {
            let mut tables = self.tables.lock().unwrap();
            tables.quotes.insert(symbol.clone(), record.clone());
        }
        self.ready.notify_all();

        let callbacks = self.callbacks.lock().unwrap();
        if let Some(list) = callbacks.quote.get(&symbol) {
            for cb in list {
                cb(&record);
            }
        }
        for cb in &callbacks.quote_any {
            cb(&record);
        }
    }

    pub fn get_quote(&self, symbol: &str) -> Option<QuoteRecord> {
        self.tables.lock().unwrap().quotes.get(symbol).cloned()
    }

    pub fn wait_for_quote(&self, symbol: &str, timeout: Duration) -> Result<QuoteRecord, Error> {
        let deadline = Instant::now() + timeout;
        let mut tables = self.tables.lock().unwrap();
        loop {
            if let Some(record) = tables.quotes.get(symbol) {
                return Ok(record.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!("quote for {symbol}")));
            }
            let (guard, result) = self.ready.wait_timeout(tables, remaining).unwrap();
            tables = guard;
            if result.timed_out() && !tables.quotes.contains_key(symbol) {
                return Err(Error::Timeout(format!("quote for {symbol}")));
            }
        }
    }

    /// Appends or, if the tail bar shares its timestamp, refreshes the
    /// latest bar of a candle buffer, preserving the strictly-increasing
    /// timestamp invariant.
    pub fn put_candle(&self, symbol: &str, interval: &str, candle: Candle) {
        let key = (symbol.to_string(), interval.to_string());
        {
            let mut tables = self.tables.lock().unwrap();
            let buffer = tables.candles.entry(key.clone()).or_default();
            match buffer.last_mut() {
                Some(tail) if tail.time == candle.time => *tail = candle,
                _ => buffer.push(candle),
            }
        }
        self.ready.notify_all();

        let callbacks = self.callbacks.lock().unwrap();
        if let Some(list) = callbacks.candle.get(&key) {
            for cb in list {
                cb(symbol, interval, &candle);
            }
        }
        for cb in &callbacks.candle_any {
            cb(symbol, interval, &candle);
        }
    }

    pub fn get_candle(&self, symbol: &str, interval: &str) -> Option<Candle> {
        self.tables
            .lock()
            .unwrap()
            .candles
            .get(&(symbol.to_string(), interval.to_string()))
            .and_then(|buf| buf.last().copied())
    }

    pub fn get_candles(&self, symbol: &str, interval: &str) -> Vec<Candle> {
        self.tables
            .lock()
            .unwrap()
            .candles
            .get(&(symbol.to_string(), interval.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn wait_for_candle(&self, symbol: &str, interval: &str, timeout: Duration) -> Result<Candle, Error> {
        let key = (symbol.to_string(), interval.to_string());
        let deadline = Instant::now() + timeout;
        let mut tables = self.tables.lock().unwrap();
        loop {
            if let Some(candle) = tables.candles.get(&key).and_then(|buf| buf.last().copied()) {
                return Ok(candle);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!("candle for {symbol}@{interval}")));
            }
            let (guard, result) = self.ready.wait_timeout(tables, remaining).unwrap();
            tables = guard;
            if result.timed_out() && !tables.candles.contains_key(&key) {
                return Err(Error::Timeout(format!("candle for {symbol}@{interval}")));
            }
        }
    }

    pub fn put_study(&self, key: StudyKey, record: StudyRecord) {
        {
            let mut tables = self.tables.lock().unwrap();
            tables.studies.insert(key.clone(), record.clone());
        }
        self.ready.notify_all();

        let callbacks = self.callbacks.lock().unwrap();
        if let Some(list) = callbacks.study.get(&key) {
            for cb in list {
                cb(&key, &record);
            }
        }
        for cb in &callbacks.study_any {
            cb(&key, &record);
        }
    }

    pub fn get_study(&self, key: &StudyKey) -> Option<StudyRecord> {
        self.tables.lock().unwrap().studies.get(key).cloned()
    }

    pub fn get_studies(&self, symbol: &str, interval: &str) -> Vec<(StudyKey, StudyRecord)> {
        self.tables
            .lock()
            .unwrap()
            .studies
            .iter()
            .filter(|(k, _)| k.symbol == symbol && k.interval == interval)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn wait_for_study(&self, key: &StudyKey, timeout: Duration) -> Result<StudyRecord, Error> {
        let deadline = Instant::now() + timeout;
        let mut tables = self.tables.lock().unwrap();
        loop {
            if let Some(record) = tables.studies.get(key).filter(|r| r.ready) {
                return Ok(record.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!("study {}", key.display_name)));
            }
            let (guard, result) = self.ready.wait_timeout(tables, remaining).unwrap();
            tables = guard;
            if result.timed_out() && !tables.studies.get(key).is_some_and(|r| r.ready) {
                return Err(Error::Timeout(format!("study {}", key.display_name)));
            }
        }
    }

    pub fn on_quote(&self, symbol: &str, callback: impl Fn(&QuoteRecord) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().quote.entry(symbol.to_string()).or_default().push(Box::new(callback));
    }

    pub fn on_any_quote(&self, callback: impl Fn(&QuoteRecord) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().quote_any.push(Box::new(callback));
    }

    pub fn on_candle(&self, symbol: &str, interval: &str, callback: impl Fn(&str, &str, &Candle) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap()
            .candle
            .entry((symbol.to_string(), interval.to_string()))
            .or_default()
            .push(Box::new(callback));
    }

    pub fn on_any_candle(&self, callback: impl Fn(&str, &str, &Candle) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().candle_any.push(Box::new(callback));
    }

    pub fn on_study(&self, key: StudyKey, callback: impl Fn(&StudyKey, &StudyRecord) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().study.entry(key).or_default().push(Box::new(callback));
    }

    pub fn on_any_study(&self, callback: impl Fn(&StudyKey, &StudyRecord) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().study_any.push(Box::new(callback));
    }

    pub fn clear(&self) {
        let mut tables = self.tables.lock().unwrap();
        tables.quotes.clear();
        tables.candles.clear();
        tables.studies.clear();
    }
}

pub type SharedStore = Arc<DataStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_quote_returns_immediately_once_already_present() {
        let store = DataStore::new();
        store.put_quote(QuoteRecord::new("THYAO"));
        let record = store.wait_for_quote("THYAO", Duration::from_millis(10)).unwrap();
        assert_eq!(record.symbol, "THYAO");
    }

    #[test]
    fn wait_for_quote_times_out_when_never_pushed() {
        let store = DataStore::new();
        let result = store.wait_for_quote("GHOST", Duration::from_millis(5));
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn candle_buffer_refreshes_the_tail_bar_in_place_for_a_repeated_timestamp() {
        let store = DataStore::new();
        store.put_candle("THYAO", "1d", Candle { time: 100, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 10.0 });
        store.put_candle("THYAO", "1d", Candle { time: 100, open: 1.0, high: 2.5, low: 0.5, close: 2.0, volume: 15.0 });
        let bars = store.get_candles("THYAO", "1d");
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 2.0);
    }

    #[test]
    fn candle_buffer_appends_for_a_new_timestamp() {
        let store = DataStore::new();
        store.put_candle("THYAO", "1d", Candle { time: 100, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0 });
        store.put_candle("THYAO", "1d", Candle { time: 200, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0 });
        assert_eq!(store.get_candles("THYAO", "1d").len(), 2);
    }

    #[test]
    fn quote_callback_for_a_specific_symbol_fires_on_push() {
        let store = DataStore::new();
        let seen = Arc::new(Mutex::new(false));
        let seen_clone = seen.clone();
        store.on_quote("THYAO", move |_| *seen_clone.lock().unwrap() = true);
        store.put_quote(QuoteRecord::new("THYAO"));
        assert!(*seen.lock().unwrap());
    }
}
