//! Indicator metadata lookup: resolving a standard or custom indicator
//! name to its `IndicatorDescriptor` (inputs, plots, output mapping),
//! with a process-wide cache so the same indicator isn't refetched for
//! every symbol that subscribes to it.
//!
//! Grounded on the translate-endpoint fetch in the metadata provider the
//! original client talks to: a versioned pine id is POSTed/GETed once and
//! the resulting schema is reused across sessions as long as auth doesn't
//! change the answer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::auth::AuthCookies;
use crate::entities::{IndicatorDescriptor, InputDef, InputType, PlotDef};
use crate::errors::Error;
use crate::protocol::{known_output_mapping, standard_indicator_id};

const CACHE_CAPACITY: usize = 100;

/// Key identifying one cached descriptor lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    pine_id: String,
    pine_version: String,
    /// Fingerprint of the credentials used for the fetch, empty for
    /// anonymous lookups, so authenticated and anonymous results never
    /// collide even for the same custom indicator id.
    auth_fingerprint: String,
}

/// Fetches indicator descriptors from the metadata provider. Implemented
/// against a real HTTP endpoint in production and fakeable in tests.
pub trait MetadataFetcher: Send + Sync {
    fn fetch(
        &self,
        pine_id: &str,
        pine_version: &str,
        cookies: Option<&AuthCookies>,
    ) -> Result<IndicatorDescriptor, Error>;
}

/// Production fetcher backed by the metadata provider's translate
/// endpoint, wrapped in a process-wide oldest-eviction cache.
pub struct PineFacadeClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

fn cache() -> &'static Mutex<HashMap<CacheKey, Arc<IndicatorDescriptor>>> {
    static CACHE: OnceLock<Mutex<HashMap<CacheKey, Arc<IndicatorDescriptor>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Insertion order, so the cache can evict the oldest entry once full
/// without relying on hash iteration order.
fn cache_order() -> &'static Mutex<Vec<CacheKey>> {
    static ORDER: OnceLock<Mutex<Vec<CacheKey>>> = OnceLock::new();
    ORDER.get_or_init(|| Mutex::new(Vec::new()))
}

fn auth_fingerprint(cookies: Option<&AuthCookies>) -> String {
    match cookies {
        Some(c) => format!("{}:{}", c.session_id, c.session_id_sign),
        None => String::new(),
    }
}

/// Custom (non-`STD;`) indicators require authentication; standard ones
/// don't.
fn needs_auth(pine_id: &str) -> bool {
    pine_id.starts_with("USER;") || pine_id.starts_with("PUB;")
}

impl PineFacadeClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            base_url: "https://pine-facade.tradingview.com/pine-facade/translate".to_string(),
        }
    }

    fn fetch_remote(
        &self,
        pine_id: &str,
        pine_version: &str,
        cookies: Option<&AuthCookies>,
    ) -> Result<IndicatorDescriptor, Error> {
        if needs_auth(pine_id) && cookies.map_or(true, |c| c.session_id.is_empty()) {
            return Err(Error::AuthRequired(format!("{pine_id} requires authentication")));
        }

        let encoded = urlencoding_light(pine_id);
        let url = format!("{}/{}/{}", self.base_url, encoded, pine_version);
        let mut request = self
            .http
            .get(&url)
            .header("Origin", "https://www.tradingview.com")
            .header("Referer", "https://www.tradingview.com/");
        if let Some(cookies) = cookies {
            request = request.header("Cookie", cookies.to_header_value());
        }

        let response = request.send()?;
        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(Error::AuthRequired(format!("{pine_id} rejected credentials"))),
            404 => return Err(Error::NotAvailable(format!("indicator {pine_id} not found"))),
            status => {
                return Err(Error::NotAvailable(format!("indicator {pine_id} fetch failed: {status}")))
            }
        }

        let body: serde_json::Value = response.json()?;
        parse_descriptor(pine_id, pine_version, &body)
    }
}

impl Default for PineFacadeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataFetcher for PineFacadeClient {
    fn fetch(
        &self,
        pine_id: &str,
        pine_version: &str,
        cookies: Option<&AuthCookies>,
    ) -> Result<IndicatorDescriptor, Error> {
        let key = CacheKey {
            pine_id: pine_id.to_string(),
            pine_version: pine_version.to_string(),
            auth_fingerprint: auth_fingerprint(cookies),
        };

        if let Some(hit) = cache().lock().unwrap().get(&key) {
            return Ok((**hit).clone());
        }

        let descriptor = self.fetch_remote(pine_id, pine_version, cookies)?;
        insert_into_cache(key, descriptor.clone());
        Ok(descriptor)
    }
}

fn insert_into_cache(key: CacheKey, descriptor: IndicatorDescriptor) {
    let mut map = cache().lock().unwrap();
    let mut order = cache_order().lock().unwrap();
    if !map.contains_key(&key) && map.len() >= CACHE_CAPACITY {
        if let Some(oldest) = order.first().cloned() {
            map.remove(&oldest);
            order.remove(0);
        }
    }
    order.push(key.clone());
    map.insert(key, Arc::new(descriptor));
}

/// Builds a descriptor from a standard indicator's short name (`"RSI"`,
/// case-insensitive) without any network round-trip.
pub fn standard_descriptor(short_name: &str) -> Option<IndicatorDescriptor> {
    let pine_id = standard_indicator_id(&short_name.to_uppercase())?;
    standard_descriptor_by_pine_id(pine_id)
}

/// Builds a descriptor from an already-normalized standard pine id
/// (`"STD;RSI"`) without any network round-trip. Returns `None` for a
/// pine id outside the standard/known set, even if it's syntactically
/// `STD;`-prefixed — an unrecognized standard id still needs a metadata
/// fetch to discover its inputs/plots.
pub fn standard_descriptor_by_pine_id(pine_id: &str) -> Option<IndicatorDescriptor> {
    if !crate::protocol::is_standard_pine_id(pine_id) {
        return None;
    }
    let output_mapping = known_output_mapping(pine_id)
        .map(|pairs| pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        .unwrap_or_else(|| {
            let mut map = HashMap::new();
            map.insert("plot_0".to_string(), "value".to_string());
            map
        });
    Some(IndicatorDescriptor {
        pine_id: pine_id.to_string(),
        pine_version: "last".to_string(),
        inputs: default_inputs_for(pine_id),
        plots: output_mapping.keys().map(|id| PlotDef { id: id.clone(), title: None }).collect(),
        output_mapping,
    })
}

fn default_inputs_for(pine_id: &str) -> Vec<InputDef> {
    match pine_id {
        "STD;RSI" | "STD;SMA" | "STD;EMA" | "STD;ATR" | "STD;ADX" | "STD;CCI" | "STD;MFI"
        | "STD;ROC" => vec![InputDef {
            name: "length".to_string(),
            kind: InputType::Integer,
            default: Some(crate::entities::InputValue::Integer(14)),
            min: Some(1.0),
            max: None,
            options: None,
        }],
        _ => Vec::new(),
    }
}

fn parse_descriptor(
    pine_id: &str,
    pine_version: &str,
    body: &serde_json::Value,
) -> Result<IndicatorDescriptor, Error> {
    let inputs = body
        .get("inputs")
        .and_then(|v| serde_json::from_value::<Vec<InputDef>>(v.clone()).ok())
        .unwrap_or_default();
    let plots = body
        .get("plots")
        .and_then(|v| serde_json::from_value::<Vec<PlotDef>>(v.clone()).ok())
        .unwrap_or_default();
    let output_mapping = known_output_mapping(pine_id)
        .map(|pairs| pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        .unwrap_or_else(|| plots.iter().map(|p| (p.id.clone(), p.id.clone())).collect());

    Ok(IndicatorDescriptor {
        pine_id: pine_id.to_string(),
        pine_version: pine_version.to_string(),
        inputs,
        plots,
        output_mapping,
    })
}

/// Minimal percent-encoding for the path segments this endpoint needs
/// (`;` and `%` are the only characters TradingView's own pine ids use
/// that aren't already URL-safe).
fn urlencoding_light(s: &str) -> String {
    s.replace('%', "%25").replace(';', "%3B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_descriptor_carries_the_known_output_mapping() {
        let descriptor = standard_descriptor("MACD").unwrap();
        assert_eq!(descriptor.pine_id, "STD;MACD");
        assert_eq!(descriptor.output_mapping.get("plot_0"), Some(&"macd".to_string()));
    }

    #[test]
    fn unknown_short_name_has_no_standard_descriptor() {
        assert!(standard_descriptor("NOT_A_REAL_INDICATOR").is_none());
    }

    #[test]
    fn standard_descriptor_by_pine_id_rejects_an_unrecognized_std_id() {
        assert!(standard_descriptor_by_pine_id("STD;SomeNewIndicator").is_none());
        assert!(standard_descriptor_by_pine_id("STD;RSI").is_some());
    }

    #[test]
    fn custom_indicators_require_auth() {
        assert!(needs_auth("USER;Foo"));
        assert!(needs_auth("PUB;Bar"));
        assert!(!needs_auth("STD;RSI"));
    }

    #[test]
    fn an_empty_session_cookie_does_not_satisfy_auth() {
        let client = PineFacadeClient::new();
        let empty = AuthCookies::new("", "");
        let err = client.fetch_remote("USER;Foo", "1", Some(&empty)).unwrap_err();
        assert!(matches!(err, Error::AuthRequired(_)));
    }
}
