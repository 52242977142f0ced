//! Wire-level constants and envelope construction for the streaming
//! protocol: method names, the quote field list, interval tokens, and the
//! standard indicator tables from the metadata endpoint's well-known
//! output shapes.

use serde_json::{json, Value};

/// Methods emitted by the client.
pub mod method {
    pub const SET_AUTH_TOKEN: &str = "set_auth_token";
    pub const QUOTE_CREATE_SESSION: &str = "quote_create_session";
    pub const QUOTE_SET_FIELDS: &str = "quote_set_fields";
    pub const QUOTE_ADD_SYMBOLS: &str = "quote_add_symbols";
    pub const QUOTE_REMOVE_SYMBOLS: &str = "quote_remove_symbols";
    pub const CHART_CREATE_SESSION: &str = "chart_create_session";
    pub const RESOLVE_SYMBOL: &str = "resolve_symbol";
    pub const CREATE_SERIES: &str = "create_series";
    pub const REMOVE_SERIES: &str = "remove_series";
    pub const CREATE_STUDY: &str = "create_study";
    pub const REMOVE_STUDY: &str = "remove_study";
}

/// Methods accepted from the server.
pub mod inbound {
    pub const QSD: &str = "qsd";
    pub const QUOTE_COMPLETED: &str = "quote_completed";
    pub const SYMBOL_RESOLVED: &str = "symbol_resolved";
    pub const TIMESCALE_UPDATE: &str = "timescale_update";
    pub const DU: &str = "du";
    pub const SERIES_COMPLETED: &str = "series_completed";
    pub const SERIES_ERROR: &str = "series_error";
    pub const SYMBOL_ERROR: &str = "symbol_error";
    pub const CRITICAL_ERROR: &str = "critical_error";
    pub const STUDY_LOADING: &str = "study_loading";
    pub const STUDY_COMPLETED: &str = "study_completed";
    pub const STUDY_ERROR: &str = "study_error";
}

/// Fixed number of historical bars requested when a series is created.
pub const DEFAULT_BAR_COUNT: u32 = 300;

/// Builds the `EXCHANGE:SYMBOL` form the server expects in
/// `quote_add_symbols` and symbol-resolution requests.
pub fn full_symbol(exchange: &str, symbol: &str) -> String {
    format!("{exchange}:{symbol}")
}

/// Builds the `={json}` resolve-symbol config argument: a plain JSON
/// object, adjusted for splits, regular session, stringified and
/// prefixed with `=` the way the server's symbol resolver expects.
pub fn symbol_resolve_config(exchange: &str, symbol: &str) -> String {
    let body = json!({
        "symbol": full_symbol(exchange, symbol),
        "adjustment": "splits",
        "session": "regular",
    });
    format!("={body}")
}

/// The 42 fields requested for every quote session, in the order the
/// server expects them in `quote_set_fields`.
pub const QUOTE_FIELDS: &[&str] = &[
    "lp", "ch", "chp", "bid", "ask", "bid_size", "ask_size", "volume", "open_price",
    "high_price", "low_price", "prev_close_price", "market_cap_basic", "price_earnings_ttm",
    "earnings_per_share_basic_ttm", "dividends_yield", "beta_1_year", "high_52_week",
    "low_52_week", "description", "type", "exchange", "currency_code", "lp_time",
    "current_session", "status", "original_name", "short_name", "open_time", "close_time",
    "timezone", "regular_market_price", "regular_market_change", "regular_market_change_percent",
    "pre_market_price", "pre_market_change", "after_hours_price", "after_hours_change",
    "pricescale", "minmov", "minmove2", "fractional", "value_unit_id",
];

/// Maps a user-facing interval token to its wire representation. Returns
/// `None` for any token outside the closed set the server accepts.
pub fn wire_interval(token: &str) -> Option<&'static str> {
    Some(match token {
        "1m" => "1",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "1d" => "1D",
        "1wk" | "1w" => "1W",
        "1mo" | "1M" => "1M",
        _ => return None,
    })
}

/// Maps a standard indicator short name (already uppercased) to its wire
/// pine id. Returns `None` if the name isn't one of the known standard
/// indicators.
pub fn standard_indicator_id(short_name: &str) -> Option<&'static str> {
    Some(match short_name {
        "RSI" => "STD;RSI",
        "MACD" => "STD;MACD",
        "BB" | "BOLLINGER" => "STD;BB",
        "EMA" => "STD;EMA",
        "SMA" => "STD;SMA",
        "STOCHASTIC" | "STOCH" => "STD;Stochastic",
        "ATR" => "STD;ATR",
        "ADX" => "STD;ADX",
        "OBV" => "STD;OBV",
        "VWAP" => "STD;VWAP",
        "ICHIMOKU" => "STD;Ichimoku%Cloud",
        "SUPERTREND" => "STD;Supertrend",
        "PSAR" => "STD;Parabolic%SAR",
        "CCI" => "STD;CCI",
        "MFI" => "STD;MFI",
        "ROC" => "STD;ROC",
        "WILLIAMS" => "STD;Williams%25R",
        "CMF" => "STD;CMF",
        "VOLUME" => "STD;Volume",
        _ => return None,
    })
}

/// True if `pine_id` is exactly one of the wire ids [`standard_indicator_id`]
/// can produce. A syntactically `STD;`-prefixed id that isn't one of these
/// (e.g. a newer indicator this table doesn't know about yet) still needs a
/// metadata fetch, so this is a membership test, not a prefix check.
pub fn is_standard_pine_id(pine_id: &str) -> bool {
    const KNOWN: &[&str] = &[
        "STD;RSI", "STD;MACD", "STD;BB", "STD;EMA", "STD;SMA", "STD;Stochastic", "STD;ATR",
        "STD;ADX", "STD;OBV", "STD;VWAP", "STD;Ichimoku%Cloud", "STD;Supertrend",
        "STD;Parabolic%SAR", "STD;CCI", "STD;MFI", "STD;ROC", "STD;Williams%25R", "STD;CMF",
        "STD;Volume",
    ];
    KNOWN.contains(&pine_id)
}

/// Resolves a user-supplied indicator name to its wire pine id and a
/// display name to key the study under. Order of precedence: a known
/// short name (case-insensitive) maps through the standard table; an
/// already-qualified id (containing `;`) is accepted verbatim, with the
/// display name taken from the part after `;`; anything else is assumed
/// to be an unqualified standard indicator name and gets the `STD;`
/// prefix prepended as-is.
pub fn normalize_indicator(indicator: &str) -> (String, String) {
    let upper = indicator.to_uppercase();
    if let Some(pine_id) = standard_indicator_id(&upper) {
        return (pine_id.to_string(), upper);
    }
    if let Some((_, suffix)) = indicator.split_once(';') {
        return (indicator.to_string(), suffix.to_string());
    }
    (format!("STD;{indicator}"), indicator.to_string())
}

/// The known output-plot mapping for a standard indicator's wire id, used
/// when the metadata provider didn't already supply one. Indicators not
/// listed here default to a single `value` output at evaluation time.
pub fn known_output_mapping(pine_id: &str) -> Option<&'static [(&'static str, &'static str)]> {
    Some(match pine_id {
        "STD;MACD" => &[("plot_0", "macd"), ("plot_1", "signal"), ("plot_2", "histogram")],
        "STD;BB" => &[("plot_0", "middle"), ("plot_1", "upper"), ("plot_2", "lower")],
        "STD;Stochastic" => &[("plot_0", "k"), ("plot_1", "d")],
        "STD;ADX" => &[("plot_0", "adx"), ("plot_1", "plus_di"), ("plot_2", "minus_di")],
        _ => return None,
    })
}

/// Builds the `{"m": method, "p": params}` envelope every outbound message
/// shares.
pub fn envelope(method_name: &str, params: Vec<Value>) -> Value {
    json!({ "m": method_name, "p": params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_intervals_outside_the_closed_set() {
        assert_eq!(wire_interval("1m"), Some("1"));
        assert_eq!(wire_interval("1wk"), Some("1W"));
        assert_eq!(wire_interval("1w"), Some("1W"));
        assert_eq!(wire_interval("3m"), None);
    }

    #[test]
    fn quote_fields_has_exactly_42_entries() {
        assert_eq!(QUOTE_FIELDS.len(), 42);
    }

    #[test]
    fn standard_indicator_short_names_resolve_to_std_prefixed_ids() {
        assert_eq!(standard_indicator_id("RSI"), Some("STD;RSI"));
        assert_eq!(standard_indicator_id("BOLLINGER"), Some("STD;BB"));
        assert_eq!(standard_indicator_id("NOPE"), None);
    }

    #[test]
    fn envelope_shape_matches_the_wire_schema() {
        let env = envelope("quote_add_symbols", vec![json!("qs_1"), json!("BIST:THYAO")]);
        assert_eq!(env, json!({"m": "quote_add_symbols", "p": ["qs_1", "BIST:THYAO"]}));
    }

    #[test]
    fn normalize_indicator_maps_known_short_names_case_insensitively() {
        assert_eq!(normalize_indicator("rsi"), ("STD;RSI".to_string(), "RSI".to_string()));
        assert_eq!(normalize_indicator("Bollinger"), ("STD;BB".to_string(), "BOLLINGER".to_string()));
    }

    #[test]
    fn normalize_indicator_accepts_qualified_ids_verbatim() {
        let (pine_id, display_name) = normalize_indicator("USER;abc123");
        assert_eq!(pine_id, "USER;abc123");
        assert_eq!(display_name, "abc123");
    }

    #[test]
    fn normalize_indicator_prepends_std_prefix_for_unknown_unqualified_names() {
        let (pine_id, display_name) = normalize_indicator("SuperDuperMA");
        assert_eq!(pine_id, "STD;SuperDuperMA");
        assert_eq!(display_name, "SuperDuperMA");
    }

    #[test]
    fn is_standard_pine_id_rejects_unrecognized_std_prefixed_ids() {
        assert!(is_standard_pine_id("STD;RSI"));
        assert!(!is_standard_pine_id("STD;SomeNewIndicator"));
    }

    #[test]
    fn full_symbol_joins_exchange_and_symbol_with_a_colon() {
        assert_eq!(full_symbol("BIST", "THYAO"), "BIST:THYAO");
    }

    #[test]
    fn symbol_resolve_config_is_an_equals_prefixed_json_object() {
        let config = symbol_resolve_config("BIST", "THYAO");
        assert!(config.starts_with('='));
        let parsed: Value = serde_json::from_str(&config[1..]).unwrap();
        assert_eq!(parsed["symbol"], "BIST:THYAO");
        assert_eq!(parsed["adjustment"], "splits");
    }
}
