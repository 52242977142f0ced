//! Evaluation, plus the two pre-flight queries a caller runs before
//! evaluating a condition for the first time: `required_indicators` (what
//! to subscribe before this condition can ever be true) and
//! `required_lookback` (how many bars of history it needs).

use std::collections::{HashMap, VecDeque};

use super::ast::{CompareOp, Condition, CrossDirection, Operand};

/// A per-condition-set rolling history of named series, keyed the same
/// way fields are named in the DSL (quote fields and indicator outputs
/// alike). `offset == 0` is the most recent sample.
#[derive(Debug, Default)]
pub struct SeriesHistory {
    series: HashMap<String, VecDeque<f64>>,
    capacity: usize,
}

impl SeriesHistory {
    pub fn new(capacity: usize) -> Self {
        Self { series: HashMap::new(), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, name: &str, value: f64) {
        let buffer = self.series.entry(name.to_string()).or_default();
        buffer.push_back(value);
        if buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    pub fn get(&self, name: &str, offset: usize) -> Option<f64> {
        let buffer = self.series.get(name)?;
        let index = buffer.len().checked_sub(1)?.checked_sub(offset)?;
        buffer.get(index).copied()
    }
}

/// One indicator a condition depends on, with the period parsed out of
/// the field name when the indicator takes one (e.g. `rsi_14` -> period
/// `14`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredIndicator {
    pub short_name: String,
    pub period: Option<u32>,
}

/// Recognizes the fixed set of indicator-derived field name shapes the
/// original client supports. Fields outside this set are assumed to be
/// plain quote fields (`close`, `volume`, ...) and need no indicator
/// subscription.
fn classify_field(name: &str) -> Option<RequiredIndicator> {
    let with_period = |prefix: &str, indicator: &str| {
        name.strip_prefix(prefix)
            .and_then(|rest| rest.parse::<u32>().ok())
            .map(|period| RequiredIndicator { short_name: indicator.to_string(), period: Some(period) })
    };

    if let Some(req) = with_period("rsi_", "RSI") {
        return Some(req);
    }
    if let Some(req) = with_period("sma_", "SMA") {
        return Some(req);
    }
    if let Some(req) = with_period("ema_", "EMA") {
        return Some(req);
    }
    if let Some(req) = with_period("adx_", "ADX") {
        return Some(req);
    }
    if let Some(req) = with_period("atr_", "ATR") {
        return Some(req);
    }
    // Bare names with no `_N` suffix still carry a period: default 14 for
    // every family except Bollinger Bands, which defaults to 20.
    match name {
        "rsi" => Some(RequiredIndicator { short_name: "RSI".to_string(), period: Some(14) }),
        "bb_upper" | "bb_middle" | "bb_lower" => {
            Some(RequiredIndicator { short_name: "BB".to_string(), period: Some(20) })
        }
        "macd" | "signal" | "histogram" => {
            Some(RequiredIndicator { short_name: "MACD".to_string(), period: Some(14) })
        }
        "adx" | "plus_di" | "minus_di" => {
            Some(RequiredIndicator { short_name: "ADX".to_string(), period: Some(14) })
        }
        "stoch_k" | "stoch_d" => Some(RequiredIndicator { short_name: "STOCHASTIC".to_string(), period: Some(14) }),
        "atr" => Some(RequiredIndicator { short_name: "ATR".to_string(), period: Some(14) }),
        "obv" => Some(RequiredIndicator { short_name: "OBV".to_string(), period: Some(14) }),
        "vwap" => Some(RequiredIndicator { short_name: "VWAP".to_string(), period: Some(14) }),
        _ => None,
    }
}

fn operands<'a>(condition: &'a Condition, out: &mut Vec<&'a Operand>) {
    match condition {
        Condition::Comparison { left, right, .. }
        | Condition::Crossover { left, right, .. }
        | Condition::Lookback { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        Condition::And(left, right) | Condition::Or(left, right) => {
            operands(left, out);
            operands(right, out);
        }
    }
}

/// Every indicator this condition references, deduplicated by
/// `(short_name, period)`.
pub fn required_indicators(condition: &Condition) -> Vec<RequiredIndicator> {
    let mut raw = Vec::new();
    operands(condition, &mut raw);
    let mut seen = Vec::new();
    for operand in raw {
        if let Operand::Field { name, .. } = operand {
            if let Some(req) = classify_field(name) {
                if !seen.contains(&req) {
                    seen.push(req);
                }
            }
        }
    }
    seen
}

fn operand_offset(operand: &Operand) -> usize {
    match operand {
        Operand::Field { offset, .. } => *offset,
        Operand::Literal(_) => 0,
    }
}

/// The largest lookback offset this condition references, i.e. the
/// minimum number of historical bars that must be buffered before it can
/// be evaluated meaningfully.
pub fn required_lookback(condition: &Condition) -> usize {
    match condition {
        Condition::Comparison { left, right, .. } => operand_offset(left).max(operand_offset(right)),
        // a crossover always looks one bar back even with no explicit
        // bracket offset, to compare against the prior bar.
        Condition::Crossover { left, right, .. } => operand_offset(left).max(operand_offset(right)).max(1),
        // `left`'s own bracket offset (if any) compounds with the
        // lookback keyword's offset; `right` is read at its own offset,
        // unaffected by the keyword.
        Condition::Lookback { left, right, lookback_days, .. } => {
            (operand_offset(left) + lookback_days).max(operand_offset(right))
        }
        Condition::And(left, right) | Condition::Or(left, right) => {
            required_lookback(left).max(required_lookback(right))
        }
    }
}

fn resolve(operand: &Operand, history: &SeriesHistory) -> Option<f64> {
    match operand {
        Operand::Literal(n) => Some(*n),
        Operand::Field { name, offset } => history.get(name, *offset).filter(|v| v.is_finite()),
    }
}

fn compare(op: CompareOp, left: f64, right: f64) -> bool {
    match op {
        CompareOp::Gt => left > right,
        CompareOp::Gte => left >= right,
        CompareOp::Lt => left < right,
        CompareOp::Lte => left <= right,
        CompareOp::Eq => (left - right).abs() < f64::EPSILON,
        CompareOp::Neq => (left - right).abs() >= f64::EPSILON,
    }
}

/// Crossover index math: the current bar is the most recent sample
/// (offset 0) and the previous bar is offset 1, regardless of any
/// explicit lookback the operand also carries.
fn check_crossover(left: &Operand, right: &Operand, direction: CrossDirection, history: &SeriesHistory) -> bool {
    let curr_left = resolve(left, history);
    let curr_right = resolve(right, history);
    let prev_left = resolve(&shift(left, 1), history);
    let prev_right = resolve(&shift(right, 1), history);

    let (Some(cl), Some(cr), Some(pl), Some(pr)) = (curr_left, curr_right, prev_left, prev_right) else {
        return false;
    };

    let prev_diff = pl - pr;
    let curr_diff = cl - cr;
    match direction {
        CrossDirection::Above => prev_diff <= 0.0 && curr_diff > 0.0,
        CrossDirection::Below => prev_diff >= 0.0 && curr_diff < 0.0,
        CrossDirection::Either => {
            (prev_diff <= 0.0 && curr_diff > 0.0) || (prev_diff >= 0.0 && curr_diff < 0.0)
        }
    }
}

fn shift(operand: &Operand, by: usize) -> Operand {
    match operand {
        Operand::Literal(n) => Operand::Literal(*n),
        Operand::Field { name, offset } => Operand::Field { name: name.clone(), offset: offset + by },
    }
}

/// Evaluates a condition against the given series history. Never panics:
/// any missing field, out-of-range lookback, or NaN sample makes the
/// smallest enclosing comparison/crossover/lookback `false`.
pub fn evaluate(condition: &Condition, history: &SeriesHistory) -> bool {
    match condition {
        Condition::Comparison { left, op, right } => match (resolve(left, history), resolve(right, history)) {
            (Some(l), Some(r)) => compare(*op, l, r),
            _ => false,
        },
        Condition::Crossover { left, right, direction } => check_crossover(left, right, *direction, history),
        Condition::Lookback { left, op, right, lookback_days } => {
            match (resolve(&shift(left, *lookback_days), history), resolve(right, history)) {
                (Some(l), Some(r)) => compare(*op, l, r),
                _ => false,
            }
        }
        Condition::And(left, right) => evaluate(left, history) && evaluate(right, history),
        Condition::Or(left, right) => evaluate(left, history) || evaluate(right, history),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::parser::parse;

    fn history_with(pairs: &[(&str, &[f64])]) -> SeriesHistory {
        let mut history = SeriesHistory::new(10);
        for (name, values) in pairs {
            for v in *values {
                history.push(name, *v);
            }
        }
        history
    }

    #[test]
    fn simple_comparison_evaluates_true() {
        let condition = parse("close > 100").unwrap();
        let history = history_with(&[("close", &[150.0])]);
        assert!(evaluate(&condition, &history));
    }

    #[test]
    fn missing_field_evaluates_false_not_panic() {
        let condition = parse("rsi_14 > 70").unwrap();
        let history = SeriesHistory::new(10);
        assert!(!evaluate(&condition, &history));
    }

    #[test]
    fn crossover_above_fires_only_on_the_transition_bar() {
        let condition = parse("close crosses_above sma_20").unwrap();
        let history = history_with(&[("close", &[9.0, 11.0]), ("sma_20", &[10.0, 10.0])]);
        assert!(evaluate(&condition, &history));

        let not_crossing = history_with(&[("close", &[11.0, 12.0]), ("sma_20", &[10.0, 10.0])]);
        assert!(!evaluate(&condition, &not_crossing));
    }

    #[test]
    fn required_indicators_parses_the_period_out_of_the_field_name() {
        let condition = parse("rsi_14 > 70 and sma_20 < close").unwrap();
        let required = required_indicators(&condition);
        assert!(required.contains(&RequiredIndicator { short_name: "RSI".to_string(), period: Some(14) }));
        assert!(required.contains(&RequiredIndicator { short_name: "SMA".to_string(), period: Some(20) }));
    }

    #[test]
    fn required_indicators_defaults_a_bare_rsi_to_period_fourteen() {
        let condition = parse("rsi < 30 and volume > 1M").unwrap();
        let required = required_indicators(&condition);
        assert_eq!(required, vec![RequiredIndicator { short_name: "RSI".to_string(), period: Some(14) }]);
    }

    #[test]
    fn rsi_condition_evaluates_against_current_values() {
        let condition = parse("rsi < 30 and volume > 1M").unwrap();
        let matching = history_with(&[("rsi", &[28.5]), ("volume", &[1_500_000.0])]);
        assert!(evaluate(&condition, &matching));

        let not_matching = history_with(&[("rsi", &[28.5]), ("volume", &[500_000.0])]);
        assert!(!evaluate(&condition, &not_matching));
    }

    #[test]
    fn required_lookback_reflects_the_deepest_bracket_offset() {
        let condition = parse("close[2] > close[5]").unwrap();
        assert_eq!(required_lookback(&condition), 5);
    }

    #[test]
    fn a_crossover_needs_at_least_one_bar_of_lookback_even_without_a_keyword() {
        let condition = parse("close crosses_above sma_20").unwrap();
        assert_eq!(required_lookback(&condition), 1);
    }

    #[test]
    fn bare_crosses_fires_on_either_transition() {
        let condition = parse("sma_20 crosses sma_50").unwrap();
        let crossing_up = history_with(&[("sma_20", &[279.0, 281.0]), ("sma_50", &[280.0, 280.0])]);
        assert!(evaluate(&condition, &crossing_up));
        let crossing_down = history_with(&[("sma_20", &[281.0, 279.0]), ("sma_50", &[280.0, 280.0])]);
        assert!(evaluate(&condition, &crossing_down));
        let not_crossing = history_with(&[("sma_20", &[281.0, 282.0]), ("sma_50", &[280.0, 280.0])]);
        assert!(!evaluate(&condition, &not_crossing));
    }

    #[test]
    fn lookback_condition_compares_a_past_bar_against_the_present() {
        let condition = parse("close was < 100 yesterday").unwrap();
        let history = history_with(&[("close", &[90.0, 150.0])]);
        assert!(evaluate(&condition, &history));

        let not_matching = history_with(&[("close", &[150.0, 90.0])]);
        assert!(!evaluate(&condition, &not_matching));
    }

    #[test]
    fn lookback_condition_evaluates_false_with_insufficient_history() {
        let condition = parse("close was < 100 yesterday").unwrap();
        let history = history_with(&[("close", &[90.0])]);
        assert!(!evaluate(&condition, &history));
    }

    #[test]
    fn bracket_offset_field_with_no_history_evaluates_false_not_panic() {
        let condition = parse("rsi[0] > 30").unwrap();
        let history = SeriesHistory::new(10);
        assert!(!evaluate(&condition, &history));
    }
}
