//! Splits a condition string into tokens: identifiers (quote fields and
//! indicator names, e.g. `rsi_14`, `close`), numeric literals (with
//! optional `K`/`M`/`B` suffix), comparison operators, boolean keywords,
//! crossover keywords, the `was` lookback keyword, time keywords, and
//! parentheses.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    Number(f64),
    /// A bracketed offset attached to the identifier immediately before
    /// it in the stream, e.g. the `[2]` in `rsi[2]`.
    Offset(usize),
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    And,
    Or,
    /// Introduces a lookback condition: `operand was <op> operand
    /// <time-keyword>`.
    Was,
    CrossesAbove,
    CrossesBelow,
    /// Bare `crosses`, the disjunction of `crosses_above`/`crosses_below`.
    Crosses,
    /// A time keyword already resolved to a bar offset: `yesterday` and
    /// `1_day_ago` both resolve to `1`, `1_week_ago` to `5` (five trading
    /// days). Only meaningful as the tail of a `was` lookback condition.
    Lookback(usize),
    LParen,
    RParen,
}

/// Maps a lookback keyword to its bar offset. Matches the original
/// client's table exactly, including `1_week_ago` meaning five trading
/// days rather than seven calendar days.
fn lookback_offset(word: &str) -> Option<usize> {
    match word {
        "yesterday" => Some(1),
        "1_day_ago" => Some(1),
        "2_days_ago" => Some(2),
        "3_days_ago" => Some(3),
        "4_days_ago" => Some(4),
        "5_days_ago" => Some(5),
        "1_week_ago" => Some(5),
        _ => None,
    }
}

/// Parses a numeric literal with an optional trailing `K`/`M`/`B` suffix
/// (case-insensitive), e.g. `10K` -> `10000.0`.
fn parse_number(word: &str) -> Option<f64> {
    let (digits, multiplier) = match word.chars().last() {
        Some(c @ ('K' | 'k')) => (&word[..word.len() - c.len_utf8()], 1_000.0),
        Some(c @ ('M' | 'm')) => (&word[..word.len() - c.len_utf8()], 1_000_000.0),
        Some(c @ ('B' | 'b')) => (&word[..word.len() - c.len_utf8()], 1_000_000_000.0),
        _ => (word, 1.0),
    };
    digits.parse::<f64>().ok().map(|n| n * multiplier)
}

fn split_words(source: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in source.chars() {
        match ch {
            '(' | ')' => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                words.push(ch.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, Error> {
    let words = split_words(source);
    let mut tokens = Vec::with_capacity(words.len());

    for word in words {
        match word.as_str() {
            "(" => tokens.push(Token::LParen),
            ")" => tokens.push(Token::RParen),
            ">" => tokens.push(Token::Gt),
            ">=" => tokens.push(Token::Gte),
            "<" => tokens.push(Token::Lt),
            "<=" => tokens.push(Token::Lte),
            "==" | "=" => tokens.push(Token::Eq),
            "!=" | "<>" => tokens.push(Token::Neq),
            "and" | "AND" | "&&" => tokens.push(Token::And),
            "or" | "OR" | "||" => tokens.push(Token::Or),
            "was" | "WAS" => tokens.push(Token::Was),
            "crosses" => tokens.push(Token::Crosses),
            "crosses_above" => tokens.push(Token::CrossesAbove),
            "crosses_below" => tokens.push(Token::CrossesBelow),
            other => {
                if let Some((name, offset)) = bracket_offset(other) {
                    tokens.push(Token::Identifier(name));
                    tokens.push(Token::Offset(offset));
                } else if let Some(offset) = lookback_offset(other) {
                    tokens.push(Token::Lookback(offset));
                } else if let Some(n) = parse_number(other) {
                    tokens.push(Token::Number(n));
                } else if is_identifier(other) {
                    tokens.push(Token::Identifier(other.to_string()));
                } else {
                    return Err(Error::ParseError(format!("unrecognized token `{other}`")));
                }
            }
        }
    }

    Ok(tokens)
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn offset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\[(\d+)\]$").unwrap())
}

/// Splits a `name[N]` word into its field name and non-negative bar
/// offset, e.g. `"rsi[2]"` -> `("rsi", 2)`.
fn bracket_offset(word: &str) -> Option<(String, usize)> {
    let caps = offset_pattern().captures(word)?;
    let name = caps.get(1)?.as_str().to_string();
    let offset = caps.get(2)?.as_str().parse().ok()?;
    Some((name, offset))
}
