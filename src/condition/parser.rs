//! Recursive-descent parser: `or_expr := and_expr ('or' and_expr)*`,
//! `and_expr := primary ('and' primary)*`, `primary := '(' or_expr ')' |
//! comparison | crossover | lookback`. `or` binds loosest, `and` binds
//! tighter, and parentheses override both — the same precedence as the
//! original client's parser. A lookback condition is distinguished from
//! a comparison by the `was` keyword following the left operand:
//! `operand was <op> operand <time-keyword>`.

use std::iter::Peekable;
use std::vec::IntoIter;

use super::ast::{CompareOp, Condition, CrossDirection, Operand};
use super::tokenizer::{tokenize, Token};
use crate::errors::Error;

pub fn parse(source: &str) -> Result<Condition, Error> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(Error::ParseError("empty condition".into()));
    }
    let mut stream = tokens.into_iter().peekable();
    let condition = parse_or(&mut stream)?;
    if let Some(leftover) = stream.next() {
        return Err(Error::ParseError(format!("unexpected trailing token {leftover:?}")));
    }
    Ok(condition)
}

type Tokens = Peekable<IntoIter<Token>>;

fn parse_or(tokens: &mut Tokens) -> Result<Condition, Error> {
    let mut left = parse_and(tokens)?;
    while matches!(tokens.peek(), Some(Token::Or)) {
        tokens.next();
        let right = parse_and(tokens)?;
        left = Condition::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and(tokens: &mut Tokens) -> Result<Condition, Error> {
    let mut left = parse_primary(tokens)?;
    while matches!(tokens.peek(), Some(Token::And)) {
        tokens.next();
        let right = parse_primary(tokens)?;
        left = Condition::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_primary(tokens: &mut Tokens) -> Result<Condition, Error> {
    if matches!(tokens.peek(), Some(Token::LParen)) {
        tokens.next();
        let inner = parse_or(tokens)?;
        match tokens.next() {
            Some(Token::RParen) => return Ok(inner),
            other => return Err(Error::ParseError(format!("expected `)`, found {other:?}"))),
        }
    }
    parse_comparison_or_crossover(tokens)
}

fn parse_comparison_or_crossover(tokens: &mut Tokens) -> Result<Condition, Error> {
    let left = parse_operand(tokens)?;

    if matches!(tokens.peek(), Some(Token::Was)) {
        tokens.next();
        return parse_lookback(tokens, left);
    }

    match tokens.next() {
        Some(Token::Gt) => Ok(Condition::Comparison { left, op: CompareOp::Gt, right: parse_operand(tokens)? }),
        Some(Token::Gte) => Ok(Condition::Comparison { left, op: CompareOp::Gte, right: parse_operand(tokens)? }),
        Some(Token::Lt) => Ok(Condition::Comparison { left, op: CompareOp::Lt, right: parse_operand(tokens)? }),
        Some(Token::Lte) => Ok(Condition::Comparison { left, op: CompareOp::Lte, right: parse_operand(tokens)? }),
        Some(Token::Eq) => Ok(Condition::Comparison { left, op: CompareOp::Eq, right: parse_operand(tokens)? }),
        Some(Token::Neq) => Ok(Condition::Comparison { left, op: CompareOp::Neq, right: parse_operand(tokens)? }),
        Some(Token::CrossesAbove) => {
            Ok(Condition::Crossover { left, right: parse_operand(tokens)?, direction: CrossDirection::Above })
        }
        Some(Token::CrossesBelow) => {
            Ok(Condition::Crossover { left, right: parse_operand(tokens)?, direction: CrossDirection::Below })
        }
        Some(Token::Crosses) => {
            Ok(Condition::Crossover { left, right: parse_operand(tokens)?, direction: CrossDirection::Either })
        }
        other => Err(Error::ParseError(format!("expected a comparison or crossover operator, found {other:?}"))),
    }
}

/// Parses the tail of a lookback condition after `operand was` has
/// already been consumed: `<op> operand <time-keyword>`.
fn parse_lookback(tokens: &mut Tokens, left: Operand) -> Result<Condition, Error> {
    let op = match tokens.next() {
        Some(Token::Gt) => CompareOp::Gt,
        Some(Token::Gte) => CompareOp::Gte,
        Some(Token::Lt) => CompareOp::Lt,
        Some(Token::Lte) => CompareOp::Lte,
        Some(Token::Eq) => CompareOp::Eq,
        Some(Token::Neq) => CompareOp::Neq,
        other => return Err(Error::ParseError(format!("expected a comparison operator after `was`, found {other:?}"))),
    };
    let right = parse_operand(tokens)?;
    let lookback_days = match tokens.next() {
        Some(Token::Lookback(days)) => days,
        other => {
            return Err(Error::ParseError(format!(
                "expected a time keyword (yesterday, N_days_ago, ...), found {other:?}"
            )))
        }
    };
    Ok(Condition::Lookback { left, op, right, lookback_days })
}

fn parse_operand(tokens: &mut Tokens) -> Result<Operand, Error> {
    match tokens.next() {
        Some(Token::Number(n)) => Ok(Operand::Literal(n)),
        Some(Token::Identifier(name)) => {
            let offset = if let Some(Token::Offset(n)) = tokens.peek() {
                let n = *n;
                tokens.next();
                n
            } else {
                0
            };
            Ok(Operand::field(name, offset))
        }
        other => Err(Error::ParseError(format!("expected a value or field name, found {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_comparison() {
        let condition = parse("close > 100").unwrap();
        assert_eq!(
            condition,
            Condition::Comparison {
                left: Operand::field("close", 0),
                op: CompareOp::Gt,
                right: Operand::Literal(100.0),
            }
        );
    }

    #[test]
    fn or_binds_looser_than_and() {
        let condition = parse("close > 100 and volume > 1M or rsi_14 < 30").unwrap();
        match condition {
            Condition::Or(left, right) => {
                assert!(matches!(*left, Condition::And(_, _)));
                assert!(matches!(*right, Condition::Comparison { .. }));
            }
            other => panic!("expected top-level Or, got {other:?}"),
        }
    }

    #[test]
    fn parentheses_override_precedence() {
        let condition = parse("close > 100 and (volume > 1M or rsi_14 < 30)").unwrap();
        match condition {
            Condition::And(_, right) => assert!(matches!(*right, Condition::Or(_, _))),
            other => panic!("expected top-level And, got {other:?}"),
        }
    }

    #[test]
    fn parses_crossovers_with_a_bracket_offset_operand() {
        let condition = parse("close crosses_above sma_20[1]").unwrap();
        match condition {
            Condition::Crossover { left, right, direction } => {
                assert_eq!(left, Operand::field("close", 0));
                assert_eq!(right, Operand::field("sma_20", 1));
                assert_eq!(direction, CrossDirection::Above);
            }
            other => panic!("expected Crossover, got {other:?}"),
        }
    }

    #[test]
    fn parses_bare_crosses_as_either_direction() {
        let condition = parse("sma_20 crosses sma_50").unwrap();
        assert!(matches!(condition, Condition::Crossover { direction: CrossDirection::Either, .. }));
    }

    #[test]
    fn parses_a_lookback_condition() {
        let condition = parse("close was < 100 yesterday").unwrap();
        assert_eq!(
            condition,
            Condition::Lookback {
                left: Operand::field("close", 0),
                op: CompareOp::Lt,
                right: Operand::Literal(100.0),
                lookback_days: 1,
            }
        );
    }

    #[test]
    fn lookback_rejects_a_missing_time_keyword() {
        assert!(parse("close was < 100").is_err());
    }

    #[test]
    fn parses_a_bracket_offset_operand() {
        let condition = parse("rsi[2] > 30").unwrap();
        assert_eq!(
            condition,
            Condition::Comparison {
                left: Operand::field("rsi", 2),
                op: CompareOp::Gt,
                right: Operand::Literal(30.0),
            }
        );
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("close > 100 100").is_err());
    }

    #[test]
    fn rejects_an_empty_condition() {
        assert!(parse("").is_err());
    }
}
