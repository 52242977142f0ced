//! Abstract syntax for the condition DSL: a small boolean expression
//! language over quote fields and indicator outputs, with crossover and
//! lookback support.

/// One side of a comparison or crossover.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A bare numeric literal, already normalized for `K`/`M`/`B` suffixes.
    Literal(f64),
    /// A named series (a quote field or an indicator output) sampled
    /// `offset` bars back from the most recent one. `offset == 0` means
    /// the current value.
    Field { name: String, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossDirection {
    Above,
    Below,
    /// Bare `crosses`: true for a transition in either direction.
    Either,
}

/// A condition expression. Evaluation never raises: a missing or NaN
/// operand makes the smallest enclosing comparison/crossover/lookback
/// `false` rather than aborting the whole expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison { left: Operand, op: CompareOp, right: Operand },
    /// True on the bar where `left` transitions from not-above (or
    /// not-below) `right` to above (or below) it; false on every other
    /// bar, including ones where it was already on that side.
    Crossover { left: Operand, right: Operand, direction: CrossDirection },
    /// `left was <op> right <time-keyword>`: compares `left` sampled
    /// `lookback_days` bars further back than its own offset against
    /// `right` sampled at `right`'s own offset.
    Lookback { left: Operand, op: CompareOp, right: Operand, lookback_days: usize },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Operand {
    pub fn field(name: impl Into<String>, offset: usize) -> Self {
        Operand::Field { name: name.into(), offset }
    }
}
