//! A small SQL-flavored predicate language.
//!
//! Only what is needed to validate user expressions up front and to evaluate them against
//! in-memory features: comparisons, `IN` lists, `IS NULL`, `LIKE` and boolean connectives.

use std::fmt;

use serde_json::Value;

mod eval;
mod lexer;
mod parser;

#[cfg(test)]
mod tests;

pub use eval::FieldSource;
pub use parser::{PredicateParseError, parse};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Literal {
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Literal::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Number(n) => write!(f, "{n}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(String),
    Literal(Literal),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(name) => write!(f, "\"{}\"", name.replace('"', "\"\"")),
            Operand::Literal(literal) => write!(f, "{literal}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    Compare(Operand, CompareOp, Operand),
    In {
        operand: Operand,
        list: Vec<Literal>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Like {
        operand: Operand,
        pattern: String,
        negated: bool,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Every field name referenced by the predicate, in order of first appearance.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Const(_) => {}
            Predicate::Compare(l, _, r) => {
                push_field(out, l);
                push_field(out, r);
            }
            Predicate::In { operand, .. }
            | Predicate::IsNull { operand, .. }
            | Predicate::Like { operand, .. } => push_field(out, operand),
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
        }
    }
}

fn push_field<'a>(out: &mut Vec<&'a str>, operand: &'a Operand) {
    if let Operand::Field(name) = operand
        && !out.contains(&name.as_str())
    {
        out.push(name.as_str());
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Const(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Predicate::Compare(l, op, r) => write!(f, "{l} {} {r}", op.as_str()),
            Predicate::In {
                operand,
                list,
                negated,
            } => {
                let items: Vec<String> = list.iter().map(ToString::to_string).collect();
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{operand} {not}IN ({})", items.join(", "))
            }
            Predicate::IsNull { operand, negated } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{operand} IS {not}NULL")
            }
            Predicate::Like {
                operand,
                pattern,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{operand} {not}LIKE {}", Literal::String(pattern.clone()))
            }
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
            Predicate::And(l, r) => write!(f, "({l}) AND ({r})"),
            Predicate::Or(l, r) => write!(f, "({l}) OR ({r})"),
        }
    }
}
