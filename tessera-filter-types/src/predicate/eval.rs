use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::{CompareOp, Literal, Operand, Predicate};

/// Where an evaluated predicate reads its field values from.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<Value>;
}

impl FieldSource for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

fn resolve(operand: &Operand, source: &dyn FieldSource) -> Value {
    match operand {
        Operand::Field(name) => source.field(name).unwrap_or(Value::Null),
        Operand::Literal(literal) => literal.to_json(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// `None` when either side is NULL or the values are not comparable, which makes every
/// comparison false (SQL's unknown collapsed to false).
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (l, r) => as_number(l)?.partial_cmp(&as_number(r)?),
    }
}

/// SQL `LIKE` with `%` and `_` wildcards.
fn like(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut v, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == value[v]) {
            v += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, v));
            p += 1;
        } else if let Some((bp, bv)) = backtrack {
            p = bp + 1;
            v = bv + 1;
            backtrack = Some((bp, bv + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl Predicate {
    pub fn evaluate(&self, source: &dyn FieldSource) -> bool {
        match self {
            Predicate::Const(b) => *b,
            Predicate::Compare(l, op, r) => {
                let Some(ordering) = compare(&resolve(l, source), &resolve(r, source)) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Lte => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::Gte => ordering != Ordering::Less,
                }
            }
            Predicate::In {
                operand,
                list,
                negated,
            } => {
                let value = resolve(operand, source);
                if value.is_null() {
                    return false;
                }
                let found = list
                    .iter()
                    .filter(|literal| **literal != Literal::Null)
                    .any(|literal| compare(&value, &literal.to_json()) == Some(Ordering::Equal));
                found != *negated
            }
            Predicate::IsNull { operand, negated } => resolve(operand, source).is_null() != *negated,
            Predicate::Like {
                operand,
                pattern,
                negated,
            } => match value_to_text(&resolve(operand, source)) {
                Some(text) => like(&text, pattern) != *negated,
                None => false,
            },
            Predicate::Not(inner) => !inner.evaluate(source),
            Predicate::And(l, r) => l.evaluate(source) && r.evaluate(source),
            Predicate::Or(l, r) => l.evaluate(source) || r.evaluate(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::like;

    #[test_case("hello", "h%", true)]
    #[test_case("hello", "%llo", true)]
    #[test_case("hello", "h_llo", true)]
    #[test_case("hello", "%x%", false)]
    #[test_case("hello", "%", true)]
    #[test_case("", "%", true)]
    #[test_case("abc", "a%c%", true)]
    #[test_case("abc", "ab", false)]
    fn like_patterns(value: &str, pattern: &str, expected: bool) {
        assert_eq!(like(value, pattern), expected);
    }
}
