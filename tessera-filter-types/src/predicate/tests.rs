use serde_json::{Map, Value, json};
use test_case::test_case;

use super::{CompareOp, Literal, Operand, Predicate, parse};

fn attrs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn eval(predicate: &str, value: Value) -> bool {
    parse(predicate)
        .unwrap_or_else(|e| panic!("failed to parse {predicate:?}: {e}"))
        .evaluate(&attrs(value))
}

#[test]
fn parse_simple_comparison() {
    assert_eq!(
        parse("status = 'active'").unwrap(),
        Predicate::Compare(
            Operand::Field("status".to_string()),
            CompareOp::Eq,
            Operand::Literal(Literal::String("active".to_string())),
        )
    );
}

#[test]
fn and_binds_tighter_than_or() {
    let predicate = parse("a = 1 OR b = 2 AND c = 3").unwrap();
    let Predicate::Or(_, right) = predicate else {
        panic!("expected OR at the root");
    };
    assert!(matches!(*right, Predicate::And(..)));
}

#[test]
fn quoted_identifiers_and_escaped_strings() {
    let predicate = parse(r#""my ""field""" = 'it''s'"#).unwrap();
    assert_eq!(
        predicate,
        Predicate::Compare(
            Operand::Field(r#"my "field""#.to_string()),
            CompareOp::Eq,
            Operand::Literal(Literal::String("it's".to_string())),
        )
    );
}

#[test]
fn keywords_are_case_insensitive() {
    assert!(parse("a is not null and b not in (1, 2) or NOT c like 'x%'").is_ok());
}

#[test]
fn fields_lists_each_reference_once() {
    let predicate = parse("a = b AND a IN (1) OR c IS NULL").unwrap();
    assert_eq!(predicate.fields(), vec!["a", "b", "c"]);
}

#[test_case("" ; "empty")]
#[test_case("a =" ; "missing right operand")]
#[test_case("a" ; "bare field")]
#[test_case("(a = 1" ; "unclosed paren")]
#[test_case("a = 1 b" ; "trailing input")]
#[test_case("a IN 1, 2" ; "in without parens")]
#[test_case("a LIKE 3" ; "like without string")]
#[test_case("a = 'unterminated" ; "unterminated string")]
#[test_case("a NOT = 1" ; "dangling not")]
fn parse_errors(input: &str) {
    assert!(parse(input).is_err(), "expected {input:?} to fail");
}

#[test]
fn parse_error_reports_position() {
    let err = parse("a = 1 AND AND").unwrap_err();
    assert_eq!(err.span.start, 10);
}

#[test_case("status = 'active'", json!({"status": "active"}), true)]
#[test_case("status = 'active'", json!({"status": "closed"}), false)]
#[test_case("pop > 1000", json!({"pop": 1500}), true)]
#[test_case("pop > 1000", json!({"pop": "1500"}), true ; "numeric string")]
#[test_case("pop <= 1000", json!({"pop": null}), false ; "null compares false")]
#[test_case("pk IN (1, 2, 3)", json!({"pk": 2}), true)]
#[test_case("pk NOT IN (1, 2, 3)", json!({"pk": 2}), false)]
#[test_case("name IS NULL", json!({}), true ; "missing is null")]
#[test_case("name IS NOT NULL", json!({"name": "x"}), true)]
#[test_case("name LIKE 'Main%'", json!({"name": "Main Street"}), true)]
#[test_case("name NOT LIKE 'Main%'", json!({"name": "Main Street"}), false)]
#[test_case("a = 1 AND (b = 2 OR c = 3)", json!({"a": 1, "c": 3}), true)]
#[test_case("NOT a = 1", json!({"a": 2}), true)]
#[test_case("TRUE", json!({}), true)]
#[test_case("a <> b", json!({"a": 1, "b": 2}), true ; "field to field")]
fn evaluate(predicate: &str, value: Value, expected: bool) {
    assert_eq!(eval(predicate, value), expected);
}

#[test]
fn display_round_trips_through_parser() {
    let source = "(a = 1 OR b IN ('x', 'y')) AND NOT c LIKE 'z%' AND d IS NOT NULL";
    let predicate = parse(source).unwrap();
    let reparsed = parse(&predicate.to_string()).unwrap();
    assert_eq!(predicate, reparsed);
}
