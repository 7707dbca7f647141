//! End-to-end scenarios exercised through the `Environment`/`Program` facade.

use cel::{EnvironmentOptions, EvalContext, Environment};
use cel_core::{CelMap, MapKey, TypeRegistry, Value};
use std::rc::Rc;

fn map_value(entries: Vec<(&str, Value)>) -> Value {
    let mut m = CelMap::new();
    for (k, v) in entries {
        m.insert(MapKey::String(Rc::from(k)), v);
    }
    Value::Map(Rc::new(m))
}

fn is_true(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn is_string(v: &Value, expected: &str) -> bool {
    matches!(v, Value::String(s) if s.as_ref() == expected)
}

#[test]
fn policy_match_allows_owner_or_group_member() {
    let env = Environment::new(EnvironmentOptions::default());
    env.register_variable("user", TypeRegistry::dyn_type()).unwrap();
    env.register_variable("resource", TypeRegistry::dyn_type()).unwrap();
    let program = env.parse(r#""admin" in user.groups || user.groups.exists(g, g == resource.owner)"#).unwrap();
    assert!(program.check().valid);

    let ctx = EvalContext::new()
        .with_variable("user", map_value(vec![("groups", Value::list(vec![Value::string("dev"), Value::string("ops")]))]))
        .with_variable("resource", map_value(vec![("owner", Value::string("dev"))]));
    assert!(is_true(&program.evaluate(&ctx).unwrap()));

    let ctx = EvalContext::new()
        .with_variable("user", map_value(vec![("groups", Value::list(vec![Value::string("dev")]))]))
        .with_variable("resource", map_value(vec![("owner", Value::string("root"))]));
    assert!(matches!(program.evaluate(&ctx).unwrap(), Value::Bool(false)));
}

#[test]
fn arithmetic_overflow_is_a_recoverable_evaluation_error() {
    let env = Environment::new(EnvironmentOptions::default());
    let err = env.evaluate("9223372036854775807 + 1", &EvalContext::new()).unwrap_err();
    assert!(err.to_string().contains("overflow"));
}

#[test]
fn short_circuit_recovers_from_unknown_variable_only_when_determining() {
    let env = Environment::new(EnvironmentOptions::default());
    assert!(is_true(&env.evaluate("missing || true", &EvalContext::new()).unwrap()));
    assert!(env.evaluate("missing || false", &EvalContext::new()).is_err());
}

#[test]
fn exists_macro_discards_errors_from_non_matching_elements() {
    let env = Environment::new(EnvironmentOptions::default());
    let list = Value::list(vec![Value::Int(1), Value::string("x"), Value::Int(3)]);
    let ctx = EvalContext::new().with_variable("xs", list);
    env.register_variable("xs", TypeRegistry::list(TypeRegistry::dyn_type())).unwrap();
    let result = env.evaluate("xs.exists(v, v == 3)", &ctx).unwrap();
    assert!(is_true(&result));
}

#[test]
fn has_chain_distinguishes_absent_from_erroring() {
    let env = Environment::new(EnvironmentOptions::default());
    env.register_variable("a", TypeRegistry::dyn_type()).unwrap();
    let ctx = EvalContext::new().with_variable("a", map_value(vec![("b", map_value(vec![]))]));

    assert!(matches!(env.evaluate("has(a.b.c)", &ctx).unwrap(), Value::Bool(false)));
    assert!(env.evaluate("has(a.c.d)", &ctx).is_err());
    assert!(matches!(env.evaluate("has(a.?c.d)", &ctx).unwrap(), Value::Bool(false)));
}

#[test]
fn timestamp_hours_respect_requested_timezone() {
    let env = Environment::new(EnvironmentOptions::default());
    let utc = env.evaluate("timestamp(\"2024-03-10T07:30:00Z\").getHours()", &EvalContext::new()).unwrap();
    assert!(matches!(utc, Value::Int(7)));
    let pst = env
        .evaluate("timestamp(\"2024-03-10T07:30:00Z\").getHours(\"America/Los_Angeles\")", &EvalContext::new())
        .unwrap();
    assert!(matches!(pst, Value::Int(0)));
}

#[test]
fn optional_index_chains_into_or_value() {
    let env = Environment::new(EnvironmentOptions::default());
    let none = env.evaluate(r#"{1:"a"}[?2].orValue("none")"#, &EvalContext::new()).unwrap();
    assert!(is_string(&none, "none"));
    let found = env.evaluate(r#"{1:"a"}[?1].orValue("none")"#, &EvalContext::new()).unwrap();
    assert!(is_string(&found, "a"));
}

#[test]
fn size_is_non_negative_and_zero_for_empty_receivers() {
    let env = Environment::new(EnvironmentOptions::default());
    for expr in ["size(\"\")", "size(b\"\")", "size([])", "size({})"] {
        assert!(matches!(env.evaluate(expr, &EvalContext::new()).unwrap(), Value::Int(0)));
    }
}

#[test]
fn string_size_counts_code_points() {
    let env = Environment::new(EnvironmentOptions::default());
    assert!(matches!(env.evaluate("size(\"\u{1F600}\")", &EvalContext::new()).unwrap(), Value::Int(1)));
}

#[test]
fn int_string_round_trip_is_identity() {
    let env = Environment::new(EnvironmentOptions::default());
    assert!(is_true(&env.evaluate("int(string(42)) == 42", &EvalContext::new()).unwrap()));
    assert!(is_true(&env.evaluate("uint(string(42u)) == 42u", &EvalContext::new()).unwrap()));
}

#[test]
fn division_and_modulo_by_zero_raise() {
    let env = Environment::new(EnvironmentOptions::default());
    assert!(env.evaluate("1 / 0", &EvalContext::new()).is_err());
    assert!(env.evaluate("1 % 0", &EvalContext::new()).is_err());
}

#[test]
fn timestamp_epoch_round_trips_through_duration_addition() {
    let env = Environment::new(EnvironmentOptions::default());
    let same = env
        .evaluate(r#"timestamp("1970-01-01T00:00:00Z") + duration("1s") - duration("1s") == timestamp("1970-01-01T00:00:00Z")"#, &EvalContext::new())
        .unwrap();
    assert!(is_true(&same));
}

#[test]
fn substring_boundary_is_inclusive_exclusive() {
    let env = Environment::new(EnvironmentOptions::default());
    assert!(is_true(&env.evaluate(r#""hello".substring(0, 5) == "hello""#, &EvalContext::new()).unwrap()));
    assert!(env.evaluate(r#""hello".substring(0, 6)"#, &EvalContext::new()).is_err());
}
