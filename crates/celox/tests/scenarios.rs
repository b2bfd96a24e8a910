//! End-to-end scenarios through the full compile → program → evaluate
//! pipeline. Every expression runs on both engines, which must agree on
//! the value or the error kind.

use celox::{EngineKind, Environment, ErrorKind, EvalResult, Value};
use pretty_assertions::assert_eq;

fn eval_with(source: &str, bindings: &[(&str, Value)]) -> EvalResult {
    let run = |engine: EngineKind| -> EvalResult {
        let env = Environment::new().engine(engine);
        let ast = env.compile(source).unwrap_or_else(|err| panic!("{source:?}: {err}"));
        let runner = env.program(ast).unwrap_or_else(|err| panic!("{source:?}: {err}"));
        runner.evaluate(bindings.iter().map(|(name, value)| (*name, value.clone())))
    };
    let interpreted = run(EngineKind::Interpreted);
    let compiled = run(EngineKind::Compiled);
    assert_eq!(interpreted, compiled, "engines disagree on {source:?}");
    interpreted
}

fn eval(source: &str) -> EvalResult {
    eval_with(source, &[])
}

#[test]
fn string_concatenation_with_binding() {
    let result = eval_with(r#""Hello, " + name + "!""#, &[("name", Value::string("World"))]);
    assert_eq!(result.unwrap(), Value::string("Hello, World!"));
}

#[test]
fn map_macro_doubles_elements() {
    let result = eval("[1, 2, 3].map(x, x * 2)").unwrap();
    assert_eq!(result, Value::list(vec![Value::Int(2), Value::Int(4), Value::Int(6)]));
}

#[test]
fn has_on_literal_maps() {
    let result = eval(r#"has({"a": 1}.a) && !has({"a": 1}.b)"#).unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn error_condition_propagates_through_ternary() {
    let err = eval(r#"2 / 0 > 4 ? "x" : "y""#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivideByZero);
}

#[test]
fn or_absorbs_an_error_when_true_forces() {
    let result = eval("true || (1/0 > 0)").unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn timestamp_month_is_zero_based() {
    let result = eval(r#"timestamp("2009-02-13T23:31:30Z").getMonth()"#).unwrap();
    assert_eq!(result, Value::Int(1));
}

#[test]
fn int_max_plus_one_overflows() {
    let err = eval("9223372036854775807 + 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Overflow);
}

#[test]
fn exists_absorbs_element_errors_after_a_hit() {
    let result = eval(r#"[1, "a", 3].exists(e, e != "1")"#).unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn missing_map_key_is_a_keyed_error() {
    let err = eval(r#"{"k": "v"}["missing"]"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoSuchKey);
}

#[test]
fn duration_minutes_accessor() {
    let result = eval(r#"duration("2h30m").getMinutes()"#).unwrap();
    assert_eq!(result, Value::Int(150));
}

#[test]
fn nested_comprehensions_with_shadowed_scopes() {
    let result = eval("[[1, 2], [3]].map(xs, xs.map(x, x * 10))").unwrap();
    assert_eq!(
        result,
        Value::list(vec![
            Value::list(vec![Value::Int(10), Value::Int(20)]),
            Value::list(vec![Value::Int(30)]),
        ])
    );
}

#[test]
fn filter_and_exists_one() {
    let result = eval("[1, 2, 3, 4].filter(x, x % 2 == 0)").unwrap();
    assert_eq!(result, Value::list(vec![Value::Int(2), Value::Int(4)]));
    assert_eq!(eval("[1, 2, 3].exists_one(x, x > 2)").unwrap(), Value::Bool(true));
    assert_eq!(eval("[1, 2, 3].exists_one(x, x > 1)").unwrap(), Value::Bool(false));
}

#[test]
fn all_short_circuits_on_false() {
    // inside the predicate, && absorbs the 10/0 error because its left
    // side is already false...
    assert_eq!(eval("[1, 0].all(x, x > 0 && 10 / x > 0)").unwrap(), Value::Bool(false));
    // ...and at the macro level, an element error is absorbed when a later
    // element decides the outcome
    assert_eq!(eval("[0, 1].all(x, 10 / x > 100)").unwrap(), Value::Bool(false));
}

#[test]
fn comprehension_over_map_iterates_keys() {
    let result = eval(r#"{"a": 1, "b": 2}.map(k, k)"#).unwrap();
    assert_eq!(result, Value::list(vec![Value::string("a"), Value::string("b")]));
    assert_eq!(
        eval(r#"{"a": 1, "b": 2}.exists(k, k == "b")"#).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn membership_and_indexing() {
    assert_eq!(eval("2 in [1, 2, 3]").unwrap(), Value::Bool(true));
    assert_eq!(eval(r#""b" in {"a": 1, "b": 2}"#).unwrap(), Value::Bool(true));
    assert_eq!(eval("[10, 20, 30][1]").unwrap(), Value::Int(20));
    assert_eq!(eval(r#"{"k": "v"}["k"]"#).unwrap(), Value::string("v"));
}

#[test]
fn dotted_field_access_on_bound_document() {
    let env = Environment::new();
    let ast = env.compile("account.balance >= 100").unwrap();
    let runner = env.program(ast).unwrap();
    let doc = celox::json_to_cel(&serde_json::json!({"balance": 250}));
    let result = runner.evaluate([("account", doc)]).unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn timestamp_arithmetic_end_to_end() {
    let result = eval(r#"timestamp("2009-02-13T23:31:30Z") + duration("1h") - timestamp("2009-02-13T23:31:30Z")"#);
    assert_eq!(result.unwrap(), eval(r#"duration("1h")"#).unwrap());
    let result = eval(r#"string(timestamp("2009-02-13T23:31:30Z") + duration("30m"))"#).unwrap();
    assert_eq!(result, Value::string("2009-02-14T00:01:30Z"));
}

#[test]
fn type_reification() {
    assert_eq!(eval("type(1) == int").unwrap(), Value::Bool(true));
    assert_eq!(eval("type(1u) == uint").unwrap(), Value::Bool(true));
    assert_eq!(eval("type(null)").unwrap(), Value::Type(celox::CelType::Null));
    assert_eq!(eval("type(type(1)) == type").unwrap(), Value::Bool(true));
    assert_eq!(eval("type(1) == type(2)").unwrap(), Value::Bool(true));
    assert_eq!(eval("type(1) == double").unwrap(), Value::Bool(false));
}

#[test]
fn string_library_method_forms() {
    assert_eq!(eval(r#""hello".contains("ell")"#).unwrap(), Value::Bool(true));
    assert_eq!(eval(r#""hello".startsWith("he")"#).unwrap(), Value::Bool(true));
    assert_eq!(eval(r#""hello".endsWith("lo")"#).unwrap(), Value::Bool(true));
    assert_eq!(eval(r#""hello".matches("^h.*o$")"#).unwrap(), Value::Bool(true));
    assert_eq!(eval(r#"size("héllo")"#).unwrap(), Value::Int(5));
    assert_eq!(eval(r#""héllo".size()"#).unwrap(), Value::Int(5));
}

#[test]
fn conversion_chains() {
    assert_eq!(eval(r#"int("42") + 1"#).unwrap(), Value::Int(43));
    assert_eq!(eval("uint(42)").unwrap(), Value::Uint(42));
    assert_eq!(eval("double(1) / 2.0").unwrap(), Value::Double(0.5));
    assert_eq!(eval(r#"string(1.5)"#).unwrap(), Value::string("1.5"));
    assert_eq!(eval(r#"string(bytes("abc"))"#).unwrap(), Value::string("abc"));
    assert_eq!(eval(r#"int(timestamp("2009-02-13T23:31:30Z"))"#).unwrap(), Value::Int(1_234_567_890));
}

#[test]
fn dyn_macro_is_transparent() {
    assert_eq!(eval("dyn(1 + 2)").unwrap(), Value::Int(3));
}

#[test]
fn deeply_nested_expression_within_limit() {
    let source = format!("{}1{}", "(".repeat(800), ")".repeat(800));
    assert_eq!(eval(&source).unwrap(), Value::Int(1));
}
