//! The tree-walking interpreter, plus the evaluation primitives it shares
//! with the transpiled engine: the commutative short-circuit tables, the
//! comprehension driver, and message construction.
//!
//! Both engines evaluate each side of `&&`/`||` to a *result* and then
//! combine through a four-case table, which is what makes the operators
//! commutative with errors: an error operand is discarded exactly when the
//! other operand alone forces the outcome.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    activation::Activation,
    ast::{Expr, ExprNode, MacroKind},
    error::{ErrorKind, EvalError, EvalResult},
    functions::{Args, call_function},
    value::{CelType, Map, MapKey, Message, Value},
};

/// Evaluates a prepared tree against an activation.
///
/// Errors pick up the span of the innermost node that produced them on the
/// way out.
pub(crate) fn evaluate(node: &ExprNode, activation: &Arc<Activation>) -> EvalResult {
    eval_node(node, activation).map_err(|err| err.with_span(node.span))
}

fn eval_node(node: &ExprNode, activation: &Arc<Activation>) -> EvalResult {
    match &node.expr {
        Expr::IntLit(i) => Ok(Value::Int(*i)),
        Expr::UintLit(u) => Ok(Value::Uint(*u)),
        Expr::DoubleLit(d) => Ok(Value::Double(*d)),
        Expr::StringLit(s) => Ok(Value::String(s.clone())),
        Expr::BytesLit(b) => Ok(Value::Bytes(b.clone())),
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::NullLit => Ok(Value::Null),
        Expr::Ident(name) => activation.resolve(name),
        Expr::DotIdent(name) => activation.resolve_root(name),
        Expr::MemberDot { object, field } => {
            // A member chain rooted in an identifier is first offered to
            // the activation whole, so bound dotted names win over
            // field-by-field navigation.
            if let Some(parts) = flatten_ident_path(node) {
                let (mut value, consumed) = activation.resolve_dotted(&parts)?;
                for part in &parts[consumed..] {
                    value = value.field(part)?;
                }
                return Ok(value);
            }
            let object = evaluate(object, activation)?;
            object.field(field)
        }
        Expr::MemberIndex { object, index } => {
            let object = evaluate(object, activation)?;
            let index = evaluate(index, activation)?;
            object.index(&index)
        }
        Expr::MemberObject { type_name, fields } => {
            let mut values = Vec::with_capacity(fields.len());
            for (name, value) in fields {
                values.push((Arc::from(name.as_str()), evaluate(value, activation)?));
            }
            construct_message(activation, type_name, values)
        }
        Expr::IdentArg { function, args } | Expr::DotIdentArg { function, args } => {
            let args = eval_args(args, activation, None)?;
            call_function(activation, function, &args)
        }
        Expr::MemberDotArg { object, method, args } => {
            let receiver = evaluate(object, activation)?;
            let args = eval_args(args, activation, Some(receiver))?;
            call_function(activation, method, &args)
        }
        Expr::UnaryNot(operand) => evaluate(operand, activation)?.logical_not(),
        Expr::UnaryNeg(operand) => evaluate(operand, activation)?.negate(),
        Expr::Arith { op, left, right } => {
            let left = evaluate(left, activation)?;
            let right = evaluate(right, activation)?;
            Value::arith(*op, &left, &right)
        }
        Expr::Relation { op, left, right } => {
            let left = evaluate(left, activation)?;
            let right = evaluate(right, activation)?;
            Value::relation(*op, &left, &right)
        }
        Expr::And { left, right } => logical_and(evaluate(left, activation), evaluate(right, activation)),
        Expr::Or { left, right } => logical_or(evaluate(left, activation), evaluate(right, activation)),
        Expr::Conditional { cond, then, orelse } => {
            // Exactly one branch is evaluated; the other is never touched.
            if evaluate(cond, activation)?.as_bool("conditional")? {
                evaluate(then, activation)
            } else {
                evaluate(orelse, activation)
            }
        }
        Expr::ListLit(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, activation)?);
            }
            Ok(Value::list(values))
        }
        Expr::MapLit(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let key = evaluate(key, activation)?;
                let value = evaluate(value, activation)?;
                pairs.push((key, value));
            }
            Ok(Value::map(Map::from_pairs(pairs)?))
        }
        Expr::Comprehension { kind, var, iter, body } => {
            let iter_value = evaluate(iter, activation)?;
            let var: Arc<str> = Arc::from(var.as_str());
            run_comprehension(*kind, &var, &iter_value, activation, &|overlay| {
                evaluate(body, overlay)
            })
        }
        Expr::Has(inner) => {
            let Expr::MemberDot { .. } = &inner.expr else {
                unreachable!("the rewriter only builds Has over field selections");
            };
            absorb_lookup_errors(evaluate(inner, activation))
        }
    }
}

/// Evaluates call arguments left to right, stopping at the first error.
fn eval_args(args: &[ExprNode], activation: &Arc<Activation>, receiver: Option<Value>) -> Result<Args, EvalError> {
    let mut values: Args = SmallVec::with_capacity(args.len() + usize::from(receiver.is_some()));
    if let Some(receiver) = receiver {
        values.push(receiver);
    }
    for arg in args {
        values.push(evaluate(arg, activation)?);
    }
    Ok(values)
}

/// Collects a member chain `a.b.c` into identifier parts when its root is a
/// plain identifier. Returns `None` for chains rooted in other expressions.
fn flatten_ident_path(node: &ExprNode) -> Option<Vec<&str>> {
    match &node.expr {
        Expr::Ident(name) => Some(vec![name]),
        Expr::MemberDot { object, field } => {
            let mut parts = flatten_ident_path(object)?;
            parts.push(field);
            Some(parts)
        }
        _ => None,
    }
}

/// The `has()` policy: a successful lookup is presence, a missing key or
/// field is absence, and anything else is a real error.
pub(crate) fn absorb_lookup_errors(result: EvalResult) -> EvalResult {
    match result {
        Ok(_) => Ok(Value::Bool(true)),
        Err(err) if matches!(err.kind, ErrorKind::NoSuchKey | ErrorKind::NoSuchField) => Ok(Value::Bool(false)),
        Err(err) => Err(err),
    }
}

/// The four-case `&&` table. `false` forces the result regardless of the
/// other side; only then do errors propagate (left first).
pub(crate) fn logical_and(left: EvalResult, right: EvalResult) -> EvalResult {
    match (&left, &right) {
        (Ok(Value::Bool(false)), _) | (_, Ok(Value::Bool(false))) => Ok(Value::Bool(false)),
        _ => match (left, right) {
            (Err(err), _) | (_, Err(err)) => Err(err),
            (Ok(Value::Bool(a)), Ok(Value::Bool(b))) => Ok(Value::Bool(a && b)),
            (Ok(left), Ok(right)) => Err(EvalError::no_such_overload("_&&_", &left, &right)),
        },
    }
}

/// The four-case `||` table: the mirror image, with `true` forcing.
pub(crate) fn logical_or(left: EvalResult, right: EvalResult) -> EvalResult {
    match (&left, &right) {
        (Ok(Value::Bool(true)), _) | (_, Ok(Value::Bool(true))) => Ok(Value::Bool(true)),
        _ => match (left, right) {
            (Err(err), _) | (_, Err(err)) => Err(err),
            (Ok(Value::Bool(a)), Ok(Value::Bool(b))) => Ok(Value::Bool(a || b)),
            (Ok(left), Ok(right)) => Err(EvalError::no_such_overload("_||_", &left, &right)),
        },
    }
}

/// Elements a comprehension visits: list items in order, map keys and
/// message field names in insertion order.
fn iteration_items(kind: MacroKind, value: &Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::List(items) => Ok(items.to_vec()),
        Value::Map(map) => Ok(map.keys().map(MapKey::to_value).collect()),
        Value::Message(message) => Ok(message
            .fields()
            .map(|(name, _)| Value::String(name.clone()))
            .collect()),
        other => Err(EvalError::no_such_unary_overload(kind.into(), other)),
    }
}

/// Runs a comprehension loop over an already-evaluated container.
///
/// `eval_body` sees an activation with the loop variable bound in a fresh
/// overlay; the overlay is dropped between elements, so nothing leaks.
/// Shared between both engines so the short-circuit and error-absorption
/// policies cannot drift apart.
pub(crate) fn run_comprehension(
    kind: MacroKind,
    var: &Arc<str>,
    iter_value: &Value,
    activation: &Arc<Activation>,
    eval_body: &dyn Fn(&Arc<Activation>) -> EvalResult,
) -> EvalResult {
    let items = iteration_items(kind, iter_value)?;
    match kind {
        // ∀: false short-circuits; an element error is absorbed if a later
        // element settles the answer.
        MacroKind::All => {
            let mut deferred: Option<EvalError> = None;
            for item in items {
                let overlay = Arc::new(activation.bind_one(var.clone(), item));
                match eval_body(&overlay).and_then(|v| v.as_bool("all() predicate")) {
                    Ok(true) => {}
                    Ok(false) => return Ok(Value::Bool(false)),
                    Err(err) => deferred = deferred.or(Some(err)),
                }
            }
            match deferred {
                Some(err) => Err(err),
                None => Ok(Value::Bool(true)),
            }
        }
        // ∃: true short-circuits, same absorption mirrored.
        MacroKind::Exists => {
            let mut deferred: Option<EvalError> = None;
            for item in items {
                let overlay = Arc::new(activation.bind_one(var.clone(), item));
                match eval_body(&overlay).and_then(|v| v.as_bool("exists() predicate")) {
                    Ok(true) => return Ok(Value::Bool(true)),
                    Ok(false) => {}
                    Err(err) => deferred = deferred.or(Some(err)),
                }
            }
            match deferred {
                Some(err) => Err(err),
                None => Ok(Value::Bool(false)),
            }
        }
        // Exactly one: every element must be visited, so there is nothing
        // to absorb errors into.
        MacroKind::ExistsOne => {
            let mut count = 0u64;
            for item in items {
                let overlay = Arc::new(activation.bind_one(var.clone(), item));
                if eval_body(&overlay)?.as_bool("exists_one() predicate")? {
                    count += 1;
                }
            }
            Ok(Value::Bool(count == 1))
        }
        MacroKind::Filter => {
            let mut kept = Vec::new();
            for item in items {
                let overlay = Arc::new(activation.bind_one(var.clone(), item.clone()));
                if eval_body(&overlay)?.as_bool("filter() predicate")? {
                    kept.push(item);
                }
            }
            Ok(Value::list(kept))
        }
        MacroKind::Map => {
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                let overlay = Arc::new(activation.bind_one(var.clone(), item));
                mapped.push(eval_body(&overlay)?);
            }
            Ok(Value::list(mapped))
        }
    }
}

/// Builds a value from `Type{field: ...}` syntax.
///
/// The type name resolves through annotations first, then the well-known
/// names. Scalar wrapper types read their `value` field (zero-valued when
/// absent); `Struct` builds a map; message annotations build messages.
pub(crate) fn construct_message(
    activation: &Activation,
    type_name: &str,
    fields: Vec<(Arc<str>, Value)>,
) -> EvalResult {
    let handle = activation
        .annotation(type_name)
        .cloned()
        .or_else(|| CelType::from_name(type_name));
    let Some(handle) = handle else {
        return Err(EvalError::no_such_identifier(type_name));
    };
    match handle {
        CelType::Message(name) => Ok(Value::Message(Arc::new(Message::new(name, fields)))),
        CelType::Map => Ok(Value::map(Map::from_pairs(
            fields
                .into_iter()
                .map(|(name, value)| (Value::String(name), value)),
        )?)),
        CelType::Bool | CelType::Int | CelType::Uint | CelType::Double | CelType::String | CelType::Bytes => {
            wrapper_value(&handle, fields)
        }
        other => Err(EvalError::new(
            ErrorKind::InvalidArgument,
            format!("type '{other}' does not support field construction"),
        )),
    }
}

/// Protobuf wrapper construction: the single `value` field carries the
/// payload, defaulting to the type's zero value.
fn wrapper_value(handle: &CelType, fields: Vec<(Arc<str>, Value)>) -> EvalResult {
    let mut value = None;
    for (name, field_value) in fields {
        if name.as_ref() != "value" {
            return Err(EvalError::no_such_field(&name));
        }
        value = Some(field_value);
    }
    let value = value.unwrap_or(match handle {
        CelType::Bool => Value::Bool(false),
        CelType::Int => Value::Int(0),
        CelType::Uint => Value::Uint(0),
        CelType::Double => Value::Double(0.0),
        CelType::String => Value::string(""),
        CelType::Bytes => Value::bytes(Vec::new()),
        _ => unreachable!("caller filters to scalar wrappers"),
    });
    if value.type_of() == *handle {
        Ok(value)
    } else {
        Err(EvalError::new(
            ErrorKind::TypeError,
            format!("wrapper '{handle}' cannot hold {}", value.type_of()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn bool_ok(b: bool) -> EvalResult {
        Ok(Value::Bool(b))
    }

    fn boom() -> EvalResult {
        Err(EvalError::divide_by_zero())
    }

    #[test]
    fn and_table_is_commutative_with_errors() {
        // false forces the result from either side
        assert_eq!(logical_and(bool_ok(false), boom()).unwrap(), Value::Bool(false));
        assert_eq!(logical_and(boom(), bool_ok(false)).unwrap(), Value::Bool(false));
        // true cannot absorb
        assert_eq!(logical_and(bool_ok(true), boom()).unwrap_err().kind, ErrorKind::DivideByZero);
        assert_eq!(logical_and(boom(), bool_ok(true)).unwrap_err().kind, ErrorKind::DivideByZero);
        assert_eq!(logical_and(bool_ok(true), bool_ok(true)).unwrap(), Value::Bool(true));
        // both err: one of them is reported
        assert!(logical_and(boom(), boom()).is_err());
    }

    #[test]
    fn or_table_is_the_mirror() {
        assert_eq!(logical_or(bool_ok(true), boom()).unwrap(), Value::Bool(true));
        assert_eq!(logical_or(boom(), bool_ok(true)).unwrap(), Value::Bool(true));
        assert_eq!(logical_or(boom(), bool_ok(false)).unwrap_err().kind, ErrorKind::DivideByZero);
        assert_eq!(logical_or(bool_ok(false), bool_ok(false)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn non_bool_operands_are_overload_errors() {
        let err = logical_and(Ok(Value::Int(1)), bool_ok(true)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
        let err = logical_or(bool_ok(false), Ok(Value::string("x"))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }
}
