//! The transpiler: turns a prepared tree into a closure graph once, so
//! repeated evaluations skip the tree walk.
//!
//! Each subtree becomes a thunk `Activation -> Result`; a parent thunk owns
//! its children and decides when (and whether) to force them. Branch thunks
//! for `?:` and comprehension bodies are constructed here but only invoked
//! when evaluation reaches them, and every semantic decision is delegated
//! to the same primitives the interpreter uses, which is what keeps the two
//! engines observably identical.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    activation::Activation,
    ast::{Expr, ExprNode, Span},
    error::{EvalError, EvalResult},
    functions::{Args, call_function},
    value::{Map, Value},
};

use crate::eval::{absorb_lookup_errors, construct_message, logical_and, logical_or, run_comprehension};

/// A compiled subtree. Invoking it with an activation produces the same
/// value or error the interpreter would for that subtree.
pub(crate) type Thunk = Arc<dyn Fn(&Arc<Activation>) -> EvalResult + Send + Sync>;

/// Wraps a node's computation so escaping errors carry the node's span,
/// innermost span winning, exactly as in the interpreter.
fn spanned(span: Span, body: impl Fn(&Arc<Activation>) -> EvalResult + Send + Sync + 'static) -> Thunk {
    Arc::new(move |activation| body(activation).map_err(|err| err.with_span(span)))
}

/// Compiles a prepared tree into its closure graph.
pub(crate) fn transpile(node: &ExprNode) -> Thunk {
    let span = node.span;
    match &node.expr {
        Expr::IntLit(i) => {
            let value = Value::Int(*i);
            spanned(span, move |_| Ok(value.clone()))
        }
        Expr::UintLit(u) => {
            let value = Value::Uint(*u);
            spanned(span, move |_| Ok(value.clone()))
        }
        Expr::DoubleLit(d) => {
            let value = Value::Double(*d);
            spanned(span, move |_| Ok(value.clone()))
        }
        Expr::StringLit(s) => {
            let value = Value::String(s.clone());
            spanned(span, move |_| Ok(value.clone()))
        }
        Expr::BytesLit(b) => {
            let value = Value::Bytes(b.clone());
            spanned(span, move |_| Ok(value.clone()))
        }
        Expr::BoolLit(b) => {
            let value = Value::Bool(*b);
            spanned(span, move |_| Ok(value.clone()))
        }
        Expr::NullLit => spanned(span, |_| Ok(Value::Null)),
        Expr::Ident(name) => {
            let name: Arc<str> = Arc::from(name.as_str());
            spanned(span, move |activation| activation.resolve(&name))
        }
        Expr::DotIdent(name) => {
            let name: Arc<str> = Arc::from(name.as_str());
            spanned(span, move |activation| activation.resolve_root(&name))
        }
        Expr::MemberDot { object, field } => {
            // Identifier-rooted chains are flattened at compile time; the
            // longest-prefix resolution happens per evaluation because it
            // depends on the activation.
            if let Some(parts) = flatten_ident_path_owned(node) {
                return spanned(span, move |activation| {
                    let part_refs: Vec<&str> = parts.iter().map(Arc::as_ref).collect();
                    let (mut value, consumed) = activation.resolve_dotted(&part_refs)?;
                    for part in &part_refs[consumed..] {
                        value = value.field(part)?;
                    }
                    Ok(value)
                });
            }
            let object = transpile(object);
            let field: Arc<str> = Arc::from(field.as_str());
            spanned(span, move |activation| object(activation)?.field(&field))
        }
        Expr::MemberIndex { object, index } => {
            let object = transpile(object);
            let index = transpile(index);
            spanned(span, move |activation| {
                let object = object(activation)?;
                let index = index(activation)?;
                object.index(&index)
            })
        }
        Expr::MemberObject { type_name, fields } => {
            let type_name: Arc<str> = Arc::from(type_name.as_str());
            let fields: Vec<(Arc<str>, Thunk)> = fields
                .iter()
                .map(|(name, value)| (Arc::from(name.as_str()), transpile(value)))
                .collect();
            spanned(span, move |activation| {
                let mut values = Vec::with_capacity(fields.len());
                for (name, thunk) in &fields {
                    values.push((name.clone(), thunk(activation)?));
                }
                construct_message(activation, &type_name, values)
            })
        }
        Expr::IdentArg { function, args } | Expr::DotIdentArg { function, args } => {
            let function: Arc<str> = Arc::from(function.as_str());
            let args: Vec<Thunk> = args.iter().map(transpile).collect();
            spanned(span, move |activation| {
                let args = force_args(&args, activation, None)?;
                call_function(activation, &function, &args)
            })
        }
        Expr::MemberDotArg { object, method, args } => {
            let object = transpile(object);
            let method: Arc<str> = Arc::from(method.as_str());
            let args: Vec<Thunk> = args.iter().map(transpile).collect();
            spanned(span, move |activation| {
                let receiver = object(activation)?;
                let args = force_args(&args, activation, Some(receiver))?;
                call_function(activation, &method, &args)
            })
        }
        Expr::UnaryNot(operand) => {
            let operand = transpile(operand);
            spanned(span, move |activation| operand(activation)?.logical_not())
        }
        Expr::UnaryNeg(operand) => {
            let operand = transpile(operand);
            spanned(span, move |activation| operand(activation)?.negate())
        }
        Expr::Arith { op, left, right } => {
            let op = *op;
            let left = transpile(left);
            let right = transpile(right);
            spanned(span, move |activation| {
                let left = left(activation)?;
                let right = right(activation)?;
                Value::arith(op, &left, &right)
            })
        }
        Expr::Relation { op, left, right } => {
            let op = *op;
            let left = transpile(left);
            let right = transpile(right);
            spanned(span, move |activation| {
                let left = left(activation)?;
                let right = right(activation)?;
                Value::relation(op, &left, &right)
            })
        }
        Expr::And { left, right } => {
            let left = transpile(left);
            let right = transpile(right);
            spanned(span, move |activation| {
                logical_and(left(activation), right(activation))
            })
        }
        Expr::Or { left, right } => {
            let left = transpile(left);
            let right = transpile(right);
            spanned(span, move |activation| {
                logical_or(left(activation), right(activation))
            })
        }
        Expr::Conditional { cond, then, orelse } => {
            let cond = transpile(cond);
            let then = transpile(then);
            let orelse = transpile(orelse);
            spanned(span, move |activation| {
                // the unchosen branch thunk is never forced
                if cond(activation)?.as_bool("conditional")? {
                    then(activation)
                } else {
                    orelse(activation)
                }
            })
        }
        Expr::ListLit(items) => {
            let items: Vec<Thunk> = items.iter().map(transpile).collect();
            spanned(span, move |activation| {
                let mut values = Vec::with_capacity(items.len());
                for item in &items {
                    values.push(item(activation)?);
                }
                Ok(Value::list(values))
            })
        }
        Expr::MapLit(entries) => {
            let entries: Vec<(Thunk, Thunk)> = entries
                .iter()
                .map(|(key, value)| (transpile(key), transpile(value)))
                .collect();
            spanned(span, move |activation| {
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, value) in &entries {
                    let key = key(activation)?;
                    let value = value(activation)?;
                    pairs.push((key, value));
                }
                Ok(Value::map(Map::from_pairs(pairs)?))
            })
        }
        Expr::Comprehension { kind, var, iter, body } => {
            let kind = *kind;
            let var: Arc<str> = Arc::from(var.as_str());
            let iter = transpile(iter);
            let body = transpile(body);
            spanned(span, move |activation| {
                let iter_value = iter(activation)?;
                run_comprehension(kind, &var, &iter_value, activation, &|overlay| body(overlay))
            })
        }
        Expr::Has(inner) => {
            let inner = transpile(inner);
            spanned(span, move |activation| absorb_lookup_errors(inner(activation)))
        }
    }
}

fn force_args(args: &[Thunk], activation: &Arc<Activation>, receiver: Option<Value>) -> Result<Args, EvalError> {
    let mut values: Args = SmallVec::with_capacity(args.len() + usize::from(receiver.is_some()));
    if let Some(receiver) = receiver {
        values.push(receiver);
    }
    for arg in args {
        values.push(arg(activation)?);
    }
    Ok(values)
}

/// Owned variant of the interpreter's identifier-path flattening, since
/// thunks outlive the tree they were compiled from.
fn flatten_ident_path_owned(node: &ExprNode) -> Option<Vec<Arc<str>>> {
    match &node.expr {
        Expr::Ident(name) => Some(vec![Arc::from(name.as_str())]),
        Expr::MemberDot { object, field } => {
            let mut parts = flatten_ident_path_owned(object)?;
            parts.push(Arc::from(field.as_str()));
            Some(parts)
        }
        _ => None,
    }
}
