//! The macro rewriter: a program-build pass that replaces macro call shapes
//! with explicit comprehension nodes.
//!
//! `has`, `all`, `exists`, `exists_one`, `filter`, `map`, and `dyn` are not
//! functions: they never reach the registry. This pass recognizes their
//! shapes on the parsed tree and synthesizes the primitive structures both
//! engines execute, so neither engine ever has to know a macro existed.
//! Malformed shapes (wrong arity, a non-identifier loop variable, `has` of
//! something that is not a field selection) are reported here, before the
//! first evaluation.

use crate::{
    ast::{Expr, ExprNode, MacroKind, Span},
    error::{ErrorKind, EvalError},
};

/// Rewrites macro call shapes throughout the tree.
pub fn expand_macros(node: ExprNode) -> Result<ExprNode, EvalError> {
    let ExprNode { span, expr } = node;
    let expr = match expr {
        Expr::IdentArg { function, args } | Expr::DotIdentArg { function, args } if function == "has" => {
            return expand_has(span, args);
        }
        Expr::IdentArg { function, args } | Expr::DotIdentArg { function, args } if function == "dyn" => {
            // dyn() suppresses static typing only; at runtime it is its
            // argument.
            let [arg] = take_args::<1>(span, "dyn", args)?;
            return expand_macros(arg);
        }
        Expr::MemberDotArg { object, method, args } => match macro_kind(&method) {
            Some(kind) => {
                return expand_comprehension(span, kind, *object, args);
            }
            None => Expr::MemberDotArg {
                object: Box::new(expand_macros(*object)?),
                method,
                args: expand_all(args)?,
            },
        },
        Expr::IdentArg { function, args } => Expr::IdentArg {
            function,
            args: expand_all(args)?,
        },
        Expr::DotIdentArg { function, args } => Expr::DotIdentArg {
            function,
            args: expand_all(args)?,
        },
        Expr::MemberDot { object, field } => Expr::MemberDot {
            object: Box::new(expand_macros(*object)?),
            field,
        },
        Expr::MemberIndex { object, index } => Expr::MemberIndex {
            object: Box::new(expand_macros(*object)?),
            index: Box::new(expand_macros(*index)?),
        },
        Expr::MemberObject { type_name, fields } => Expr::MemberObject {
            type_name,
            fields: fields
                .into_iter()
                .map(|(name, value)| Ok((name, expand_macros(value)?)))
                .collect::<Result<_, EvalError>>()?,
        },
        Expr::UnaryNot(operand) => Expr::UnaryNot(Box::new(expand_macros(*operand)?)),
        Expr::UnaryNeg(operand) => Expr::UnaryNeg(Box::new(expand_macros(*operand)?)),
        Expr::Arith { op, left, right } => Expr::Arith {
            op,
            left: Box::new(expand_macros(*left)?),
            right: Box::new(expand_macros(*right)?),
        },
        Expr::Relation { op, left, right } => Expr::Relation {
            op,
            left: Box::new(expand_macros(*left)?),
            right: Box::new(expand_macros(*right)?),
        },
        Expr::And { left, right } => Expr::And {
            left: Box::new(expand_macros(*left)?),
            right: Box::new(expand_macros(*right)?),
        },
        Expr::Or { left, right } => Expr::Or {
            left: Box::new(expand_macros(*left)?),
            right: Box::new(expand_macros(*right)?),
        },
        Expr::Conditional { cond, then, orelse } => Expr::Conditional {
            cond: Box::new(expand_macros(*cond)?),
            then: Box::new(expand_macros(*then)?),
            orelse: Box::new(expand_macros(*orelse)?),
        },
        Expr::ListLit(items) => Expr::ListLit(expand_all(items)?),
        Expr::MapLit(entries) => Expr::MapLit(
            entries
                .into_iter()
                .map(|(key, value)| Ok((expand_macros(key)?, expand_macros(value)?)))
                .collect::<Result<_, EvalError>>()?,
        ),
        // literals, identifiers, and already-expanded nodes pass through
        other => other,
    };
    Ok(ExprNode::new(span, expr))
}

fn expand_all(nodes: Vec<ExprNode>) -> Result<Vec<ExprNode>, EvalError> {
    nodes.into_iter().map(expand_macros).collect()
}

fn macro_kind(method: &str) -> Option<MacroKind> {
    Some(match method {
        "all" => MacroKind::All,
        "exists" => MacroKind::Exists,
        "exists_one" => MacroKind::ExistsOne,
        "filter" => MacroKind::Filter,
        "map" => MacroKind::Map,
        _ => return None,
    })
}

fn take_args<const N: usize>(span: Span, name: &str, args: Vec<ExprNode>) -> Result<[ExprNode; N], EvalError> {
    let found = args.len();
    args.try_into().map_err(|_| {
        EvalError::new(
            ErrorKind::InvalidArgument,
            format!("{name}() macro requires {N} argument(s), found {found}"),
        )
        .with_span(span)
    })
}

/// `has(e.f)`: the argument must be a field selection. The member access is
/// kept as-is under a `Has` node; lookup failures are decided at runtime.
fn expand_has(span: Span, args: Vec<ExprNode>) -> Result<ExprNode, EvalError> {
    let [arg] = take_args::<1>(span, "has", args)?;
    let arg = expand_macros(arg)?;
    match &arg.expr {
        Expr::MemberDot { .. } => Ok(ExprNode::new(span, Expr::Has(Box::new(arg)))),
        _ => Err(EvalError::new(
            ErrorKind::InvalidArgument,
            "has() macro requires a field selection argument",
        )
        .with_span(span)),
    }
}

/// `e.all(x, P)` and friends: the loop variable must be a plain identifier,
/// and it is bound in a fresh overlay for the body alone.
fn expand_comprehension(
    span: Span,
    kind: MacroKind,
    object: ExprNode,
    args: Vec<ExprNode>,
) -> Result<ExprNode, EvalError> {
    let name: &'static str = kind.into();
    let [var, body] = take_args::<2>(span, name, args)?;
    let Expr::Ident(var) = var.expr else {
        return Err(EvalError::new(
            ErrorKind::InvalidArgument,
            format!("{name}() macro requires an identifier as its loop variable"),
        )
        .with_span(var.span));
    };
    Ok(ExprNode::new(
        span,
        Expr::Comprehension {
            kind,
            var,
            iter: Box::new(expand_macros(object)?),
            body: Box::new(expand_macros(body)?),
        },
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parse::parse;

    fn expand(source: &str) -> ExprNode {
        expand_macros(parse(source, 200).unwrap()).unwrap()
    }

    fn expand_err(source: &str) -> EvalError {
        expand_macros(parse(source, 200).unwrap()).unwrap_err()
    }

    #[test]
    fn comprehension_macros_become_loop_nodes() {
        for (source, kind) in [
            ("[1].all(x, x > 0)", MacroKind::All),
            ("[1].exists(x, x > 0)", MacroKind::Exists),
            ("[1].exists_one(x, x > 0)", MacroKind::ExistsOne),
            ("[1].filter(x, x > 0)", MacroKind::Filter),
            ("[1].map(x, x * 2)", MacroKind::Map),
        ] {
            let Expr::Comprehension { kind: found, var, .. } = expand(source).expr else {
                panic!("{source} did not expand to a comprehension");
            };
            assert_eq!(found, kind, "{source}");
            assert_eq!(var, "x");
        }
    }

    #[test]
    fn has_becomes_a_presence_node() {
        let Expr::Has(inner) = expand("has(m.f)").expr else {
            panic!("expected a Has node");
        };
        assert!(matches!(inner.expr, Expr::MemberDot { .. }));
    }

    #[test]
    fn dyn_is_identity() {
        assert_eq!(expand("dyn(1 + 2)").expr, expand("1 + 2").expr);
    }

    #[test]
    fn macros_expand_inside_other_expressions() {
        let Expr::And { left, right } = expand("has(m.a) && [1].exists(e, e == 1)").expr else {
            panic!("expected &&");
        };
        assert!(matches!(left.expr, Expr::Has(_)));
        assert!(matches!(right.expr, Expr::Comprehension { .. }));
    }

    #[test]
    fn nested_comprehensions_expand_bottom_up() {
        let Expr::Comprehension { body, .. } = expand("[[1]].all(xs, xs.exists(x, x == 1))").expr else {
            panic!("expected outer comprehension");
        };
        assert!(matches!(body.expr, Expr::Comprehension { .. }));
    }

    #[test]
    fn bad_macro_shapes_are_build_errors() {
        assert_eq!(expand_err("has(m)").kind, ErrorKind::InvalidArgument);
        assert_eq!(expand_err("has(f())").kind, ErrorKind::InvalidArgument);
        assert_eq!(expand_err("has(m.a, m.b)").kind, ErrorKind::InvalidArgument);
        assert_eq!(expand_err("[1].all(x + 1, true)").kind, ErrorKind::InvalidArgument);
        assert_eq!(expand_err("[1].map(x)").kind, ErrorKind::InvalidArgument);
        assert_eq!(expand_err("dyn(1, 2)").kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn non_macro_calls_are_untouched() {
        let Expr::MemberDotArg { method, .. } = expand("s.contains('x')").expr else {
            panic!("expected a method call");
        };
        assert_eq!(method, "contains");
    }
}
