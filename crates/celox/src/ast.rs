//! The parse-tree representation consumed by the macro rewriter and both
//! evaluation engines.
//!
//! The parser produces every variant except [`Expr::Comprehension`] and
//! [`Expr::Has`]; those are synthesized by the rewriter in `prepare` when it
//! recognizes a macro call shape. The tree is immutable after construction
//! and both engines treat it as read-only.

use std::sync::Arc;

use strum::{Display, IntoStaticStr};

/// Byte range in the source text. Used for error messages only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The smallest span covering both inputs.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// An expression with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprNode {
    pub span: Span,
    pub expr: Expr,
}

impl ExprNode {
    pub fn new(span: Span, expr: Expr) -> Self {
        Self { span, expr }
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ArithOp {
    #[strum(serialize = "_+_")]
    Add,
    #[strum(serialize = "_-_")]
    Sub,
    #[strum(serialize = "_*_")]
    Mul,
    #[strum(serialize = "_/_")]
    Div,
    #[strum(serialize = "_%_")]
    Mod,
}

/// Relation operators. Defined separately since these always produce a bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RelOp {
    #[strum(serialize = "_<_")]
    Lt,
    #[strum(serialize = "_<=_")]
    Le,
    #[strum(serialize = "_>_")]
    Gt,
    #[strum(serialize = "_>=_")]
    Ge,
    #[strum(serialize = "_==_")]
    Eq,
    #[strum(serialize = "_!=_")]
    Ne,
    #[strum(serialize = "_in_")]
    In,
}

/// The comprehension macros that expand to explicit loop nodes.
///
/// `has` and `dyn` are handled separately: `has` becomes [`Expr::Has`] and
/// `dyn` disappears entirely (identity at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MacroKind {
    All,
    Exists,
    ExistsOne,
    Filter,
    Map,
}

/// An expression in the parse tree.
///
/// Variant names follow the grammar's production labels: `member_dot`,
/// `ident_arg`, `dot_ident`, `list_lit`, and so on. Parenthesized groups are
/// folded away by the parser and have no node of their own.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i64),
    UintLit(u64),
    DoubleLit(f64),
    StringLit(Arc<str>),
    BytesLit(Arc<[u8]>),
    BoolLit(bool),
    NullLit,
    /// A bare identifier reference.
    Ident(String),
    /// A leading-dot qualified name: `.name`. Resolution skips the package
    /// prefix and goes straight to the root bindings.
    DotIdent(String),
    /// Field or key access: `e.f`.
    MemberDot {
        object: Box<ExprNode>,
        field: String,
    },
    /// Method-form call: `e.f(args...)`. Dispatches to the same registry
    /// entry as the function form with the receiver prepended.
    MemberDotArg {
        object: Box<ExprNode>,
        method: String,
        args: Vec<ExprNode>,
    },
    /// Index access: `e[i]`.
    MemberIndex {
        object: Box<ExprNode>,
        index: Box<ExprNode>,
    },
    /// Message construction with field initializers: `a.b.Type{f: 1}`.
    /// The dotted type path is flattened by the parser.
    MemberObject {
        type_name: String,
        fields: Vec<(String, ExprNode)>,
    },
    /// Free function call: `f(args...)`.
    IdentArg {
        function: String,
        args: Vec<ExprNode>,
    },
    /// Leading-dot qualified call: `.f(args...)`.
    DotIdentArg {
        function: String,
        args: Vec<ExprNode>,
    },
    UnaryNot(Box<ExprNode>),
    UnaryNeg(Box<ExprNode>),
    Arith {
        op: ArithOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Relation {
        op: RelOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    /// `&&` with commutative error absorption.
    And {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    /// `||` with commutative error absorption.
    Or {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    /// Ternary `c ? a : b`. Exactly one branch is evaluated.
    Conditional {
        cond: Box<ExprNode>,
        then: Box<ExprNode>,
        orelse: Box<ExprNode>,
    },
    ListLit(Vec<ExprNode>),
    MapLit(Vec<(ExprNode, ExprNode)>),
    /// An expanded comprehension macro: `e.all(x, P)` and friends.
    ///
    /// `var` is bound to each element of `iter` in a fresh activation layer
    /// while `body` is evaluated under the macro's short-circuit policy.
    /// Produced by the rewriter, never by the parser.
    Comprehension {
        kind: MacroKind,
        var: String,
        iter: Box<ExprNode>,
        body: Box<ExprNode>,
    },
    /// The expanded `has(e.f)` macro. The operand is always a `MemberDot`
    /// or `MemberIndex` node; lookup failures collapse to `false`.
    Has(Box<ExprNode>),
}
