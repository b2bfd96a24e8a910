use std::fmt::{self, Display};

use strum::{Display, EnumString, IntoStaticStr};

use crate::ast::Span;

/// Result type alias for operations that can produce an evaluation error.
pub type EvalResult = Result<crate::value::Value, EvalError>;

/// The stable tag attached to every evaluation error.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation is the kebab-case tag
/// (e.g. `NoSuchOverload` -> "no-such-overload"), which is the contract for
/// automated matching; the message text is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Source text rejected by the lexer or parser.
    Parse,
    /// An identifier with no binding in any activation layer.
    NoSuchIdentifier,
    /// A map lookup with a key that is absent from the map.
    NoSuchKey,
    /// A message field access for a field the message does not carry.
    NoSuchField,
    /// An operator applied to a type pair it is not defined for.
    NoSuchOverload,
    /// A call to a name that is neither a builtin nor a registered function.
    NoSuchFunction,
    /// Checked int64/uint64 arithmetic left the representable range.
    Overflow,
    /// Integer division or modulus by zero. Double division is never this.
    DivideByZero,
    /// Timestamp, duration, or numeric conversion outside the legal range.
    Range,
    /// A structurally invalid argument: bad regex, bad macro shape,
    /// duplicate map key, unknown timezone.
    InvalidArgument,
    /// A value of the wrong type where a specific type is required
    /// (e.g. a non-bool condition in `?:`).
    TypeError,
    /// A registered host function panicked or reported failure.
    FunctionError,
}

/// An evaluation error: a value-level outcome inside the evaluator.
///
/// Errors propagate through most operators but are absorbed at short-circuit
/// sites (`&&`, `||`, `?:`, comprehensions) when the other operand alone
/// forces the result. They become externally visible only at the top of
/// `Runner::evaluate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    /// Byte span in the source text, when the failing node is known.
    pub span: Option<Span>,
}

impl EvalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
        }
    }

    /// Attaches a source span, keeping an already-recorded one.
    ///
    /// The innermost failing node wins: once an error carries a location,
    /// enclosing nodes must not overwrite it on the way out.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }

    /// The conventional error for an operator applied to an unsupported
    /// type pair, phrased the way CEL conformance tests expect.
    pub fn no_such_overload(op: &str, left: &crate::value::Value, right: &crate::value::Value) -> Self {
        Self::new(
            ErrorKind::NoSuchOverload,
            format!(
                "found no matching overload for '{op}' applied to '({}, {})'",
                left.type_of(),
                right.type_of()
            ),
        )
    }

    pub fn no_such_unary_overload(op: &str, operand: &crate::value::Value) -> Self {
        Self::new(
            ErrorKind::NoSuchOverload,
            format!(
                "found no matching overload for '{op}' applied to '({})'",
                operand.type_of()
            ),
        )
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::Overflow, "overflow")
    }

    pub fn divide_by_zero() -> Self {
        Self::new(ErrorKind::DivideByZero, "divide by zero")
    }

    pub fn no_such_key(key: impl Display) -> Self {
        Self::new(ErrorKind::NoSuchKey, format!("no such key: {key}"))
    }

    pub fn no_such_field(field: &str) -> Self {
        Self::new(ErrorKind::NoSuchField, format!("no such field: '{field}'"))
    }

    pub fn no_such_identifier(name: &str) -> Self {
        Self::new(
            ErrorKind::NoSuchIdentifier,
            format!("undeclared reference to '{name}'"),
        )
    }
}

impl Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EvalError {}

/// A syntax error from `Environment::compile`.
///
/// Carries the one-based line and column of the offending token so the CLI
/// can render a caret diagnostic against the source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    /// Renders a multi-line diagnostic with the source line and a caret.
    pub fn error_text(&self, source: &str) -> String {
        let source_line = source.lines().nth(self.line.saturating_sub(1)).unwrap_or(source);
        format!(
            "ERROR: <input>:{}:{} {}\n    | {}\n    | {}^",
            self.line,
            self.column,
            self.message,
            source_line,
            ".".repeat(self.column.saturating_sub(1)),
        )
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for EvalError {
    fn from(err: ParseError) -> Self {
        Self::new(ErrorKind::Parse, err.to_string())
    }
}
