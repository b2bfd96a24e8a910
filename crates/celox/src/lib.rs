#![doc = include_str!("../../../README.md")]

mod activation;
mod adapter;
mod ast;
mod compile;
mod error;
mod eval;
mod functions;
mod limits;
mod parse;
mod prepare;
mod time;
mod value;

use std::sync::Arc;

use ahash::AHashMap;
use tracing::debug;

pub use crate::{
    activation::{Activation, CelFunction},
    adapter::{cel_to_json, json_to_cel},
    ast::{ArithOp, Expr, ExprNode, MacroKind, RelOp, Span},
    error::{ErrorKind, EvalError, EvalResult, ParseError},
    limits::DEFAULT_MAX_RECURSION_DEPTH,
    time::{Duration, Timestamp, register_tz_alias},
    value::{CelType, Map, MapKey, Message, Value},
};

/// A compiled parse tree, as returned by [`Environment::compile`].
pub type Ast = ExprNode;

/// Which execution engine a [`Runner`] uses.
///
/// Both produce identical values and error kinds for every input; the
/// transpiled engine trades one-time closure-graph construction for cheaper
/// repeated evaluation, which pays off in policy filters that run one
/// expression over large resource sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// Walk the prepared tree on every evaluation.
    #[default]
    Interpreted,
    /// Build a closure graph once in `program()`, invoke it per evaluation.
    Compiled,
}

/// Compilation context: package name, type annotations, engine choice, and
/// resource limits. Environments are cheap to build and reusable.
///
/// ```
/// use celox::{Environment, Value};
///
/// let env = Environment::new();
/// let ast = env.compile("size(name) > 4").unwrap();
/// let runner = env.program(ast).unwrap();
/// let result = runner.evaluate([("name", Value::string("World"))]).unwrap();
/// assert_eq!(result, Value::Bool(true));
/// ```
#[derive(Debug, Clone)]
pub struct Environment {
    package: Option<String>,
    annotations: AHashMap<Arc<str>, CelType>,
    engine: EngineKind,
    max_depth: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            package: None,
            annotations: AHashMap::new(),
            engine: EngineKind::default(),
            max_depth: limits::DEFAULT_MAX_RECURSION_DEPTH,
        }
    }

    /// Sets the package prefix used for unqualified name resolution.
    #[must_use]
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Declares a name's type. Annotated names resolve to their type handle
    /// until a context binding shadows them; message-typed annotations also
    /// enable `Name{field: ...}` construction.
    #[must_use]
    pub fn annotation(mut self, name: impl Into<Arc<str>>, ty: CelType) -> Self {
        self.annotations.insert(name.into(), ty);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Overrides the nested-subexpression limit enforced during parsing.
    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Parses CEL source into an AST. Purely syntactic: no activation is
    /// consulted and no names are resolved.
    pub fn compile(&self, source: &str) -> Result<Ast, ParseError> {
        debug!(source, "compiling expression");
        parse::parse(source, self.max_depth)
    }

    /// Packages an AST into a reusable [`Runner`] with no extra functions.
    pub fn program(&self, ast: Ast) -> Result<Runner, EvalError> {
        self.program_with_functions(ast, std::iter::empty::<(Arc<str>, CelFunction)>())
    }

    /// Packages an AST into a reusable [`Runner`], registering host
    /// functions for call dispatch. Macro expansion happens here, so a
    /// malformed macro shape fails program construction rather than every
    /// evaluation.
    pub fn program_with_functions<N>(
        &self,
        ast: Ast,
        functions: impl IntoIterator<Item = (N, CelFunction)>,
    ) -> Result<Runner, EvalError>
    where
        N: Into<Arc<str>>,
    {
        let prepared = prepare::expand_macros(ast)?;
        let base = Arc::new(Activation::base(
            self.package.as_deref(),
            self.annotations.iter().map(|(name, ty)| (name.clone(), ty.clone())),
            functions.into_iter().map(|(name, function)| (name.into(), function)),
        ));
        let engine = match self.engine {
            EngineKind::Interpreted => Engine::Interpreted(prepared),
            EngineKind::Compiled => {
                debug!("transpiling to closure graph");
                Engine::Compiled(compile::transpile(&prepared))
            }
        };
        Ok(Runner { base, engine })
    }
}

enum Engine {
    Interpreted(ExprNode),
    Compiled(compile::Thunk),
}

/// A compiled, reusable program. Evaluation is a pure function of the
/// bindings; a `Runner` is immutable and safe to share across threads
/// (provided registered functions are).
pub struct Runner {
    base: Arc<Activation>,
    engine: Engine,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").finish_non_exhaustive()
    }
}

impl Runner {
    /// Evaluates with the given variable bindings layered over the
    /// environment's base activation.
    ///
    /// The returned error, if any, carries a stable [`ErrorKind`] and the
    /// source span of the node that failed; it never panics and never
    /// aborts the host.
    pub fn evaluate<N>(&self, bindings: impl IntoIterator<Item = (N, Value)>) -> EvalResult
    where
        N: Into<Arc<str>>,
    {
        let activation = Arc::new(
            self.base
                .extend(bindings.into_iter().map(|(name, value)| (name.into(), value))),
        );
        let result = match &self.engine {
            Engine::Interpreted(ast) => eval::evaluate(ast, &activation),
            Engine::Compiled(thunk) => thunk(&activation),
        };
        debug!(ok = result.is_ok(), "evaluation finished");
        result
    }
}
