//! Resource bounds shared by the parser and the engines.

/// Default limit on nested subexpressions.
///
/// The language's conformance suite contains expressions thousands of
/// levels deep, so the default is deliberately generous; hosts embedding
/// untrusted expressions can lower it per environment.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 2500;
