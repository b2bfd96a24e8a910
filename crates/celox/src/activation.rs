//! Layered binding environments consulted during evaluation.
//!
//! An activation is an immutable cons-like chain: a base layer built by the
//! environment (package, annotations, registered functions), a context layer
//! of host-supplied variables, and transient one-name overlays introduced by
//! comprehension macros. Name lookup walks the chain from the innermost
//! layer outward, so a comprehension variable can never leak into an
//! unrelated macro's body.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    error::{EvalError, EvalResult},
    value::{CelType, Value},
};

/// A host-registered callable. Arguments arrive fully evaluated, in source
/// order; the receiver of a method-form call is argument zero.
pub type CelFunction = Arc<dyn Fn(&[Value]) -> EvalResult + Send + Sync>;

/// One layer of bindings plus a pointer to its parent.
#[derive(Clone, Default)]
pub struct Activation {
    package: Option<Arc<str>>,
    /// Declared types for names that may arrive without a value binding.
    /// Resolution yields the reified type handle for these, which is what
    /// makes `type(x) == T` comparisons and message construction work.
    annotations: AHashMap<Arc<str>, CelType>,
    variables: AHashMap<Arc<str>, Value>,
    functions: AHashMap<Arc<str>, CelFunction>,
    parent: Option<Arc<Activation>>,
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("package", &self.package)
            .field("annotations", &self.annotations.keys())
            .field("variables", &self.variables.keys())
            .field("functions", &self.functions.keys())
            .field("parent", &self.parent)
            .finish()
    }
}

impl Activation {
    /// Builds the base layer: package name, annotations, and functions from
    /// the environment, with the standard type names pre-bound.
    pub fn base(
        package: Option<&str>,
        annotations: impl IntoIterator<Item = (Arc<str>, CelType)>,
        functions: impl IntoIterator<Item = (Arc<str>, CelFunction)>,
    ) -> Self {
        let mut layer = Self {
            package: package.map(Arc::from),
            annotations: annotations.into_iter().collect(),
            variables: AHashMap::new(),
            functions: functions.into_iter().collect(),
            parent: None,
        };
        for name in [
            "bool", "int", "uint", "double", "string", "bytes", "duration", "timestamp", "list", "map",
            "null_type", "type",
        ] {
            let handle = CelType::from_name(name).expect("standard type names always resolve");
            layer.variables.insert(Arc::from(name), Value::Type(handle));
        }
        layer
    }

    /// Returns a new activation layered atop this one with the given
    /// variable bindings. `self` is untouched.
    #[must_use]
    pub fn extend(self: &Arc<Self>, variables: impl IntoIterator<Item = (Arc<str>, Value)>) -> Self {
        Self {
            package: None,
            annotations: AHashMap::new(),
            variables: variables.into_iter().collect(),
            functions: AHashMap::new(),
            parent: Some(self.clone()),
        }
    }

    /// A single-binding overlay for a comprehension variable.
    #[must_use]
    pub fn bind_one(self: &Arc<Self>, name: Arc<str>, value: Value) -> Self {
        let mut variables = AHashMap::with_capacity(1);
        variables.insert(name, value);
        Self {
            package: None,
            annotations: AHashMap::new(),
            variables,
            functions: AHashMap::new(),
            parent: Some(self.clone()),
        }
    }

    /// The package prefix for unqualified resolution, from the nearest
    /// layer that declares one.
    pub fn package(&self) -> Option<&str> {
        let mut layer = Some(self);
        while let Some(current) = layer {
            if let Some(package) = &current.package {
                return Some(package);
            }
            layer = current.parent.as_deref();
        }
        None
    }

    /// Looks up one exact name across the layer chain: value bindings
    /// first, then annotations (as type handles).
    fn lookup(&self, name: &str) -> Option<Value> {
        let mut layer = Some(self);
        while let Some(current) = layer {
            if let Some(value) = current.variables.get(name) {
                return Some(value.clone());
            }
            if let Some(annotated) = current.annotations.get(name) {
                return Some(Value::Type(annotated.clone()));
            }
            layer = current.parent.as_deref();
        }
        None
    }

    /// The value the package name itself is bound to, when there is one.
    ///
    /// When a host binds a whole document to the package name (the CLI's
    /// jq-style mode), its top-level entries resolve as unqualified names.
    fn package_value(&self) -> Option<Value> {
        self.package().and_then(|package| self.lookup(package))
    }

    /// A field of the package-bound map, when the package resolves to one.
    fn package_field(&self, name: &str) -> Option<Value> {
        match self.package_value() {
            Some(Value::Map(map)) => map.get(&crate::value::MapKey::String(Arc::from(name))).cloned(),
            Some(Value::Message(message)) => message.field(name).ok().cloned(),
            _ => None,
        }
    }

    /// Resolves a simple identifier, trying the package-qualified spelling
    /// before the bare one.
    pub fn resolve(&self, name: &str) -> EvalResult {
        if let Some(package) = self.package() {
            if let Some(value) = self.lookup(&format!("{package}.{name}")) {
                return Ok(value);
            }
        }
        if let Some(value) = self.package_field(name) {
            return Ok(value);
        }
        self.lookup(name)
            .ok_or_else(|| EvalError::no_such_identifier(name))
    }

    /// Resolves a dotted path by longest bound prefix.
    ///
    /// Tries `a.b.c` as a single bound name, then `a.b` and `a`,
    /// package-qualified spellings before bare ones at each width. Returns
    /// the bound value and how many leading parts it consumed; the caller
    /// applies the remaining parts as field accesses.
    pub fn resolve_dotted(&self, parts: &[&str]) -> Result<(Value, usize), EvalError> {
        debug_assert!(!parts.is_empty());
        let package = self.package().map(str::to_owned);
        for width in (1..=parts.len()).rev() {
            let joined = parts[..width].join(".");
            if let Some(package) = &package {
                if let Some(value) = self.lookup(&format!("{package}.{joined}")) {
                    return Ok((value, width));
                }
            }
            if let Some(value) = self.lookup(&joined) {
                return Ok((value, width));
            }
        }
        if let Some(value) = self.package_field(parts[0]) {
            return Ok((value, 1));
        }
        Err(EvalError::no_such_identifier(&parts.join(".")))
    }

    /// Resolves a leading-dot name: the bare binding, or an entry of the
    /// package-bound document.
    pub fn resolve_root(&self, name: &str) -> EvalResult {
        if let Some(value) = self.lookup(name) {
            return Ok(value);
        }
        self.package_field(name)
            .ok_or_else(|| EvalError::no_such_identifier(name))
    }

    /// Finds a registered function by name, innermost layer first.
    pub fn function(&self, name: &str) -> Option<&CelFunction> {
        let mut layer = Some(self);
        while let Some(current) = layer {
            if let Some(function) = current.functions.get(name) {
                return Some(function);
            }
            layer = current.parent.as_deref();
        }
        None
    }

    /// The declared type of a name, if annotated anywhere in the chain.
    pub fn annotation(&self, name: &str) -> Option<&CelType> {
        let mut layer = Some(self);
        while let Some(current) = layer {
            if let Some(annotated) = current.annotations.get(name) {
                return Some(annotated);
            }
            layer = current.parent.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    fn base_with(package: Option<&str>, vars: &[(&str, Value)]) -> Arc<Activation> {
        let base = Activation::base(package, [], []);
        let base = Arc::new(base);
        Arc::new(base.extend(vars.iter().map(|(name, value)| (Arc::from(*name), value.clone()))))
    }

    #[test]
    fn resolve_simple_binding() {
        let activation = base_with(None, &[("name", Value::string("World"))]);
        assert_eq!(activation.resolve("name").unwrap(), Value::string("World"));
        let err = activation.resolve("missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchIdentifier);
    }

    #[test]
    fn standard_type_names_are_bound() {
        let activation = base_with(None, &[]);
        assert_eq!(activation.resolve("int").unwrap(), Value::Type(CelType::Int));
        assert_eq!(activation.resolve("null_type").unwrap(), Value::Type(CelType::Null));
    }

    #[test]
    fn package_qualified_lookup_wins() {
        let activation = base_with(
            Some("jq"),
            &[("jq.name", Value::Int(1)), ("name", Value::Int(2))],
        );
        assert_eq!(activation.resolve("name").unwrap(), Value::Int(1));
    }

    #[test]
    fn dotted_lookup_prefers_longest_prefix() {
        let activation = base_with(
            None,
            &[
                ("a.b.c", Value::string("whole")),
                ("a", Value::string("short")),
            ],
        );
        let (value, width) = activation.resolve_dotted(&["a", "b", "c"]).unwrap();
        assert_eq!(value, Value::string("whole"));
        assert_eq!(width, 3);

        let (value, width) = activation.resolve_dotted(&["a", "x"]).unwrap();
        assert_eq!(value, Value::string("short"));
        assert_eq!(width, 1);
    }

    #[test]
    fn overlay_shadows_and_unwinds() {
        let outer = base_with(None, &[("x", Value::Int(1))]);
        let inner = Arc::new(outer.bind_one(Arc::from("x"), Value::Int(99)));
        assert_eq!(inner.resolve("x").unwrap(), Value::Int(99));
        // The outer layer is untouched by the overlay.
        assert_eq!(outer.resolve("x").unwrap(), Value::Int(1));
    }

    #[test]
    fn annotated_names_resolve_to_type_handles() {
        let base = Arc::new(Activation::base(
            None,
            [(Arc::from("x"), CelType::Uint)],
            [],
        ));
        assert_eq!(base.resolve("x").unwrap(), Value::Type(CelType::Uint));
    }
}
