//! The CEL value algebra: the tagged value type, its arithmetic and
//! comparison matrices, and the container types behind lists, maps, and
//! messages.
//!
//! Every operation here is total over `(Value, Value)` pairs: combinations
//! without a defined overload return a `no-such-overload` error rather than
//! attempting promotion. Int and uint arithmetic is range-checked on every
//! site; wraparound never escapes.

use std::{cmp::Ordering, fmt, sync::Arc};

use ahash::RandomState;
use indexmap::IndexMap;

use crate::{
    ast::{ArithOp, RelOp},
    error::{ErrorKind, EvalError, EvalResult},
    time::{Duration, Timestamp},
};

/// A reified type handle, the result of `type(x)`.
///
/// Message types are carried by name; all other variants are singletons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CelType {
    Bool,
    Int,
    Uint,
    Double,
    String,
    Bytes,
    Duration,
    Timestamp,
    List,
    Map,
    Null,
    Type,
    Message(Arc<str>),
}

impl CelType {
    /// Resolves a type name as written in annotations or expressions.
    ///
    /// Accepts both the CEL spellings (`int`, `null_type`, ...) and the
    /// well-known protobuf wrapper names the original environment folds in.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" | "google.protobuf.BoolValue" => Self::Bool,
            "int" | "google.protobuf.Int32Value" | "google.protobuf.Int64Value" => Self::Int,
            "uint" | "google.protobuf.UInt32Value" | "google.protobuf.UInt64Value" => Self::Uint,
            "double" | "google.protobuf.FloatValue" | "google.protobuf.DoubleValue" => Self::Double,
            "string" | "google.protobuf.StringValue" => Self::String,
            "bytes" | "google.protobuf.BytesValue" => Self::Bytes,
            "duration" | "google.protobuf.Duration" => Self::Duration,
            "timestamp" | "google.protobuf.Timestamp" => Self::Timestamp,
            "list" | "list_type" | "google.protobuf.ListValue" => Self::List,
            "map" | "map_type" | "google.protobuf.Struct" => Self::Map,
            "null_type" => Self::Null,
            "type" => Self::Type,
            _ => return None,
        })
    }
}

impl fmt::Display for CelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Uint => f.write_str("uint"),
            Self::Double => f.write_str("double"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::Duration => f.write_str("duration"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::List => f.write_str("list"),
            Self::Map => f.write_str("map"),
            Self::Null => f.write_str("null_type"),
            Self::Type => f.write_str("type"),
            Self::Message(name) => f.write_str(name),
        }
    }
}

/// A legal CEL map key. The variants are deliberately distinct: `{1: v}` and
/// `{1u: v}` hold different keys, and a lookup never crosses the tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    String(Arc<str>),
}

impl MapKey {
    /// Converts a value to a key, rejecting types outside the key domain.
    pub fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Uint(u) => Ok(Self::Uint(*u)),
            Value::String(s) => Ok(Self::String(s.clone())),
            other => Err(EvalError::new(
                ErrorKind::TypeError,
                format!("unsupported key type: {}", other.type_of()),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Uint(u) => Value::Uint(*u),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}u"),
            Self::String(s) => write!(f, "'{s}'"),
        }
    }
}

/// An insertion-ordered CEL map. Frozen at construction; duplicate keys are
/// rejected rather than overwritten.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Map {
    entries: IndexMap<MapKey, Value, RandomState>,
}

impl Map {
    /// Builds a map from evaluated key/value pairs, validating the key
    /// domain and refusing duplicates.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Result<Self, EvalError> {
        let pairs = pairs.into_iter();
        let mut entries = IndexMap::with_capacity_and_hasher(pairs.size_hint().0, RandomState::new());
        for (key, value) in pairs {
            let key = MapKey::from_value(&key)?;
            if entries.contains_key(&key) {
                return Err(EvalError::new(
                    ErrorKind::InvalidArgument,
                    format!("repeated key: {key}"),
                ));
            }
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order. Comprehensions rely on this order being
    /// stable within an evaluation (and across evaluations of the same map).
    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }
}

impl FromIterator<(MapKey, Value)> for Map {
    fn from_iter<T: IntoIterator<Item = (MapKey, Value)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A named struct with field-by-name access.
///
/// Without a descriptor set there is no schema: any field the message does
/// not carry is treated as undeclared, so plain access errors with
/// `no-such-field` while `has()` absorbs the miss to `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub type_name: Arc<str>,
    fields: IndexMap<Arc<str>, Value, RandomState>,
}

impl Message {
    pub fn new(type_name: Arc<str>, fields: impl IntoIterator<Item = (Arc<str>, Value)>) -> Self {
        Self {
            type_name,
            fields: fields.into_iter().collect(),
        }
    }

    pub fn field(&self, name: &str) -> Result<&Value, EvalError> {
        self.fields
            .get(name)
            .ok_or_else(|| EvalError::no_such_field(name))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.fields.iter()
    }
}

/// Primary value type: one tagged variant per CEL type.
///
/// Collection payloads sit behind `Arc` so values clone cheaply, compiled
/// closure graphs stay `Send + Sync`, and nothing is ever mutated after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    Duration(Duration),
    Timestamp(Timestamp),
    List(Arc<[Value]>),
    Map(Arc<Map>),
    Null,
    Type(CelType),
    Message(Arc<Message>),
}

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(b.into())
    }

    pub fn list(items: impl Into<Arc<[Value]>>) -> Self {
        Self::List(items.into())
    }

    pub fn map(map: Map) -> Self {
        Self::Map(Arc::new(map))
    }

    pub fn type_of(&self) -> CelType {
        match self {
            Self::Bool(_) => CelType::Bool,
            Self::Int(_) => CelType::Int,
            Self::Uint(_) => CelType::Uint,
            Self::Double(_) => CelType::Double,
            Self::String(_) => CelType::String,
            Self::Bytes(_) => CelType::Bytes,
            Self::Duration(_) => CelType::Duration,
            Self::Timestamp(_) => CelType::Timestamp,
            Self::List(_) => CelType::List,
            Self::Map(_) => CelType::Map,
            Self::Null => CelType::Null,
            Self::Type(_) => CelType::Type,
            Self::Message(m) => CelType::Message(m.type_name.clone()),
        }
    }

    /// Unary `-`. Bool and uint negation are rejected outright.
    pub fn negate(&self) -> EvalResult {
        match self {
            Self::Int(i) => i.checked_neg().map(Self::Int).ok_or_else(EvalError::overflow),
            Self::Double(d) => Ok(Self::Double(-d)),
            other => Err(EvalError::no_such_unary_overload("-_", other)),
        }
    }

    /// Unary `!`. Defined for bool only.
    pub fn logical_not(&self) -> EvalResult {
        match self {
            Self::Bool(b) => Ok(Self::Bool(!b)),
            other => Err(EvalError::no_such_unary_overload("!_", other)),
        }
    }

    /// Binary arithmetic, dispatched over the `(tag, tag)` pair.
    ///
    /// Mixed numeric types are never promoted: `1 + 1u` is an overload
    /// error, not `2`.
    pub fn arith(op: ArithOp, left: &Self, right: &Self) -> EvalResult {
        match (op, left, right) {
            (_, Self::Int(a), Self::Int(b)) => int_arith(op, *a, *b),
            (_, Self::Uint(a), Self::Uint(b)) => uint_arith(op, *a, *b),
            (_, Self::Double(a), Self::Double(b)) => double_arith(op, *a, *b, left, right),
            (ArithOp::Add, Self::String(a), Self::String(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Ok(Self::string(s))
            }
            (ArithOp::Add, Self::Bytes(a), Self::Bytes(b)) => {
                let mut v = Vec::with_capacity(a.len() + b.len());
                v.extend_from_slice(a);
                v.extend_from_slice(b);
                Ok(Self::bytes(v))
            }
            (ArithOp::Add, Self::List(a), Self::List(b)) => {
                let mut items = Vec::with_capacity(a.len() + b.len());
                items.extend_from_slice(a);
                items.extend_from_slice(b);
                Ok(Self::list(items))
            }
            (ArithOp::Add, Self::Duration(a), Self::Duration(b)) => a.checked_add(*b).map(Self::Duration),
            (ArithOp::Sub, Self::Duration(a), Self::Duration(b)) => a.checked_sub(*b).map(Self::Duration),
            (ArithOp::Add, Self::Timestamp(t), Self::Duration(d))
            | (ArithOp::Add, Self::Duration(d), Self::Timestamp(t)) => t.checked_add(*d).map(Self::Timestamp),
            (ArithOp::Sub, Self::Timestamp(t), Self::Duration(d)) => t.checked_sub(*d).map(Self::Timestamp),
            (ArithOp::Sub, Self::Timestamp(a), Self::Timestamp(b)) => a.since(*b).map(Self::Duration),
            _ => Err(EvalError::no_such_overload(&op.to_string(), left, right)),
        }
    }

    /// `==`, with commutative error absorption inside lists and maps.
    ///
    /// Null compares false against everything but null. Other distinct type
    /// pairs have no equality overload at all.
    pub fn equals(left: &Self, right: &Self) -> Result<bool, EvalError> {
        match (left, right) {
            (Self::Null, Self::Null) => Ok(true),
            (Self::Null, _) | (_, Self::Null) => Ok(false),
            (Self::Bool(a), Self::Bool(b)) => Ok(a == b),
            (Self::Int(a), Self::Int(b)) => Ok(a == b),
            (Self::Uint(a), Self::Uint(b)) => Ok(a == b),
            (Self::Double(a), Self::Double(b)) => Ok(a == b),
            (Self::String(a), Self::String(b)) => Ok(a == b),
            (Self::Bytes(a), Self::Bytes(b)) => Ok(a == b),
            (Self::Duration(a), Self::Duration(b)) => Ok(a == b),
            (Self::Timestamp(a), Self::Timestamp(b)) => Ok(a == b),
            (Self::Type(a), Self::Type(b)) => Ok(a == b),
            (Self::List(a), Self::List(b)) => list_equals(a, b),
            (Self::Map(a), Self::Map(b)) => map_equals(a, b),
            (Self::Message(a), Self::Message(b)) => message_equals(a, b),
            _ => Err(EvalError::no_such_overload("_==_", left, right)),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. Same-type scalars only.
    pub fn compare(left: &Self, right: &Self) -> Result<Ordering, EvalError> {
        let ordering = match (left, right) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Uint(a), Self::Uint(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a
                .partial_cmp(b)
                .ok_or_else(|| EvalError::no_such_overload("_<_", left, right))?,
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::Duration(a), Self::Duration(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            _ => return Err(EvalError::no_such_overload("_<_", left, right)),
        };
        Ok(ordering)
    }

    /// Applies a relation operator, reducing `<`/`<=`/`>`/`>=` through
    /// [`Value::compare`] and `in` through membership.
    pub fn relation(op: RelOp, left: &Self, right: &Self) -> EvalResult {
        let outcome = match op {
            RelOp::Eq => Self::equals(left, right)?,
            RelOp::Ne => !Self::equals(left, right)?,
            RelOp::Lt => Self::compare(left, right)? == Ordering::Less,
            RelOp::Le => Self::compare(left, right)? != Ordering::Greater,
            RelOp::Gt => Self::compare(left, right)? == Ordering::Greater,
            RelOp::Ge => Self::compare(left, right)? != Ordering::Less,
            RelOp::In => return Self::membership(left, right),
        };
        Ok(Self::Bool(outcome))
    }

    /// `x in e`: elementwise equality for lists, key membership for maps.
    ///
    /// A mismatched element error is absorbed when a later element matches,
    /// mirroring the `exists` comprehension policy.
    fn membership(needle: &Self, haystack: &Self) -> EvalResult {
        match haystack {
            Self::List(items) => {
                let mut deferred: Option<EvalError> = None;
                for item in items.iter() {
                    match Self::equals(needle, item) {
                        Ok(true) => return Ok(Self::Bool(true)),
                        Ok(false) => {}
                        Err(err) => deferred = deferred.or(Some(err)),
                    }
                }
                match deferred {
                    Some(err) => Err(err),
                    None => Ok(Self::Bool(false)),
                }
            }
            Self::Map(map) => match MapKey::from_value(needle) {
                Ok(key) => Ok(Self::Bool(map.contains_key(&key))),
                Err(_) => Err(EvalError::no_such_overload("_in_", needle, haystack)),
            },
            Self::Message(message) => match needle {
                Self::String(name) => Ok(Self::Bool(message.has_field(name))),
                _ => Err(EvalError::no_such_overload("_in_", needle, haystack)),
            },
            _ => Err(EvalError::no_such_overload("_in_", needle, haystack)),
        }
    }

    /// Index access `e[i]`.
    pub fn index(&self, index: &Self) -> EvalResult {
        match self {
            Self::List(items) => {
                let i = match index {
                    Self::Int(i) => usize::try_from(*i).ok(),
                    Self::Uint(u) => usize::try_from(*u).ok(),
                    _ => {
                        return Err(EvalError::no_such_overload("_[_]", self, index));
                    }
                };
                match i.and_then(|i| items.get(i)) {
                    Some(item) => Ok(item.clone()),
                    None => Err(EvalError::new(
                        ErrorKind::InvalidArgument,
                        format!("index out of range: {index} with length {}", items.len()),
                    )),
                }
            }
            Self::Map(map) => {
                let key = MapKey::from_value(index)?;
                match map.get(&key) {
                    Some(value) => Ok(value.clone()),
                    None => Err(EvalError::no_such_key(&key)),
                }
            }
            Self::Message(message) => match index {
                Self::String(name) => message.field(name).cloned(),
                _ => Err(EvalError::no_such_overload("_[_]", self, index)),
            },
            _ => Err(EvalError::no_such_overload("_[_]", self, index)),
        }
    }

    /// Field access `e.f`: a string-key lookup on maps, typed field access
    /// on messages.
    pub fn field(&self, name: &str) -> EvalResult {
        match self {
            Self::Map(map) => {
                let key = MapKey::String(Arc::from(name));
                match map.get(&key) {
                    Some(value) => Ok(value.clone()),
                    None => Err(EvalError::no_such_key(&key)),
                }
            }
            Self::Message(message) => message.field(name).cloned(),
            other => Err(EvalError::new(
                ErrorKind::TypeError,
                format!("type '{}' does not support field selection", other.type_of()),
            )),
        }
    }

    /// `size(e)`: code points for strings, bytes for bytes, element and
    /// entry counts for containers.
    pub fn size(&self) -> EvalResult {
        let n = match self {
            Self::String(s) => s.chars().count(),
            Self::Bytes(b) => b.len(),
            Self::List(items) => items.len(),
            Self::Map(map) => map.len(),
            other => return Err(EvalError::no_such_unary_overload("size", other)),
        };
        i64::try_from(n)
            .map(Self::Int)
            .map_err(|_| EvalError::overflow())
    }

    /// The bool payload, or a type error naming `context`.
    pub fn as_bool(&self, context: &str) -> Result<bool, EvalError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(EvalError::new(
                ErrorKind::TypeError,
                format!("{context} requires bool, not {}", other.type_of()),
            )),
        }
    }
}

/// Renders a value as CEL source-like text. Used by `string()` conversion
/// for scalars and by diagnostics for everything else.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Double(d) => f.write_str(&format_double(*d)),
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => {
                f.write_str("b\"")?;
                for byte in b.iter() {
                    if byte.is_ascii_graphic() || *byte == b' ' {
                        write!(f, "{}", *byte as char)?;
                    } else {
                        write!(f, "\\x{byte:02x}")?;
                    }
                }
                f.write_str("\"")
            }
            Self::Duration(d) => write!(f, "{d}"),
            Self::Timestamp(t) => write!(f, "{t}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Null => f.write_str("null"),
            Self::Type(t) => write!(f, "{t}"),
            Self::Message(m) => {
                write!(f, "{}{{", m.type_name)?;
                for (i, (name, value)) in m.fields().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Shortest round-trip rendering for doubles, keeping a trailing `.0` so
/// integral doubles stay visibly doubles.
pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_owned();
    }
    if d.is_infinite() {
        return if d > 0.0 { "+Inf" } else { "-Inf" }.to_owned();
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(d).to_owned()
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> EvalResult {
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => {
            if b == 0 {
                return Err(EvalError::divide_by_zero());
            }
            // Truncation toward zero, the Go rule. i64::MIN / -1 is the one
            // in-range divisor pair that still overflows.
            a.checked_div(b)
        }
        ArithOp::Mod => {
            if b == 0 {
                return Err(EvalError::divide_by_zero());
            }
            // Sign follows the dividend; i64::MIN % -1 is 0, not overflow.
            Some(a.wrapping_rem(b))
        }
    };
    result.map(Value::Int).ok_or_else(EvalError::overflow)
}

fn uint_arith(op: ArithOp, a: u64, b: u64) -> EvalResult {
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => {
            if b == 0 {
                return Err(EvalError::divide_by_zero());
            }
            Some(a / b)
        }
        ArithOp::Mod => {
            if b == 0 {
                return Err(EvalError::divide_by_zero());
            }
            Some(a % b)
        }
    };
    result.map(Value::Uint).ok_or_else(EvalError::overflow)
}

fn double_arith(op: ArithOp, a: f64, b: f64, left: &Value, right: &Value) -> EvalResult {
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        // Division by zero is +Inf, never an error.
        ArithOp::Div => {
            if b == 0.0 {
                f64::INFINITY
            } else {
                a / b
            }
        }
        ArithOp::Mod => {
            return Err(EvalError::no_such_overload("_%_", left, right));
        }
    };
    Ok(Value::Double(result))
}

/// Elementwise equality with the `&&` absorption rule: a mismatched-type
/// element error disappears when some other element pair already decides
/// the answer is `false`.
fn list_equals(a: &[Value], b: &[Value]) -> Result<bool, EvalError> {
    if a.len() != b.len() {
        return Ok(false);
    }
    let mut deferred: Option<EvalError> = None;
    for (x, y) in a.iter().zip(b.iter()) {
        match Value::equals(x, y) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(err) => deferred = deferred.or(Some(err)),
        }
    }
    match deferred {
        Some(err) => Err(err),
        None => Ok(true),
    }
}

/// Keywise equality: differing key sets are plainly unequal, value errors
/// absorb exactly as in [`list_equals`].
fn map_equals(a: &Map, b: &Map) -> Result<bool, EvalError> {
    if a.len() != b.len() || !a.keys().all(|k| b.contains_key(k)) {
        return Ok(false);
    }
    let mut deferred: Option<EvalError> = None;
    for (key, x) in a.iter() {
        let y = b.get(key).expect("key sets already compared");
        match Value::equals(x, y) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(err) => deferred = deferred.or(Some(err)),
        }
    }
    match deferred {
        Some(err) => Err(err),
        None => Ok(true),
    }
}

fn message_equals(a: &Message, b: &Message) -> Result<bool, EvalError> {
    if a.type_name != b.type_name {
        return Ok(false);
    }
    let a_fields: Map = a
        .fields()
        .map(|(k, v)| (MapKey::String(k.clone()), v.clone()))
        .collect();
    let b_fields: Map = b
        .fields()
        .map(|(k, v)| (MapKey::String(k.clone()), v.clone()))
        .collect();
    map_equals(&a_fields, &b_fields)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    fn uint(u: u64) -> Value {
        Value::Uint(u)
    }

    #[test]
    fn int_addition_overflow() {
        let err = Value::arith(ArithOp::Add, &int(i64::MAX), &int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn int_negation_overflow() {
        let err = int(i64::MIN).negate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn int_division_truncates_toward_zero() {
        // The Go identity: (a/b)*b + a%b == a, with sign(a%b) following a.
        for (a, b) in [(7i64, 2i64), (-7, 2), (7, -2), (-7, -2), (43, 5), (-43, 5)] {
            let q = match Value::arith(ArithOp::Div, &int(a), &int(b)).unwrap() {
                Value::Int(q) => q,
                other => panic!("expected int, got {other:?}"),
            };
            let r = match Value::arith(ArithOp::Mod, &int(a), &int(b)).unwrap() {
                Value::Int(r) => r,
                other => panic!("expected int, got {other:?}"),
            };
            assert_eq!(q * b + r, a, "{a}/{b}");
            assert!(r == 0 || (r < 0) == (a < 0), "sign of {a}%{b} = {r}");
        }
    }

    #[test]
    fn int_min_division_by_minus_one_overflows() {
        let err = Value::arith(ArithOp::Div, &int(i64::MIN), &int(-1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
        // ...but the matching modulus is 0, per the Go rule.
        assert_eq!(Value::arith(ArithOp::Mod, &int(i64::MIN), &int(-1)).unwrap(), int(0));
    }

    #[test]
    fn int_division_by_zero() {
        let err = Value::arith(ArithOp::Div, &int(84), &int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivideByZero);
        let err = Value::arith(ArithOp::Mod, &int(84), &int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivideByZero);
    }

    #[test]
    fn uint_subtraction_underflow() {
        let err = Value::arith(ArithOp::Sub, &uint(0), &uint(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn uint_negation_is_not_overloaded() {
        let err = uint(42).negate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn bool_negation_is_not_overloaded() {
        let err = Value::Bool(false).negate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn double_division_by_zero_is_infinity() {
        let result = Value::arith(ArithOp::Div, &Value::Double(1.0), &Value::Double(0.0)).unwrap();
        assert_eq!(result, Value::Double(f64::INFINITY));
    }

    #[test]
    fn double_modulo_is_not_overloaded() {
        let err = Value::arith(ArithOp::Mod, &Value::Double(1.0), &Value::Double(2.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn mixed_numeric_arith_is_not_promoted() {
        let err = Value::arith(ArithOp::Add, &int(1), &uint(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
        let err = Value::arith(ArithOp::Add, &int(1), &Value::Double(1.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn string_concatenation() {
        let result = Value::arith(ArithOp::Add, &Value::string("Hello, "), &Value::string("World")).unwrap();
        assert_eq!(result, Value::string("Hello, World"));
    }

    #[test]
    fn size_counts_code_points_not_bytes() {
        assert_eq!(Value::string("héllo").size().unwrap(), int(5));
        assert_eq!(Value::bytes("héllo".as_bytes().to_vec()).size().unwrap(), int(6));
    }

    #[test]
    fn mixed_equality_is_an_error() {
        let err = Value::equals(&int(1), &Value::string("1")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
        let err = Value::equals(&int(1), &uint(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn null_equality() {
        assert!(Value::equals(&Value::Null, &Value::Null).unwrap());
        assert!(!Value::equals(&Value::Null, &int(0)).unwrap());
        assert!(!Value::equals(&int(0), &Value::Null).unwrap());
    }

    #[test]
    fn list_equality_short_circuits_element_errors() {
        // [1, "a"] == [2, "b"]: the int mismatch decides false before the
        // cross-type pair could matter; no error escapes.
        let left = Value::list(vec![int(1), Value::string("a")]);
        let right = Value::list(vec![int(2), int(3)]);
        assert!(!Value::equals(&left, &right).unwrap());

        // Same length, only a cross-type pair: the error surfaces.
        let left = Value::list(vec![int(1)]);
        let right = Value::list(vec![Value::string("1")]);
        let err = Value::equals(&left, &right).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn list_length_mismatch_is_false_without_errors() {
        let left = Value::list(vec![int(1), Value::string("a")]);
        let right = Value::list(vec![int(1)]);
        assert!(!Value::equals(&left, &right).unwrap());
    }

    #[test]
    fn map_keys_are_type_distinct() {
        let map = Map::from_pairs(vec![(int(1), Value::string("v"))]).unwrap();
        assert!(map.get(&MapKey::Uint(1)).is_none());
        assert!(map.get(&MapKey::Int(1)).is_some());
    }

    #[test]
    fn map_duplicate_keys_rejected() {
        let err = Map::from_pairs(vec![(int(1), int(1)), (int(1), int(2))]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn map_missing_key_lookup() {
        let map = Value::map(Map::from_pairs(vec![(Value::string("k"), Value::string("v"))]).unwrap());
        let err = map.index(&Value::string("missing")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchKey);
    }

    #[test]
    fn list_index_bounds() {
        let list = Value::list(vec![int(1), int(2)]);
        assert_eq!(list.index(&int(1)).unwrap(), int(2));
        assert_eq!(list.index(&uint(0)).unwrap(), int(1));
        let err = list.index(&int(2)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        let err = list.index(&int(-1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn membership_absorbs_errors_when_found() {
        // 3 in [1, "a", 3]: the "a" comparison errs, the later hit wins.
        let list = Value::list(vec![int(1), Value::string("a"), int(3)]);
        assert_eq!(Value::relation(RelOp::In, &int(3), &list).unwrap(), Value::Bool(true));
        // 4 in [1, "a", 3]: no hit, so the deferred error surfaces.
        let err = Value::relation(RelOp::In, &int(4), &list).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn ordering_rejects_lists() {
        let err = Value::compare(&Value::list(vec![]), &Value::list(vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchOverload);
    }

    #[test]
    fn type_handles_compare_by_variant() {
        assert!(Value::equals(&Value::Type(CelType::Int), &Value::Type(CelType::Int)).unwrap());
        assert!(!Value::equals(&Value::Type(CelType::Int), &Value::Type(CelType::Uint)).unwrap());
    }
}
