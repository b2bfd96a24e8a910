//! The JSON boundary: conversions between `serde_json::Value` and CEL
//! values.
//!
//! Inbound, JSON maps onto the nearest CEL type; strings stay strings even
//! when they look like timestamps (those require an explicit `timestamp()`
//! conversion). Outbound is not reversible: bytes become base64 text and
//! timestamps/durations their canonical string forms.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Number, Value as Json, json};

use crate::{
    error::{ErrorKind, EvalError},
    value::{Map, MapKey, Value},
};

/// Converts a parsed JSON document to a CEL value.
///
/// Integral numbers become `Int` (or `Uint` when only u64 can hold them);
/// anything with a fractional part becomes `Double`. Object key order is
/// preserved, so map iteration sees the document's own order.
pub fn json_to_cel(document: &Json) -> Value {
    match document {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::string(s.clone()),
        Json::Array(items) => Value::list(items.iter().map(json_to_cel).collect::<Vec<_>>()),
        Json::Object(entries) => {
            let map: Map = entries
                .iter()
                .map(|(key, value)| (MapKey::String(key.as_str().into()), json_to_cel(value)))
                .collect();
            Value::map(map)
        }
    }
}

/// Converts a CEL value to JSON.
///
/// Non-finite doubles and type handles have no JSON form and are reported
/// as errors rather than silently distorted.
pub fn cel_to_json(value: &Value) -> Result<Json, EvalError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Uint(u) => json!(u),
        Value::Double(d) => Json::Number(Number::from_f64(*d).ok_or_else(|| {
            EvalError::new(
                ErrorKind::Range,
                format!("{d} has no JSON representation"),
            )
        })?),
        Value::String(s) => json!(s.as_ref()),
        Value::Bytes(b) => json!(BASE64.encode(b)),
        Value::Duration(d) => json!(d.to_string()),
        Value::Timestamp(t) => json!(t.to_string()),
        Value::List(items) => Json::Array(items.iter().map(cel_to_json).collect::<Result<_, _>>()?),
        Value::Map(map) => {
            let mut object = serde_json::Map::with_capacity(map.len());
            for (key, value) in map.iter() {
                let key = match key {
                    MapKey::String(s) => s.to_string(),
                    other => other.to_value().to_string(),
                };
                object.insert(key, cel_to_json(value)?);
            }
            Json::Object(object)
        }
        Value::Message(message) => {
            let mut object = serde_json::Map::new();
            for (name, value) in message.fields() {
                object.insert(name.to_string(), cel_to_json(value)?);
            }
            Json::Object(object)
        }
        Value::Type(handle) => {
            return Err(EvalError::new(
                ErrorKind::TypeError,
                format!("type '{handle}' is not JSON serializable"),
            ));
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::time::{Duration, Timestamp};

    #[test]
    fn json_document_round_trips() {
        let document = json!([
            {"bool": true},
            {"numbers": [2.71828, 42]},
            {"null": null},
            {"string": "embedded \"quote\""},
        ]);
        let cel = json_to_cel(&document);
        assert_eq!(cel_to_json(&cel).unwrap(), document);
    }

    #[test]
    fn integral_numbers_become_ints() {
        assert_eq!(json_to_cel(&json!(42)), Value::Int(42));
        assert_eq!(json_to_cel(&json!(2.5)), Value::Double(2.5));
        // Only u64 can hold this one.
        assert_eq!(json_to_cel(&json!(18446744073709551615u64)), Value::Uint(u64::MAX));
    }

    #[test]
    fn strings_are_never_implicitly_timestamps() {
        let cel = json_to_cel(&json!("2009-02-13T23:31:30Z"));
        assert_eq!(cel, Value::string("2009-02-13T23:31:30Z"));
    }

    #[test]
    fn outbound_coercions() {
        assert_eq!(
            cel_to_json(&Value::bytes(b"bytes".to_vec())).unwrap(),
            json!("Ynl0ZXM=")
        );
        assert_eq!(
            cel_to_json(&Value::Timestamp(Timestamp::parse("2009-02-13T23:31:30Z").unwrap())).unwrap(),
            json!("2009-02-13T23:31:30Z")
        );
        assert_eq!(
            cel_to_json(&Value::Duration(Duration::parse("42s").unwrap())).unwrap(),
            json!("42s")
        );
    }

    #[test]
    fn map_key_variants_become_json_keys() {
        let map = Map::from_pairs(vec![
            (Value::Int(1), Value::string("a")),
            (Value::Bool(true), Value::string("b")),
            (Value::string("k"), Value::string("c")),
        ])
        .unwrap();
        let json = cel_to_json(&Value::map(map)).unwrap();
        assert_eq!(json, json!({"1": "a", "true": "b", "k": "c"}));
    }

    #[test]
    fn object_order_is_preserved() {
        let document = json!({"z": 1, "a": 2, "m": 3});
        let Value::Map(map) = json_to_cel(&document) else {
            panic!("expected a map");
        };
        let keys: Vec<String> = map.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["'z'", "'a'", "'m'"]);
    }

    #[test]
    fn non_finite_doubles_are_errors() {
        let err = cel_to_json(&Value::Double(f64::INFINITY)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }
}
