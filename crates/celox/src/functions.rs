//! The standard library: builtin functions and method-form operations.
//!
//! The registry is an enum keyed by name through strum's `EnumString`, so
//! `x.f(y)` and `f(x, y)` land on the same entry with the receiver as
//! argument zero. Builtins are consulted first; names that miss fall back
//! to functions registered on the activation, and a panic inside a host
//! function is contained at the dispatch boundary.

use std::{panic::AssertUnwindSafe, str::FromStr};

use smallvec::SmallVec;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    activation::Activation,
    error::{ErrorKind, EvalError, EvalResult},
    time::{Duration, Timestamp},
    value::{Value, format_double},
};

/// Evaluated call arguments. Most CEL calls have one or two arguments, so
/// these usually stay on the stack.
pub(crate) type Args = SmallVec<[Value; 2]>;

/// Enumerates every builtin function and method-form operation.
///
/// Uses strum derives for automatic `Display`/`FromStr`; variants serialize
/// to their camelCase source spelling (`StartsWith` -> "startsWith").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub(crate) enum Builtin {
    Size,
    Type,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    LowerAscii,
    UpperAscii,
    Int,
    Uint,
    Double,
    String,
    Bytes,
    Bool,
    Timestamp,
    Duration,
    GetDate,
    GetDayOfMonth,
    GetDayOfWeek,
    GetDayOfYear,
    GetFullYear,
    GetHours,
    GetMilliseconds,
    GetMinutes,
    GetMonth,
    GetSeconds,
}

/// Dispatches a call by name: builtins first, then activation-registered
/// functions, then a `no-such-function` error.
pub(crate) fn call_function(activation: &Activation, name: &str, args: &Args) -> EvalResult {
    if let Ok(builtin) = Builtin::from_str(name) {
        return call_builtin(builtin, args);
    }
    match activation.function(name) {
        Some(function) => call_user_function(name, function, args),
        None => Err(EvalError::new(
            ErrorKind::NoSuchFunction,
            format!("unbound function '{name}'"),
        )),
    }
}

/// Invokes a host-registered function, converting a panic into a
/// `function-error` so it never escapes `evaluate`.
fn call_user_function(
    name: &str,
    function: &crate::activation::CelFunction,
    args: &Args,
) -> EvalResult {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| function(args)));
    match outcome {
        Ok(result) => result,
        Err(_) => Err(EvalError::new(
            ErrorKind::FunctionError,
            format!("function '{name}' failed"),
        )),
    }
}

/// The conventional error for a builtin applied to argument types it has no
/// overload for.
fn overload_err(builtin: Builtin, args: &Args) -> EvalError {
    let types: Vec<String> = args.iter().map(|arg| arg.type_of().to_string()).collect();
    EvalError::new(
        ErrorKind::NoSuchOverload,
        format!(
            "found no matching overload for '{builtin}' applied to '({})'",
            types.join(", ")
        ),
    )
}

fn call_builtin(builtin: Builtin, args: &Args) -> EvalResult {
    match builtin {
        Builtin::Size => match args.as_slice() {
            [value] => value.size(),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Type => match args.as_slice() {
            [value] => Ok(Value::Type(value.type_of())),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Contains => match args.as_slice() {
            [Value::String(text), Value::String(needle)] => Ok(Value::Bool(text.contains(needle.as_ref()))),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::StartsWith => match args.as_slice() {
            [Value::String(text), Value::String(prefix)] => Ok(Value::Bool(text.starts_with(prefix.as_ref()))),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::EndsWith => match args.as_slice() {
            [Value::String(text), Value::String(suffix)] => Ok(Value::Bool(text.ends_with(suffix.as_ref()))),
            _ => Err(overload_err(builtin, args)),
        },
        // ASCII-only case mapping; non-ASCII code points pass through
        Builtin::LowerAscii => match args.as_slice() {
            [Value::String(text)] => Ok(Value::string(text.to_ascii_lowercase())),
            [Value::Bytes(data)] => Ok(Value::bytes(data.to_ascii_lowercase())),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::UpperAscii => match args.as_slice() {
            [Value::String(text)] => Ok(Value::string(text.to_ascii_uppercase())),
            [Value::Bytes(data)] => Ok(Value::bytes(data.to_ascii_uppercase())),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Matches => match args.as_slice() {
            [Value::String(text), Value::String(pattern)] => {
                // The pattern anchors only where it says so; a linear-time
                // engine keeps matching safe on hostile input.
                let regex = regex::Regex::new(pattern).map_err(|err| {
                    EvalError::new(ErrorKind::InvalidArgument, format!("invalid pattern: {err}"))
                })?;
                Ok(Value::Bool(regex.is_match(text)))
            }
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Int => match args.as_slice() {
            [value] => convert_int(value).ok_or_else(|| overload_err(builtin, args))?,
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Uint => match args.as_slice() {
            [value] => convert_uint(value).ok_or_else(|| overload_err(builtin, args))?,
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Double => match args.as_slice() {
            [Value::Double(d)] => Ok(Value::Double(*d)),
            [Value::Int(i)] => Ok(Value::Double(*i as f64)),
            [Value::Uint(u)] => Ok(Value::Double(*u as f64)),
            [Value::String(s)] => s
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| range_err(format!("cannot convert '{s}' to double"))),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::String => match args.as_slice() {
            [Value::String(s)] => Ok(Value::String(s.clone())),
            [Value::Int(i)] => Ok(Value::string(i.to_string())),
            [Value::Uint(u)] => Ok(Value::string(u.to_string())),
            [Value::Double(d)] => Ok(Value::string(format_double(*d))),
            [Value::Bool(b)] => Ok(Value::string(b.to_string())),
            [Value::Bytes(b)] => match std::str::from_utf8(b) {
                Ok(text) => Ok(Value::string(text.to_owned())),
                Err(_) => Err(range_err("bytes are not valid UTF-8")),
            },
            [Value::Timestamp(t)] => Ok(Value::string(t.to_string())),
            [Value::Duration(d)] => Ok(Value::string(d.to_string())),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Bytes => match args.as_slice() {
            [Value::Bytes(b)] => Ok(Value::Bytes(b.clone())),
            [Value::String(s)] => Ok(Value::bytes(s.as_bytes().to_vec())),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Bool => match args.as_slice() {
            [Value::Bool(b)] => Ok(Value::Bool(*b)),
            [Value::String(s)] => match s.as_ref() {
                "true" | "True" | "1" => Ok(Value::Bool(true)),
                "false" | "False" | "0" => Ok(Value::Bool(false)),
                _ => Err(range_err(format!("cannot convert '{s}' to bool"))),
            },
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Timestamp => match args.as_slice() {
            [Value::Timestamp(t)] => Ok(Value::Timestamp(*t)),
            [Value::String(s)] => Timestamp::parse(s).map(Value::Timestamp),
            [Value::Int(i)] => Timestamp::from_unix_seconds(*i).map(Value::Timestamp),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::Duration => match args.as_slice() {
            [Value::Duration(d)] => Ok(Value::Duration(*d)),
            [Value::String(s)] => Duration::parse(s).map(Value::Duration),
            [Value::Int(i)] => Duration::from_seconds(*i).map(Value::Duration),
            _ => Err(overload_err(builtin, args)),
        },
        Builtin::GetDate
        | Builtin::GetDayOfMonth
        | Builtin::GetDayOfWeek
        | Builtin::GetDayOfYear
        | Builtin::GetFullYear
        | Builtin::GetMonth => timestamp_accessor(builtin, args),
        Builtin::GetHours | Builtin::GetMilliseconds | Builtin::GetMinutes | Builtin::GetSeconds => {
            match args.as_slice() {
                [Value::Duration(d)] => {
                    let n = match builtin {
                        Builtin::GetHours => d.get_hours(),
                        Builtin::GetMilliseconds => d.get_milliseconds(),
                        Builtin::GetMinutes => d.get_minutes(),
                        Builtin::GetSeconds => d.get_seconds(),
                        _ => unreachable!("matched above"),
                    };
                    Ok(Value::Int(n))
                }
                _ => timestamp_accessor(builtin, args),
            }
        }
    }
}

/// Timestamp field accessors: receiver plus an optional timezone name.
fn timestamp_accessor(builtin: Builtin, args: &Args) -> EvalResult {
    let (timestamp, tz) = match args.as_slice() {
        [Value::Timestamp(t)] => (t, None),
        [Value::Timestamp(t), Value::String(tz)] => (t, Some(tz.as_ref())),
        _ => return Err(overload_err(builtin, args)),
    };
    let n = match builtin {
        Builtin::GetDate => timestamp.get_date(tz)?,
        Builtin::GetDayOfMonth => timestamp.get_day_of_month(tz)?,
        Builtin::GetDayOfWeek => timestamp.get_day_of_week(tz)?,
        Builtin::GetDayOfYear => timestamp.get_day_of_year(tz)?,
        Builtin::GetFullYear => timestamp.get_full_year(tz)?,
        Builtin::GetMonth => timestamp.get_month(tz)?,
        Builtin::GetHours => timestamp.get_hours(tz)?,
        Builtin::GetMilliseconds => timestamp.get_milliseconds(tz)?,
        Builtin::GetMinutes => timestamp.get_minutes(tz)?,
        Builtin::GetSeconds => timestamp.get_seconds(tz)?,
        _ => unreachable!("caller filters to accessors"),
    };
    Ok(Value::Int(n))
}

fn range_err(message: impl Into<String>) -> EvalError {
    EvalError::new(ErrorKind::Range, message)
}

/// `int()` conversions. Returns `None` for a source type with no overload.
fn convert_int(value: &Value) -> Option<EvalResult> {
    let result = match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Uint(u) => i64::try_from(*u)
            .map(Value::Int)
            .map_err(|_| range_err(format!("{u} out of int range"))),
        Value::Double(d) => int_from_double(*d),
        Value::String(s) => int_from_string(s),
        Value::Timestamp(t) => Ok(Value::Int(t.unix_seconds())),
        Value::Duration(d) => Ok(Value::Int(d.get_seconds())),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        _ => return None,
    };
    Some(result)
}

fn convert_uint(value: &Value) -> Option<EvalResult> {
    let result = match value {
        Value::Uint(u) => Ok(Value::Uint(*u)),
        Value::Int(i) => u64::try_from(*i)
            .map(Value::Uint)
            .map_err(|_| range_err(format!("{i} out of uint range"))),
        Value::Double(d) => uint_from_double(*d),
        Value::String(s) => uint_from_string(s),
        _ => return None,
    };
    Some(result)
}

/// Rounds half-to-even, then range-checks. NaN and the infinities are
/// range errors, not silent saturation.
#[expect(clippy::cast_possible_truncation, reason = "range-checked before the cast")]
fn int_from_double(d: f64) -> EvalResult {
    let rounded = d.round_ties_even();
    if rounded >= -9_223_372_036_854_775_808.0 && rounded < 9_223_372_036_854_775_808.0 {
        Ok(Value::Int(rounded as i64))
    } else {
        Err(range_err(format!("{} out of int range", format_double(d))))
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "range-checked before the cast"
)]
fn uint_from_double(d: f64) -> EvalResult {
    let rounded = d.round_ties_even();
    if rounded >= 0.0 && rounded < 18_446_744_073_709_551_616.0 {
        Ok(Value::Uint(rounded as u64))
    } else {
        Err(range_err(format!("{} out of uint range", format_double(d))))
    }
}

/// Decimal or `0x`-prefixed hex, with an optional leading sign on either.
fn int_from_string(s: &str) -> EvalResult {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_prefix("-0x").or_else(|| s.strip_prefix("-0X")) {
        i64::from_str_radix(hex, 16).map(|magnitude| -magnitude)
    } else {
        s.parse()
    };
    parsed
        .map(Value::Int)
        .map_err(|_| range_err(format!("cannot convert '{s}' to int")))
}

fn uint_from_string(s: &str) -> EvalResult {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed
        .map(Value::Uint)
        .map_err(|_| range_err(format!("cannot convert '{s}' to uint")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use smallvec::smallvec;

    use super::*;

    fn builtin(name: &str, args: Args) -> EvalResult {
        let activation = Activation::base(None, [], []);
        call_function(&activation, name, &args)
    }

    #[test]
    fn names_resolve_to_builtins() {
        assert_eq!(Builtin::from_str("startsWith").unwrap(), Builtin::StartsWith);
        assert_eq!(Builtin::from_str("getDayOfYear").unwrap(), Builtin::GetDayOfYear);
        assert_eq!(Builtin::from_str("size").unwrap(), Builtin::Size);
        assert!(Builtin::from_str("starts_with").is_err());
    }

    #[test]
    fn string_predicates() {
        let result = builtin("contains", smallvec![Value::string("hello"), Value::string("ell")]);
        assert_eq!(result.unwrap(), Value::Bool(true));
        let result = builtin("startsWith", smallvec![Value::string("hello"), Value::string("he")]);
        assert_eq!(result.unwrap(), Value::Bool(true));
        let result = builtin("endsWith", smallvec![Value::string("hello"), Value::string("lo")]);
        assert_eq!(result.unwrap(), Value::Bool(true));
    }

    #[test]
    fn ascii_case_ops_leave_other_code_points_alone() {
        let result = builtin("lowerAscii", smallvec![Value::string("HÉLLO")]);
        assert_eq!(result.unwrap(), Value::string("hÉllo"));
        let result = builtin("upperAscii", smallvec![Value::string("héllo")]);
        assert_eq!(result.unwrap(), Value::string("HéLLO"));
        let result = builtin("upperAscii", smallvec![Value::bytes(b"ab1".to_vec())]);
        assert_eq!(result.unwrap(), Value::bytes(b"AB1".to_vec()));
    }

    #[test]
    fn matches_is_unanchored_unless_directed() {
        let result = builtin("matches", smallvec![Value::string("hello"), Value::string("ell")]);
        assert_eq!(result.unwrap(), Value::Bool(true));
        let result = builtin("matches", smallvec![Value::string("hello"), Value::string("^ell")]);
        assert_eq!(result.unwrap(), Value::Bool(false));
        let err = builtin("matches", smallvec![Value::string("x"), Value::string("(")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn int_conversion_rounds_half_to_even() {
        assert_eq!(builtin("int", smallvec![Value::Double(1.9)]).unwrap(), Value::Int(2));
        assert_eq!(builtin("int", smallvec![Value::Double(-123.456)]).unwrap(), Value::Int(-123));
        assert_eq!(builtin("int", smallvec![Value::Double(0.5)]).unwrap(), Value::Int(0));
        assert_eq!(builtin("int", smallvec![Value::Double(1.5)]).unwrap(), Value::Int(2));
    }

    #[test]
    fn int_conversion_range_errors() {
        for bad in [f64::NAN, f64::INFINITY, 1e300] {
            let err = builtin("int", smallvec![Value::Double(bad)]).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Range, "{bad}");
        }
        let err = builtin("uint", smallvec![Value::Double(-1.0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        let err = builtin("uint", smallvec![Value::Int(-1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }

    #[test]
    fn int_string_conversions() {
        assert_eq!(builtin("int", smallvec![Value::string("-5")]).unwrap(), Value::Int(-5));
        assert_eq!(builtin("int", smallvec![Value::string("0x2A")]).unwrap(), Value::Int(42));
        assert_eq!(builtin("int", smallvec![Value::string("-0x2A")]).unwrap(), Value::Int(-42));
        assert_eq!(builtin("uint", smallvec![Value::string("42")]).unwrap(), Value::Uint(42));
        let err = builtin("int", smallvec![Value::string("forty-two")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }

    #[test]
    fn string_of_bytes_validates_utf8() {
        let err = builtin("string", smallvec![Value::bytes(vec![0xff, 0xfe])]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        let ok = builtin("string", smallvec![Value::bytes(b"ok".to_vec())]).unwrap();
        assert_eq!(ok, Value::string("ok"));
    }

    #[test]
    fn timestamp_int_round_trip() {
        let ts = builtin("timestamp", smallvec![Value::Int(1_234_567_890)]).unwrap();
        assert_eq!(builtin("int", smallvec![ts]).unwrap(), Value::Int(1_234_567_890));
    }

    #[test]
    fn duration_accessors_dispatch_without_tz() {
        let d = builtin("duration", smallvec![Value::string("2h30m")]).unwrap();
        assert_eq!(
            builtin("getMinutes", smallvec![d.clone()]).unwrap(),
            Value::Int(150)
        );
        assert_eq!(builtin("getHours", smallvec![d]).unwrap(), Value::Int(2));
    }

    #[test]
    fn unknown_function_is_a_distinct_error() {
        let err = builtin("frobnicate", smallvec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchFunction);
    }

    #[test]
    fn user_function_panic_is_contained() {
        let activation = Activation::base(
            None,
            [],
            [(
                Arc::from("explode"),
                Arc::new(|_: &[Value]| -> EvalResult { panic!("host bug") }) as crate::activation::CelFunction,
            )],
        );
        let err = call_function(&activation, "explode", &smallvec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FunctionError);
    }

    #[test]
    fn builtins_shadow_user_functions() {
        let activation = Activation::base(
            None,
            [],
            [(
                Arc::from("size"),
                Arc::new(|_: &[Value]| -> EvalResult { Ok(Value::Int(-1)) }) as crate::activation::CelFunction,
            )],
        );
        // Lookup order is builtins first, then user functions.
        let result = call_function(&activation, "size", &smallvec![Value::string("abc")]).unwrap();
        assert_eq!(result, Value::Int(3));
    }
}
