//! Timestamp and duration payloads with protobuf-compatible ranges.
//!
//! Durations are an ordered `(seconds, nanos)` pair bounded to ±10,000
//! years; timestamps are UTC instants bounded to years 1 through 9999.
//! Every construction path and every arithmetic result is range-checked.
//!
//! Timezone names for the timestamp accessors resolve through the IANA
//! database (`chrono-tz`), an extensible alias table, and a `±HH:MM`
//! syntactic fallback, in that order.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{OnceLock, RwLock},
};

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::error::{ErrorKind, EvalError};

/// Bound on duration magnitude, in seconds: ±10,000 Julian years.
pub const MAX_DURATION_SECONDS: i64 = 315_576_000_000;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// First and last representable timestamp years (protobuf Timestamp bounds).
const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;

/// A signed span of time: `(seconds, nanos)` with matching signs and
/// `|nanos| < 1_000_000_000`. The derived lexicographic ordering is correct
/// because of that normalization invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Duration {
    seconds: i64,
    nanos: i32,
}

impl Duration {
    /// Builds a duration from a raw pair, normalizing sign and checking the
    /// range bound.
    pub fn new(seconds: i64, nanos: i32) -> Result<Self, EvalError> {
        let total = i128::from(seconds) * i128::from(NANOS_PER_SECOND) + i128::from(nanos);
        Self::from_total_nanos(total)
    }

    pub fn from_seconds(seconds: i64) -> Result<Self, EvalError> {
        Self::new(seconds, 0)
    }

    #[expect(clippy::cast_possible_truncation, reason = "bounded by the range check")]
    fn from_total_nanos(total: i128) -> Result<Self, EvalError> {
        let seconds = total / i128::from(NANOS_PER_SECOND);
        if seconds.unsigned_abs() > MAX_DURATION_SECONDS as u128 {
            return Err(EvalError::new(
                ErrorKind::Range,
                format!("duration out of range: {seconds}s"),
            ));
        }
        Ok(Self {
            seconds: seconds as i64,
            nanos: (total % i128::from(NANOS_PER_SECOND)) as i32,
        })
    }

    /// Parses the duration grammar `[-+]?(\d+(\.\d+)?(ns|us|µs|ms|s|m|h|d))+`.
    pub fn parse(text: &str) -> Result<Self, EvalError> {
        let invalid = || EvalError::new(ErrorKind::InvalidArgument, format!("invalid duration '{text}'"));

        let (sign, mut rest) = match text.as_bytes().first() {
            Some(b'-') => (-1i128, &text[1..]),
            Some(b'+') => (1, &text[1..]),
            _ => (1, text),
        };
        if rest.is_empty() {
            return Err(invalid());
        }

        let mut total: i128 = 0;
        while !rest.is_empty() {
            let digits_end = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
            let int_part: u64 = if digits_end == 0 {
                0
            } else {
                rest[..digits_end].parse().map_err(|_| invalid())?
            };
            rest = &rest[digits_end..];

            let mut frac_digits = "";
            if let Some(after_dot) = rest.strip_prefix('.') {
                let frac_end = after_dot
                    .find(|c: char| !c.is_ascii_digit())
                    .ok_or_else(invalid)?;
                frac_digits = &after_dot[..frac_end];
                rest = &after_dot[frac_end..];
            }
            if digits_end == 0 && frac_digits.is_empty() {
                return Err(invalid());
            }

            let unit_end = rest
                .find(|c: char| !(c.is_ascii_lowercase() || c == 'µ'))
                .unwrap_or(rest.len());
            let scale: i128 = match &rest[..unit_end] {
                "ns" => 1,
                "us" | "µs" => 1_000,
                "ms" => 1_000_000,
                "s" => 1_000_000_000,
                "m" => 60 * 1_000_000_000,
                "h" => 3_600 * 1_000_000_000,
                "d" => 86_400 * 1_000_000_000,
                _ => return Err(invalid()),
            };
            rest = &rest[unit_end..];

            total += i128::from(int_part) * scale;
            if !frac_digits.is_empty() {
                // truncating fixed-point: frac/10^len of the unit scale
                let numerator: u128 = frac_digits.parse().map_err(|_| invalid())?;
                let denominator = 10u128.pow(u32::try_from(frac_digits.len()).map_err(|_| invalid())?);
                total += i128::try_from(u128::try_from(scale).expect("scale is positive") * numerator / denominator)
                    .map_err(|_| invalid())?;
            }
        }

        Self::from_total_nanos(sign * total)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanos(&self) -> i32 {
        self.nanos
    }

    fn total_nanos(&self) -> i128 {
        i128::from(self.seconds) * i128::from(NANOS_PER_SECOND) + i128::from(self.nanos)
    }

    pub fn checked_add(&self, other: Self) -> Result<Self, EvalError> {
        Self::from_total_nanos(self.total_nanos() + other.total_nanos())
    }

    pub fn checked_sub(&self, other: Self) -> Result<Self, EvalError> {
        Self::from_total_nanos(self.total_nanos() - other.total_nanos())
    }

    fn to_delta(self) -> TimeDelta {
        TimeDelta::try_seconds(self.seconds).expect("duration seconds within TimeDelta range")
            + TimeDelta::nanoseconds(i64::from(self.nanos))
    }

    // Accessor results truncate toward zero, matching integer division on
    // the total span.

    pub fn get_hours(&self) -> i64 {
        self.seconds / 3600
    }

    pub fn get_minutes(&self) -> i64 {
        self.seconds / 60
    }

    pub fn get_seconds(&self) -> i64 {
        self.seconds
    }

    #[expect(clippy::cast_possible_truncation, reason = "bounded: |seconds| <= 315576000000")]
    pub fn get_milliseconds(&self) -> i64 {
        (self.total_nanos() / 1_000_000) as i64
    }
}

impl fmt::Display for Duration {
    /// Canonical string form: whole seconds with an `s` suffix.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.seconds)
    }
}

/// An instant in UTC with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    fn checked(dt: DateTime<Utc>) -> Result<Self, EvalError> {
        if (MIN_YEAR..=MAX_YEAR).contains(&dt.year()) {
            Ok(Self(dt))
        } else {
            Err(EvalError::new(
                ErrorKind::Range,
                format!("timestamp out of range: year {}", dt.year()),
            ))
        }
    }

    /// Parses RFC 3339 text, with fallbacks for the offset-free and
    /// date-only forms the original's lenient parser accepted. Offset-free
    /// inputs are taken as UTC.
    pub fn parse(text: &str) -> Result<Self, EvalError> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Self::checked(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
            return Self::checked(naive.and_utc());
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
            return Self::checked(naive.and_utc());
        }
        Err(EvalError::new(
            ErrorKind::InvalidArgument,
            format!("invalid timestamp '{text}'"),
        ))
    }

    /// Seconds since the Unix epoch, truncating sub-second precision.
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn from_unix_seconds(seconds: i64) -> Result<Self, EvalError> {
        let dt = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
            EvalError::new(ErrorKind::Range, format!("timestamp out of range: {seconds}s"))
        })?;
        Self::checked(dt)
    }

    pub fn checked_add(&self, duration: Duration) -> Result<Self, EvalError> {
        self.0
            .checked_add_signed(duration.to_delta())
            .ok_or_else(|| EvalError::new(ErrorKind::Range, "timestamp out of range"))
            .and_then(Self::checked)
    }

    pub fn checked_sub(&self, duration: Duration) -> Result<Self, EvalError> {
        self.0
            .checked_sub_signed(duration.to_delta())
            .ok_or_else(|| EvalError::new(ErrorKind::Range, "timestamp out of range"))
            .and_then(Self::checked)
    }

    /// `self - other` as a duration.
    pub fn since(&self, other: Self) -> Result<Duration, EvalError> {
        let delta = self.0.signed_duration_since(other.0);
        Duration::new(delta.num_seconds(), delta.subsec_nanos())
    }

    /// Wall-clock fields of this instant in the named timezone (UTC when
    /// absent). This is the single conversion point behind every accessor.
    fn local(&self, tz_name: Option<&str>) -> Result<NaiveDateTime, EvalError> {
        Ok(match tz_name {
            None => self.0.naive_utc(),
            Some(name) => match parse_tz(name)? {
                TzHandle::Named(tz) => self.0.with_timezone(&tz).naive_local(),
                TzHandle::Fixed(offset) => self.0.with_timezone(&offset).naive_local(),
            },
        })
    }

    pub fn get_full_year(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.year()))
    }

    /// Month, 0-based: January is 0.
    pub fn get_month(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.month0()))
    }

    /// Day of month, 1-based.
    pub fn get_date(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.day()))
    }

    /// Day of month, 0-based.
    pub fn get_day_of_month(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.day0()))
    }

    /// Day of week, 0 (Sunday) through 6.
    pub fn get_day_of_week(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.weekday().num_days_from_sunday()))
    }

    /// Day of year, 0-based: January 1st is 0.
    pub fn get_day_of_year(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.ordinal0()))
    }

    pub fn get_hours(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.hour()))
    }

    pub fn get_minutes(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.minute()))
    }

    pub fn get_seconds(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.second()))
    }

    pub fn get_milliseconds(&self, tz: Option<&str>) -> Result<i64, EvalError> {
        Ok(i64::from(self.local(tz)?.nanosecond() / 1_000_000))
    }
}

impl fmt::Display for Timestamp {
    /// RFC 3339 in UTC with a `Z` suffix; fractional seconds appear only
    /// when nonzero.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

/// A resolved timezone: an IANA zone or a fixed offset.
enum TzHandle {
    Named(Tz),
    Fixed(FixedOffset),
}

fn tz_aliases() -> &'static RwLock<HashMap<String, String>> {
    static ALIASES: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();
    ALIASES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers an additional timezone name, resolved before the IANA table.
/// The target must itself be a resolvable IANA name or `±HH:MM` offset.
pub fn register_tz_alias(alias: impl Into<String>, target: impl Into<String>) {
    tz_aliases()
        .write()
        .expect("tz alias table poisoned")
        .insert(alias.into(), target.into());
}

/// Resolves a timezone name: alias table, then IANA lookup, then the
/// `±HH:MM` fixed-offset fallback.
fn parse_tz(name: &str) -> Result<TzHandle, EvalError> {
    let resolved = tz_aliases()
        .read()
        .expect("tz alias table poisoned")
        .get(name)
        .cloned();
    let name = resolved.as_deref().unwrap_or(name);

    if let Ok(tz) = Tz::from_str(name) {
        return Ok(TzHandle::Named(tz));
    }
    if let Some(offset) = parse_fixed_offset(name) {
        return Ok(TzHandle::Fixed(offset));
    }
    Err(EvalError::new(
        ErrorKind::InvalidArgument,
        format!("unrecognized timezone '{name}'"),
    ))
}

/// Parses `[+-]?HH:MM` (one or two hour digits) into a fixed offset.
fn parse_fixed_offset(name: &str) -> Option<FixedOffset> {
    let (sign, rest) = match name.as_bytes().first()? {
        b'-' => (-1, &name[1..]),
        b'+' => (1, &name[1..]),
        _ => (1, name),
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn duration_parse_compound() {
        let d = Duration::parse("2h45m").unwrap();
        assert_eq!(d.seconds(), 9900);
        assert_eq!(d.get_minutes(), 165);
    }

    #[test]
    fn duration_parse_signed_and_fractional() {
        let d = Duration::parse("-1.5h").unwrap();
        assert_eq!(d.seconds(), -5400);
        let d = Duration::parse("+300ms").unwrap();
        assert_eq!(d.seconds(), 0);
        assert_eq!(d.nanos(), 300_000_000);
        let d = Duration::parse("1.5s").unwrap();
        assert_eq!((d.seconds(), d.nanos()), (1, 500_000_000));
    }

    #[test]
    fn duration_parse_sub_second_units() {
        assert_eq!(Duration::parse("1000ns").unwrap().nanos(), 1000);
        assert_eq!(Duration::parse("3us").unwrap().nanos(), 3000);
        assert_eq!(Duration::parse("3µs").unwrap().nanos(), 3000);
        assert_eq!(Duration::parse("1d").unwrap().seconds(), 86_400);
    }

    #[test]
    fn duration_parse_rejects_garbage() {
        for bad in ["", "h", "1x", "1", "--1s", "1.s."] {
            assert!(Duration::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn duration_range_checked_on_construction() {
        assert!(Duration::from_seconds(MAX_DURATION_SECONDS).is_ok());
        let err = Duration::from_seconds(MAX_DURATION_SECONDS + 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        let err = Duration::parse("315576000001s").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }

    #[test]
    fn duration_accessors_truncate_toward_zero() {
        let d = Duration::parse("2h30m").unwrap();
        assert_eq!(d.get_hours(), 2);
        assert_eq!(d.get_minutes(), 150);
        assert_eq!(d.get_seconds(), 9000);
        assert_eq!(d.get_milliseconds(), 9_000_000);
        let d = Duration::parse("-90m").unwrap();
        assert_eq!(d.get_hours(), -1);
    }

    #[test]
    fn duration_display_is_whole_seconds() {
        assert_eq!(Duration::parse("2h45m").unwrap().to_string(), "9900s");
        assert_eq!(Duration::parse("-1.5s").unwrap().to_string(), "-1s");
    }

    #[test]
    fn timestamp_parse_and_display_round_trip() {
        let t = Timestamp::parse("2009-02-13T23:31:30Z").unwrap();
        assert_eq!(t.unix_seconds(), 1_234_567_890);
        assert_eq!(t.to_string(), "2009-02-13T23:31:30Z");
    }

    #[test]
    fn timestamp_parse_offset_normalizes_to_utc() {
        let t = Timestamp::parse("2009-02-14T00:31:30+01:00").unwrap();
        assert_eq!(t.to_string(), "2009-02-13T23:31:30Z");
    }

    #[test]
    fn timestamp_parse_date_only() {
        let t = Timestamp::parse("2020-06-01").unwrap();
        assert_eq!(t.to_string(), "2020-06-01T00:00:00Z");
    }

    #[test]
    fn timestamp_fields() {
        let t = Timestamp::parse("2009-02-13T23:31:30Z").unwrap();
        assert_eq!(t.get_full_year(None).unwrap(), 2009);
        assert_eq!(t.get_month(None).unwrap(), 1);
        assert_eq!(t.get_date(None).unwrap(), 13);
        assert_eq!(t.get_day_of_month(None).unwrap(), 12);
        assert_eq!(t.get_day_of_week(None).unwrap(), 5);
        assert_eq!(t.get_day_of_year(None).unwrap(), 43);
        assert_eq!(t.get_hours(None).unwrap(), 23);
        assert_eq!(t.get_minutes(None).unwrap(), 31);
        assert_eq!(t.get_seconds(None).unwrap(), 30);
    }

    #[test]
    fn timestamp_fields_with_zones() {
        let t = Timestamp::parse("2009-02-13T23:31:30Z").unwrap();
        // IANA name: UTC-5 in February.
        assert_eq!(t.get_hours(Some("America/New_York")).unwrap(), 18);
        // Fixed offset fallback.
        assert_eq!(t.get_hours(Some("+01:00")).unwrap(), 0);
        assert_eq!(t.get_date(Some("+01:00")).unwrap(), 14);
        let err = t.get_hours(Some("Mars/Olympus_Mons")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn tz_alias_extension() {
        register_tz_alias("eastern", "America/New_York");
        let t = Timestamp::parse("2009-02-13T23:31:30Z").unwrap();
        assert_eq!(t.get_hours(Some("eastern")).unwrap(), 18);
    }

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::parse("2009-02-13T23:31:30Z").unwrap();
        let d = Duration::parse("1h").unwrap();
        assert_eq!(t.checked_add(d).unwrap().to_string(), "2009-02-14T00:31:30Z");
        assert_eq!(t.checked_sub(d).unwrap().to_string(), "2009-02-13T22:31:30Z");
        let later = t.checked_add(d).unwrap();
        assert_eq!(later.since(t).unwrap(), d);
    }

    #[test]
    fn timestamp_range_bounds() {
        assert!(Timestamp::parse("9999-12-31T23:59:59Z").is_ok());
        let max = Timestamp::parse("9999-12-31T23:59:59Z").unwrap();
        let err = max.checked_add(Duration::parse("1h").unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }
}
