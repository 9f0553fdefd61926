//! String-to-value coercion and per-window type inference for text ingest.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::value::{Value, ValueKind};

/// Coercions are tried tightest-first; the first kind that accepts every
/// non-empty value in a window wins. Strings are the fallback.
pub const COERCION_ORDER: [ValueKind; 6] = [
    ValueKind::Bool,
    ValueKind::Int,
    ValueKind::Float,
    ValueKind::Date,
    ValueKind::Time,
    ValueKind::DateTime,
];

// Ambiguous strings resolve to the earliest listed format.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%d.%m.%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS.iter().find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS.iter().find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Coerce one raw string to `kind`, or fail.
pub fn infer(s: &str, kind: ValueKind) -> Option<Value> {
    match kind {
        ValueKind::Bool => match s {
            "true" | "True" => Some(Value::Bool(true)),
            "false" | "False" => Some(Value::Bool(false)),
            _ => None,
        },
        ValueKind::Int => s.parse::<i64>().ok().map(Value::Int),
        ValueKind::Float => s.parse::<f64>().ok().map(Value::Float),
        ValueKind::Date => parse_date(s).map(Value::Date),
        ValueKind::Time => parse_time(s).map(Value::Time),
        ValueKind::DateTime => parse_datetime(s).map(Value::DateTime),
        ValueKind::Str => Some(Value::Str(s.to_owned())),
        ValueKind::None => None,
    }
}

fn null_or(raw: &Option<String>, coerce: impl Fn(&str) -> Value) -> Value {
    match raw {
        None => Value::None,
        Some(s) if s.is_empty() => Value::None,
        Some(s) => coerce(s),
    }
}

/// Infer a window of one column: the tightest kind that accepts every
/// non-empty value applies to all of them; otherwise everything stays a
/// string. `None` entries (missing fields) and empty strings become null.
pub fn guess(raw: &[Option<String>]) -> Vec<Value> {
    let mut candidates: Vec<ValueKind> = COERCION_ORDER.to_vec();
    for s in raw.iter().flatten() {
        if s.is_empty() {
            continue;
        }
        candidates.retain(|kind| infer(s, *kind).is_some());
        if candidates.is_empty() {
            break;
        }
    }
    let chosen = candidates.first().copied();
    raw.iter()
        .map(|entry| {
            null_or(entry, |s| match chosen {
                Some(kind) => infer(s, kind).unwrap_or_else(|| Value::Str(s.to_owned())),
                None => Value::Str(s.to_owned()),
            })
        })
        .collect()
}

/// Coerce a window to a user-pinned kind; values that fail the coercion
/// fall back to strings.
pub fn coerce_all(raw: &[Option<String>], kind: ValueKind) -> Vec<Value> {
    raw.iter()
        .map(|entry| null_or(entry, |s| infer(s, kind).unwrap_or_else(|| Value::Str(s.to_owned()))))
        .collect()
}

/// No inference: raw strings as-is, missing fields as null.
pub fn verbatim(raw: &[Option<String>]) -> Vec<Value> {
    raw.iter().map(|entry| null_or(entry, |s| Value::Str(s.to_owned()))).collect()
}
