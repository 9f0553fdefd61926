//! Summary statistics over a column's value histogram.
//!
//! The numeric kernel is a single pass over the sorted (value, count)
//! pairs: min/max, mean, interpolated median and quartiles, Welford's
//! variance and the mode all fall out of one walk. Non-numeric kinds map
//! into that kernel (string lengths, epoch seconds, bools as 0/1) and
//! their results map back.

use chrono::{DateTime, NaiveTime, Timelike};
use indexmap::IndexMap;

use crate::storage::column::{Column, ColumnError};
use crate::value::{Value, ValueKind};

const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// The fixed key contract of a column summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub min: Value,
    pub max: Value,
    pub mean: Value,
    pub median: Value,
    pub stdev: Value,
    pub mode: Value,
    pub distinct: Value,
    pub iqr_low: Value,
    pub iqr_high: Value,
    pub iqr: Value,
    pub sum: Value,
    pub summary_type: String,
    pub histogram: (Vec<Value>, Vec<usize>),
}

impl Column {
    /// Summarise this column: histogram first, then the kind-dispatched
    /// statistics over it.
    pub fn summary(&self) -> Result<Summary, ColumnError> {
        let mut histogram: IndexMap<Value, usize> = IndexMap::new();
        for value in self.iter() {
            *histogram.entry(value?).or_insert(0) += 1;
        }
        let values: Vec<Value> = histogram.keys().cloned().collect();
        let counts: Vec<usize> = histogram.values().copied().collect();
        Ok(summary_statistics(&values, &counts))
    }
}

struct NumericSummary {
    min: f64,
    max: f64,
    mean: f64,
    median: f64,
    stdev: f64,
    mode: f64,
    iqr_low: f64,
    iqr_high: f64,
    iqr: f64,
    sum: f64,
}

/// One sorted pass over (value, count) pairs.
fn numeric_summary(mut vc: Vec<(f64, usize)>) -> NumericSummary {
    vc.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total_cnt: usize = vc.iter().map(|(_, c)| *c).sum();
    let iqr25 = total_cnt as f64 / 4.0;
    let iqr50 = total_cnt as f64 / 2.0;
    let iqr75 = total_cnt as f64 * 3.0 / 4.0;

    let vmin = vc[0].0;
    let vmax = vc[vc.len() - 1].0;
    let mut total_val = 0.0;
    let mut median = f64::NAN;
    let mut mode = f64::NAN;
    let mut max_cnt = 0usize;
    let (mut iqr_low, mut iqr_high) = (0.0, 0.0);
    let mut mn = 0.0;
    let mut cstd = 0.0;
    let mut cnt_n = 0usize;
    let mut vx_0 = f64::NAN;

    // quartile interpolation weight at an exact cut
    let weight = |q: usize| ((q * (total_cnt - 1)) % 4) as f64;

    for &(vx, cx) in &vc {
        let cnt_0 = cnt_n as f64;
        cnt_n += cx;
        let cnt_nf = cnt_n as f64;

        if cnt_0 < iqr25 && iqr25 < cnt_nf {
            iqr_low = vx;
        } else if cnt_0 == iqr25 {
            let delta = weight(1);
            iqr_low = (vx_0 * (4.0 - delta) + vx * delta) / 4.0;
        }

        if cnt_0 < iqr50 && iqr50 < cnt_nf {
            median = vx;
        } else if cnt_0 == iqr50 {
            let delta = weight(2);
            median = (vx_0 * (4.0 - delta) + vx * delta) / 4.0;
        }

        if cnt_0 < iqr75 && iqr75 < cnt_nf {
            iqr_high = vx;
        } else if cnt_0 == iqr75 {
            let delta = weight(3);
            iqr_high = (vx_0 * (4.0 - delta) + vx * delta) / 4.0;
        }

        let dt = cx as f64 * (vx - mn);
        mn += dt / cnt_nf;
        cstd += dt * (vx - mn);

        if cx > max_cnt {
            mode = vx;
            max_cnt = cx;
        }

        total_val += vx * cx as f64;
        vx_0 = vx;
    }

    let stdev = if cnt_n > 1 { (cstd / (cnt_n - 1) as f64).sqrt() } else { 0.0 };
    NumericSummary {
        min: vmin,
        max: vmax,
        mean: total_val / total_cnt as f64,
        median,
        stdev,
        mode,
        iqr_low,
        iqr_high,
        iqr: iqr_high - iqr_low,
        sum: total_val,
    }
}

fn not_available(values: &[Value], counts: &[usize]) -> Summary {
    let na = || Value::Str("n/a".to_owned());
    Summary {
        min: na(),
        max: na(),
        mean: na(),
        median: na(),
        stdev: na(),
        mode: na(),
        distinct: Value::Int(values.len() as i64),
        iqr_low: na(),
        iqr_high: na(),
        iqr: na(),
        sum: na(),
        summary_type: ValueKind::None.name().to_owned(),
        histogram: (values.to_vec(), counts.to_vec()),
    }
}

/// Summarise a histogram: pick the dominant value kind by weighted count,
/// mask the histogram to it, and compute the kind's statistics.
pub fn summary_statistics(values: &[Value], counts: &[usize]) -> Summary {
    let mut weights: IndexMap<ValueKind, usize> = IndexMap::new();
    for (value, count) in values.iter().zip(counts) {
        *weights.entry(value.kind()).or_insert(0) += count;
    }
    let dominant = weights
        .iter()
        .max_by_key(|(_, weight)| **weight)
        .map(|(kind, _)| *kind);
    let dominant = match dominant {
        None | Some(ValueKind::None) => return not_available(values, counts),
        Some(kind) => kind,
    };

    let masked: Vec<(&Value, usize)> = values
        .iter()
        .zip(counts)
        .filter(|(v, _)| v.kind() == dominant)
        .map(|(v, c)| (v, *c))
        .collect();

    let mut summary = match dominant {
        ValueKind::Int | ValueKind::Float => {
            let ns = numeric_summary(
                masked.iter().map(|(v, c)| (v.as_f64().unwrap_or(f64::NAN), *c)).collect(),
            );
            let restore = |x: f64| {
                if dominant == ValueKind::Int && x.fract() == 0.0 {
                    Value::Int(x as i64)
                } else {
                    Value::Float(x)
                }
            };
            Summary {
                min: restore(ns.min),
                max: restore(ns.max),
                mean: Value::Float(ns.mean),
                median: Value::Float(ns.median),
                stdev: Value::Float(ns.stdev),
                mode: restore(ns.mode),
                distinct: Value::None,
                iqr_low: Value::Float(ns.iqr_low),
                iqr_high: Value::Float(ns.iqr_high),
                iqr: Value::Float(ns.iqr),
                sum: restore(ns.sum),
                summary_type: String::new(),
                histogram: (Vec::new(), Vec::new()),
            }
        }
        ValueKind::Bool => {
            let ns = numeric_summary(
                masked
                    .iter()
                    .map(|(v, c)| {
                        (if matches!(v, Value::Bool(true)) { 1.0 } else { 0.0 }, *c)
                    })
                    .collect(),
            );
            let cast = |x: f64| {
                if x == 1.0 {
                    Value::Bool(true)
                } else if x == 0.0 {
                    Value::Bool(false)
                } else {
                    Value::Float(x)
                }
            };
            Summary {
                min: cast(ns.min),
                max: cast(ns.max),
                mean: Value::Float(ns.mean),
                median: cast(ns.median),
                stdev: Value::Float(ns.stdev),
                mode: cast(ns.mode),
                distinct: Value::None,
                iqr_low: Value::Float(ns.iqr_low),
                iqr_high: Value::Float(ns.iqr_high),
                iqr: Value::Float(ns.iqr),
                sum: Value::Float(ns.sum),
                summary_type: String::new(),
                histogram: (Vec::new(), Vec::new()),
            }
        }
        ValueKind::Str => {
            let ns = numeric_summary(
                masked
                    .iter()
                    .map(|(v, c)| match v {
                        Value::Str(s) => (s.chars().count() as f64, *c),
                        _ => (0.0, *c),
                    })
                    .collect(),
            );
            // true mode: the most counted string, not a length statistic
            let mode = masked
                .iter()
                .max_by_key(|(_, c)| *c)
                .map(|(v, _)| (*v).clone())
                .unwrap_or(Value::None);
            let chars = |x: f64| Value::Str(format!("{} characters", x));
            Summary {
                min: chars(ns.min),
                max: chars(ns.max),
                mean: chars(ns.mean),
                median: chars(ns.median),
                stdev: chars(ns.stdev),
                mode,
                distinct: Value::None,
                iqr_low: chars(ns.iqr_low),
                iqr_high: chars(ns.iqr_high),
                iqr: chars(ns.iqr),
                sum: chars(ns.sum),
                summary_type: String::new(),
                histogram: (Vec::new(), Vec::new()),
            }
        }
        ValueKind::Date | ValueKind::DateTime => {
            let epoch = |v: &Value| match v {
                Value::Date(d) => {
                    d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp() as f64)
                }
                Value::DateTime(dt) => Some(dt.and_utc().timestamp() as f64),
                _ => None,
            };
            let ns = numeric_summary(
                masked.iter().map(|(v, c)| (epoch(v).unwrap_or(f64::NAN), *c)).collect(),
            );
            let restore = |secs: f64| restore_temporal(secs, dominant);
            let days = |secs: f64| Value::Str(format!("{} days", secs / SECONDS_PER_DAY));
            Summary {
                min: restore(ns.min),
                max: restore(ns.max),
                mean: restore(ns.mean),
                median: restore(ns.median),
                stdev: days(ns.stdev),
                mode: restore(ns.mode),
                distinct: Value::None,
                iqr_low: restore(ns.iqr_low),
                iqr_high: restore(ns.iqr_high),
                iqr: days(ns.iqr),
                sum: days(ns.sum),
                summary_type: String::new(),
                histogram: (Vec::new(), Vec::new()),
            }
        }
        ValueKind::Time => {
            let seconds = |v: &Value| match v {
                Value::Time(t) => {
                    t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 / 1e9
                }
                _ => f64::NAN,
            };
            let ns =
                numeric_summary(masked.iter().map(|(v, c)| (seconds(v), *c)).collect());
            let restore = |secs: f64| restore_temporal(secs, dominant);
            let s = |secs: f64| Value::Str(format!("{} seconds", secs));
            Summary {
                min: restore(ns.min),
                max: restore(ns.max),
                mean: restore(ns.mean),
                median: restore(ns.median),
                stdev: s(ns.stdev),
                mode: restore(ns.mode),
                distinct: Value::None,
                iqr_low: restore(ns.iqr_low),
                iqr_high: restore(ns.iqr_high),
                iqr: s(ns.iqr),
                sum: s(ns.sum),
                summary_type: String::new(),
                histogram: (Vec::new(), Vec::new()),
            }
        }
        ValueKind::None => return not_available(values, counts),
    };

    summary.distinct = Value::Int(values.len() as i64);
    summary.summary_type = dominant.name().to_owned();
    summary.histogram = (values.to_vec(), counts.to_vec());
    summary
}

fn restore_temporal(secs: f64, kind: ValueKind) -> Value {
    if !secs.is_finite() {
        return Value::None;
    }
    match kind {
        ValueKind::Date => DateTime::from_timestamp(secs as i64, 0)
            .map(|dt| Value::Date(dt.date_naive()))
            .unwrap_or(Value::None),
        ValueKind::DateTime => DateTime::from_timestamp(secs as i64, 0)
            .map(|dt| Value::DateTime(dt.naive_utc()))
            .unwrap_or(Value::None),
        ValueKind::Time => {
            let whole = secs.max(0.0);
            NaiveTime::from_num_seconds_from_midnight_opt(
                (whole as u32) % 86_400,
                ((whole.fract()) * 1e9) as u32,
            )
            .map(Value::Time)
            .unwrap_or(Value::None)
        }
        _ => Value::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summarize(values: Vec<Value>) -> Summary {
        let mut histogram: IndexMap<Value, usize> = IndexMap::new();
        for v in values {
            *histogram.entry(v).or_insert(0) += 1;
        }
        let vs: Vec<Value> = histogram.keys().cloned().collect();
        let cs: Vec<usize> = histogram.values().copied().collect();
        summary_statistics(&vs, &cs)
    }

    #[test]
    fn numeric_summary_basics() {
        let s = summarize((1..=5).map(Value::Int).collect());
        assert_eq!(s.min, Value::Int(1));
        assert_eq!(s.max, Value::Int(5));
        assert_eq!(s.mean, Value::Float(3.0));
        assert_eq!(s.median, Value::Float(3.0));
        assert_eq!(s.sum, Value::Int(15));
        assert_eq!(s.distinct, Value::Int(5));
        assert_eq!(s.summary_type, "int");
        let expected_stdev = (10.0f64 / 4.0).sqrt();
        match s.stdev {
            Value::Float(x) => assert!((x - expected_stdev).abs() < 1e-12),
            other => panic!("stdev: {:?}", other),
        }
    }

    #[test]
    fn mode_prefers_highest_count() {
        let s = summarize(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(2),
            Value::Int(3),
        ]);
        assert_eq!(s.mode, Value::Int(2));
    }

    #[test]
    fn string_summary_lengths_and_mode() {
        let s = summarize(vec![
            Value::Str("aa".into()),
            Value::Str("aa".into()),
            Value::Str("bbbb".into()),
        ]);
        assert_eq!(s.min, Value::Str("2 characters".into()));
        assert_eq!(s.max, Value::Str("4 characters".into()));
        assert_eq!(s.mode, Value::Str("aa".into()));
        assert_eq!(s.summary_type, "str");
    }

    #[test]
    fn null_only_summary() {
        let s = summarize(vec![Value::None, Value::None]);
        assert_eq!(s.min, Value::Str("n/a".into()));
        assert_eq!(s.summary_type, "none");
        assert_eq!(s.distinct, Value::Int(1));
    }

    #[test]
    fn bool_summary_casts_back() {
        let s = summarize(vec![Value::Bool(true), Value::Bool(true), Value::Bool(false)]);
        assert_eq!(s.min, Value::Bool(false));
        assert_eq!(s.max, Value::Bool(true));
        assert_eq!(s.mode, Value::Bool(true));
        assert_eq!(s.sum, Value::Float(2.0));
    }
}
