use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{read_columns, validate_columns, OpsError};
use crate::storage::array::Array;
use crate::storage::column::Column;
use crate::table::Table;
use crate::value::Value;

/// The aggregator kinds accepted by [`Table::groupby`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Min,
    Sum,
    First,
    Last,
    Count,
    CountUnique,
    Average,
    StandardDeviation,
    Median,
    Mode,
}

impl Aggregate {
    /// The name used in output column headers: `Sum(qty)`.
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Max => "Max",
            Aggregate::Min => "Min",
            Aggregate::Sum => "Sum",
            Aggregate::First => "First",
            Aggregate::Last => "Last",
            Aggregate::Count => "Count",
            Aggregate::CountUnique => "CountUnique",
            Aggregate::Average => "Average",
            Aggregate::StandardDeviation => "StandardDeviation",
            Aggregate::Median => "Median",
            Aggregate::Mode => "Mode",
        }
    }

    fn new_state(&self) -> Box<dyn Accumulator> {
        match self {
            Aggregate::Max => Box::new(Extremum { best: None, take_max: true }),
            Aggregate::Min => Box::new(Extremum { best: None, take_max: false }),
            Aggregate::Sum => Box::new(Sum::default()),
            Aggregate::First => Box::new(First(None)),
            Aggregate::Last => Box::new(Last(None)),
            Aggregate::Count => Box::new(Count(0)),
            Aggregate::CountUnique => Box::new(CountUnique(HashSet::new())),
            Aggregate::Average => Box::new(Average::default()),
            Aggregate::StandardDeviation => Box::new(StandardDeviation::default()),
            Aggregate::Median => Box::new(Median(Vec::new())),
            Aggregate::Mode => Box::new(Mode(IndexMap::new())),
        }
    }
}

/// Per-group running state. `update` only ever sees non-null values; the
/// group-by pass skips nulls for every aggregator kind.
trait Accumulator: Send {
    fn update(&mut self, value: &Value) -> Result<(), String>;
    fn finish(&mut self) -> Value;
}

fn numeric(value: &Value) -> Result<f64, String> {
    value.as_f64().ok_or_else(|| format!("{} is not numeric", value.kind().name()))
}

struct Extremum {
    best: Option<Value>,
    take_max: bool,
}

impl Accumulator for Extremum {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        let better = match &self.best {
            None => true,
            Some(best) => {
                if self.take_max {
                    value > best
                } else {
                    value < best
                }
            }
        };
        if better {
            self.best = Some(value.clone());
        }
        Ok(())
    }

    fn finish(&mut self) -> Value {
        self.best.take().unwrap_or(Value::None)
    }
}

/// Integer sums stay integers until a float shows up.
#[derive(Default)]
struct Sum {
    int: i64,
    float: f64,
    promoted: bool,
    seen: bool,
}

impl Accumulator for Sum {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        match value {
            Value::Int(i) if !self.promoted => self.int += i,
            _ => {
                let x = numeric(value)?;
                if !self.promoted {
                    self.float = self.int as f64;
                    self.promoted = true;
                }
                self.float += x;
            }
        }
        self.seen = true;
        Ok(())
    }

    fn finish(&mut self) -> Value {
        match (self.seen, self.promoted) {
            (false, _) => Value::Int(0),
            (true, false) => Value::Int(self.int),
            (true, true) => Value::Float(self.float),
        }
    }
}

struct First(Option<Value>);

impl Accumulator for First {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        if self.0.is_none() {
            self.0 = Some(value.clone());
        }
        Ok(())
    }

    fn finish(&mut self) -> Value {
        self.0.take().unwrap_or(Value::None)
    }
}

struct Last(Option<Value>);

impl Accumulator for Last {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        self.0 = Some(value.clone());
        Ok(())
    }

    fn finish(&mut self) -> Value {
        self.0.take().unwrap_or(Value::None)
    }
}

struct Count(usize);

impl Accumulator for Count {
    fn update(&mut self, _value: &Value) -> Result<(), String> {
        self.0 += 1;
        Ok(())
    }

    fn finish(&mut self) -> Value {
        Value::Int(self.0 as i64)
    }
}

struct CountUnique(HashSet<Value>);

impl Accumulator for CountUnique {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        self.0.insert(value.clone());
        Ok(())
    }

    fn finish(&mut self) -> Value {
        Value::Int(self.0.len() as i64)
    }
}

#[derive(Default)]
struct Average {
    sum: f64,
    count: usize,
}

impl Accumulator for Average {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        self.sum += numeric(value)?;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Value {
        if self.count == 0 {
            Value::None
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }
}

/// Welford's online pass: no catastrophic cancellation.
#[derive(Default)]
struct StandardDeviation {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Accumulator for StandardDeviation {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        let x = numeric(value)?;
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        Ok(())
    }

    fn finish(&mut self) -> Value {
        if self.count == 0 {
            Value::None
        } else if self.count == 1 {
            Value::Float(0.0)
        } else {
            Value::Float((self.m2 / (self.count - 1) as f64).sqrt())
        }
    }
}

/// Buffers per group; the exact median computes at finalize.
struct Median(Vec<Value>);

impl Accumulator for Median {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        self.0.push(value.clone());
        Ok(())
    }

    fn finish(&mut self) -> Value {
        if self.0.is_empty() {
            return Value::None;
        }
        self.0.sort();
        let n = self.0.len();
        if n % 2 == 1 {
            return self.0[n / 2].clone();
        }
        let (lo, hi) = (&self.0[n / 2 - 1], &self.0[n / 2]);
        match (lo.as_f64(), hi.as_f64()) {
            (Some(a), Some(b)) => Value::Float((a + b) / 2.0),
            _ => lo.clone(),
        }
    }
}

/// Most frequent value; ties break to the first occurrence.
struct Mode(IndexMap<Value, usize>);

impl Accumulator for Mode {
    fn update(&mut self, value: &Value) -> Result<(), String> {
        *self.0.entry(value.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn finish(&mut self) -> Value {
        let mut best: Option<(&Value, usize)> = None;
        for (value, count) in &self.0 {
            if best.map(|(_, n)| *count > n).unwrap_or(true) {
                best = Some((value, *count));
            }
        }
        best.map(|(v, _)| v.clone()).unwrap_or(Value::None)
    }
}

/// A completed group-by: the aggregated table plus the metadata needed to
/// pivot it.
pub struct GroupBy {
    keys: Vec<String>,
    aggregates: Vec<(String, Aggregate)>,
    table: Table,
}

impl Table {
    /// Group rows by the key columns and fold each group through the given
    /// aggregators. The output has one row per distinct key-tuple, sorted
    /// ascending on the keys, with key columns first and one
    /// `Agg(source)` column per aggregator.
    pub fn groupby(
        &self,
        keys: &[&str],
        aggregates: &[(&str, Aggregate)],
    ) -> Result<GroupBy, OpsError> {
        let duplicates: Vec<&str> =
            keys.iter().copied().filter(|k| keys.iter().filter(|x| *x == k).count() > 1).collect();
        if !duplicates.is_empty() {
            return Err(OpsError::ArgumentInvalid(format!(
                "duplicate keys found: {}",
                duplicates.join(", ")
            )));
        }
        validate_columns(self, keys)?;
        let sources: Vec<&str> = aggregates.iter().map(|(name, _)| *name).collect();
        validate_columns(self, &sources)?;

        let key_columns = read_columns(self, keys)?;
        let agg_columns = read_columns(self, &sources)?;

        let mut groups: IndexMap<Vec<Value>, Vec<Box<dyn Accumulator>>> = IndexMap::new();
        for row in 0..self.len() {
            let key: Vec<Value> = key_columns
                .iter()
                .map(|col| col.get(row).cloned().unwrap_or(Value::None))
                .collect();
            let states = groups
                .entry(key)
                .or_insert_with(|| aggregates.iter().map(|(_, agg)| agg.new_state()).collect());
            for (j, (name, _)) in aggregates.iter().enumerate() {
                let value = agg_columns[j].get(row).cloned().unwrap_or(Value::None);
                if value.is_none() {
                    continue;
                }
                states[j].update(&value).map_err(|detail| OpsError::TypeMismatch {
                    column: (*name).to_owned(),
                    detail,
                })?;
            }
        }

        let mut entries: Vec<(Vec<Value>, Vec<Box<dyn Accumulator>>)> =
            groups.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut key_buffers: Vec<Vec<Value>> = vec![Vec::with_capacity(entries.len()); keys.len()];
        let mut agg_buffers: Vec<Vec<Value>> =
            vec![Vec::with_capacity(entries.len()); aggregates.len()];
        for (key, mut states) in entries {
            for (buffer, part) in key_buffers.iter_mut().zip(key) {
                buffer.push(part);
            }
            for (buffer, state) in agg_buffers.iter_mut().zip(states.iter_mut()) {
                buffer.push(state.finish());
            }
        }

        let workspace = Arc::clone(self.workspace());
        let mut out = Table::from_parts(Arc::clone(&workspace), IndexMap::new());
        for (name, buffer) in keys.iter().zip(key_buffers) {
            let column = Column::from_array(Arc::clone(&workspace), Array::from_values(buffer))?;
            out.set_column_unique(name, column);
        }
        for ((source, aggregate), buffer) in aggregates.iter().zip(agg_buffers) {
            let column = Column::from_array(Arc::clone(&workspace), Array::from_values(buffer))?;
            out.set_column_unique(&format!("{}({})", aggregate.name(), source), column);
        }

        Ok(GroupBy {
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            aggregates: aggregates
                .iter()
                .map(|(name, agg)| ((*name).to_owned(), *agg))
                .collect(),
            table: out,
        })
    }
}

impl GroupBy {
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }

    /// Re-project the group-by so distinct value-tuples of `columns` become
    /// additional output columns, one per (aggregator, tuple), named
    /// `Agg(source,key=value,…)`.
    pub fn pivot(&self, columns: &[&str]) -> Result<Table, OpsError> {
        if columns.is_empty() {
            return Err(OpsError::ArgumentInvalid("no pivot columns given".to_owned()));
        }
        let unknown: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| !self.keys.iter().any(|k| k == c))
            .collect();
        if !unknown.is_empty() {
            return Err(OpsError::ArgumentInvalid(format!(
                "pivot columns must be group-by keys: {}",
                unknown.join(", ")
            )));
        }

        let rows = self.table.to_rows()?;
        let position: IndexMap<&str, usize> = self
            .table
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(ix, name)| (name, ix))
            .collect();
        let vertical: Vec<&String> =
            self.keys.iter().filter(|k| !columns.contains(&k.as_str())).collect();

        let pivot_label = |row: &[Value]| -> String {
            columns
                .iter()
                .map(|c| format!("{}={}", c, row[position[c]]))
                .collect::<Vec<_>>()
                .join(",")
        };

        // first pass: the pivoted column names, in first-encounter order
        let mut pivot_names: IndexMap<String, ()> = IndexMap::new();
        for row in &rows {
            let label = pivot_label(row);
            for (source, aggregate) in &self.aggregates {
                let name = format!("{}({},{})", aggregate.name(), source, label);
                pivot_names.entry(name).or_insert(());
            }
        }

        // second pass: one output row per run of identical vertical keys
        let mut vertical_buffers: Vec<Vec<Value>> = vec![Vec::new(); vertical.len()];
        let mut pivot_buffers: IndexMap<&str, Vec<Value>> =
            pivot_names.keys().map(|name| (name.as_str(), Vec::new())).collect();
        let mut previous: Option<Vec<Value>> = None;
        for row in &rows {
            let vk: Vec<Value> = vertical.iter().map(|k| row[position[k.as_str()]].clone()).collect();
            if previous.as_ref() != Some(&vk) {
                for (buffer, part) in vertical_buffers.iter_mut().zip(&vk) {
                    buffer.push(part.clone());
                }
                for buffer in pivot_buffers.values_mut() {
                    buffer.push(Value::None);
                }
                previous = Some(vk);
            }
            let label = pivot_label(row);
            for (j, (source, aggregate)) in self.aggregates.iter().enumerate() {
                let name = format!("{}({},{})", aggregate.name(), source, label);
                if let Some(buffer) = pivot_buffers.get_mut(name.as_str()) {
                    let value = row[self.keys.len() + j].clone();
                    if let Some(cell) = buffer.last_mut() {
                        *cell = value;
                    }
                }
            }
        }

        let workspace = Arc::clone(self.table.workspace());
        let mut out = Table::from_parts(Arc::clone(&workspace), IndexMap::new());
        for (name, buffer) in vertical.iter().zip(vertical_buffers) {
            let column = Column::from_array(Arc::clone(&workspace), Array::from_values(buffer))?;
            out.set_column_unique(name.as_str(), column);
        }
        for (name, buffer) in pivot_buffers {
            let column = Column::from_array(Arc::clone(&workspace), Array::from_values(buffer))?;
            out.set_column_unique(name, column);
        }
        Ok(out)
    }
}
