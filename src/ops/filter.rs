use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{read_columns, OpsError};
use crate::storage::array::Array;
use crate::storage::column::Column;
use crate::table::Table;
use crate::value::Value;

/// A per-column row predicate: a literal value compared for equality, or a
/// caller-supplied boolean on the cell value.
///
/// A missing value fails every predicate; callables never observe `None`.
#[derive(Clone)]
pub enum Predicate {
    Value(Value),
    Fn(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Predicate {
    pub fn value(v: impl Into<Value>) -> Predicate {
        Predicate::Value(v.into())
    }

    pub fn func(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Predicate {
        Predicate::Fn(Arc::new(f))
    }

    fn matches(&self, v: &Value) -> bool {
        if v.is_none() {
            return false;
        }
        match self {
            Predicate::Value(expected) => expected == v,
            Predicate::Fn(f) => f(v),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Predicate::Value(v) => write!(f, "Predicate::Value({:?})", v),
            Predicate::Fn(_) => write!(f, "Predicate::Fn(..)"),
        }
    }
}

/// Row tuples projected to a fixed column order.
pub struct RowTuples {
    columns: Vec<Vec<Value>>,
    len: usize,
    ix: usize,
}

impl Iterator for RowTuples {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Vec<Value>> {
        if self.ix >= self.len {
            return None;
        }
        let row = self
            .columns
            .iter()
            .map(|col| col.get(self.ix).cloned().unwrap_or(Value::None))
            .collect();
        self.ix += 1;
        Some(row)
    }
}

impl Table {
    /// Iterate rows projected to the named columns, in table order. Short
    /// columns read as `None` past their end.
    pub fn filter(&self, names: &[&str]) -> Result<RowTuples, OpsError> {
        let columns = read_columns(self, names)?;
        Ok(RowTuples { columns, len: self.len(), ix: 0 })
    }

    /// Rows where every predicate holds (intersection of the per-column
    /// match sets), in ascending row order, with all columns.
    pub fn all(&self, predicates: &[(&str, Predicate)]) -> Result<Table, OpsError> {
        if predicates.is_empty() {
            return Err(OpsError::ArgumentInvalid("no predicates given".to_owned()));
        }
        let mut selected: Option<BTreeSet<usize>> = None;
        for &(name, ref predicate) in predicates {
            let values = read_columns(self, &[name])?.remove(0);
            let matches: BTreeSet<usize> = match &selected {
                None => (0..self.len())
                    .filter(|ix| {
                        predicate.matches(values.get(*ix).unwrap_or(&Value::None))
                    })
                    .collect(),
                Some(previous) => previous
                    .iter()
                    .copied()
                    .filter(|ix| {
                        predicate.matches(values.get(*ix).unwrap_or(&Value::None))
                    })
                    .collect(),
            };
            let empty = matches.is_empty();
            selected = Some(matches);
            if empty {
                break;
            }
        }
        let rows: Vec<usize> = selected.unwrap_or_default().into_iter().collect();
        self.take_rows(&rows)
    }

    /// Rows where at least one predicate holds (union of the match sets),
    /// in ascending row order, with all columns.
    pub fn any(&self, predicates: &[(&str, Predicate)]) -> Result<Table, OpsError> {
        if predicates.is_empty() {
            return Err(OpsError::ArgumentInvalid("no predicates given".to_owned()));
        }
        let mut selected: BTreeSet<usize> = BTreeSet::new();
        for &(name, ref predicate) in predicates {
            let values = read_columns(self, &[name])?.remove(0);
            for ix in 0..self.len() {
                if predicate.matches(values.get(ix).unwrap_or(&Value::None)) {
                    selected.insert(ix);
                }
            }
        }
        let rows: Vec<usize> = selected.into_iter().collect();
        self.take_rows(&rows)
    }

    /// Page-aware gather of the given rows across all columns.
    pub(crate) fn take_rows(&self, rows: &[usize]) -> Result<Table, OpsError> {
        let mut out = Table::from_parts(Arc::clone(self.workspace()), IndexMap::new());
        for (name, column) in self.iter() {
            let values = column.read_all()?.into_values();
            let taken: Vec<Value> = rows
                .iter()
                .map(|ix| values.get(*ix).cloned().unwrap_or(Value::None))
                .collect();
            let column =
                Column::from_array(Arc::clone(self.workspace()), Array::from_values(taken))?;
            out.set_column(name.to_owned(), column);
        }
        Ok(out)
    }
}
