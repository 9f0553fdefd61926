use std::collections::{BTreeSet, HashMap};

use super::{read_columns, OpsError};
use crate::storage::array::Array;
use crate::table::Table;
use crate::value::Value;

/// Per-key rank of one row's value; nulls sort below every ranked value,
/// whatever the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    NegInf,
    At(usize),
}

impl Table {
    /// The row permutation that sorts the table by `order`: an ordered list
    /// of `(column, descending)` pairs, highest precedence first.
    ///
    /// Each key column contributes the rank of the row's value among the
    /// column's sorted distinct values; rows then sort by their composite
    /// rank vector. The sort is stable: ties keep insertion order.
    fn sort_index(&self, order: &[(&str, bool)]) -> Result<Vec<usize>, OpsError> {
        let order: Vec<(&str, bool)> = if order.is_empty() {
            self.column_names().into_iter().map(|n| (n, false)).collect()
        } else {
            order.to_vec()
        };

        let len = self.len();
        let mut ranks: Vec<Vec<Rank>> = vec![Vec::with_capacity(order.len()); len];
        for &(name, descending) in &order {
            let values = read_columns(self, &[name])?.remove(0);
            let distinct: BTreeSet<&Value> =
                values.iter().filter(|v| !v.is_none()).collect();
            let mut rank_of: HashMap<&Value, usize> = HashMap::with_capacity(distinct.len());
            if descending {
                for (r, v) in distinct.into_iter().rev().enumerate() {
                    rank_of.insert(v, r);
                }
            } else {
                for (r, v) in distinct.into_iter().enumerate() {
                    rank_of.insert(v, r);
                }
            }
            for (ix, row_ranks) in ranks.iter_mut().enumerate() {
                let rank = match values.get(ix) {
                    Some(v) if !v.is_none() => Rank::At(rank_of[v]),
                    _ => Rank::NegInf,
                };
                row_ranks.push(rank);
            }
        }

        let mut index: Vec<usize> = (0..len).collect();
        index.sort_by(|a, b| ranks[*a].cmp(&ranks[*b]));
        Ok(index)
    }

    /// Multi-key stable sort, applied in place by rebuilding every column's
    /// pages in the permuted order.
    pub fn sort(&mut self, order: &[(&str, bool)]) -> Result<(), OpsError> {
        let index = self.sort_index(order)?;
        if index.iter().enumerate().all(|(i, ix)| i == *ix) {
            return Ok(());
        }
        for column in self.columns.values_mut() {
            let values = column.read_all()?.into_values();
            let permuted: Vec<Value> = index
                .iter()
                .map(|ix| values.get(*ix).cloned().unwrap_or(Value::None))
                .collect();
            column.replace(Array::from_values(permuted))?;
        }
        Ok(())
    }

    /// True when the table is already in `sort` order.
    pub fn is_sorted(&self, order: &[(&str, bool)]) -> Result<bool, OpsError> {
        let index = self.sort_index(order)?;
        Ok(index.iter().enumerate().all(|(i, ix)| i == *ix))
    }
}
