use indexmap::IndexMap;

use super::{read_columns, OpsError};
use crate::table::Table;
use crate::value::Value;

impl Table {
    /// Build an index on the key columns: key-tuple → row ids, ascending.
    ///
    /// Keys keep their first-seen order; `None` is a legal key component.
    pub fn index(&self, keys: &[&str]) -> Result<IndexMap<Vec<Value>, Vec<usize>>, OpsError> {
        let columns = read_columns(self, keys)?;
        let mut index: IndexMap<Vec<Value>, Vec<usize>> = IndexMap::new();
        for row in 0..self.len() {
            let key: Vec<Value> = columns
                .iter()
                .map(|col| col.get(row).cloned().unwrap_or(Value::None))
                .collect();
            index.entry(key).or_default().push(row);
        }
        Ok(index)
    }
}
