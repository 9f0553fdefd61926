use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::storage::array::Array;
use crate::storage::column::{Column, ColumnError, Segment};
use crate::storage::workspace::{Workspace, WorkspaceError};
use crate::util::{unique_name, Slice};
use crate::value::Value;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("column not found: {0}")]
    KeyMissing(String),
    #[error("{0}")]
    ArgumentInvalid(String),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// A name-ordered collection of columns.
///
/// Column names are unique within a table and keep their insertion order
/// for iteration, display and save. The table's logical length is the
/// longest column; shorter columns read as `None` past their end.
pub struct Table {
    workspace: Arc<Workspace>,
    manifest_path: PathBuf,
    pub(crate) columns: IndexMap<String, Column>,
}

impl Table {
    pub fn new() -> Result<Table, TableError> {
        let workspace = Workspace::ensure()?;
        Ok(Self::from_parts(workspace, IndexMap::new()))
    }

    /// Assemble a table from pre-built columns. The per-table manifest file
    /// identifies the table within the workspace and is removed on drop.
    pub(crate) fn from_parts(workspace: Arc<Workspace>, columns: IndexMap<String, Column>) -> Table {
        let id = workspace.new_table_id();
        let manifest_path = workspace.tables_dir().join(format!("{}.yml", id));
        if let Err(err) = fs::write(&manifest_path, "temp: true\n") {
            debug!("could not write table manifest {}: {}", manifest_path.display(), err);
        }
        Table { workspace, manifest_path, columns }
    }

    /// Build a table from `(name, values)` pairs.
    pub fn from_columns<N, A>(columns: Vec<(N, A)>) -> Result<Table, TableError>
    where
        N: AsRef<str>,
        A: Into<Array>,
    {
        let mut table = Table::new()?;
        for (name, values) in columns {
            table.set(name.as_ref(), values)?;
        }
        Ok(table)
    }

    /// Build a table from a header list and row tuples. Short rows fill
    /// with `None`.
    pub fn from_headers_rows(headers: &[&str], rows: &[Vec<Value>]) -> Result<Table, TableError> {
        let mut table = Table::new()?;
        for (ix, header) in headers.iter().enumerate() {
            let values: Vec<Value> =
                rows.iter().map(|row| row.get(ix).cloned().unwrap_or(Value::None)).collect();
            table.set(header, Array::from_values(values))?;
        }
        Ok(table)
    }

    pub(crate) fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Materialise `values` as a new column under `name`, replacing any
    /// existing column of that name.
    #[instrument(skip(self, values), level = "trace")]
    pub fn set(&mut self, name: &str, values: impl Into<Array>) -> Result<(), TableError> {
        let column = Column::from_array(Arc::clone(&self.workspace), values.into())?;
        self.columns.insert(name.to_owned(), column);
        Ok(())
    }

    /// Direct column insert; replaces like [`Table::set`].
    pub(crate) fn set_column(&mut self, name: String, column: Column) {
        self.columns.insert(name, column);
    }

    /// Column insert that never replaces: name collisions are suffixed
    /// `_1`, `_2`, … Returns the name actually used.
    pub(crate) fn set_column_unique(&mut self, name: &str, column: Column) -> String {
        let actual = unique_name(name, |n| self.columns.contains_key(n));
        self.columns.insert(actual.clone(), column);
        actual
    }

    pub fn column(&self, name: &str) -> Result<&Column, TableError> {
        self.columns.get(name).ok_or_else(|| TableError::KeyMissing(name.to_owned()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<(), TableError> {
        if self.columns.contains_key(new) {
            return Err(TableError::ArgumentInvalid(format!(
                "cannot rename {:?} to {:?}: name already in use",
                old, new
            )));
        }
        let ix = self
            .columns
            .get_index_of(old)
            .ok_or_else(|| TableError::KeyMissing(old.to_owned()))?;
        let (_, column) = self
            .columns
            .shift_remove_index(ix)
            .ok_or_else(|| TableError::KeyMissing(old.to_owned()))?;
        self.columns.shift_insert(ix, new.to_owned(), column);
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<(), TableError> {
        self.columns
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| TableError::KeyMissing(name.to_owned()))
    }

    /// Logical length: the longest column.
    pub fn len(&self) -> usize {
        self.columns.values().map(Column::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The row at `ix` as one scalar per column, in insertion order.
    pub fn row(&self, ix: usize) -> Result<Vec<Value>, TableError> {
        if ix >= self.len() {
            return Err(TableError::ArgumentInvalid(format!(
                "row {} out of range for table of {} rows",
                ix,
                self.len()
            )));
        }
        let mut row = Vec::with_capacity(self.columns.len());
        for column in self.columns.values() {
            row.push(column.value_at(ix)?.unwrap_or(Value::None));
        }
        Ok(row)
    }

    fn sliced_column(&self, column: &Column, slice: &Slice) -> Result<Column, TableError> {
        let mut out = Column::new(Arc::clone(&self.workspace));
        for segment in column.pages_for(slice)? {
            match segment {
                Segment::Page(page) => out.append_page(page),
                Segment::Values(array) => out.append(array)?,
            }
        }
        Ok(out)
    }

    /// A new table with every column sliced, sharing whole pages with the
    /// source wherever the slice covers them.
    pub fn slice(&self, slice: &Slice) -> Result<Table, TableError> {
        let names = self.column_names();
        self.select(&names, Some(slice))
    }

    /// A new table with the named columns in the given order (duplicates
    /// allowed, suffixed), optionally sliced.
    pub fn select(&self, names: &[&str], slice: Option<&Slice>) -> Result<Table, TableError> {
        let missing: Vec<&str> = names.iter().copied().filter(|n| !self.has_column(n)).collect();
        if !missing.is_empty() {
            return Err(TableError::KeyMissing(missing.join(", ")));
        }
        let mut out = Table::from_parts(Arc::clone(&self.workspace), IndexMap::new());
        for name in names {
            let column = self.column(name)?;
            let column = match slice {
                Some(slice) => self.sliced_column(column, slice)?,
                None => column.clone(),
            };
            out.set_column_unique(name, column);
        }
        Ok(out)
    }

    /// Content equality: same column names (order does not matter), same
    /// lengths, per-column elementwise equality.
    pub fn equals(&self, other: &Table) -> Result<bool, TableError> {
        if self.columns.len() != other.columns.len() {
            return Ok(false);
        }
        if self.len() != other.len() {
            return Ok(false);
        }
        for (name, column) in self.iter() {
            match other.columns.get(name) {
                Some(theirs) => {
                    if !column.equals(theirs)? {
                        return Ok(false);
                    }
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Row-concatenation. The result's columns are the union of both
    /// sides', left first, then right-only columns; missing cells are
    /// `None`. Whole pages are shared, only the padding is materialised.
    pub fn stack(&self, other: &Table) -> Result<Table, TableError> {
        let left_len = self.len();
        let right_len = other.len();
        let mut out = Table::from_parts(Arc::clone(&self.workspace), IndexMap::new());

        for (name, column) in self.iter() {
            let mut stacked = column.clone();
            pad(&mut stacked, left_len - column.len())?;
            match other.columns.get(name) {
                Some(theirs) => {
                    for page in theirs.pages() {
                        stacked.append_page(Arc::clone(page));
                    }
                    pad(&mut stacked, right_len - theirs.len())?;
                }
                None => pad(&mut stacked, right_len)?,
            }
            out.set_column(name.to_owned(), stacked);
        }
        for (name, column) in other.iter() {
            if self.has_column(name) {
                continue;
            }
            let mut stacked = Column::new(Arc::clone(&self.workspace));
            pad(&mut stacked, left_len)?;
            for page in column.pages() {
                stacked.append_page(Arc::clone(page));
            }
            pad(&mut stacked, right_len - column.len())?;
            out.set_column(name.to_owned(), stacked);
        }
        Ok(out)
    }

    /// Every row materialised; shorter columns pad with `None`.
    pub fn to_rows(&self) -> Result<Vec<Vec<Value>>, TableError> {
        let len = self.len();
        let mut cols = Vec::with_capacity(self.columns.len());
        for column in self.columns.values() {
            cols.push(column.read_all()?.into_values());
        }
        let mut rows = Vec::with_capacity(len);
        for ix in 0..len {
            rows.push(
                cols.iter().map(|c| c.get(ix).cloned().unwrap_or(Value::None)).collect::<Vec<_>>(),
            );
        }
        Ok(rows)
    }

    /// Persist as a `.tpz` archive. Refuses to overwrite.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        self.workspace.save(self, path.as_ref())?;
        Ok(())
    }

    /// Load an archive into the current workspace; the loaded table's pages
    /// get fresh ids and are cleaned up with the workspace.
    pub fn load(path: impl AsRef<Path>) -> Result<Table, TableError> {
        let workspace = Workspace::ensure()?;
        Ok(workspace.load(path.as_ref())?)
    }
}

fn pad(column: &mut Column, n: usize) -> Result<(), ColumnError> {
    if n > 0 {
        column.append(Array::Mixed(vec![Value::None; n]))?;
    }
    Ok(())
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Table({} columns, {} rows)", self.columns.len(), self.len())
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Table")
            .field("columns", &self.column_names())
            .field("rows", &self.len())
            .finish()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.manifest_path) {
            debug!("table manifest unlink failed: {}", err);
        }
    }
}
