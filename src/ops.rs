pub mod filter;
pub mod groupby;
pub mod index;
pub mod join;
pub mod sort;

use thiserror::Error;

use crate::storage::column::ColumnError;
use crate::storage::page::PageError;
use crate::table::{Table, TableError};

pub use filter::Predicate;
pub use groupby::{Aggregate, GroupBy};
pub use join::JoinKind;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("column not found: {0}")]
    KeyMissing(String),
    #[error("{0}")]
    ArgumentInvalid(String),
    #[error("type mismatch in column {column}: {detail}")]
    TypeMismatch { column: String, detail: String },
    #[error(
        "left key {left:?} ({left_types}) can never match right key {right:?} ({right_types})"
    )]
    JoinTypeMismatch { left: String, right: String, left_types: String, right_types: String },
    #[error("{failed} of {total} gather tasks failed:\n{messages}")]
    TaskFailure { failed: usize, total: usize, messages: String },
    #[error("internal invariant violated: {0}")]
    Internal(String),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Page(#[from] PageError),
}

/// Fail with `KeyMissing` listing every requested column the table lacks.
pub(crate) fn validate_columns(table: &Table, names: &[&str]) -> Result<(), OpsError> {
    let missing: Vec<&str> = names.iter().copied().filter(|n| !table.has_column(n)).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OpsError::KeyMissing(missing.join(", ")))
    }
}

/// Read the named columns fully, in order. Short columns are padded to the
/// table length with nulls by the callers' row getters.
pub(crate) fn read_columns(
    table: &Table,
    names: &[&str],
) -> Result<Vec<Vec<crate::value::Value>>, OpsError> {
    validate_columns(table, names)?;
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        out.push(table.column(name)?.read_all()?.into_values());
    }
    Ok(out)
}
