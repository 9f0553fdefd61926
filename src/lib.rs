//! A disk-backed columnar table engine.
//!
//! Tables hold named columns whose values are transparently paginated to
//! immutable on-disk pages, so datasets larger than memory stay workable.
//! Text files import through a parallel chunked pipeline, tables persist as
//! compressed `.tpz` archives, and the relational operators (index, sort,
//! filter, group-by, join) run on top of the paged storage, sharing pages
//! with their inputs wherever a result lines up with page boundaries.

pub mod config;
pub mod datatypes;
pub mod ingest;
pub mod ops;
mod show;
pub mod stats;
pub mod storage;
pub mod table;
pub mod util;
pub mod value;

pub use config::Config;
pub use ingest::{ImportOptions, IngestError};
pub use ops::{Aggregate, GroupBy, JoinKind, OpsError, Predicate};
pub use stats::Summary;
pub use storage::array::Array;
pub use storage::column::Column;
pub use storage::workspace::{shutdown, Workspace, WorkspaceError};
pub use table::{Table, TableError};
pub use util::Slice;
pub use value::{Value, ValueKind};
