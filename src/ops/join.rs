use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, instrument};

use super::{validate_columns, OpsError};
use crate::config::Config;
use crate::storage::array::Array;
use crate::storage::column::Column;
use crate::storage::page::Page;
use crate::table::Table;
use crate::util::unique_name;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Outer,
    Cross,
}

/// Key-tuples per row of `table`, padded with nulls past short columns.
fn key_rows(table: &Table, keys: &[&str]) -> Result<Vec<Vec<Value>>, OpsError> {
    let columns = super::read_columns(table, keys)?;
    Ok((0..table.len())
        .map(|row| {
            columns.iter().map(|col| col.get(row).cloned().unwrap_or(Value::None)).collect()
        })
        .collect())
}

/// Key-column compatibility: for each key pair the observed type sets must
/// intersect, or the join can never produce a match. An empty side skips
/// the check (joining against an empty table is legal and yields no
/// matches, not an error).
fn join_type_check(
    left: &Table,
    right: &Table,
    left_keys: &[&str],
    right_keys: &[&str],
) -> Result<(), OpsError> {
    if left_keys.len() != right_keys.len() {
        return Err(OpsError::ArgumentInvalid(format!(
            "key lists differ in length: {} vs {}",
            left_keys.len(),
            right_keys.len()
        )));
    }
    validate_columns(left, left_keys)?;
    validate_columns(right, right_keys)?;

    for (l, r) in left_keys.iter().zip(right_keys) {
        let left_types = left.column(l)?.types()?;
        let right_types = right.column(r)?.types()?;
        if left_types.is_empty() || right_types.is_empty() {
            continue;
        }
        if left_types.keys().any(|k| right_types.contains_key(k)) {
            continue;
        }
        let fmt = |types: &std::collections::BTreeMap<crate::value::ValueKind, usize>| {
            types.keys().map(|k| k.name()).collect::<Vec<_>>().join(", ")
        };
        return Err(OpsError::JoinTypeMismatch {
            left: (*l).to_owned(),
            right: (*r).to_owned(),
            left_types: fmt(&left_types),
            right_types: fmt(&right_types),
        });
    }
    Ok(())
}

type RowMaps = (Vec<Option<usize>>, Vec<Option<usize>>);

/// The shared join skeleton: two parallel row-id lists, one per side, with
/// `None` marking an unmatched row.
fn build_row_maps(
    kind: JoinKind,
    left: &Table,
    right: &Table,
    left_keys: &[&str],
    right_keys: &[&str],
) -> Result<RowMaps, OpsError> {
    let mut l: Vec<Option<usize>> = Vec::new();
    let mut r: Vec<Option<usize>> = Vec::new();
    match kind {
        JoinKind::Inner => {
            let left_index = left.index(left_keys)?;
            let right_index = right.index(right_keys)?;
            let mut matched: Vec<&Vec<Value>> =
                left_index.keys().filter(|k| right_index.contains_key(*k)).collect();
            matched.sort();
            for key in matched {
                for &li in &left_index[key] {
                    for &ri in &right_index[key] {
                        l.push(Some(li));
                        r.push(Some(ri));
                    }
                }
            }
        }
        JoinKind::Left => {
            let right_index = right.index(right_keys)?;
            for (row, key) in key_rows(left, left_keys)?.into_iter().enumerate() {
                match right_index.get(&key) {
                    Some(rows) => {
                        for &ri in rows {
                            l.push(Some(row));
                            r.push(Some(ri));
                        }
                    }
                    None => {
                        l.push(Some(row));
                        r.push(None);
                    }
                }
            }
        }
        JoinKind::Outer => {
            let right_index = right.index(right_keys)?;
            let mut used: HashSet<&Vec<Value>> = HashSet::new();
            let left_key_rows = key_rows(left, left_keys)?;
            for (row, key) in left_key_rows.iter().enumerate() {
                match right_index.get_key_value(key) {
                    Some((stored, rows)) => {
                        used.insert(stored);
                        for &ri in rows {
                            l.push(Some(row));
                            r.push(Some(ri));
                        }
                    }
                    None => {
                        l.push(Some(row));
                        r.push(None);
                    }
                }
            }
            let mut unmatched: Vec<&Vec<Value>> =
                right_index.keys().filter(|k| !used.contains(*k)).collect();
            unmatched.sort();
            for key in unmatched {
                for &ri in &right_index[key] {
                    l.push(None);
                    r.push(Some(ri));
                }
            }
        }
        JoinKind::Cross => {
            for li in 0..left.len() {
                for ri in 0..right.len() {
                    l.push(Some(li));
                    r.push(Some(ri));
                }
            }
        }
    }
    Ok((l, r))
}

struct GatherSource {
    name: String,
    values: Arc<Vec<Value>>,
    map: Arc<Vec<Option<usize>>>,
}

fn gather(values: &[Value], map: &[Option<usize>], from: usize, to: usize) -> Vec<Value> {
    map[from..to]
        .iter()
        .map(|slot| {
            slot.and_then(|row| values.get(row).cloned()).unwrap_or(Value::None)
        })
        .collect()
}

/// Build the join output by gathering both sides through the row maps.
///
/// Small outputs gather in the calling thread; past the single-processing
/// limit the output pages are partitioned across a pool, each worker
/// gathering its own page from the shared read-only row-id vectors.
fn assemble(
    left: &Table,
    right: &Table,
    l: Vec<Option<usize>>,
    r: Vec<Option<usize>>,
    left_columns: &[&str],
    right_columns: &[&str],
) -> Result<Table, OpsError> {
    let workspace = Arc::clone(left.workspace());
    let out_len = l.len();
    let cost = out_len * (left_columns.len() + right_columns.len());

    let l = Arc::new(l);
    let r = Arc::new(r);
    let mut names: Vec<String> = Vec::new();
    let mut sources: Vec<GatherSource> = Vec::new();
    for name in left_columns {
        let actual = unique_name(name, |n| names.iter().any(|existing| existing == n));
        names.push(actual.clone());
        sources.push(GatherSource {
            name: actual,
            values: Arc::new(left.column(name)?.read_all()?.into_values()),
            map: Arc::clone(&l),
        });
    }
    for name in right_columns {
        let actual = unique_name(name, |n| names.iter().any(|existing| existing == n));
        names.push(actual.clone());
        sources.push(GatherSource {
            name: actual,
            values: Arc::new(right.column(name)?.read_all()?.into_values()),
            map: Arc::clone(&r),
        });
    }

    let mut out = Table::from_parts(Arc::clone(&workspace), IndexMap::new());
    if cost < Config::single_processing_limit() || !Config::multiprocessing() || out_len == 0 {
        for source in sources {
            let values = gather(&source.values, &source.map, 0, out_len);
            let column =
                Column::from_array(Arc::clone(&workspace), Array::from_values(values))?;
            out.set_column(source.name, column);
        }
        return Ok(out);
    }

    // one task per output page
    let page_size = Config::page_size();
    struct GatherTask {
        source: usize,
        window: usize,
        from: usize,
        to: usize,
        page_id: u64,
    }
    let pages_dir = workspace.pages_dir();
    let mut tasks: Vec<GatherTask> = Vec::new();
    for (source, _) in sources.iter().enumerate() {
        let mut from = 0;
        let mut window = 0;
        while from < out_len {
            let to = (from + page_size).min(out_len);
            tasks.push(GatherTask {
                source,
                window,
                from,
                to,
                page_id: workspace.new_page_id(),
            });
            from = to;
            window += 1;
        }
    }

    let cpu = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let pool_size = cpu.saturating_sub(1).max(1).min(tasks.len().max(1));
    debug!(tasks = tasks.len(), pool = pool_size, rows = out_len, "gathering join output");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .build()
        .map_err(|err| OpsError::Internal(err.to_string()))?;
    let results: Vec<(usize, usize, Result<Page, String>)> = pool.install(|| {
        tasks
            .par_iter()
            .map(|task| {
                let source = &sources[task.source];
                let values = gather(&source.values, &source.map, task.from, task.to);
                let page = Page::write_to(
                    &pages_dir,
                    task.page_id,
                    &Array::from_values(values),
                )
                .map_err(|err| format!("rows {}..{}: {}", task.from, task.to, err));
                (task.source, task.window, page)
            })
            .collect()
    });

    let total = results.len();
    let mut pages: Vec<Vec<(usize, Page)>> = (0..sources.len()).map(|_| Vec::new()).collect();
    let mut errors: Vec<String> = Vec::new();
    for (source, window, result) in results {
        match result {
            Ok(page) => pages[source].push((window, page)),
            Err(message) => errors.push(message),
        }
    }
    if !errors.is_empty() {
        return Err(OpsError::TaskFailure {
            failed: errors.len(),
            total,
            messages: errors.join("\n"),
        });
    }
    for (source, mut source_pages) in sources.into_iter().zip(pages) {
        source_pages.sort_by_key(|(window, _)| *window);
        let mut column = Column::new(Arc::clone(&workspace));
        for (_, page) in source_pages {
            column.append_page(Arc::new(page));
        }
        out.set_column(source.name, column);
    }
    Ok(out)
}

impl Table {
    /// Join `self` (left) with `other` (right) on the paired key columns.
    ///
    /// `None` for a column list keeps every column of that side. Right-side
    /// names that collide with the output are suffixed `_1`, `_2`, …
    #[instrument(skip_all, fields(kind = ?kind), level = "debug")]
    pub fn join(
        &self,
        other: &Table,
        left_keys: &[&str],
        right_keys: &[&str],
        left_columns: Option<&[&str]>,
        right_columns: Option<&[&str]>,
        kind: JoinKind,
    ) -> Result<Table, OpsError> {
        join_type_check(self, other, left_keys, right_keys)?;

        let all_left: Vec<&str>;
        let left_columns = match left_columns {
            Some(columns) => {
                validate_columns(self, columns)?;
                columns
            }
            None => {
                all_left = self.column_names();
                all_left.as_slice()
            }
        };
        let all_right: Vec<&str>;
        let right_columns = match right_columns {
            Some(columns) => {
                validate_columns(other, columns)?;
                columns
            }
            None => {
                all_right = other.column_names();
                all_right.as_slice()
            }
        };

        let (l, r) = build_row_maps(kind, self, other, left_keys, right_keys)?;
        assemble(self, other, l, r, left_columns, right_columns)
    }

    pub fn inner_join(
        &self,
        other: &Table,
        left_keys: &[&str],
        right_keys: &[&str],
        left_columns: Option<&[&str]>,
        right_columns: Option<&[&str]>,
    ) -> Result<Table, OpsError> {
        self.join(other, left_keys, right_keys, left_columns, right_columns, JoinKind::Inner)
    }

    pub fn left_join(
        &self,
        other: &Table,
        left_keys: &[&str],
        right_keys: &[&str],
        left_columns: Option<&[&str]>,
        right_columns: Option<&[&str]>,
    ) -> Result<Table, OpsError> {
        self.join(other, left_keys, right_keys, left_columns, right_columns, JoinKind::Left)
    }

    pub fn outer_join(
        &self,
        other: &Table,
        left_keys: &[&str],
        right_keys: &[&str],
        left_columns: Option<&[&str]>,
        right_columns: Option<&[&str]>,
    ) -> Result<Table, OpsError> {
        self.join(other, left_keys, right_keys, left_columns, right_columns, JoinKind::Outer)
    }

    /// Cartesian product of rows; keys are still validated to catch
    /// programmer errors, but do not drive matching.
    pub fn cross_join(
        &self,
        other: &Table,
        left_keys: &[&str],
        right_keys: &[&str],
        left_columns: Option<&[&str]>,
        right_columns: Option<&[&str]>,
    ) -> Result<Table, OpsError> {
        self.join(other, left_keys, right_keys, left_columns, right_columns, JoinKind::Cross)
    }
}
