//! The text import pipeline: probe, scan, header, plan, execute,
//! consolidate.
//!
//! The plan fans one task out per (column, page window) pair. Workers are
//! fully independent: each opens the source itself, re-runs the
//! logical-line scanner to its start line, and writes exactly one page file
//! under an id the controller allocated up front. Consolidation reattaches
//! the pages in line-range order, so the resulting table is identical
//! whatever the pool size.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use encoding_rs::Encoding;
use indexmap::IndexMap;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, instrument};

use super::escape::{LineScanner, TextEscape};
use super::sniff;
use crate::config::Config;
use crate::datatypes;
use crate::storage::array::Array;
use crate::storage::column::{Column, ColumnError};
use crate::storage::page::{Page, PageError};
use crate::storage::workspace::Workspace;
use crate::table::{Table, TableError};
use crate::util::unique_name;
use crate::value::ValueKind;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    ArgumentInvalid(String),
    #[error("io failure reading {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{failed} of {total} import tasks failed:\n{messages}")]
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

/// Options for [`Table::import`].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// First logical line is the header row.
    pub first_row_has_headers: bool,
    /// Sheet name for spreadsheet sources; rejected for text sources.
    pub sheet: Option<String>,
    /// Keep only these columns. Mutually exclusive with `skip`.
    pub columns: Option<Vec<String>>,
    /// Drop these columns. Mutually exclusive with `columns`.
    pub skip: Option<Vec<String>>,
    /// Data rows to skip before the first imported row.
    pub start: usize,
    /// Maximum number of data rows to import; must be positive.
    pub limit: usize,
    /// Encoding label; auto-detected when absent.
    pub encoding: Option<String>,
    /// Field delimiter; auto-detected when absent.
    pub delimiter: Option<char>,
    /// Text qualifier protecting embedded delimiters and newlines.
    pub qualifier: Option<char>,
    pub escape_openings: String,
    pub escape_closures: String,
    /// Strip leading/trailing whitespace from each field.
    pub strip: bool,
    /// Run type inference per (column, window).
    pub guess_datatypes: bool,
    pub newline: String,
    /// Pin named columns to a kind; failed coercions fall back to strings.
    pub column_types: HashMap<String, ValueKind>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            first_row_has_headers: true,
            sheet: None,
            columns: None,
            skip: None,
            start: 0,
            limit: usize::MAX,
            encoding: None,
            delimiter: None,
            qualifier: Some('"'),
            escape_openings: "({[".to_owned(),
            escape_closures: "]})".to_owned(),
            strip: true,
            guess_datatypes: true,
            newline: "\n".to_owned(),
            column_types: HashMap::new(),
        }
    }
}

impl Table {
    /// Import a delimited text file.
    pub fn import(path: impl AsRef<Path>, options: &ImportOptions) -> Result<Table, IngestError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" | "tsv" | "txt" | "text" => text_reader(path, options),
            _ => Err(IngestError::Config(format!(
                "unsupported file type: {}",
                path.display()
            ))),
        }
    }
}

struct TextReaderTask {
    source: PathBuf,
    pages_dir: PathBuf,
    encoding: &'static Encoding,
    escape: TextEscape,
    qualifier: Option<char>,
    openings: String,
    closures: String,
    column_index: usize,
    start: usize,
    end: usize,
    guess_datatypes: bool,
    pinned: Option<ValueKind>,
    page_id: u64,
    column: usize,
    window: usize,
}

impl TextReaderTask {
    fn run(&self) -> Result<Page, String> {
        let fail = |err: &dyn std::fmt::Display| {
            format!(
                "column {} lines {}..{}: {}",
                self.column_index, self.start, self.end, err
            )
        };

        let mut scanner = LineScanner::open(
            &self.source,
            self.encoding,
            self.qualifier,
            &self.openings,
            &self.closures,
        )
        .map_err(|err| fail(&err))?;
        scanner.skip(self.start).map_err(|err| fail(&err))?;

        let mut raw: Vec<Option<String>> = Vec::with_capacity(self.end - self.start);
        for _ in self.start..self.end {
            match scanner.next_line().map_err(|err| fail(&err))? {
                Some(line) => {
                    let mut fields = self.escape.split(&line);
                    // a row shorter than the header projects null
                    raw.push(if self.column_index < fields.len() {
                        Some(fields.swap_remove(self.column_index))
                    } else {
                        None
                    });
                }
                None => break,
            }
        }

        let values = match self.pinned {
            Some(kind) => datatypes::coerce_all(&raw, kind),
            None if self.guess_datatypes => datatypes::guess(&raw),
            None => datatypes::verbatim(&raw),
        };
        Page::write_to(&self.pages_dir, self.page_id, &Array::from_values(values))
            .map_err(|err| fail(&err))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> IngestError + '_ {
    move |source| IngestError::Io { path: path.to_path_buf(), source }
}

fn keep_column(name: &str, options: &ImportOptions) -> bool {
    if let Some(keep) = &options.columns {
        return keep.iter().any(|k| k == name);
    }
    if let Some(skip) = &options.skip {
        return !skip.iter().any(|s| s == name);
    }
    true
}

/// Memory-bounded task size: page-sized windows, shrunk when free memory
/// divided across the pool cannot hold that many lines.
fn lines_per_task(pool_size: usize) -> usize {
    const PER_LINE_OVERHEAD: usize = 1024;
    let page_size = Config::page_size();
    match free_memory() {
        Some(free) => page_size.min(free / (pool_size.max(1) * PER_LINE_OVERHEAD)).max(1),
        None => page_size,
    }
}

#[cfg(target_os = "linux")]
fn free_memory() -> Option<usize> {
    let pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };
    let size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if pages > 0 && size > 0 {
        Some(pages as usize * size as usize)
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn free_memory() -> Option<usize> {
    None
}

fn cpu_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Import any delimited text file.
#[instrument(skip(options), level = "debug")]
pub fn text_reader(path: &Path, options: &ImportOptions) -> Result<Table, IngestError> {
    if options.sheet.is_some() {
        return Err(IngestError::ArgumentInvalid(
            "sheet does not apply to text sources".to_owned(),
        ));
    }
    if options.limit == 0 {
        return Err(IngestError::ArgumentInvalid("expected limit > 0".to_owned()));
    }
    if options.columns.is_some() && options.skip.is_some() {
        return Err(IngestError::ArgumentInvalid(
            "use columns OR skip, not both".to_owned(),
        ));
    }

    let metadata = fs::metadata(path).map_err(io_err(path))?;
    if metadata.len() == 0 {
        return Ok(Table::new()?);
    }

    // probe: encoding from a head sample
    let sample = {
        let mut buf = vec![0u8; sniff::ENCODING_SAMPLE];
        let mut file = fs::File::open(path).map_err(io_err(path))?;
        let mut filled = 0;
        loop {
            let n = io::Read::read(&mut file, &mut buf[filled..]).map_err(io_err(path))?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() {
                break;
            }
        }
        buf.truncate(filled);
        buf
    };
    let encoding = sniff::resolve_encoding(options.encoding.as_deref(), &sample)?;

    // scan: one pass counting logical lines, keeping the head for the
    // delimiter vote and the header
    let mut scanner = LineScanner::open(
        path,
        encoding,
        options.qualifier,
        &options.escape_openings,
        &options.escape_closures,
    )
    .map_err(io_err(path))?;
    let mut line_count = 0usize;
    let mut probe: Vec<String> = Vec::new();
    while let Some(line) = scanner.next_line().map_err(io_err(path))? {
        if probe.len() < sniff::DELIMITER_PROBE_LINES && !line.trim().is_empty() {
            probe.push(line);
        }
        line_count += 1;
    }
    if line_count == 0 || probe.is_empty() {
        return Ok(Table::new()?);
    }

    let delimiter = match options.delimiter.or_else(|| sniff::detect_delimiter(&probe)) {
        Some(delimiter) => delimiter,
        None => return Ok(Table::new()?),
    };
    let escape = TextEscape::new(
        delimiter,
        options.qualifier,
        &options.escape_openings,
        &options.escape_closures,
        options.strip,
    );

    // header: first logical line, or synthesised names
    let first_fields = escape.split(&probe[0]);
    let mut names: Vec<String> = Vec::with_capacity(first_fields.len());
    for (ix, field) in first_fields.iter().enumerate() {
        let wanted = if options.first_row_has_headers {
            field.trim().to_owned()
        } else {
            format!("_{}", ix + 1)
        };
        let fresh = unique_name(&wanted, |n| names.iter().any(|existing| existing == n));
        names.push(fresh);
    }
    let kept: Vec<(usize, String)> = names
        .into_iter()
        .enumerate()
        .filter(|(_, name)| keep_column(name, options))
        .collect();

    let header_offset = if options.first_row_has_headers { 1 } else { 0 };
    let data_start = options.start.saturating_add(header_offset);
    let data_end = line_count.min(data_start.saturating_add(options.limit));

    let workspace = Workspace::ensure().map_err(TableError::from)?;
    if data_start >= data_end {
        // nothing past `start`: an empty table that still carries the
        // detected header columns
        let mut table = Table::new()?;
        for (_, name) in &kept {
            table.set(name, Array::empty())?;
        }
        return Ok(table);
    }

    // plan: one task per (column, window)
    let window_len = lines_per_task(cpu_count().saturating_sub(1).max(1));
    let window_count = {
        let rows = data_end - data_start;
        (rows + window_len - 1) / window_len
    };
    let pages_dir = workspace.pages_dir();
    let mut tasks: Vec<TextReaderTask> = Vec::with_capacity(window_count * kept.len());
    for (column, (source_index, name)) in kept.iter().enumerate() {
        let pinned = options.column_types.get(name).copied();
        let mut start = data_start;
        let mut window = 0;
        while start < data_end {
            let end = (start + window_len).min(data_end);
            tasks.push(TextReaderTask {
                source: path.to_path_buf(),
                pages_dir: pages_dir.clone(),
                encoding,
                escape: escape.clone(),
                qualifier: options.qualifier,
                openings: options.escape_openings.clone(),
                closures: options.escape_closures.clone(),
                column_index: *source_index,
                start,
                end,
                guess_datatypes: options.guess_datatypes,
                pinned,
                page_id: workspace.new_page_id(),
                column,
                window,
            });
            start = end;
            window += 1;
        }
    }

    // execute
    let pool_size = cpu_count().saturating_sub(1).max(1).min(tasks.len().max(1));
    debug!(tasks = tasks.len(), pool = pool_size, "importing {}", path.display());
    let results: Vec<(usize, usize, Result<Page, String>)> =
        if pool_size <= 1 || !Config::multiprocessing() {
            tasks.iter().map(|t| (t.column, t.window, t.run())).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(pool_size)
                .build()
                .map_err(|err| IngestError::Internal(err.to_string()))?;
            pool.install(|| {
                tasks.par_iter().map(|t| (t.column, t.window, t.run())).collect()
            })
        };

    // consolidate: pages reattach in line-range order; failures aggregate
    let total = results.len();
    let mut pages: Vec<Vec<(usize, Page)>> = (0..kept.len()).map(|_| Vec::new()).collect();
    let mut errors: Vec<String> = Vec::new();
    for (column, window, result) in results {
        match result {
            Ok(page) => pages[column].push((window, page)),
            Err(message) => errors.push(message),
        }
    }
    if !errors.is_empty() {
        // pages already written stay behind for the workspace cleanup
        return Err(IngestError::TaskFailure {
            failed: errors.len(),
            total,
            messages: errors.join("\n"),
        });
    }

    let mut columns: IndexMap<String, Column> = IndexMap::new();
    for ((_, name), mut column_pages) in kept.into_iter().zip(pages) {
        column_pages.sort_by_key(|(window, _)| *window);
        let mut column = Column::new(Arc::clone(&workspace));
        for (_, page) in column_pages {
            column.append_page(Arc::new(page));
        }
        columns.insert(name, column);
    }
    Ok(Table::from_parts(workspace, columns))
}
