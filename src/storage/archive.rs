//! The `.tpz` archive: a deflate zip holding a `table.yml` manifest plus the
//! raw bytes of every referenced page file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::array::Array;
use super::column::Column;
use super::page::Page;
use super::workspace::{Workspace, WorkspaceError};
use crate::table::Table;

const MANIFEST_NAME: &str = "table.yml";

/// The `table.yml` document. Lists within each column are positionally
/// aligned: `pages[i]` has `length[i]` values and type code `types[i]`
/// (0 = native fixed-width, nonzero = object-encoded).
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    temp: bool,
    columns: IndexMap<String, ColumnManifest>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnManifest {
    pages: Vec<String>,
    length: Vec<usize>,
    types: Vec<u8>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io { path: path.to_path_buf(), source }
}

/// Write `table` to a new archive at `path`.
#[instrument(skip(table), level = "debug")]
pub fn save(table: &Table, path: &Path) -> Result<(), WorkspaceError> {
    if path.extension().map(|e| e != "tpz").unwrap_or(true) {
        return Err(WorkspaceError::ArchiveSuffix(path.to_path_buf()));
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| match source.kind() {
            std::io::ErrorKind::AlreadyExists => WorkspaceError::ArchiveExists(path.to_path_buf()),
            _ => WorkspaceError::Io { path: path.to_path_buf(), source },
        })?;

    let mut manifest = Manifest { temp: false, columns: IndexMap::new() };
    for (name, column) in table.iter() {
        let pages = column.pages();
        manifest.columns.insert(
            name.to_owned(),
            ColumnManifest {
                pages: pages.iter().map(|p| Page::filename(p.id())).collect(),
                length: pages.iter().map(|p| p.len()).collect(),
                types: pages.iter().map(|p| p.dtype().manifest_code()).collect(),
            },
        );
    }
    let yml = serde_yaml::to_string(&manifest)?;

    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(MANIFEST_NAME, options)?;
    zip.write_all(yml.as_bytes()).map_err(io_err(path))?;

    // A page shared between columns is stored once.
    let mut written: Vec<u64> = Vec::new();
    for (_, column) in table.iter() {
        for page in column.pages() {
            if written.contains(&page.id()) {
                continue;
            }
            written.push(page.id());
            let bytes = std::fs::read(page.path()).map_err(io_err(page.path()))?;
            zip.start_file(Page::filename(page.id()), options)?;
            zip.write_all(&bytes).map_err(io_err(path))?;
        }
    }
    zip.finish()?;

    for (_, column) in table.iter() {
        for page in column.pages() {
            page.mark_saved();
        }
    }
    debug!("archive written: {}", path.display());
    Ok(())
}

/// Read an archive into `workspace`, assigning fresh page ids.
#[instrument(skip(workspace), level = "debug")]
pub fn load(workspace: &Arc<Workspace>, path: &Path) -> Result<Table, WorkspaceError> {
    let file = File::open(path).map_err(io_err(path))?;
    let mut zip = ZipArchive::new(file)?;

    let mut yml = String::new();
    zip.by_name(MANIFEST_NAME)?.read_to_string(&mut yml).map_err(io_err(path))?;
    let manifest: Manifest = serde_yaml::from_str(&yml)?;

    let pages_dir: PathBuf = workspace.pages_dir();
    // The same archive entry may appear in several columns; extract once.
    let mut extracted: HashMap<String, Arc<Page>> = HashMap::new();
    let mut columns: IndexMap<String, Column> = IndexMap::new();

    for (name, entry) in manifest.columns {
        if entry.pages.len() != entry.length.len() || entry.pages.len() != entry.types.len() {
            return Err(WorkspaceError::ManifestInvariant(format!(
                "column {:?}: pages/length/types lists differ in length",
                name
            )));
        }
        let mut column = Column::new(Arc::clone(workspace));
        for (filename, expected_len) in entry.pages.iter().zip(&entry.length) {
            let page = match extracted.get(filename) {
                Some(page) => Arc::clone(page),
                None => {
                    let mut bytes = Vec::new();
                    zip.by_name(filename)?.read_to_end(&mut bytes).map_err(io_err(path))?;
                    let (_, len) = Array::decode_header(&bytes).map_err(|err| {
                        WorkspaceError::ManifestInvariant(format!(
                            "page {} is not a valid array file: {}",
                            filename, err
                        ))
                    })?;
                    if len != *expected_len {
                        return Err(WorkspaceError::ManifestInvariant(format!(
                            "page {}: manifest says {} values, file holds {}",
                            filename, expected_len, len
                        )));
                    }
                    let page =
                        Arc::new(Page::adopt(&pages_dir, workspace.new_page_id(), &bytes)?);
                    extracted.insert(filename.clone(), Arc::clone(&page));
                    page
                }
            };
            column.append_page(page);
        }
        columns.insert(name, column);
    }

    debug!("archive loaded: {}", path.display());
    Ok(Table::from_parts(Arc::clone(workspace), columns))
}
