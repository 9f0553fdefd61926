use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, instrument};

use super::array::{Array, ArrayError, DType};
use super::workspace::Workspace;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("io failure on page file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("page file {path} is corrupt: {source}")]
    Corrupt { path: PathBuf, source: ArrayError },
}

/// One immutable on-disk array segment of a column.
///
/// The file is written exactly once at construction and never edited.
/// Several columns may hold the same page; the file is unlinked when the
/// last reference drops, unless the page was captured in a user archive
/// (the workspace sweep reclaims those at process exit).
#[derive(Debug)]
pub struct Page {
    id: u64,
    path: PathBuf,
    len: usize,
    dtype: DType,
    saved: AtomicBool,
}

impl Page {
    pub(crate) fn filename(id: u64) -> String {
        format!("{}.arr", id)
    }

    /// Write `array` as a new page owned by `workspace`.
    #[instrument(skip(workspace, array), level = "trace")]
    pub(crate) fn create(workspace: &Workspace, array: &Array) -> Result<Page, PageError> {
        let id = workspace.new_page_id();
        Self::write_to(&workspace.pages_dir(), id, array)
    }

    /// Write `array` under a pre-allocated id. Ingest workers use this so
    /// the controller keeps the id allocator to itself.
    pub(crate) fn write_to(pages_dir: &Path, id: u64, array: &Array) -> Result<Page, PageError> {
        let path = pages_dir.join(Self::filename(id));
        let bytes = array
            .encode()
            .map_err(|source| PageError::Corrupt { path: path.clone(), source })?;
        fs::write(&path, bytes).map_err(|source| PageError::Io { path: path.clone(), source })?;
        debug!(page = id, len = array.len(), "page saved: {}", path.display());
        Ok(Page { id, path, len: array.len(), dtype: array.dtype(), saved: AtomicBool::new(false) })
    }

    /// Adopt raw page-file bytes (archive extraction) under a fresh id.
    pub(crate) fn adopt(pages_dir: &Path, id: u64, bytes: &[u8]) -> Result<Page, PageError> {
        let path = pages_dir.join(Self::filename(id));
        let (dtype, len) = Array::decode_header(bytes)
            .map_err(|source| PageError::Corrupt { path: path.clone(), source })?;
        fs::write(&path, bytes).map_err(|source| PageError::Io { path: path.clone(), source })?;
        debug!(page = id, len, "page adopted: {}", path.display());
        Ok(Page { id, path, len, dtype, saved: AtomicBool::new(false) })
    }

    /// Load the stored array back from disk.
    #[instrument(skip(self), fields(page = self.id), level = "trace")]
    pub fn read(&self) -> Result<Array, PageError> {
        let bytes = fs::read(&self.path)
            .map_err(|source| PageError::Io { path: self.path.clone(), source })?;
        let array = Array::decode(&bytes)
            .map_err(|source| PageError::Corrupt { path: self.path.clone(), source })?;
        Ok(array)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flag the page as captured in a user archive; its file outlives the
    /// page object and is reclaimed with the workspace.
    pub fn mark_saved(&self) {
        self.saved.store(true, Ordering::Relaxed);
    }

    pub fn is_saved(&self) -> bool {
        self.saved.load(Ordering::Relaxed)
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        if self.is_saved() {
            return;
        }
        // Best effort; the workspace may already be gone at process exit.
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(page = self.id, "page deleted: {}", self.path.display()),
            Err(err) => debug!(page = self.id, "page unlink failed: {}", err),
        }
    }
}
