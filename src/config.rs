use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lazy_static::lazy_static;

/// Process-wide configuration.
///
/// All knobs are plain process globals so that every table in the process
/// shares one working directory and one pagination policy. Tests shrink
/// `PAGE_SIZE` to exercise multi-page columns with small data.
pub struct Config;

pub const DEFAULT_PAGE_SIZE: usize = 1_000_000;
pub const DEFAULT_SINGLE_PROCESSING_LIMIT: usize = 1_000_000;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);
static SINGLE_PROCESSING_LIMIT: AtomicUsize = AtomicUsize::new(DEFAULT_SINGLE_PROCESSING_LIMIT);
static MULTIPROCESSING: AtomicBool = AtomicBool::new(true);

lazy_static! {
    static ref WORKDIR: PathBuf = match env::var_os("WORKDIR") {
        Some(dir) => PathBuf::from(dir),
        None => env::temp_dir(),
    };
}

impl Config {
    /// Maximum number of values per page.
    pub fn page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    pub fn set_page_size(n: usize) {
        PAGE_SIZE.store(n.max(1), Ordering::Relaxed);
    }

    /// Output-cell threshold below which joins gather in the calling thread.
    pub fn single_processing_limit() -> usize {
        SINGLE_PROCESSING_LIMIT.load(Ordering::Relaxed)
    }

    pub fn set_single_processing_limit(n: usize) {
        SINGLE_PROCESSING_LIMIT.store(n.max(1), Ordering::Relaxed);
    }

    /// When false, ingest and large joins run on the calling thread only.
    pub fn multiprocessing() -> bool {
        MULTIPROCESSING.load(Ordering::Relaxed)
    }

    pub fn set_multiprocessing(enabled: bool) {
        MULTIPROCESSING.store(enabled, Ordering::Relaxed);
    }

    /// Root under which per-process workspaces are created.
    ///
    /// `WORKDIR` in the environment wins; otherwise the OS temp dir.
    pub fn workdir() -> &'static Path {
        &WORKDIR
    }

    pub fn reset() {
        Self::set_page_size(DEFAULT_PAGE_SIZE);
        Self::set_single_processing_limit(DEFAULT_SINGLE_PROCESSING_LIMIT);
        Self::set_multiprocessing(true);
    }
}
