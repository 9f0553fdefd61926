use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once, Weak};

use lazy_static::lazy_static;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::page::PageError;
use crate::config::Config;
use crate::table::Table;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("io failure under {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("refusing to overwrite existing archive {0}")]
    ArchiveExists(PathBuf),
    #[error("archive filename must end in .tpz: {0}")]
    ArchiveSuffix(PathBuf),
    #[error("archive container error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),
    #[error("archive manifest is inconsistent: {0}")]
    ManifestInvariant(String),
    #[error(transparent)]
    Page(#[from] PageError),
}

lazy_static! {
    // Every workspace root ever created in this process; the shutdown hook
    // walks this and removes only roots carrying the current pid.
    static ref REGISTRY: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
    static ref CURRENT: Mutex<Weak<Workspace>> = Mutex::new(Weak::new());
}

static PAGE_IDS: AtomicU64 = AtomicU64::new(1);
static TABLE_IDS: AtomicU64 = AtomicU64::new(0);
static SHUTDOWN_HOOK: Once = Once::new();

extern "C" fn shutdown_hook() {
    shutdown();
}

/// The per-process directory root where pages and table manifests live.
///
/// Created lazily by the first table construction, shared by every column
/// through an `Arc`, removed at normal process exit.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Return the process workspace, creating
    /// `<workdir>/pid-<pid>/{tables,pages,index}` on first use.
    ///
    /// First use also sweeps leftover `pid-*` directories of processes that
    /// are no longer alive (a killed process never runs its shutdown hook).
    #[instrument(level = "debug")]
    pub fn ensure() -> Result<Arc<Workspace>, WorkspaceError> {
        let mut current = CURRENT.lock().unwrap();
        if let Some(ws) = current.upgrade() {
            return Ok(ws);
        }

        let workdir = Config::workdir();
        sweep_stale(workdir);

        let root = workdir.join(format!("pid-{}", process::id()));
        for sub in ["tables", "pages", "index"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir)
                .map_err(|source| WorkspaceError::Io { path: dir.clone(), source })?;
        }
        REGISTRY.lock().unwrap().insert(root.clone());
        SHUTDOWN_HOOK.call_once(|| unsafe {
            libc::atexit(shutdown_hook);
        });
        debug!("workspace ready: {}", root.display());

        let ws = Arc::new(Workspace { root });
        *current = Arc::downgrade(&ws);
        Ok(ws)
    }

    pub fn new_page_id(&self) -> u64 {
        PAGE_IDS.fetch_add(1, Ordering::SeqCst)
    }

    pub fn new_table_id(&self) -> u64 {
        TABLE_IDS.fetch_add(1, Ordering::SeqCst)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join("pages")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.root.join("tables")
    }

    /// Write `table` as a `.tpz` archive at `path`. Fails if the file
    /// already exists or the suffix is wrong.
    pub fn save(&self, table: &Table, path: &Path) -> Result<(), WorkspaceError> {
        super::archive::save(table, path)
    }

    /// Read an archive into this workspace: every page gets a fresh id and
    /// lives under this workspace's cleanup.
    pub fn load(self: &Arc<Self>, path: &Path) -> Result<Table, WorkspaceError> {
        super::archive::load(self, path)
    }
}

/// Remove every registered workspace root belonging to the current pid.
///
/// Roots that do not carry the pid in their final path segment are skipped;
/// a corrupted registry must never delete unrelated directories.
pub fn shutdown() {
    let marker = format!("pid-{}", process::id());
    let roots: Vec<PathBuf> = REGISTRY.lock().unwrap().drain().collect();
    for root in roots {
        let matches_pid = root
            .file_name()
            .map(|name| name.to_string_lossy().contains(&marker))
            .unwrap_or(false);
        if !matches_pid {
            warn!("shutdown: skipping foreign path {}", root.display());
            continue;
        }
        match fs::remove_dir_all(&root) {
            Ok(()) => debug!("shutdown: removed {}", root.display()),
            Err(err) => debug!("shutdown: could not remove {}: {}", root.display(), err),
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Delete `pid-*` directories whose owning process is gone.
fn sweep_stale(workdir: &Path) {
    let entries = match fs::read_dir(workdir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    let own = process::id();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(tail) = name.strip_prefix("pid-") else {
            continue;
        };
        let Ok(pid) = tail.parse::<u32>() else {
            continue;
        };
        if pid == own || pid_alive(pid) {
            continue;
        }
        if !entry.path().is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => debug!("swept stale workspace {}", entry.path().display()),
            Err(err) => debug!("could not sweep {}: {}", entry.path().display(), err),
        }
    }
}
