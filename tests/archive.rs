//! Save/load round-trips and workspace cleanup behavior.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use tabular_rs::{Array, Config, Slice, Table, TableError, Value, Workspace, WorkspaceError};

static LOCK: Mutex<()> = Mutex::new(());

fn guard() -> MutexGuard<'static, ()> {
    let g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    Config::reset();
    g
}

fn sample_table() -> Table {
    let a: Vec<i64> = (1..=20).collect();
    let b: Vec<f64> = a.iter().map(|x| *x as f64 / 2.0).collect();
    let c = Array::from_values(
        (1..=20)
            .map(|x| {
                if x % 5 == 0 {
                    Value::None
                } else {
                    Value::Str(format!("row {}", x))
                }
            })
            .collect(),
    );
    let mut t = Table::from_columns(vec![("nums", Array::from(a)), ("halves", Array::from(b))])
        .unwrap();
    t.set("labels", c).unwrap();
    t
}

fn page_paths(t: &Table, name: &str) -> Vec<PathBuf> {
    let pages_dir = Workspace::ensure().unwrap().pages_dir();
    t.column(name)
        .unwrap()
        .page_ids()
        .into_iter()
        .map(|id| pages_dir.join(format!("{}.arr", id)))
        .collect()
}

#[test]
fn save_load_round_trip() {
    let _g = guard();
    Config::set_page_size(7);
    let t = sample_table();

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("sample.tpz");
    t.save(&file).unwrap();
    assert!(file.exists());

    let loaded = Table::load(&file).unwrap();
    assert!(t.equals(&loaded).unwrap());
    assert_eq!(loaded.column_names(), vec!["nums", "halves", "labels"]);

    // fresh ids in the loading workspace
    let original: Vec<u64> = t.column("nums").unwrap().page_ids();
    let adopted: Vec<u64> = loaded.column("nums").unwrap().page_ids();
    assert!(original.iter().all(|id| !adopted.contains(id)));
    Config::reset();
}

#[test]
fn save_refuses_overwrite_and_bad_suffix() {
    let _g = guard();
    let t = sample_table();
    let dir = tempfile::tempdir().unwrap();

    let file = dir.path().join("once.tpz");
    t.save(&file).unwrap();
    match t.save(&file) {
        Err(TableError::Workspace(WorkspaceError::ArchiveExists(_))) => {}
        other => panic!("expected ArchiveExists, got {:?}", other.err()),
    }

    match t.save(dir.path().join("wrong.zip")) {
        Err(TableError::Workspace(WorkspaceError::ArchiveSuffix(_))) => {}
        other => panic!("expected ArchiveSuffix, got {:?}", other.err()),
    }
}

#[test]
fn load_missing_archive_fails() {
    let _g = guard();
    let dir = tempfile::tempdir().unwrap();
    assert!(Table::load(dir.path().join("absent.tpz")).is_err());
}

#[test]
fn dropping_a_table_removes_unshared_pages() {
    let _g = guard();
    Config::set_page_size(10);
    let t = Table::from_columns(vec![("v", (1..=20).collect::<Vec<i64>>())]).unwrap();

    // first page shared with a page-aligned slice, second page unshared
    let head = t.slice(&Slice::range(0, 10)).unwrap();
    let paths = page_paths(&t, "v");
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|p| p.exists()));
    let shared = paths[0].clone();
    let unshared = paths[1].clone();

    drop(t);
    assert!(shared.exists(), "page shared with the slice must survive");
    assert!(!unshared.exists(), "unshared page must be unlinked");

    drop(head);
    assert!(!shared.exists());

    // the workspace root itself stays until process exit
    assert!(Workspace::ensure().unwrap().root().exists());
    Config::reset();
}

#[test]
fn saved_pages_outlive_their_table() {
    let _g = guard();
    let t = Table::from_columns(vec![("v", vec![1i64, 2, 3])]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("kept.tpz");
    t.save(&file).unwrap();

    let paths = page_paths(&t, "v");
    drop(t);
    assert!(paths.iter().all(|p| p.exists()), "archived pages defer their unlink");
    assert!(file.exists());

    let loaded = Table::load(&file).unwrap();
    assert_eq!(loaded.len(), 3);
}

#[test]
fn tables_with_shared_pages_round_trip() {
    let _g = guard();
    Config::set_page_size(10);
    let t = Table::from_columns(vec![("v", (1..=10).collect::<Vec<i64>>())]).unwrap();
    // "v" and "v_1" share one page
    let doubled = t.select(&["v", "v", "v"], None).unwrap();
    assert_eq!(
        doubled.column("v").unwrap().page_ids(),
        doubled.column("v_1").unwrap().page_ids()
    );

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("shared.tpz");
    doubled.save(&file).unwrap();

    let loaded = Table::load(&file).unwrap();
    assert!(doubled.equals(&loaded).unwrap());
    // sharing survives the round trip
    assert_eq!(
        loaded.column("v").unwrap().page_ids(),
        loaded.column("v_1").unwrap().page_ids()
    );
    Config::reset();
}
