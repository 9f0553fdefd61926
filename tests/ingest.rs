//! End-to-end text import scenarios.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use tabular_rs::{Config, ImportOptions, IngestError, Table, Value, ValueKind};

static LOCK: Mutex<()> = Mutex::new(());

fn guard() -> MutexGuard<'static, ()> {
    let g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // RUST_LOG=debug surfaces the pipeline's stage logging
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Config::reset();
    g
}

fn write_csv(name: &str, contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    (dir, path)
}

fn column_values(t: &Table, name: &str) -> Vec<Value> {
    t.column(name).unwrap().read_all().unwrap().into_values()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

#[test]
fn paginates_by_page_size_and_round_trips() {
    let _g = guard();
    Config::set_page_size(10);

    let mut csv = String::from("a,b,c\n");
    for i in 1..=25 {
        csv.push_str(&format!("{},{},{}\n", i, i * 2, i * 3));
    }
    let (_dir, path) = write_csv("rows.csv", &csv);

    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.len(), 25);
    assert_eq!(t.column_names(), vec!["a", "b", "c"]);
    for name in ["a", "b", "c"] {
        assert_eq!(t.column(name).unwrap().page_lengths(), vec![10, 10, 5]);
    }
    assert_eq!(column_values(&t, "b")[..3], ints(&[2, 4, 6])[..]);

    let archive_dir = tempfile::tempdir().unwrap();
    let file = archive_dir.path().join("imported.tpz");
    t.save(&file).unwrap();
    let loaded = Table::load(&file).unwrap();
    assert_eq!(loaded.len(), 25);
    assert!(t.equals(&loaded).unwrap());
    Config::reset();
}

#[test]
fn quoted_fields_keep_embedded_delimiters() {
    let _g = guard();
    let (_dir, path) = write_csv("quoted.csv", "x,y,z\na,\"b,c\",d\n");
    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.len(), 1);
    assert_eq!(t.row(0).unwrap(), vec![
        Value::Str("a".into()),
        Value::Str("b,c".into()),
        Value::Str("d".into()),
    ]);
}

#[test]
fn quoted_newlines_stay_inside_one_row() {
    let _g = guard();
    let (_dir, path) = write_csv("multiline.csv", "x,y\n\"line\nbreak\",2\nplain,3\n");
    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.len(), 2);
    assert_eq!(
        column_values(&t, "x"),
        vec![Value::Str("line\nbreak".into()), Value::Str("plain".into())]
    );
}

#[test]
fn ingest_is_deterministic_across_pool_sizes() {
    let _g = guard();
    Config::set_page_size(7);

    let mut csv = String::from("a,b,c\n");
    for i in 0..100 {
        csv.push_str(&format!("{},{}.5,word{}\n", i, i, i % 9));
    }
    let (_dir, path) = write_csv("deterministic.csv", &csv);

    let parallel = Table::import(&path, &ImportOptions::default()).unwrap();
    Config::set_multiprocessing(false);
    let serial = Table::import(&path, &ImportOptions::default()).unwrap();
    Config::set_multiprocessing(true);

    assert!(parallel.equals(&serial).unwrap());
    assert_eq!(parallel.len(), 100);
    Config::reset();
}

#[test]
fn type_inference_per_column() {
    let _g = guard();
    let (_dir, path) = write_csv(
        "typed.csv",
        "i,f,b,d,s,gaps\n1,0.5,true,2024-01-31,hello,1\n2,1.5,false,2024-02-29,world,\n",
    );
    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(column_values(&t, "i"), ints(&[1, 2]));
    assert_eq!(column_values(&t, "f"), vec![Value::Float(0.5), Value::Float(1.5)]);
    assert_eq!(column_values(&t, "b"), vec![Value::Bool(true), Value::Bool(false)]);
    assert_eq!(
        column_values(&t, "d"),
        vec![
            Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
            Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
        ]
    );
    assert_eq!(
        column_values(&t, "s"),
        vec![Value::Str("hello".into()), Value::Str("world".into())]
    );
    // the empty cell is null and does not break inference for the rest
    assert_eq!(column_values(&t, "gaps"), vec![Value::Int(1), Value::None]);
}

#[test]
fn inference_can_be_disabled_or_pinned() {
    let _g = guard();
    let (_dir, path) = write_csv("raw.csv", "n\n1\n2\n");

    let verbatim = Table::import(
        &path,
        &ImportOptions { guess_datatypes: false, ..ImportOptions::default() },
    )
    .unwrap();
    assert_eq!(
        column_values(&verbatim, "n"),
        vec![Value::Str("1".into()), Value::Str("2".into())]
    );

    let mut column_types = HashMap::new();
    column_types.insert("n".to_owned(), ValueKind::Float);
    let pinned =
        Table::import(&path, &ImportOptions { column_types, ..ImportOptions::default() }).unwrap();
    assert_eq!(
        column_values(&pinned, "n"),
        vec![Value::Float(1.0), Value::Float(2.0)]
    );
}

#[test]
fn short_rows_fill_with_null() {
    let _g = guard();
    let (_dir, path) = write_csv("short.csv", "a,b,c\n1,2,3\n4,5\n6\n");
    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.len(), 3);
    assert_eq!(column_values(&t, "c"), vec![Value::Int(3), Value::None, Value::None]);
    assert_eq!(column_values(&t, "b"), vec![Value::Int(2), Value::Int(5), Value::None]);
}

#[test]
fn keep_and_skip_filter_columns() {
    let _g = guard();
    let (_dir, path) = write_csv("filter.csv", "a,b,c\n1,2,3\n");

    let kept = Table::import(
        &path,
        &ImportOptions {
            columns: Some(vec!["a".into(), "c".into()]),
            ..ImportOptions::default()
        },
    )
    .unwrap();
    assert_eq!(kept.column_names(), vec!["a", "c"]);

    let skipped = Table::import(
        &path,
        &ImportOptions { skip: Some(vec!["b".into()]), ..ImportOptions::default() },
    )
    .unwrap();
    assert_eq!(skipped.column_names(), vec!["a", "c"]);

    let both = Table::import(
        &path,
        &ImportOptions {
            columns: Some(vec!["a".into()]),
            skip: Some(vec!["b".into()]),
            ..ImportOptions::default()
        },
    );
    assert!(matches!(both, Err(IngestError::ArgumentInvalid(_))));
}

#[test]
fn duplicate_headers_are_suffixed() {
    let _g = guard();
    let (_dir, path) = write_csv("dupes.csv", "x,x,x\n1,2,3\n");
    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.column_names(), vec!["x", "x_1", "x_2"]);
}

#[test]
fn headerless_files_synthesise_names() {
    let _g = guard();
    let (_dir, path) = write_csv("noheader.csv", "1,2,3\n4,5,6\n");
    let t = Table::import(
        &path,
        &ImportOptions { first_row_has_headers: false, ..ImportOptions::default() },
    )
    .unwrap();
    assert_eq!(t.column_names(), vec!["_1", "_2", "_3"]);
    assert_eq!(t.len(), 2);
    assert_eq!(column_values(&t, "_1"), ints(&[1, 4]));
}

#[test]
fn start_and_limit_window_the_rows() {
    let _g = guard();
    let mut csv = String::from("n\n");
    for i in 0..20 {
        csv.push_str(&format!("{}\n", i));
    }
    let (_dir, path) = write_csv("window.csv", &csv);
    let t = Table::import(
        &path,
        &ImportOptions { start: 5, limit: 4, ..ImportOptions::default() },
    )
    .unwrap();
    assert_eq!(column_values(&t, "n"), ints(&[5, 6, 7, 8]));

    let zero = Table::import(
        &path,
        &ImportOptions { limit: 0, ..ImportOptions::default() },
    );
    assert!(matches!(zero, Err(IngestError::ArgumentInvalid(_))));
}

#[test]
fn start_past_the_end_keeps_headers() {
    let _g = guard();
    let (_dir, path) = write_csv("past.csv", "a,b\n1,2\n");
    let t = Table::import(
        &path,
        &ImportOptions { start: 10, ..ImportOptions::default() },
    )
    .unwrap();
    assert_eq!(t.column_names(), vec!["a", "b"]);
    assert_eq!(t.len(), 0);
}

#[test]
fn empty_or_undelimited_sources_yield_empty_tables() {
    let _g = guard();
    let (_dir, path) = write_csv("empty.csv", "");
    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.column_count(), 0);
    assert_eq!(t.len(), 0);

    let (_dir2, plain) = write_csv("plain.txt", "just some words\nwithout structure\n");
    let t2 = Table::import(&plain, &ImportOptions::default()).unwrap();
    assert_eq!(t2.column_count(), 0);
}

#[test]
fn delimiter_variants_detect() {
    let _g = guard();
    for (name, contents, expected) in [
        ("semi.csv", "a;b\n1;2\n", ints(&[1])),
        ("tabs.tsv", "a\tb\n1\t2\n", ints(&[1])),
        ("pipes.txt", "a|b\n1|2\n", ints(&[1])),
    ] {
        let (_dir, path) = write_csv(name, contents);
        let t = Table::import(&path, &ImportOptions::default()).unwrap();
        assert_eq!(t.column_names(), vec!["a", "b"], "{}", name);
        assert_eq!(column_values(&t, "a"), expected, "{}", name);
    }
}

#[test]
fn utf16_with_bom_is_detected() {
    let _g = guard();
    let text = "a,b\n1,héllo\n";
    let mut bytes: Vec<u8> = vec![0xff, 0xfe];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("utf16.csv");
    fs::write(&path, bytes).unwrap();

    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.column_names(), vec!["a", "b"]);
    assert_eq!(
        column_values(&t, "b"),
        vec![Value::Str("héllo".into())]
    );
}

#[test]
fn utf8_bom_is_stripped_from_the_header() {
    let _g = guard();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bom.csv");
    fs::write(&path, b"\xef\xbb\xbfa,b\n1,2\n").unwrap();
    let t = Table::import(&path, &ImportOptions::default()).unwrap();
    assert_eq!(t.column_names(), vec!["a", "b"]);
}

#[test]
fn bad_configuration_is_fatal() {
    let _g = guard();
    let (_dir, path) = write_csv("cfg.csv", "a\n1\n");

    let unknown_encoding = Table::import(
        &path,
        &ImportOptions { encoding: Some("klingon-8".into()), ..ImportOptions::default() },
    );
    assert!(matches!(unknown_encoding, Err(IngestError::Config(_))));

    let sheet = Table::import(
        &path,
        &ImportOptions { sheet: Some("Sheet1".into()), ..ImportOptions::default() },
    );
    assert!(matches!(sheet, Err(IngestError::ArgumentInvalid(_))));

    let dir = tempfile::tempdir().unwrap();
    let odd = dir.path().join("data.parquet");
    fs::write(&odd, b"x").unwrap();
    assert!(matches!(
        Table::import(&odd, &ImportOptions::default()),
        Err(IngestError::Config(_))
    ));
}
