//! Relational operator scenarios: index, sort, filter, group-by, joins.

use std::sync::{Mutex, MutexGuard};

use tabular_rs::{
    Aggregate, Config, JoinKind, OpsError, Predicate, Table, Value,
};

static LOCK: Mutex<()> = Mutex::new(());

fn guard() -> MutexGuard<'static, ()> {
    let g = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    Config::reset();
    g
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

fn column_values(t: &Table, name: &str) -> Vec<Value> {
    t.column(name).unwrap().read_all().unwrap().into_values()
}

#[test]
fn index_groups_row_ids_by_key_tuple() {
    let _g = guard();
    let t = Table::from_columns(vec![("k", vec![1i64, 1, 2])]).unwrap();
    let index = t.index(&["k"]).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index[&ints(&[1])], vec![0, 1]);
    assert_eq!(index[&ints(&[2])], vec![2]);

    // null is a legal key component
    let mut u = Table::new().unwrap();
    u.set("k", vec![Value::Int(1), Value::None, Value::None]).unwrap();
    let index = u.index(&["k"]).unwrap();
    assert_eq!(index[&vec![Value::None]], vec![1, 2]);
}

#[test]
fn sort_is_stable_and_multi_key() {
    let _g = guard();
    let mut t = Table::from_columns(vec![
        ("k", vec![2i64, 1, 2, 1]),
        ("v", vec![1i64, 2, 3, 4]),
    ])
    .unwrap();
    t.sort(&[("k", false)]).unwrap();
    assert_eq!(column_values(&t, "k"), ints(&[1, 1, 2, 2]));
    // rows with equal k keep their pre-sort order
    assert_eq!(column_values(&t, "v"), ints(&[2, 4, 1, 3]));
    assert!(t.is_sorted(&[("k", false)]).unwrap());

    let mut d = Table::from_columns(vec![
        ("a", vec![1i64, 1, 2, 2]),
        ("b", vec![1i64, 2, 1, 2]),
    ])
    .unwrap();
    d.sort(&[("a", false), ("b", true)]).unwrap();
    assert_eq!(column_values(&d, "a"), ints(&[1, 1, 2, 2]));
    assert_eq!(column_values(&d, "b"), ints(&[2, 1, 2, 1]));
}

#[test]
fn sort_puts_nulls_first_and_orders_across_types() {
    let _g = guard();
    let mut t = Table::new().unwrap();
    t.set(
        "x",
        vec![
            Value::Str("b".into()),
            Value::Int(7),
            Value::None,
            Value::Str("a".into()),
            Value::Int(3),
        ],
    )
    .unwrap();
    t.sort(&[("x", false)]).unwrap();
    assert_eq!(
        column_values(&t, "x"),
        vec![
            Value::None,
            Value::Int(3),
            Value::Int(7),
            Value::Str("a".into()),
            Value::Str("b".into()),
        ]
    );
}

#[test]
fn all_intersects_and_any_unions() {
    let _g = guard();
    let t = Table::from_columns(vec![
        ("a", vec![1i64, 2, 3, 4, 5]),
        ("b", vec![10i64, 20, 30, 40, 50]),
    ])
    .unwrap();

    let both = t
        .all(&[
            ("a", Predicate::func(|v| matches!(v, Value::Int(x) if *x >= 2))),
            ("b", Predicate::func(|v| matches!(v, Value::Int(x) if *x <= 40))),
        ])
        .unwrap();
    assert_eq!(column_values(&both, "a"), ints(&[2, 3, 4]));

    let either = t
        .any(&[
            ("a", Predicate::value(1i64)),
            ("b", Predicate::value(50i64)),
        ])
        .unwrap();
    assert_eq!(column_values(&either, "a"), ints(&[1, 5]));

    assert!(matches!(t.all(&[]), Err(OpsError::ArgumentInvalid(_))));
}

#[test]
fn predicates_never_match_missing_values() {
    let _g = guard();
    let mut t = Table::new().unwrap();
    t.set("a", vec![Value::Int(1), Value::None, Value::Int(3)]).unwrap();
    let hits = t.all(&[("a", Predicate::func(|_| true))]).unwrap();
    assert_eq!(column_values(&hits, "a"), ints(&[1, 3]));
}

#[test]
fn groupby_sums_per_key() {
    let _g = guard();
    let t = Table::from_columns(vec![
        ("date", vec![1i64, 1, 1, 2, 2, 2]),
        ("sku", vec![1i64, 2, 3, 1, 2, 3]),
        ("qty", vec![4i64, 5, 4, 5, 3, 7]),
    ])
    .unwrap();

    let g = t.groupby(&["sku"], &[("qty", Aggregate::Sum)]).unwrap();
    let out = g.table();
    assert_eq!(out.column_names(), vec!["sku", "Sum(qty)"]);
    assert_eq!(column_values(out, "sku"), ints(&[1, 2, 3]));
    assert_eq!(column_values(out, "Sum(qty)"), ints(&[9, 8, 11]));
}

#[test]
fn groupby_partitions_the_source_rows() {
    let _g = guard();
    let t = Table::from_columns(vec![
        ("k", vec![3i64, 1, 3, 2, 1, 3]),
        ("v", vec![1i64, 1, 1, 1, 1, 1]),
    ])
    .unwrap();
    let g = t.groupby(&["k"], &[("v", Aggregate::Count)]).unwrap();
    let counts: i64 = column_values(g.table(), "Count(v)")
        .iter()
        .map(|v| match v {
            Value::Int(n) => *n,
            _ => 0,
        })
        .sum();
    assert_eq!(counts as usize, t.len());
}

#[test]
fn aggregators_cover_the_contract() {
    let _g = guard();
    let mut t = Table::new().unwrap();
    t.set("k", vec![1i64, 1, 1, 1, 1, 1]).unwrap();
    t.set(
        "v",
        vec![
            Value::Int(4),
            Value::None,
            Value::Int(2),
            Value::Int(2),
            Value::Int(8),
            Value::None,
        ],
    )
    .unwrap();

    let g = t
        .groupby(
            &["k"],
            &[
                ("v", Aggregate::Min),
                ("v", Aggregate::Max),
                ("v", Aggregate::Sum),
                ("v", Aggregate::First),
                ("v", Aggregate::Last),
                ("v", Aggregate::Count),
                ("v", Aggregate::CountUnique),
                ("v", Aggregate::Average),
                ("v", Aggregate::StandardDeviation),
                ("v", Aggregate::Median),
                ("v", Aggregate::Mode),
            ],
        )
        .unwrap();
    let out = g.table();
    let row = out.row(0).unwrap();
    assert_eq!(row[0], Value::Int(1)); // key
    assert_eq!(row[1], Value::Int(2)); // min
    assert_eq!(row[2], Value::Int(8)); // max
    assert_eq!(row[3], Value::Int(16)); // sum, nulls ignored
    assert_eq!(row[4], Value::Int(4)); // first non-null
    assert_eq!(row[5], Value::Int(8)); // last non-null
    assert_eq!(row[6], Value::Int(4)); // count of non-null
    assert_eq!(row[7], Value::Int(3)); // distinct non-null
    assert_eq!(row[8], Value::Float(4.0)); // average
    match &row[9] {
        Value::Float(sd) => assert!((sd - 2.8284271247461903).abs() < 1e-12),
        other => panic!("stdev: {:?}", other),
    }
    assert_eq!(row[10], Value::Float(3.0)); // median of 2,2,4,8
    assert_eq!(row[11], Value::Int(2)); // mode
}

#[test]
fn sum_on_strings_is_a_type_mismatch() {
    let _g = guard();
    let t = Table::from_columns(vec![("k", vec![1i64]), ("s", vec![0i64])]).unwrap();
    let mut t = t;
    t.set("s", vec![Value::Str("x".into())]).unwrap();
    assert!(matches!(
        t.groupby(&["k"], &[("s", Aggregate::Sum)]),
        Err(OpsError::TypeMismatch { .. })
    ));
}

#[test]
fn duplicate_groupby_keys_are_rejected() {
    let _g = guard();
    let t = Table::from_columns(vec![("k", vec![1i64]), ("v", vec![1i64])]).unwrap();
    assert!(matches!(
        t.groupby(&["k", "k"], &[("v", Aggregate::Sum)]),
        Err(OpsError::ArgumentInvalid(_))
    ));
}

#[test]
fn pivot_reprojects_key_tuples_into_columns() {
    let _g = guard();
    let a: Vec<i64> = vec![1, 1, 2, 2, 3, 3, 1, 1, 2, 2, 3, 3];
    let b: Vec<i64> = vec![1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6];
    let c: Vec<i64> = vec![6, 5, 4, 3, 2, 1, 6, 5, 4, 3, 2, 1];
    let t = Table::from_columns(vec![("A", a), ("B", b), ("C", c)]).unwrap();

    let g = t.groupby(&["A", "C"], &[("B", Aggregate::Sum)]).unwrap();
    let p = g.pivot(&["A"]).unwrap();
    assert_eq!(
        p.column_names(),
        vec!["C", "Sum(B,A=1)", "Sum(B,A=2)", "Sum(B,A=3)"]
    );
    assert_eq!(column_values(&p, "C"), ints(&[5, 6, 3, 4, 1, 2]));
    assert_eq!(
        column_values(&p, "Sum(B,A=1)"),
        vec![
            Value::Int(4),
            Value::Int(2),
            Value::None,
            Value::None,
            Value::None,
            Value::None,
        ]
    );
    assert_eq!(
        column_values(&p, "Sum(B,A=3)"),
        vec![
            Value::None,
            Value::None,
            Value::None,
            Value::None,
            Value::Int(12),
            Value::Int(10),
        ]
    );

    assert!(matches!(g.pivot(&["B"]), Err(OpsError::ArgumentInvalid(_))));
}

#[test]
fn join_scenarios() {
    let _g = guard();
    let left = Table::from_columns(vec![("k", vec![1i64, 1, 2])]).unwrap();
    let right = Table::from_columns(vec![("k", vec![1i64, 3])]).unwrap();

    let inner = left.inner_join(&right, &["k"], &["k"], None, None).unwrap();
    assert_eq!(inner.len(), 2);
    assert_eq!(inner.column_names(), vec!["k", "k_1"]);
    assert_eq!(column_values(&inner, "k"), ints(&[1, 1]));

    let left_join = left.left_join(&right, &["k"], &["k"], None, None).unwrap();
    assert_eq!(left_join.len(), 3);
    assert_eq!(column_values(&left_join, "k"), ints(&[1, 1, 2]));
    assert_eq!(
        column_values(&left_join, "k_1"),
        vec![Value::Int(1), Value::Int(1), Value::None]
    );

    let outer = left.outer_join(&right, &["k"], &["k"], None, None).unwrap();
    assert_eq!(outer.len(), 4);
    assert_eq!(
        column_values(&outer, "k"),
        vec![Value::Int(1), Value::Int(1), Value::Int(2), Value::None]
    );
    assert_eq!(
        column_values(&outer, "k_1"),
        vec![Value::Int(1), Value::Int(1), Value::None, Value::Int(3)]
    );

    let cross = left.cross_join(&right, &[], &[], None, None).unwrap();
    assert_eq!(cross.len(), 6);
    assert_eq!(column_values(&cross, "k"), ints(&[1, 1, 1, 1, 2, 2]));
    assert_eq!(column_values(&cross, "k_1"), ints(&[1, 3, 1, 3, 1, 3]));
}

#[test]
fn left_join_against_empty_right_is_identity_plus_nulls() {
    let _g = guard();
    let left = Table::from_columns(vec![
        ("k", vec![1i64, 2, 3]),
        ("v", vec![10i64, 20, 30]),
    ])
    .unwrap();
    let mut right = Table::new().unwrap();
    right.set("k", Vec::<i64>::new()).unwrap();
    right.set("x", Vec::<i64>::new()).unwrap();

    let joined = left.left_join(&right, &["k"], &["k"], None, None).unwrap();
    assert_eq!(joined.len(), 3);
    assert_eq!(column_values(&joined, "k"), ints(&[1, 2, 3]));
    assert_eq!(column_values(&joined, "v"), ints(&[10, 20, 30]));
    assert_eq!(
        column_values(&joined, "x"),
        vec![Value::None, Value::None, Value::None]
    );
    let left_part = joined.select(&["k", "v"], None).unwrap();
    assert!(left_part.equals(&left).unwrap());
}

#[test]
fn join_key_types_must_intersect() {
    let _g = guard();
    let left = Table::from_columns(vec![("k", vec![1i64, 2])]).unwrap();
    let mut right = Table::new().unwrap();
    right.set("k", vec![Value::Str("1".into())]).unwrap();
    assert!(matches!(
        left.inner_join(&right, &["k"], &["k"], None, None),
        Err(OpsError::JoinTypeMismatch { .. })
    ));

    // mismatched key list lengths are a usage error
    assert!(matches!(
        left.join(&right, &["k"], &[], None, None, JoinKind::Inner),
        Err(OpsError::ArgumentInvalid(_))
    ));
}

#[test]
fn large_joins_gather_in_parallel_pages() {
    let _g = guard();
    Config::set_page_size(16);
    Config::set_single_processing_limit(8);

    let n: Vec<i64> = (0..200).collect();
    let left = Table::from_columns(vec![
        ("k", n.iter().map(|x| x % 50).collect::<Vec<i64>>()),
        ("v", n.clone()),
    ])
    .unwrap();
    let right = Table::from_columns(vec![
        ("k", (0..50).collect::<Vec<i64>>()),
        ("w", (0..50).map(|x| x * 100).collect::<Vec<i64>>()),
    ])
    .unwrap();

    let parallel = left.left_join(&right, &["k"], &["k"], None, None).unwrap();

    Config::set_single_processing_limit(usize::MAX);
    let serial = left.left_join(&right, &["k"], &["k"], None, None).unwrap();
    assert!(parallel.equals(&serial).unwrap());
    assert_eq!(parallel.len(), 200);
    // output pages follow the configured page size
    assert!(parallel.column("v").unwrap().page_lengths().iter().all(|n| *n <= 16));
    Config::reset();
}

#[test]
fn sort_agrees_with_a_reference_sort() {
    let _g = guard();
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut values: Vec<i64> = (0..500).map(|x| x % 37).collect();
    values.shuffle(&mut rng);

    let mut t = Table::from_columns(vec![("v", values.clone())]).unwrap();
    t.sort(&[("v", false)]).unwrap();

    let mut expected = values;
    expected.sort();
    assert_eq!(column_values(&t, "v"), ints(&expected));
}

#[test]
fn filter_projects_row_tuples() {
    let _g = guard();
    let t = Table::from_columns(vec![
        ("a", vec![1i64, 2]),
        ("b", vec![10i64, 20]),
    ])
    .unwrap();
    let rows: Vec<Vec<Value>> = t.filter(&["b", "a"]).unwrap().collect();
    assert_eq!(rows, vec![ints(&[10, 1]), ints(&[20, 2])]);
}

#[test]
fn summary_runs_over_a_column() {
    let _g = guard();
    let t = Table::from_columns(vec![("n", vec![1i64, 2, 2, 3])]).unwrap();
    let summary = t.column("n").unwrap().summary().unwrap();
    assert_eq!(summary.min, Value::Int(1));
    assert_eq!(summary.max, Value::Int(3));
    assert_eq!(summary.mode, Value::Int(2));
    assert_eq!(summary.distinct, Value::Int(3));
    assert_eq!(summary.summary_type, "int");
}
