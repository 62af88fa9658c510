//! KEYS and ITER cursor behavior: pivots, ranges, limits, match.

mod common;

use common::{strings, TestDb};
use crest::resp::Reply;

fn seed(db: &mut TestDb) {
    for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] {
        db.exec(&format!("SET {k} {v}"));
    }
}

#[test]
fn test_keys_basic() {
    let mut db = TestDb::new();
    seed(&mut db);
    assert_eq!(strings(&db.exec("KEYS *")), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(strings(&db.exec("KEYS * DESC")), vec!["e", "d", "c", "b", "a"]);
    assert_eq!(strings(&db.exec("KEYS ?")), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(db.exec("KEYS nothing*"), Reply::Array(vec![]));
}

#[test]
fn test_keys_limit_and_withvalues() {
    let mut db = TestDb::new();
    seed(&mut db);
    assert_eq!(strings(&db.exec("KEYS * LIMIT 2")), vec!["a", "b"]);
    assert_eq!(
        strings(&db.exec("KEYS * LIMIT 2 WITHVALUES")),
        vec!["a", "1", "b", "2"]
    );
}

#[test]
fn test_keys_pivot_unbounded_is_exclusive() {
    let mut db = TestDb::new();
    seed(&mut db);
    assert_eq!(strings(&db.exec("KEYS * PIVOT b")), vec!["c", "d", "e"]);
    assert_eq!(strings(&db.exec("KEYS * PIVOT c DESC")), vec!["b", "a"]);
}

#[test]
fn test_keys_prefix_pattern() {
    let mut db = TestDb::new();
    db.exec("MSET user:1 a user:2 b user:3 c admin:1 d");
    assert_eq!(
        strings(&db.exec("KEYS user:*")),
        vec!["user:1", "user:2", "user:3"]
    );
    assert_eq!(
        strings(&db.exec("KEYS user:* PIVOT user:1")),
        vec!["user:1", "user:2", "user:3"]
    );
}

#[test]
fn test_keys_skips_meta() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("SET a 1");
    assert_eq!(strings(&db.exec("KEYS *")), vec!["a"]);
}

#[test]
fn test_iter_pivot_is_exclusive() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("MSET k1 10 k2 20 k3 30");
    assert_eq!(strings(&db.exec("ITER idx PIVOT 10")), vec!["k2", "20", "k3", "30"]);
    assert_eq!(strings(&db.exec("ITER idx PIVOT 20 DESC")), vec!["k1", "10"]);
}

#[test]
fn test_iter_range_endpoints() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("MSET k1 10 k2 20 k3 30");

    // inclusive by default
    assert_eq!(
        strings(&db.exec("ITER idx RANGE 10 30")),
        vec!["k1", "10", "k2", "20", "k3", "30"]
    );
    // exclusive endpoints
    assert_eq!(strings(&db.exec("ITER idx RANGE (10 30)")), vec!["k2", "20"]);
    // infinities
    assert_eq!(
        strings(&db.exec("ITER idx RANGE -inf +inf")),
        vec!["k1", "10", "k2", "20", "k3", "30"]
    );
    // descending within a range
    assert_eq!(
        strings(&db.exec("ITER idx RANGE 10 20 DESC")),
        vec!["k2", "20", "k1", "10"]
    );
}

#[test]
fn test_iter_pivot_intersects_range() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("MSET k1 10 k2 20 k3 30 k4 40");
    // the pivot (exclusive) is tighter than the range minimum
    assert_eq!(
        strings(&db.exec("ITER idx PIVOT 20 RANGE 10 40")),
        vec!["k3", "30", "k4", "40"]
    );
    // the range minimum is tighter than the pivot
    assert_eq!(
        strings(&db.exec("ITER idx PIVOT 10 RANGE 30 40")),
        vec!["k3", "30", "k4", "40"]
    );
}

#[test]
fn test_iter_match_and_limit() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("MSET a:1 10 b:1 20 a:2 30 b:2 40");
    assert_eq!(
        strings(&db.exec("ITER idx MATCH a:*")),
        vec!["a:1", "10", "a:2", "30"]
    );
    assert_eq!(strings(&db.exec("ITER idx LIMIT 1")), vec!["a:1", "10"]);
}

#[test]
fn test_iter_unknown_index_is_empty() {
    let mut db = TestDb::new();
    db.exec("SET a 1");
    assert_eq!(db.exec("ITER nosuch"), Reply::Array(vec![]));
}

#[test]
fn test_iter_empty_index_name_is_empty() {
    // the primary order is reached through KEYS, not ITER
    let mut db = TestDb::new();
    db.exec("SET a 1");
    assert_eq!(db.exec_args(&["ITER", ""]), Reply::Array(vec![]));
}
