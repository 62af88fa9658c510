//! Spatial index search: RECT/INTERSECTS overlap, WITHIN containment.

mod common;

use common::{ok, strings, TestDb};
use crest::resp::Reply;

#[test]
fn test_rect_basic() {
    let mut db = TestDb::new();
    db.exec_args(&["SET", "r1", "[10 10],[20 20]"]);
    assert_eq!(db.exec("SETINDEX rix * SPATIAL"), ok());
    assert_eq!(
        strings(&db.exec_args(&["RECT", "rix", "[-inf],[+inf]"])),
        vec!["r1", "[10 10],[20 20]"]
    );
    assert_eq!(db.exec_args(&["RECT", "rix", "[21],[30]"]), Reply::Array(vec![]));
}

#[test]
fn test_intersects_overlap() {
    let mut db = TestDb::new();
    db.exec("SETINDEX rix * SPATIAL");
    db.exec_args(&["SET", "r1", "[0 0],[10 10]"]);
    db.exec_args(&["SET", "r2", "[5 5],[15 15]"]);
    db.exec_args(&["SET", "r3", "[20 20],[30 30]"]);

    let mut hits = strings(&db.exec_args(&["INTERSECTS", "rix", "[9 9],[12 12]"]));
    let mut keys: Vec<String> = hits.iter().step_by(2).cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["r1", "r2"]);

    hits = strings(&db.exec_args(&["INTERSECTS", "rix", "[16 16],[19 19]"]));
    assert!(hits.is_empty());
}

#[test]
fn test_within_containment() {
    let mut db = TestDb::new();
    db.exec("SETINDEX rix * SPATIAL");
    db.exec_args(&["SET", "inner", "[2 2],[3 3]"]);
    db.exec_args(&["SET", "straddle", "[4 4],[20 20]"]);

    let hits = strings(&db.exec_args(&["WITHIN", "rix", "[0 0],[10 10]"]));
    assert_eq!(hits, vec!["inner", "[2 2],[3 3]"]);
}

#[test]
fn test_spatial_index_with_json_path() {
    let mut db = TestDb::new();
    db.exec("SETINDEX rix * SPATIAL PATH loc");
    db.exec_args(&["SET", "p1", r#"{"loc":"[1 1]","name":"a"}"#]);
    db.exec_args(&["SET", "p2", r#"{"loc":"[50 50]","name":"b"}"#]);

    let hits = strings(&db.exec_args(&["RECT", "rix", "[0 0],[10 10]"]));
    assert_eq!(hits[0], "p1");
    assert_eq!(hits.len(), 2);
}

#[test]
fn test_spatial_match_skip_limit() {
    let mut db = TestDb::new();
    db.exec("SETINDEX rix * SPATIAL");
    for i in 0..6 {
        db.exec_args(&["SET", &format!("p:{i}"), &format!("[{i} {i}]")]);
    }
    db.exec_args(&["SET", "q:0", "[0 0]"]);

    let hits = strings(&db.exec_args(&["RECT", "rix", "[-inf -inf],[+inf +inf]", "MATCH", "p:*"]));
    assert_eq!(hits.len(), 12);
    assert!(hits.iter().step_by(2).all(|k| k.starts_with("p:")));

    let limited = strings(&db.exec_args(&[
        "RECT", "rix", "[-inf -inf],[+inf +inf]", "MATCH", "p:*", "LIMIT", "2",
    ]));
    assert_eq!(limited.len(), 4);

    let skipped = strings(&db.exec_args(&[
        "RECT", "rix", "[-inf -inf],[+inf +inf]", "MATCH", "p:*", "SKIP", "4",
    ]));
    assert_eq!(skipped.len(), 4);
}

#[test]
fn test_spatial_updates_and_deletes() {
    let mut db = TestDb::new();
    db.exec("SETINDEX rix * SPATIAL");
    db.exec_args(&["SET", "r1", "[1 1]"]);
    db.exec_args(&["SET", "r1", "[100 100]"]);

    assert_eq!(db.exec_args(&["RECT", "rix", "[0 0],[10 10]"]), Reply::Array(vec![]));
    let hits = strings(&db.exec_args(&["RECT", "rix", "[90 90],[110 110]"]));
    assert_eq!(hits[0], "r1");

    db.exec("DEL r1");
    assert_eq!(
        db.exec_args(&["RECT", "rix", "[-inf -inf],[+inf +inf]"]),
        Reply::Array(vec![])
    );
}

#[test]
fn test_unknown_spatial_index_is_empty() {
    let mut db = TestDb::new();
    assert_eq!(db.exec_args(&["RECT", "nosuch", "[0],[1]"]), Reply::Array(vec![]));
}
