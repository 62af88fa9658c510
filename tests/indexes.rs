//! Secondary index declarations and ordered iteration over them.

mod common;

use common::{assert_err_prefix, ok, strings, TestDb};
use crest::resp::Reply;

#[test]
fn test_int_index_iteration() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("SETINDEX idx * INT"), ok());
    db.exec("SET k1 7");
    db.exec("SET k2 2");
    db.exec("SET k3 12");

    assert_eq!(strings(&db.exec("ITER idx")), vec!["k2", "2", "k1", "7", "k3", "12"]);
    assert_eq!(strings(&db.exec("ITER idx RANGE 3 10")), vec!["k1", "7"]);
    assert_eq!(
        strings(&db.exec("ITER idx DESC")),
        vec!["k3", "12", "k1", "7", "k2", "2"]
    );
}

#[test]
fn test_index_tracks_updates_and_deletes() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("MSET a 5 b 3 c 9");
    assert_eq!(strings(&db.exec("ITER idx")), vec!["b", "3", "a", "5", "c", "9"]);
    db.exec("SET b 100");
    db.exec("DEL c");
    assert_eq!(strings(&db.exec("ITER idx")), vec!["a", "5", "b", "100"]);
}

#[test]
fn test_json_index() {
    let mut db = TestDb::new();
    db.exec(r#"SET u1 {"age":28}"#);
    db.exec(r#"SET u2 {"age":47}"#);
    assert_eq!(db.exec("SETINDEX age * JSON age"), ok());
    assert_eq!(
        strings(&db.exec("ITER age")),
        vec!["u1", r#"{"age":28}"#, "u2", r#"{"age":47}"#]
    );
    db.exec(r#"SET u3 {"age":30}"#);
    assert_eq!(
        strings(&db.exec("ITER age DESC")),
        vec!["u2", r#"{"age":47}"#, "u3", r#"{"age":30}"#, "u1", r#"{"age":28}"#]
    );
}

#[test]
fn test_index_pattern_limits_membership() {
    let mut db = TestDb::new();
    db.exec("SETINDEX nums user:* INT");
    db.exec("SET user:1 5");
    db.exec("SET other:1 3");
    assert_eq!(strings(&db.exec("ITER nums")), vec!["user:1", "5"]);
}

#[test]
fn test_text_index_case_folding_and_cs() {
    let mut db = TestDb::new();
    db.exec("SETINDEX t * TEXT");
    db.exec("SET a Banana");
    db.exec("SET b apple");
    // case-insensitive by default: apple before Banana
    assert_eq!(strings(&db.exec("ITER t")), vec!["b", "apple", "a", "Banana"]);

    db.exec("SETINDEX t * TEXT CS");
    // byte order puts uppercase first
    assert_eq!(strings(&db.exec("ITER t")), vec!["a", "Banana", "b", "apple"]);
}

#[test]
fn test_collated_index() {
    let mut db = TestDb::new();
    db.exec("SETINDEX c * TEXT COLLATE EN_NUM");
    db.exec("SET a item12");
    db.exec("SET b item2");
    assert_eq!(strings(&db.exec("ITER c")), vec!["b", "item2", "a", "item12"]);
}

#[test]
fn test_composite_index_tiebreaks() {
    let mut db = TestDb::new();
    db.exec("SETINDEX comp * JSON dept JSON age");
    db.exec(r#"SET e1 {"dept":"ops","age":40}"#);
    db.exec(r#"SET e2 {"dept":"eng","age":50}"#);
    db.exec(r#"SET e3 {"dept":"ops","age":30}"#);
    let got = strings(&db.exec("ITER comp"));
    let keys: Vec<&str> = got.iter().step_by(2).map(String::as_str).collect();
    assert_eq!(keys, vec!["e2", "e3", "e1"]);
}

#[test]
fn test_unparseable_numeric_values_sort_as_zero() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("SET a -5");
    db.exec("SET b junk");
    db.exec("SET c 3");
    let got = strings(&db.exec("ITER idx"));
    let keys: Vec<&str> = got.iter().step_by(2).map(String::as_str).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn test_setindex_replaces_existing() {
    let mut db = TestDb::new();
    db.exec("SET k 10");
    db.exec("SETINDEX idx * INT");
    assert_eq!(db.exec("SETINDEX idx * TEXT"), ok());
    assert_eq!(strings(&db.exec("ITER idx")), vec!["k", "10"]);
    // only one definition remains
    assert_eq!(strings(&db.exec("INDEXES *")), vec!["idx"]);
}

#[test]
fn test_delindex() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    assert_eq!(db.exec("DELINDEX idx"), Reply::Int(1));
    assert_eq!(db.exec("DELINDEX idx"), Reply::Int(0));
    assert_eq!(db.exec("ITER idx"), Reply::Array(vec![]));
    assert_eq!(db.exec("INDEXES *"), Reply::Array(vec![]));
}

#[test]
fn test_indexes_listing_and_details() {
    let mut db = TestDb::new();
    db.exec("SETINDEX alpha user:* TEXT CS DESC");
    db.exec("SETINDEX beta * SPATIAL PATH loc");
    assert_eq!(strings(&db.exec("INDEXES *")), vec!["alpha", "beta"]);
    assert_eq!(strings(&db.exec("INDEXES a*")), vec!["alpha"]);

    let details = db.exec("INDEXES alpha DETAILS");
    let Reply::Array(items) = details else { panic!("expected array") };
    assert_eq!(items.len(), 3);
    assert_eq!(items[0], Reply::bulk("alpha"));
    assert_eq!(items[1], Reply::bulk("user:*"));
    let Reply::Array(cols) = &items[2] else { panic!("expected columns") };
    assert_eq!(strings(&cols[0]), vec!["text", "cs", "desc"]);

    let details = db.exec("INDEXES beta DETAILS");
    let Reply::Array(items) = details else { panic!("expected array") };
    let Reply::Array(cols) = &items[2] else { panic!("expected columns") };
    assert_eq!(strings(&cols[0]), vec!["spatial", "path", "loc"]);
}

#[test]
fn test_setindex_syntax_errors() {
    let mut db = TestDb::new();
    assert_err_prefix(&db.exec("SETINDEX idx * BOGUS"), "ERR syntax error");
    assert_err_prefix(&db.exec("SETINDEX idx * INT CS"), "ERR syntax error");
    assert_err_prefix(&db.exec("SETINDEX idx *"), "ERR wrong number of arguments");
    assert_err_prefix(&db.exec("SETINDEX idx * INT SPATIAL"), "ERR syntax error");
}

#[test]
fn test_index_membership_invariant_under_random_ops() {
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let mut db = TestDb::new();
    db.exec("SETINDEX idx item:* INT");
    let mut model: BTreeMap<String, i64> = BTreeMap::new();

    for _ in 0..300 {
        let key = format!("item:{}", rng.gen_range(0..40));
        if rng.gen_bool(0.7) {
            let val = rng.gen_range(-50..50);
            db.exec(&format!("SET {key} {val}"));
            model.insert(key, val);
        } else {
            db.exec(&format!("DEL {key}"));
            model.remove(&key);
        }
    }

    // every matching live key appears exactly once, at the position its
    // current value dictates
    let got = strings(&db.exec("ITER idx"));
    let keys: Vec<String> = got.iter().step_by(2).cloned().collect();
    assert_eq!(keys.len(), model.len());
    let mut expected: Vec<(i64, String)> = model.iter().map(|(k, v)| (*v, k.clone())).collect();
    expected.sort();
    let expected_keys: Vec<String> = expected.into_iter().map(|(_, k)| k).collect();
    assert_eq!(keys, expected_keys);
}

#[test]
fn test_index_survives_failed_transaction_rollback() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("SET a 1");
    // RENAME with a missing source rolls its transaction back
    assert_err_prefix(&db.exec("RENAME missing b"), "ERR no such key");
    assert_eq!(strings(&db.exec("ITER idx")), vec!["a", "1"]);
}
