//! Key-level command behavior: TTLs, renames, pattern deletes, flushes.

mod common;

use common::{assert_err_prefix, bulk, ok, strings, TestDb};
use crest::resp::Reply;
use std::thread::sleep;
use std::time::Duration;

#[test]
fn test_type_and_exists() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("TYPE k"), Reply::Simple("none".into()));
    db.exec("SET k v");
    assert_eq!(db.exec("TYPE k"), Reply::Simple("string".into()));
    assert_eq!(db.exec("EXISTS k"), Reply::Int(1));
    assert_eq!(db.exec("EXISTS k missing k"), Reply::Int(2));
}

#[test]
fn test_rename() {
    let mut db = TestDb::new();
    db.exec("SET a v1");
    assert_eq!(db.exec("RENAME a b"), ok());
    assert_eq!(db.exec("EXISTS a"), Reply::Int(0));
    assert_eq!(db.exec("GET b"), bulk("v1"));
    assert_err_prefix(&db.exec("RENAME missing b"), "ERR no such key");
    // the failed rename must not mutate anything
    assert_eq!(db.exec("GET b"), bulk("v1"));
}

#[test]
fn test_renamenx() {
    let mut db = TestDb::new();
    db.exec("SET a 1");
    db.exec("SET b 2");
    assert_eq!(db.exec("RENAMENX a b"), Reply::Int(0));
    assert_eq!(db.exec("GET a"), bulk("1"));
    assert_eq!(db.exec("RENAMENX a c"), Reply::Int(1));
    assert_eq!(db.exec("GET c"), bulk("1"));
    assert_eq!(db.exec("EXISTS a"), Reply::Int(0));
}

#[test]
fn test_ttl_reporting() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("TTL missing"), Reply::Int(-2));
    db.exec("SET k v");
    assert_eq!(db.exec("TTL k"), Reply::Int(-1));
    db.exec("EXPIRE k 100");
    match db.exec("TTL k") {
        Reply::Int(n) => assert!(n > 90 && n <= 100, "ttl {n}"),
        other => panic!("unexpected {other:?}"),
    }
    match db.exec("PTTL k") {
        Reply::Int(n) => assert!(n > 90_000 && n <= 100_000, "pttl {n}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_ttl_monotonically_nonincreasing() {
    let mut db = TestDb::new();
    db.exec("SET k v PX 5000");
    let mut last = i64::MAX;
    for _ in 0..3 {
        match db.exec("PTTL k") {
            Reply::Int(n) => {
                assert!(n <= last, "pttl went up: {n} > {last}");
                assert!(n > 0);
                last = n;
            }
            other => panic!("unexpected {other:?}"),
        }
        sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_px_expiry_hides_key() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("SET k v PX 40"), ok());
    assert_eq!(db.exec("GET k"), bulk("v"));
    sleep(Duration::from_millis(60));
    assert_eq!(db.exec("GET k"), Reply::Null);
    assert_eq!(db.exec("TTL k"), Reply::Int(-2));
    assert_eq!(db.exec("EXISTS k"), Reply::Int(0));
}

#[test]
fn test_expire_missing_key_returns_zero() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("EXPIRE missing 100"), Reply::Int(0));
    assert_eq!(db.exec("PEXPIRE missing 100"), Reply::Int(0));
}

#[test]
fn test_persist() {
    let mut db = TestDb::new();
    db.exec("SET k v");
    assert_eq!(db.exec("PERSIST k"), Reply::Int(0));
    db.exec("EXPIRE k 100");
    assert_eq!(db.exec("PERSIST k"), Reply::Int(1));
    assert_eq!(db.exec("TTL k"), Reply::Int(-1));
    assert_eq!(db.exec("PERSIST missing"), Reply::Int(0));
}

#[test]
fn test_setex_overwrites_and_expireat() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("SETEX k 100 v"), ok());
    match db.exec("TTL k") {
        Reply::Int(n) => assert!(n > 90),
        other => panic!("unexpected {other:?}"),
    }
    // expiring at one second past the epoch is deep in the past
    assert_eq!(db.exec("EXPIREAT k 1"), Reply::Int(1));
    assert_eq!(db.exec("GET k"), Reply::Null);
}

#[test]
fn test_pdel() {
    let mut db = TestDb::new();
    db.exec("MSET user:1 a user:2 b user:3 c other:1 d");
    assert_eq!(db.exec("PDEL user:*"), Reply::Int(3));
    assert_eq!(db.exec("EXISTS other:1"), Reply::Int(1));
    assert_eq!(db.exec("KEYS user:*"), Reply::Array(vec![]));
}

#[test]
fn test_pdel_star_spares_meta() {
    let mut db = TestDb::new();
    db.exec("MSET a 1 b 2");
    db.exec("SETINDEX idx * INT");
    assert_eq!(db.exec("PDEL *"), Reply::Int(2));
    assert_eq!(db.exec("DBSIZE"), Reply::Int(0));
    // the index definition survives a PDEL
    assert_eq!(strings(&db.exec("INDEXES *")), vec!["idx"]);
}

#[test]
fn test_pdel_star_prefixed_pattern() {
    let mut db = TestDb::new();
    db.exec("MSET x:name a y:name b z:other c");
    assert_eq!(db.exec("PDEL *:name"), Reply::Int(2));
    assert_eq!(db.exec("EXISTS z:other"), Reply::Int(1));
}

#[test]
fn test_dump_restore() {
    let mut db = TestDb::new();
    db.exec("SET k hello");
    assert_eq!(db.exec("DUMP k"), bulk("hello"));
    assert_eq!(db.exec("RESTORE copy 0 hello"), ok());
    assert_eq!(db.exec("GET copy"), bulk("hello"));
    assert_err_prefix(&db.exec("RESTORE copy 0 world"), "BUSYKEY");
    assert_eq!(db.exec("RESTORE copy 0 world REPLACE"), ok());
    assert_eq!(db.exec("GET copy"), bulk("world"));
    assert_err_prefix(&db.exec("RESTORE t -1 v"), "ERR Invalid TTL");

    assert_eq!(db.exec("RESTORE brief 30 v"), ok());
    sleep(Duration::from_millis(60));
    assert_eq!(db.exec("GET brief"), Reply::Null);
}

#[test]
fn test_flushdb_drops_entries_and_indexes() {
    let mut db = TestDb::new();
    db.exec("SETINDEX idx * INT");
    db.exec("MSET a 1 b 2");
    assert_eq!(db.exec("FLUSHDB"), ok());
    assert_eq!(db.exec("DBSIZE"), Reply::Int(0));
    assert_eq!(db.exec("INDEXES *"), Reply::Array(vec![]));
    assert_eq!(db.exec("ITER idx"), Reply::Array(vec![]));
}

#[test]
fn test_dbsize_excludes_meta() {
    let mut db = TestDb::new();
    db.exec("MSET a 1 b 2");
    db.exec("SETINDEX idx * INT");
    assert_eq!(db.exec("DBSIZE"), Reply::Int(2));
}

#[test]
fn test_massinsert() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("MASSINSERT 25"), Reply::Int(25));
    assert_eq!(db.exec("DBSIZE"), Reply::Int(25));
    assert_eq!(db.exec("GET __key__:0000000007"), bulk("__val__:0000000007"));
    assert_err_prefix(&db.exec("MASSINSERT 100000001"), "ERR syntax error");
}

#[test]
fn test_fence_monotonic() {
    let mut db = TestDb::new();
    assert_eq!(db.exec("FENCE job"), bulk("1"));
    assert_eq!(db.exec("FENCE job"), bulk("2"));
    assert_eq!(db.exec("FENCE other"), bulk("1"));
    assert_eq!(db.exec("FENCE job"), bulk("3"));
}

#[test]
fn test_time_shape() {
    let mut db = TestDb::new();
    match db.exec("TIME") {
        Reply::Array(items) => {
            assert_eq!(items.len(), 2);
            let secs = strings(&Reply::Array(items.clone()))[0].parse::<u64>().unwrap();
            assert!(secs > 1_600_000_000);
        }
        other => panic!("unexpected {other:?}"),
    }
}
