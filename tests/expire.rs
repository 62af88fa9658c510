//! Leader-driven expiration: expired keys leave through logged DELs,
//! followers ignore the callback and redirect instead.

mod common;

use common::{bulk, ok, TestDb};
use crest::resp::Reply;
use std::thread::sleep;
use std::time::Duration;

#[test]
fn test_expired_keys_reported_by_scan() {
    let mut db = TestDb::new();
    db.exec("SET short v PX 30");
    db.exec("SET long v PX 60000");
    db.exec("SET plain v");
    sleep(Duration::from_millis(50));
    let expired = db.store.expired_keys(16);
    assert_eq!(expired, vec![b"short".to_vec()]);
}

#[test]
fn test_leader_deletes_expired_through_log() {
    let mut db = TestDb::new();
    db.exec("SET gone v PX 20");
    sleep(Duration::from_millis(40));
    let keys = db.store.expired_keys(16);
    assert_eq!(keys.len(), 1);
    db.machine.delete_expired(db.node.as_ref(), keys);

    // physically removed, not just hidden
    assert_eq!(db.store.expired_keys(16), Vec::<Vec<u8>>::new());
    assert_eq!(db.exec("GET gone"), Reply::Null);

    // the DEL rode the log: replay reproduces the deletion
    let mut db = db.reopen();
    assert_eq!(db.exec("GET gone"), Reply::Null);
}

#[test]
fn test_follower_ignores_expiration_callback() {
    let mut db = TestDb::new();
    db.exec("SET gone v PX 20");
    sleep(Duration::from_millis(40));
    db.node.set_follower(Some(":7482".to_string()));

    let keys = db.store.expired_keys(16);
    // the redirect is swallowed; the entry stays until the leader's DEL
    // arrives through the log
    db.machine.delete_expired(db.node.as_ref(), keys);
    assert_eq!(db.store.expired_keys(16).len(), 1);

    // reads still hide the expired entry
    db.node.set_leader();
    assert_eq!(db.exec("GET gone"), Reply::Null);
}

#[test]
fn test_delete_expired_with_no_keys_is_noop() {
    let db = TestDb::new();
    db.machine.delete_expired(db.node.as_ref(), Vec::new());
}

#[test]
fn test_overwrite_clears_pending_expiration() {
    let mut db = TestDb::new();
    db.exec("SET k v PX 30");
    assert_eq!(db.exec("SET k v2"), ok());
    sleep(Duration::from_millis(50));
    assert_eq!(db.exec("GET k"), bulk("v2"));
    assert_eq!(db.store.expired_keys(16), Vec::<Vec<u8>>::new());
}
