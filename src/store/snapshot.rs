//! Snapshot stream format.
//!
//! A snapshot is an opaque bincode stream: a versioned header followed by
//! every entry with its absolute expiration. Index structures are never
//! serialized; restore rebuilds them from the definition entries in the
//! catalog.

use super::Entry;
use crate::core::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAGIC: &[u8; 8] = b"CRESTSNP";
const VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    expires_at: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    magic: [u8; 8],
    version: u16,
    entries: Vec<SnapshotEntry>,
}

pub(super) fn write(
    entries: &BTreeMap<Vec<u8>, Entry>,
    w: &mut dyn std::io::Write,
) -> Result<(), StoreError> {
    let payload = Payload {
        magic: *MAGIC,
        version: VERSION,
        entries: entries
            .iter()
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                value: entry.value.clone(),
                expires_at: entry.expires_at,
            })
            .collect(),
    };
    bincode::serialize_into(w, &payload)
        .map_err(|e| StoreError::CorruptSnapshot(e.to_string()))
}

pub(super) fn read(r: &mut dyn std::io::Read) -> Result<BTreeMap<Vec<u8>, Entry>, StoreError> {
    let payload: Payload =
        bincode::deserialize_from(r).map_err(|e| StoreError::CorruptSnapshot(e.to_string()))?;
    if payload.magic != *MAGIC {
        return Err(StoreError::CorruptSnapshot("bad magic".into()));
    }
    if payload.version != VERSION {
        return Err(StoreError::CorruptSnapshot(format!(
            "unsupported version {}",
            payload.version
        )));
    }
    Ok(payload
        .entries
        .into_iter()
        .map(|e| (e.key, Entry { value: e.value, expires_at: e.expires_at }))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut entries = BTreeMap::new();
        entries.insert(
            b"a".to_vec(),
            Entry { value: b"1".to_vec(), expires_at: None },
        );
        entries.insert(
            b"b".to_vec(),
            Entry { value: vec![0, 159, 146, 150], expires_at: Some(12345) },
        );
        let mut buf = Vec::new();
        write(&entries, &mut buf).unwrap();
        let back = read(&mut buf.as_slice()).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(read(&mut &b"not a snapshot"[..]).is_err());
    }
}
