//! The transactional ordered key/value store.
//!
//! Entries live in a single map with a total order over key bytes, each
//! carrying an optional absolute expiration. Secondary indexes are
//! maintained inside the same transaction as the entry mutation that
//! triggers them. `update` transactions are single-writer and roll back
//! completely through an undo log when the closure fails; `view`
//! transactions run concurrently.

pub mod collate;
pub mod compare;
pub mod glob;
pub mod index;
pub mod rect;
pub mod rtree;
mod snapshot;

pub use compare::{ColumnKind, IndexColumn, IndexOrder};
pub use index::IndexDef;
pub use rect::Rect;

use crate::core::error::StoreError;
use crate::core::time::now_ms;
use compare::{ColKey, SortKey};
use index::{Index, IndexKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The reserved key prefix for system entries (indexes, scripts, fence
/// counters). This is a fixed data-format value; it must never change.
pub const META_PREFIX: &str = "!141259cdc892c099cfa01ecabd8375362b6aa09d!";

/// Whether `key` addresses a system entry.
pub fn is_meta_key(key: &[u8]) -> bool {
    key.len() >= META_PREFIX.len() && &key[..META_PREFIX.len()] == META_PREFIX.as_bytes()
}

/// A stored entry: an opaque value and an optional expiration instant in
/// Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Vec<u8>,
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn new(value: Vec<u8>) -> Self {
        Self { value, expires_at: None }
    }

    fn expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// TTL report for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No such key (or the key has already expired).
    Missing,
    /// The key exists with no expiration set.
    NoExpiry,
    /// Remaining lifetime in milliseconds.
    Remaining(u64),
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: BTreeMap<Vec<u8>, Entry>,
    indexes: BTreeMap<String, Index>,
    /// (expires_at_ms, key) pairs for the expiration scan.
    expirations: BTreeSet<(u64, Vec<u8>)>,
}

/// The store. All entry storage and all index structures are owned here;
/// indexes hold key references only.
#[derive(Default)]
pub struct Store {
    inner: RwLock<StoreInner>,
}

/// Iterator over (key, value) pairs inside a transaction.
pub type KvIter<'a> = Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a>;

enum Access<'s> {
    Read(&'s StoreInner),
    Write(&'s mut StoreInner),
}

enum UndoOp {
    /// Restore an entry to its previous state (None = absent).
    Entry { key: Vec<u8>, prev: Option<Entry> },
    /// An index was installed over `name`; `prev` is the definition it
    /// replaced, if any.
    IndexInstalled { name: String, prev: Option<IndexDef> },
    /// An index was dropped.
    IndexDropped { def: IndexDef },
    /// Every entry was removed.
    AllCleared {
        entries: BTreeMap<Vec<u8>, Entry>,
        expirations: BTreeSet<(u64, Vec<u8>)>,
    },
}

/// A transaction over the store. Obtained through [`Store::view`] or
/// [`Store::update`]; mutations through a read transaction fail with
/// [`StoreError::TxNotWritable`].
pub struct Tx<'s> {
    access: Access<'s>,
    undo: Vec<UndoOp>,
    now: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a read-only transaction.
    pub fn view<T, E>(&self, f: impl FnOnce(&mut Tx) -> Result<T, E>) -> Result<T, E> {
        let guard = self.inner.read();
        let mut tx = Tx { access: Access::Read(&*guard), undo: Vec::new(), now: now_ms() };
        f(&mut tx)
    }

    /// Run a write transaction. When `f` fails every mutation inside it is
    /// rolled back.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut Tx) -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.inner.write();
        let mut tx = Tx { access: Access::Write(&mut *guard), undo: Vec::new(), now: now_ms() };
        match f(&mut tx) {
            Ok(v) => Ok(v),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Collect up to `max` keys whose expiration is at or before now.
    /// System entries never expire and are excluded.
    pub fn expired_keys(&self, max: usize) -> Vec<Vec<u8>> {
        let inner = self.inner.read();
        let now = now_ms();
        inner
            .expirations
            .range(..(now + 1, Vec::new()))
            .filter(|(_, key)| !is_meta_key(key))
            .take(max)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Spawn the expiration monitor: a timer task owned by the store
    /// that periodically scans for expired keys and hands each batch to
    /// `on_expired`. The callback must drive the deletions itself; the
    /// monitor never mutates entries directly.
    pub fn spawn_expiration_monitor(
        self: &std::sync::Arc<Self>,
        interval: std::time::Duration,
        batch: usize,
        on_expired: impl Fn(Vec<Vec<u8>>) + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let store = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let keys = store.expired_keys(batch);
                if !keys.is_empty() {
                    on_expired(keys);
                }
            }
        })
    }

    /// Swap in another store's full contents. Used when a snapshot
    /// restore builds a fresh store behind an existing handle.
    pub fn replace_from(&self, other: Store) {
        *self.inner.write() = other.inner.into_inner();
    }

    /// Serialize the full store state into `w`.
    pub fn snapshot(&self, w: &mut dyn std::io::Write) -> Result<(), StoreError> {
        snapshot::write(&self.inner.read().entries, w)
    }

    /// Rebuild a store from a snapshot stream. Index structures are not
    /// part of the stream; they are reconstructed from the definition
    /// entries in the catalog.
    pub fn restore(r: &mut dyn std::io::Read) -> Result<Store, StoreError> {
        let entries = snapshot::read(r)?;
        let mut inner = StoreInner::default();
        for (key, entry) in entries {
            if let Some(at) = entry.expires_at {
                inner.expirations.insert((at, key.clone()));
            }
            inner.entries.insert(key, entry);
        }
        let index_prefix = format!("{META_PREFIX}index:").into_bytes();
        let defs: Vec<IndexDef> = inner
            .entries
            .range(index_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&index_prefix))
            .filter_map(|(_, e)| serde_json::from_slice(&e.value).ok())
            .collect();
        for def in defs {
            install_index(&mut inner, def);
        }
        Ok(Store { inner: RwLock::new(inner) })
    }
}

/// Install (or replace) an index and fill it from the current entries.
/// Returns the replaced definition, if any.
fn install_index(inner: &mut StoreInner, def: IndexDef) -> Option<IndexDef> {
    let prev = inner.indexes.remove(&def.name).map(|idx| idx.def);
    let mut idx = Index::new(def);
    for (key, entry) in &inner.entries {
        if idx.matches(key) {
            idx.insert(key, &entry.value);
        }
    }
    inner.indexes.insert(idx.def.name.clone(), idx);
    prev
}

/// Write `new` (or remove, when None) at `key`, keeping the expiration
/// set and every matching index in step. Returns the previous entry.
fn raw_install(inner: &mut StoreInner, key: &[u8], new: Option<Entry>) -> Option<Entry> {
    let StoreInner { entries, indexes, expirations } = inner;
    let prev = match new {
        Some(entry) => entries.insert(key.to_vec(), entry),
        None => entries.remove(key),
    };
    if let Some(at) = prev.as_ref().and_then(|p| p.expires_at) {
        expirations.remove(&(at, key.to_vec()));
    }
    let current = entries.get(key);
    if let Some(at) = current.and_then(|e| e.expires_at) {
        expirations.insert((at, key.to_vec()));
    }
    for idx in indexes.values_mut() {
        if idx.matches(key) {
            match current {
                Some(entry) => idx.insert(key, &entry.value),
                None => idx.remove(key),
            }
        }
    }
    prev
}

impl<'s> Tx<'s> {
    fn inner(&self) -> &StoreInner {
        match &self.access {
            Access::Read(inner) => inner,
            Access::Write(inner) => inner,
        }
    }

    fn inner_mut(&mut self) -> Result<&mut StoreInner, StoreError> {
        match &mut self.access {
            Access::Write(inner) => Ok(inner),
            Access::Read(_) => Err(StoreError::TxNotWritable),
        }
    }

    /// The wall clock this transaction evaluates expirations against.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Whether mutations are allowed.
    pub fn writable(&self) -> bool {
        matches!(self.access, Access::Write(_))
    }

    /// Get a live value.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.live_entry(key).map(|e| e.value.as_slice())
    }

    fn live_entry(&self, key: &[u8]) -> Option<&Entry> {
        self.inner()
            .entries
            .get(key)
            .filter(|e| !e.expired_at(self.now))
    }

    /// Report the TTL state of a key.
    pub fn ttl(&self, key: &[u8]) -> Ttl {
        match self.live_entry(key) {
            None => Ttl::Missing,
            Some(Entry { expires_at: None, .. }) => Ttl::NoExpiry,
            Some(Entry { expires_at: Some(at), .. }) => Ttl::Remaining(at - self.now),
        }
    }

    /// Total entry count, system entries included.
    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set `key` to `value`, optionally expiring at an absolute instant.
    /// Returns the previous live entry.
    pub fn set(
        &mut self,
        key: &[u8],
        value: Vec<u8>,
        expires_at: Option<u64>,
    ) -> Result<Option<Entry>, StoreError> {
        let now = self.now;
        let inner = self.inner_mut()?;
        let prev = raw_install(inner, key, Some(Entry { value, expires_at }));
        self.undo.push(UndoOp::Entry { key: key.to_vec(), prev: prev.clone() });
        Ok(prev.filter(|p| !p.expired_at(now)))
    }

    /// Delete `key`, returning the previous live entry.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Entry>, StoreError> {
        let now = self.now;
        let inner = self.inner_mut()?;
        if !inner.entries.contains_key(key) {
            return Ok(None);
        }
        let prev = raw_install(inner, key, None);
        self.undo.push(UndoOp::Entry { key: key.to_vec(), prev: prev.clone() });
        Ok(prev.filter(|p| !p.expired_at(now)))
    }

    /// Remove every entry. Index definitions stay installed with empty
    /// contents.
    pub fn delete_all(&mut self) -> Result<(), StoreError> {
        let inner = self.inner_mut()?;
        let entries = std::mem::take(&mut inner.entries);
        let expirations = std::mem::take(&mut inner.expirations);
        for idx in inner.indexes.values_mut() {
            idx.clear();
        }
        self.undo.push(UndoOp::AllCleared { entries, expirations });
        Ok(())
    }

    /// Install an index, replacing any previous definition of the same
    /// name in the same transaction.
    pub fn create_index(&mut self, def: IndexDef) -> Result<(), StoreError> {
        if def.name.is_empty() {
            return Err(StoreError::InvalidIndex("index name is empty".into()));
        }
        let inner = self.inner_mut()?;
        let name = def.name.clone();
        let prev = install_index(inner, def);
        self.undo.push(UndoOp::IndexInstalled { name, prev });
        Ok(())
    }

    /// Drop an index. Returns whether it existed.
    pub fn drop_index(&mut self, name: &str) -> Result<bool, StoreError> {
        let inner = self.inner_mut()?;
        match inner.indexes.remove(name) {
            Some(idx) => {
                self.undo.push(UndoOp::IndexDropped { def: idx.def });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The comparator of a named ordered index: `Ok(None)` for spatial
    /// indexes, `Err(NotFound)` when no index has this name.
    pub fn index_order(&self, name: &str) -> Result<Option<IndexOrder>, StoreError> {
        let idx = self.inner().indexes.get(name).ok_or(StoreError::NotFound)?;
        Ok(idx.order())
    }

    /// Installed index definitions in name order.
    pub fn index_defs(&self) -> Vec<IndexDef> {
        self.inner().indexes.values().map(|idx| idx.def.clone()).collect()
    }

    /// Iterate in ascending order: primary key order for the empty index
    /// name, index order otherwise.
    pub fn ascend(&self, index: &str) -> Result<KvIter<'_>, StoreError> {
        if index.is_empty() {
            Ok(self.primary_iter(None, None, false))
        } else {
            self.index_iter(index, None, false)
        }
    }

    /// Ascending iteration starting at `pivot` (a key for the primary
    /// order, a value for named indexes), inclusive.
    pub fn ascend_from(&self, index: &str, pivot: &[u8]) -> Result<KvIter<'_>, StoreError> {
        if index.is_empty() {
            Ok(self.primary_iter(Some(pivot), None, false))
        } else {
            self.index_iter(index, Some(pivot), false)
        }
    }

    /// Ascending iteration over `[min, max)` in the index's order.
    pub fn ascend_range(
        &self,
        index: &str,
        min: &[u8],
        max: &[u8],
    ) -> Result<KvIter<'_>, StoreError> {
        if index.is_empty() {
            Ok(self.primary_iter(Some(min), Some(max), false))
        } else {
            let order = self
                .index_order(index)?
                .ok_or_else(|| StoreError::InvalidIndex("spatial index".into()))?;
            let max_cols = order.components(max);
            let iter = self.index_iter(index, Some(min), false)?;
            Ok(Box::new(iter.take_while(move |(_, v)| {
                order.components(v) < max_cols
            })))
        }
    }

    /// Iterate in descending order.
    pub fn descend(&self, index: &str) -> Result<KvIter<'_>, StoreError> {
        if index.is_empty() {
            Ok(self.primary_iter(None, None, true))
        } else {
            self.index_iter(index, None, true)
        }
    }

    /// Descending iteration starting at `pivot`, inclusive.
    pub fn descend_from(&self, index: &str, pivot: &[u8]) -> Result<KvIter<'_>, StoreError> {
        if index.is_empty() {
            Ok(self.primary_iter(Some(pivot), None, true))
        } else {
            self.index_iter(index, Some(pivot), true)
        }
    }

    fn primary_iter(
        &self,
        pivot: Option<&[u8]>,
        end: Option<&[u8]>,
        rev: bool,
    ) -> KvIter<'_> {
        use std::ops::Bound;
        let now = self.now;
        let entries = &self.inner().entries;
        let range: Box<dyn Iterator<Item = (&Vec<u8>, &Entry)> + '_> = if rev {
            // descending: pivot is the inclusive upper bound
            let upper = match pivot {
                Some(p) => Bound::Included(p.to_vec()),
                None => Bound::Unbounded,
            };
            Box::new(entries.range((Bound::Unbounded, upper)).rev())
        } else {
            let lower = match pivot {
                Some(p) => Bound::Included(p.to_vec()),
                None => Bound::Unbounded,
            };
            let upper = match end {
                Some(e) => Bound::Excluded(e.to_vec()),
                None => Bound::Unbounded,
            };
            Box::new(entries.range((lower, upper)))
        };
        Box::new(
            range
                .filter(move |(_, e)| !e.expired_at(now))
                .map(|(k, e)| (k.as_slice(), e.value.as_slice())),
        )
    }

    fn index_iter(
        &self,
        name: &str,
        pivot: Option<&[u8]>,
        rev: bool,
    ) -> Result<KvIter<'_>, StoreError> {
        let inner = self.inner();
        let idx = inner.indexes.get(name).ok_or(StoreError::NotFound)?;
        let IndexKind::Ordered { order, keys, .. } = &idx.kind else {
            return Err(StoreError::InvalidIndex("spatial index".into()));
        };
        let now = self.now;
        let range: Box<dyn Iterator<Item = &SortKey> + '_> = match (pivot, rev) {
            (None, false) => Box::new(keys.iter()),
            (None, true) => Box::new(keys.iter().rev()),
            (Some(p), false) => {
                let start = SortKey { cols: order.components(p), key: Vec::new() };
                Box::new(keys.range(start..))
            }
            (Some(p), true) => {
                // every element whose components equal the pivot sorts
                // below this bound, whatever its key tiebreak
                let mut cols = order.components(p);
                cols.push(ColKey::Asc(Vec::new()));
                let bound = SortKey { cols, key: Vec::new() };
                Box::new(keys.range(..bound).rev())
            }
        };
        Ok(Box::new(range.filter_map(move |sk| {
            let entry = inner.entries.get(&sk.key)?;
            if entry.expired_at(now) {
                return None;
            }
            Some((sk.key.as_slice(), entry.value.as_slice()))
        })))
    }

    /// Visit entries whose indexed rectangle overlaps `query`.
    pub fn intersects(
        &self,
        name: &str,
        query: &Rect,
    ) -> Result<Vec<(&[u8], &[u8])>, StoreError> {
        self.spatial_search(name, query, false)
    }

    /// Visit entries whose indexed rectangle lies entirely inside `query`.
    pub fn within(&self, name: &str, query: &Rect) -> Result<Vec<(&[u8], &[u8])>, StoreError> {
        self.spatial_search(name, query, true)
    }

    fn spatial_search(
        &self,
        name: &str,
        query: &Rect,
        contained: bool,
    ) -> Result<Vec<(&[u8], &[u8])>, StoreError> {
        let inner = self.inner();
        let idx = inner.indexes.get(name).ok_or(StoreError::NotFound)?;
        let IndexKind::Spatial { tree, .. } = &idx.kind else {
            return Err(StoreError::InvalidIndex("not a spatial index".into()));
        };
        let now = self.now;
        let mut results = Vec::new();
        tree.search_intersects(query, |rect, key| {
            if contained && !query.contains(rect) {
                return true;
            }
            if let Some((k, e)) = inner.entries.get_key_value(key) {
                if !e.expired_at(now) {
                    results.push((k.as_slice(), e.value.as_slice()));
                }
            }
            true
        });
        Ok(results)
    }

    fn rollback(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        let inner = match &mut self.access {
            Access::Write(inner) => inner,
            Access::Read(_) => return,
        };
        for op in undo.into_iter().rev() {
            match op {
                UndoOp::Entry { key, prev } => {
                    raw_install(inner, &key, prev);
                }
                UndoOp::IndexInstalled { name, prev } => {
                    inner.indexes.remove(&name);
                    if let Some(def) = prev {
                        install_index(inner, def);
                    }
                }
                UndoOp::IndexDropped { def } => {
                    install_index(inner, def);
                }
                UndoOp::AllCleared { entries, expirations } => {
                    inner.entries = entries;
                    inner.expirations = expirations;
                    let defs: Vec<IndexDef> =
                        inner.indexes.values().map(|i| i.def.clone()).collect();
                    for def in defs {
                        install_index(inner, def);
                    }
                }
            }
        }
    }
}
