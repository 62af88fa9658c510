//! Secondary index definitions and runtime structures.
//!
//! A definition names a glob pattern over keys plus either a composite
//! column list (ordered index) or a spatial rectangle extractor (R-tree).
//! Definitions serialize to JSON for persistence under their meta key, so
//! snapshot restore can rebuild every index from the catalog alone.

use super::compare::{json_path_get, ColKey, IndexColumn, IndexOrder, SortKey};
use super::glob;
use super::rect::Rect;
use super::rtree::RTree;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A persisted index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub pattern: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub spatial: bool,

    /// JSON path yielding the rectangle, for spatial indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_path: Option<String>,

    /// Composite columns, for ordered indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<IndexColumn>,
}

impl IndexDef {
    /// An ordered index over the given columns.
    pub fn ordered(name: &str, pattern: &str, columns: Vec<IndexColumn>) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            spatial: false,
            spatial_path: None,
            columns,
        }
    }

    /// A spatial index, optionally extracting the rectangle from a JSON path.
    pub fn spatial(name: &str, pattern: &str, path: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            spatial: true,
            spatial_path: path,
            columns: Vec::new(),
        }
    }
}

/// Runtime state of one installed index.
#[derive(Debug)]
pub(crate) struct Index {
    pub def: IndexDef,
    pub kind: IndexKind,
}

#[derive(Debug)]
pub(crate) enum IndexKind {
    Ordered {
        order: IndexOrder,
        keys: BTreeSet<SortKey>,
        /// primary key → its current sort components, for O(log n) removal
        refs: HashMap<Vec<u8>, Vec<ColKey>>,
    },
    Spatial {
        tree: RTree,
        refs: HashMap<Vec<u8>, Rect>,
    },
}

impl Index {
    pub fn new(def: IndexDef) -> Self {
        let kind = if def.spatial {
            IndexKind::Spatial { tree: RTree::new(), refs: HashMap::new() }
        } else {
            IndexKind::Ordered {
                order: IndexOrder::new(def.columns.clone()),
                keys: BTreeSet::new(),
                refs: HashMap::new(),
            }
        };
        Self { def, kind }
    }

    /// Whether `key` falls under this index's pattern.
    pub fn matches(&self, key: &[u8]) -> bool {
        glob::matches(key, self.def.pattern.as_bytes())
    }

    /// The comparator for ordered indexes.
    pub fn order(&self) -> Option<IndexOrder> {
        match &self.kind {
            IndexKind::Ordered { order, .. } => Some(order.clone()),
            IndexKind::Spatial { .. } => None,
        }
    }

    /// Add or reposition `key` for `value`.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.remove(key);
        match &mut self.kind {
            IndexKind::Ordered { order, keys, refs } => {
                let cols = order.components(value);
                keys.insert(SortKey { cols: cols.clone(), key: key.to_vec() });
                refs.insert(key.to_vec(), cols);
            }
            IndexKind::Spatial { tree, refs } => {
                let rect = extract_rect(self.def.spatial_path.as_deref(), value);
                tree.insert(rect.clone(), key.to_vec());
                refs.insert(key.to_vec(), rect);
            }
        }
    }

    /// Drop `key`'s reference, if present.
    pub fn remove(&mut self, key: &[u8]) {
        match &mut self.kind {
            IndexKind::Ordered { keys, refs, .. } => {
                if let Some(cols) = refs.remove(key) {
                    keys.remove(&SortKey { cols, key: key.to_vec() });
                }
            }
            IndexKind::Spatial { tree, refs } => {
                if let Some(rect) = refs.remove(key) {
                    tree.remove(&rect, key);
                }
            }
        }
    }

    /// Drop every reference, keeping the definition installed.
    pub fn clear(&mut self) {
        match &mut self.kind {
            IndexKind::Ordered { keys, refs, .. } => {
                keys.clear();
                refs.clear();
            }
            IndexKind::Spatial { tree, refs } => {
                *tree = RTree::new();
                refs.clear();
            }
        }
    }
}

/// Derive the indexed rectangle from a stored value. With a JSON path the
/// rectangle literal is read from the value at that path; otherwise the
/// raw value is parsed. Unparseable values index as the unbounded
/// zero-dimension rectangle.
pub(crate) fn extract_rect(path: Option<&str>, value: &[u8]) -> Rect {
    let text = String::from_utf8_lossy(value);
    let source: String = match path {
        None | Some("") => text.into_owned(),
        Some(p) => match json_path_get(&text, p) {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        },
    };
    Rect::parse(&source).unwrap_or_else(|| Rect::new(Vec::new(), Vec::new()))
}
