//! Index column comparators.
//!
//! Every index column maps a stored value to an order-preserving sort key,
//! so composite index positions reduce to comparing `Vec<ColKey>`
//! component-wise. Descending columns reverse the comparison of their
//! component; later components break earlier ties, and the primary key is
//! the final tiebreak.

use super::collate::Collator;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// The kind of a non-spatial index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Json,
    Int,
    Uint,
    Float,
}

impl ColumnKind {
    pub fn token(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
        }
    }
}

/// One column of a composite index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub kind: ColumnKind,

    /// JSON path, for [`ColumnKind::Json`] columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Byte-wise comparison instead of case-folded, for text/json.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub case_sensitive: bool,

    /// Collation locale, for text/json.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collate: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub desc: bool,
}

impl IndexColumn {
    pub fn new(kind: ColumnKind) -> Self {
        Self {
            kind,
            path: None,
            case_sensitive: false,
            collate: None,
            desc: false,
        }
    }
}

/// A single component of a sort key. Descending components invert their
/// comparison; an index never mixes directions within one component slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColKey {
    Asc(Vec<u8>),
    Desc(Vec<u8>),
}

impl PartialOrd for ColKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ColKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Asc(a), Self::Asc(b)) => a.cmp(b),
            (Self::Desc(a), Self::Desc(b)) => b.cmp(a),
            (Self::Asc(_), Self::Desc(_)) => Ordering::Less,
            (Self::Desc(_), Self::Asc(_)) => Ordering::Greater,
        }
    }
}

/// Position of an entry within a non-spatial index: the encoded value
/// components, then the primary key as the final tiebreak.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub cols: Vec<ColKey>,
    pub key: Vec<u8>,
}

/// The comparator of a non-spatial index, exposed to the iterator layer so
/// pivot and range bounds evaluate in the same order the index uses.
#[derive(Debug, Clone)]
pub struct IndexOrder {
    cols: Arc<Vec<IndexColumn>>,
}

impl IndexOrder {
    pub fn new(cols: Vec<IndexColumn>) -> Self {
        Self { cols: Arc::new(cols) }
    }

    /// Encode a raw value into its sort-key components.
    pub fn components(&self, value: &[u8]) -> Vec<ColKey> {
        self.cols
            .iter()
            .map(|col| {
                let encoded = encode_column(col, value);
                if col.desc {
                    ColKey::Desc(encoded)
                } else {
                    ColKey::Asc(encoded)
                }
            })
            .collect()
    }

    /// Compare two raw values under this index's order.
    pub fn cmp_values(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.components(a).cmp(&self.components(b))
    }

    pub fn less(&self, a: &[u8], b: &[u8]) -> bool {
        self.cmp_values(a, b) == Ordering::Less
    }
}

/// Encode one column of `value` into order-preserving bytes.
fn encode_column(col: &IndexColumn, value: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(value);
    match col.kind {
        ColumnKind::Text => encode_text(col, &text),
        ColumnKind::Json => {
            let extracted = json_path_get(&text, col.path.as_deref().unwrap_or(""));
            encode_json(col, extracted)
        }
        ColumnKind::Int => {
            let n: i64 = text.trim().parse().unwrap_or(0);
            ((n as u64) ^ (1 << 63)).to_be_bytes().to_vec()
        }
        ColumnKind::Uint => {
            let n: u64 = text.trim().parse().unwrap_or(0);
            n.to_be_bytes().to_vec()
        }
        ColumnKind::Float => {
            let n: f64 = text.trim().parse().unwrap_or(0.0);
            encode_f64(n).to_vec()
        }
    }
}

fn encode_text(col: &IndexColumn, text: &str) -> Vec<u8> {
    if let Some(locale) = &col.collate {
        Collator::new(locale).sort_key(text)
    } else if col.case_sensitive {
        text.as_bytes().to_vec()
    } else {
        text.to_lowercase().into_bytes()
    }
}

/// JSON values order by type rank, then by typed value:
/// null < false < number < string < true < raw json.
fn encode_json(col: &IndexColumn, extracted: Option<serde_json::Value>) -> Vec<u8> {
    use serde_json::Value;
    let mut out = Vec::new();
    match extracted {
        None | Some(Value::Null) => out.push(0),
        Some(Value::Bool(false)) => out.push(1),
        Some(Value::Number(n)) => {
            out.push(2);
            out.extend_from_slice(&encode_f64(n.as_f64().unwrap_or(0.0)));
        }
        Some(Value::String(s)) => {
            out.push(3);
            out.extend_from_slice(&encode_text(col, &s));
        }
        Some(Value::Bool(true)) => out.push(4),
        Some(other) => {
            out.push(5);
            out.extend_from_slice(other.to_string().as_bytes());
        }
    }
    out
}

/// Total-order encoding of an IEEE-754 double.
fn encode_f64(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let ordered = if bits & (1 << 63) != 0 { !bits } else { bits ^ (1 << 63) };
    ordered.to_be_bytes()
}

/// Extract the value at a gjson-style dot path (`user.name`, `items.2`).
/// An empty path yields the whole document. Invalid JSON yields `None`.
pub fn json_path_get(doc: &str, path: &str) -> Option<serde_json::Value> {
    let parsed: serde_json::Value = serde_json::from_str(doc).ok()?;
    if path.is_empty() {
        return Some(parsed);
    }
    let mut current = parsed;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(mut map) => map.remove(segment)?,
            serde_json::Value::Array(mut items) => {
                let idx: usize = segment.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(current)
}
