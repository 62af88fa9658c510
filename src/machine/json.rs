//! JSON document commands: JGET, JSET, JDEL.
//!
//! Values are whole JSON documents stored at a key; paths are dot
//! separated, with numeric segments indexing arrays.

use super::{ConnContext, Machine};
use crate::core::error::CommandError;
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::compare::json_path_get;
use crate::store::Tx;
use serde_json::Value;

/// Render an extracted JSON value the way clients expect: strings bare,
/// everything else in its JSON form.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Set `path` in `doc` to `new_value`, creating intermediate objects.
/// Numeric segments address arrays; one past the end appends, further
/// past pads with nulls.
fn json_set(doc: &str, path: &str, new_value: Value) -> Result<String, String> {
    if path.is_empty() {
        return Ok(new_value.to_string());
    }
    let mut root: Value = serde_json::from_str(doc).unwrap_or(Value::Null);
    if !root.is_object() && !root.is_array() {
        root = Value::Object(serde_json::Map::new());
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = &mut root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match current {
            Value::Array(items) => {
                let idx: usize = segment
                    .parse()
                    .map_err(|_| format!("array index expected at '{segment}'"))?;
                if idx >= items.len() {
                    items.resize(idx + 1, Value::Null);
                }
                if last {
                    items[idx] = new_value;
                    return Ok(root.to_string());
                }
                if !items[idx].is_object() && !items[idx].is_array() {
                    items[idx] = Value::Object(serde_json::Map::new());
                }
                current = &mut items[idx];
            }
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_string(), new_value);
                    return Ok(root.to_string());
                }
                let slot = map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if !slot.is_object() && !slot.is_array() {
                    *slot = Value::Object(serde_json::Map::new());
                }
                current = slot;
            }
            _ => return Err(format!("cannot descend into '{segment}'")),
        }
    }
    unreachable!("path has at least one segment")
}

/// Delete `path` from `doc`. Returns the new document and whether it
/// changed.
fn json_del(doc: &str, path: &str) -> Result<(String, bool), String> {
    let mut root: Value = match serde_json::from_str(doc) {
        Ok(v) => v,
        Err(_) => return Ok((doc.to_string(), false)),
    };
    let segments: Vec<&str> = path.split('.').collect();
    if segments.is_empty() || path.is_empty() {
        return Err("empty path".to_string());
    }
    let mut current = &mut root;
    for segment in &segments[..segments.len() - 1] {
        current = match current {
            Value::Object(map) => match map.get_mut(*segment) {
                Some(v) => v,
                None => return Ok((doc.to_string(), false)),
            },
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(idx) if idx < items.len() => &mut items[idx],
                _ => return Ok((doc.to_string(), false)),
            },
            _ => return Ok((doc.to_string(), false)),
        };
    }
    let leaf = segments[segments.len() - 1];
    let changed = match current {
        Value::Object(map) => map.remove(leaf).is_some(),
        Value::Array(items) => match leaf.parse::<usize>() {
            Ok(idx) if idx < items.len() => {
                items.remove(idx);
                true
            }
            _ => false,
        },
        _ => false,
    };
    if changed {
        Ok((root.to_string(), true))
    } else {
        Ok((doc.to_string(), false))
    }
}

/// JSET auto-detection: bare numbers and the literals true/false/null
/// store raw; everything else stores as a JSON string.
fn auto_raw(val: &str) -> bool {
    match val {
        "true" | "false" | "null" => true,
        _ => {
            let bytes = val.as_bytes();
            !bytes.is_empty()
                && (bytes[0].is_ascii_digit() || bytes[0] == b'-')
                && val.parse::<f64>().is_ok()
        }
    }
}

impl Machine {
    pub(super) fn do_jget(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 3 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        let path = cmd.arg_str(2);
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let Some(val) = tx.get(&key) else {
                return Ok(Reply::Null);
            };
            let doc = String::from_utf8_lossy(val);
            Ok(match json_path_get(&doc, &path) {
                Some(value) => Reply::bulk(render(&value)),
                None => Reply::Null,
            })
        })
    }

    pub(super) fn do_jset(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        let (mut raw, mut str_forced) = (false, false);
        match cmd.args.len() {
            4 => {}
            5 => match cmd.arg_lower(4).as_str() {
                "raw" => raw = true,
                "str" => str_forced = true,
                _ => return Err(CommandError::Syntax),
            },
            _ => return Err(CommandError::WrongNumberOfArguments),
        }
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        let path = cmd.arg_str(2);
        let val = cmd.arg_str(3);
        if !raw && !str_forced {
            raw = auto_raw(&val);
        }
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let doc = tx
                .get(&key)
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            let new_value = if raw {
                serde_json::from_str(&val)
                    .map_err(|e| CommandError::err(format!("invalid raw value: {e}")))?
            } else {
                Value::String(val.clone())
            };
            let updated = json_set(&doc, &path, new_value).map_err(CommandError::err)?;
            tx.set(&key, updated.into_bytes(), None)?;
            Ok(Reply::ok())
        })
    }

    pub(super) fn do_jdel(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 3 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        let path = cmd.arg_str(2);
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let Some(val) = tx.get(&key) else {
                return Ok(Reply::Int(0));
            };
            let doc = String::from_utf8_lossy(val).into_owned();
            let (updated, changed) = json_del(&doc, &path).map_err(CommandError::err)?;
            if changed {
                tx.set(&key, updated.into_bytes(), None)?;
                Ok(Reply::Int(1))
            } else {
                Ok(Reply::Int(0))
            }
        })
    }
}
