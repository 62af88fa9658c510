//! Index lifecycle commands.
//!
//! `SETINDEX name pattern SPATIAL [PATH path]`
//! `SETINDEX name pattern TEXT [CS] [COLLATE locale] [ASC|DESC] ...`
//! `SETINDEX name pattern JSON path [CS] [COLLATE locale] [ASC|DESC] ...`
//! `SETINDEX name pattern INT|UINT|FLOAT [ASC|DESC] ...`
//!
//! Multiple column groups compose into one composite index. The parsed
//! definition persists as JSON under its meta key so restore can replay
//! the installation.

use super::{ConnContext, Machine};
use crate::core::error::CommandError;
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::{glob, ColumnKind, IndexColumn, IndexDef, Tx, META_PREFIX};

pub(crate) fn index_meta_key(name: &str) -> Vec<u8> {
    format!("{META_PREFIX}index:{name}").into_bytes()
}

fn parse_index_args(cmd: &Command) -> Result<IndexDef, CommandError> {
    if cmd.args.len() < 4 {
        return Err(CommandError::WrongNumberOfArguments);
    }
    let name = cmd.arg_str(1);
    let pattern = cmd.arg_str(2);
    if name.is_empty() {
        return Err(CommandError::Syntax);
    }
    let mut def = IndexDef::ordered(&name, &pattern, Vec::new());
    let mut i = 3;
    while i < cmd.args.len() {
        let kind_tok = cmd.arg_lower(i);
        let kind = match kind_tok.as_str() {
            "text" => ColumnKind::Text,
            "int" => ColumnKind::Int,
            "uint" => ColumnKind::Uint,
            "float" => ColumnKind::Float,
            "json" => ColumnKind::Json,
            "spatial" => {
                if !def.columns.is_empty() {
                    return Err(CommandError::Syntax);
                }
                def.spatial = true;
                i += 1;
                while i < cmd.args.len() {
                    match cmd.arg_lower(i).as_str() {
                        "path" => {
                            i += 1;
                            if i >= cmd.args.len() {
                                return Err(CommandError::WrongNumberOfArguments);
                            }
                            def.spatial_path = Some(cmd.arg_str(i));
                            i += 1;
                        }
                        _ => return Err(CommandError::Syntax),
                    }
                }
                return Ok(def);
            }
            _ => return Err(CommandError::Syntax),
        };
        let mut col = IndexColumn::new(kind);
        if kind == ColumnKind::Json {
            i += 1;
            if i >= cmd.args.len() {
                return Err(CommandError::WrongNumberOfArguments);
            }
            col.path = Some(cmd.arg_str(i));
        }
        i += 1;
        // suffix tokens; a token that does not apply to this column kind
        // falls through as the next column's kind and fails there
        while i < cmd.args.len() {
            match cmd.arg_lower(i).as_str() {
                "cs" => {
                    if !matches!(kind, ColumnKind::Text | ColumnKind::Json) {
                        break;
                    }
                    col.case_sensitive = true;
                }
                "collate" => {
                    if !matches!(kind, ColumnKind::Text | ColumnKind::Json) {
                        break;
                    }
                    i += 1;
                    if i >= cmd.args.len() {
                        return Err(CommandError::WrongNumberOfArguments);
                    }
                    col.collate = Some(cmd.arg_str(i));
                }
                "desc" => col.desc = true,
                "asc" => col.desc = false,
                _ => break,
            }
            i += 1;
        }
        def.columns.push(col);
    }
    if def.columns.is_empty() {
        return Err(CommandError::Syntax);
    }
    Ok(def)
}

/// Install an index and persist its definition, replacing any previous
/// definition of the same name within the transaction.
pub(crate) fn set_index(tx: &mut Tx, def: IndexDef) -> Result<(), CommandError> {
    let meta_key = index_meta_key(&def.name);
    let data = serde_json::to_vec(&def).map_err(CommandError::err)?;
    tx.drop_index(&def.name)?;
    tx.create_index(def)?;
    tx.set(&meta_key, data, None)?;
    Ok(())
}

/// Render a definition as the DETAILS token arrays.
fn def_details(def: &IndexDef) -> Reply {
    let column_reply = |tokens: Vec<String>| {
        Reply::Array(tokens.into_iter().map(Reply::bulk).collect())
    };
    if def.spatial {
        let mut tokens = vec!["spatial".to_string()];
        if let Some(path) = &def.spatial_path {
            tokens.push("path".to_string());
            tokens.push(path.clone());
        }
        return Reply::Array(vec![column_reply(tokens)]);
    }
    Reply::Array(
        def.columns
            .iter()
            .map(|col| {
                let mut tokens = vec![col.kind.token().to_string()];
                if let Some(path) = &col.path {
                    tokens.push(path.clone());
                }
                if let Some(locale) = &col.collate {
                    tokens.push("collate".to_string());
                    tokens.push(locale.clone());
                }
                if col.case_sensitive {
                    tokens.push("cs".to_string());
                }
                if col.desc {
                    tokens.push("desc".to_string());
                }
                column_reply(tokens)
            })
            .collect(),
    )
}

impl Machine {
    pub(super) fn do_setindex(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        let def = parse_index_args(cmd)?;
        self.write_apply(a, conn, cmd, tx, move |tx| {
            set_index(tx, def)?;
            Ok(Reply::ok())
        })
    }

    pub(super) fn do_delindex(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let name = cmd.arg_str(1);
        self.write_apply(a, conn, cmd, tx, move |tx| {
            if !tx.drop_index(&name)? {
                return Ok(Reply::Int(0));
            }
            tx.delete(&index_meta_key(&name))?;
            Ok(Reply::Int(1))
        })
    }

    pub(super) fn do_indexes(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 && cmd.args.len() != 3 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let pattern = cmd.args[1].clone();
        let details = match cmd.args.len() {
            3 if cmd.arg_lower(2) == "details" => true,
            3 => return Err(CommandError::Syntax),
            _ => false,
        };
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let prefix = index_meta_key("");
            let mut replies = Vec::new();
            for (key, val) in tx
                .ascend_from("", &prefix)?
                .take_while(|(k, _)| k.starts_with(&prefix))
            {
                let name = &key[prefix.len()..];
                if !glob::matches(name, &pattern) {
                    continue;
                }
                replies.push(Reply::bulk(name));
                if details {
                    let def: IndexDef = serde_json::from_slice(val).map_err(|e| {
                        CommandError::err(format!(
                            "parsing index '{}': {e}",
                            String::from_utf8_lossy(name)
                        ))
                    })?;
                    replies.push(Reply::bulk(def.pattern.clone()));
                    replies.push(def_details(&def));
                }
            }
            Ok(Reply::Array(replies))
        })
    }
}
