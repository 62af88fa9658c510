//! Key-level command handlers: existence, TTLs, renames, pattern deletes,
//! dump/restore, and the flush commands.

use super::strings::{parse_int, parse_uint};
use super::{ConnContext, Machine};
use crate::core::error::CommandError;
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::{glob, is_meta_key, Tx, META_PREFIX};

/// Absolute expiration from a signed delta against the transaction clock.
pub(crate) fn abs_expire(now: u64, delta_ms: i64) -> u64 {
    (i128::from(now) + i128::from(delta_ms)).clamp(0, i128::from(u64::MAX)) as u64
}

/// Remove every entry except the system ones, preserving their values.
/// Returns the surviving (key, value) pairs and the number of entries
/// removed.
fn flush_all_but_meta(tx: &mut Tx) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, i64), CommandError> {
    let metas: Vec<(Vec<u8>, Vec<u8>)> = tx
        .ascend_from("", META_PREFIX.as_bytes())?
        .take_while(|(k, _)| is_meta_key(k))
        .map(|(k, v)| (k.to_vec(), v.to_vec()))
        .collect();
    let total = tx.len() as i64;
    tx.delete_all()?;
    for (key, val) in &metas {
        tx.set(key, val.clone(), None)?;
    }
    let deleted = total - metas.len() as i64;
    Ok((metas, deleted))
}

impl Machine {
    pub(super) fn do_type(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        self.read_apply(a, conn, cmd, tx, move |tx| {
            Ok(Reply::Simple(
                if tx.get(&key).is_some() { "string" } else { "none" }.to_string(),
            ))
        })
    }

    pub(super) fn do_exists(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        for key in &cmd.args[1..] {
            self.check_user_key(key)?;
        }
        let keys: Vec<Vec<u8>> = cmd.args[1..].to_vec();
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let n = keys.iter().filter(|k| tx.get(k).is_some()).count();
            Ok(Reply::Int(n as i64))
        })
    }

    pub(super) fn do_del(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        for key in &cmd.args[1..] {
            self.check_user_key(key)?;
        }
        let keys: Vec<Vec<u8>> = cmd.args[1..].to_vec();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let mut n = 0;
            for key in &keys {
                if tx.delete(key)?.is_some() {
                    n += 1;
                }
            }
            Ok(Reply::Int(n))
        })
    }

    pub(super) fn do_pdel(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let pattern = cmd.args[1].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            if pattern == b"*" {
                let (_, deleted) = flush_all_but_meta(tx)?;
                return Ok(Reply::Int(deleted));
            }
            let keys: Vec<Vec<u8>> = if pattern.starts_with(b"*") {
                tx.ascend("")?
                    .filter(|(k, _)| !is_meta_key(k) && glob::matches(k, &pattern))
                    .map(|(k, _)| k.to_vec())
                    .collect()
            } else {
                let (min, max) = glob::allowable(&pattern);
                let iter = match &min {
                    Some(min) => tx.ascend_from("", min)?,
                    None => tx.ascend("")?,
                };
                iter.take_while(|(k, _)| match &max {
                    Some(max) => *k <= max.as_slice(),
                    None => true,
                })
                .filter(|(k, _)| !is_meta_key(k) && glob::matches(k, &pattern))
                .map(|(k, _)| k.to_vec())
                .collect()
            };
            let mut n = 0;
            for key in keys {
                if tx.delete(&key)?.is_some() {
                    n += 1;
                }
            }
            Ok(Reply::Int(n))
        })
    }

    pub(super) fn do_rename(
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
        self.check_user_key(&cmd.args[2])?;
        let nx = cmd.name() == "renamenx";
        let key = cmd.args[1].clone();
        let newkey = cmd.args[2].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            if nx && tx.get(&newkey).is_some() {
                return Ok(Reply::Int(0));
            }
            let entry = tx.delete(&key)?.ok_or(CommandError::NoSuchKey)?;
            tx.set(&newkey, entry.value, None)?;
            Ok(if nx { Reply::Int(1) } else { Reply::ok() })
        })
    }

    pub(super) fn do_restore(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 4 || cmd.args.len() > 5 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let ttl_ms = parse_int(&cmd.args[2])?;
        if ttl_ms < 0 {
            return Err(CommandError::err("Invalid TTL value, must be >= 0"));
        }
        let replace = match cmd.args.len() {
            5 if cmd.arg_lower(4) == "replace" => true,
            5 => return Err(CommandError::Syntax),
            _ => false,
        };
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        let val = cmd.args[3].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            if !replace && tx.get(&key).is_some() {
                return Err(CommandError::BusyKey);
            }
            let expires_at = (ttl_ms > 0).then(|| abs_expire(tx.now(), ttl_ms));
            tx.set(&key, val, expires_at)?;
            Ok(Reply::ok())
        })
    }

    pub(super) fn do_ttl(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let resolution: u64 = match cmd.name().as_str() {
            "ttl" => 1000,
            "pttl" => 1,
            name => return Err(CommandError::UnknownCommand(name.to_string())),
        };
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        self.read_apply(a, conn, cmd, tx, move |tx| {
            Ok(Reply::Int(match tx.ttl(&key) {
                crate::store::Ttl::Missing => -2,
                crate::store::Ttl::NoExpiry => -1,
                crate::store::Ttl::Remaining(ms) => (ms / resolution) as i64,
            }))
        })
    }

    pub(super) fn do_expire(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 3 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let n = parse_int(&cmd.args[2])?;
        self.check_user_key(&cmd.args[1])?;
        let name = cmd.name();
        let key = cmd.args[1].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let Some(entry) = tx.get(&key).map(<[u8]>::to_vec) else {
                return Ok(Reply::Int(0));
            };
            let now = tx.now();
            let expires_at = match name.as_str() {
                "expire" => abs_expire(now, n.saturating_mul(1000)),
                "pexpire" => abs_expire(now, n),
                "expireat" => (i128::from(n) * 1000).clamp(0, i128::from(u64::MAX)) as u64,
                "pexpireat" => i128::from(n).clamp(0, i128::from(u64::MAX)) as u64,
                other => return Err(CommandError::UnknownCommand(other.to_string())),
            };
            // a past instant leaves the key immediately unreachable
            tx.set(&key, entry, Some(expires_at))?;
            Ok(Reply::Int(1))
        })
    }

    pub(super) fn do_persist(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            match tx.ttl(&key) {
                crate::store::Ttl::Missing | crate::store::Ttl::NoExpiry => {
                    return Ok(Reply::Int(0))
                }
                crate::store::Ttl::Remaining(_) => {}
            }
            let val = tx.get(&key).map(<[u8]>::to_vec).unwrap_or_default();
            tx.set(&key, val, None)?;
            Ok(Reply::Int(1))
        })
    }

    pub(super) fn do_flushdb(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.write_apply(a, conn, cmd, tx, move |tx| {
            // drop all entries, then drop the indexes themselves: their
            // definition keys survive the flush and are removed here
            let (metas, _) = flush_all_but_meta(tx)?;
            let index_prefix = format!("{META_PREFIX}index:").into_bytes();
            for (key, _) in metas {
                if key.starts_with(&index_prefix) {
                    let name = String::from_utf8_lossy(&key[index_prefix.len()..]).into_owned();
                    tx.drop_index(&name)?;
                    tx.delete(&key)?;
                }
            }
            Ok(Reply::ok())
        })
    }

    pub(super) fn do_massinsert(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let n = parse_uint(&cmd.args[1])?;
        if n > 100_000_000 {
            return Err(CommandError::Syntax);
        }
        self.write_apply(a, conn, cmd, tx, move |tx| {
            for i in 0..n {
                let suffix = format!("{i:010}");
                tx.set(
                    format!("__key__:{suffix}").as_bytes(),
                    format!("__val__:{suffix}").into_bytes(),
                    None,
                )?;
            }
            Ok(Reply::Int(n as i64))
        })
    }

    pub(super) fn do_dbsize(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let metas = tx
                .ascend_from("", META_PREFIX.as_bytes())?
                .take_while(|(k, _)| is_meta_key(k))
                .count();
            Ok(Reply::Int((tx.len() - metas) as i64))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_expire() {
        assert_eq!(abs_expire(1000, 500), 1500);
        assert_eq!(abs_expire(1000, -2000), 0);
        assert_eq!(abs_expire(u64::MAX, 10), u64::MAX);
    }
}
