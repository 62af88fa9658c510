//! String command handlers.

use super::{ConnContext, Machine};
use crate::core::error::CommandError;
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::Tx;

pub(crate) fn parse_int(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

pub(crate) fn parse_uint(arg: &[u8]) -> Result<u64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

/// Clamp an inclusive start/end pair (negative values count from the end)
/// into a half-open byte range over a value of length `len`.
fn reeval_start_end(start: i64, end: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let mut start = if start < 0 { (len + start).max(0) } else { start };
    let mut end = if end < 0 { (len + end).max(0) } else { end };
    if start > len - 1 {
        return (0, 0);
    }
    if end > len - 1 {
        end = len - 1;
    }
    if start > end {
        return (0, 0);
    }
    if start < 0 {
        start = 0;
    }
    (start as usize, (end + 1) as usize)
}

fn parse_start_end(cmd: &Command, si: usize, ei: usize) -> Result<(i64, i64), CommandError> {
    if si >= cmd.args.len() || ei >= cmd.args.len() {
        return Err(CommandError::NotAnInteger);
    }
    Ok((parse_int(&cmd.args[si])?, parse_int(&cmd.args[ei])?))
}

impl Machine {
    pub(super) fn do_get(
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
            Ok(match tx.get(&key) {
                Some(val) => Reply::bulk(val),
                None => Reply::Null,
            })
        })
    }

    pub(super) fn do_strlen(
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
            Ok(Reply::Int(tx.get(&key).map_or(0, |v| v.len() as i64)))
        })
    }

    pub(super) fn do_set(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 3 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let name = cmd.name();
        self.check_user_key(&cmd.args[1])?;

        if cmd.args.len() == 3 && name == "set" {
            // fast track: no options to parse
            let key = cmd.args[1].clone();
            let val = cmd.args[2].clone();
            return self.write_apply(a, conn, cmd, tx, move |tx| {
                tx.set(&key, val, None)?;
                Ok(Reply::ok())
            });
        }

        let key;
        let val;
        let mut expire_ms: Option<i64> = None;
        let mut nx = false;
        let mut xx = false;
        match name.as_str() {
            "set" => {
                key = cmd.args[1].clone();
                val = cmd.args[2].clone();
                let mut i = 3;
                while i < cmd.args.len() {
                    match cmd.arg_lower(i).as_str() {
                        "ex" | "px" => {
                            if expire_ms.is_some() {
                                return Err(CommandError::Syntax);
                            }
                            let unit = cmd.arg_lower(i);
                            i += 1;
                            if i >= cmd.args.len() {
                                return Err(CommandError::Syntax);
                            }
                            let n = parse_int(&cmd.args[i])?;
                            if n <= 0 {
                                return Err(CommandError::InvalidExpire("set"));
                            }
                            expire_ms = Some(if unit == "ex" {
                                n.saturating_mul(1000)
                            } else {
                                n
                            });
                        }
                        "nx" => {
                            if nx || xx {
                                return Err(CommandError::Syntax);
                            }
                            nx = true;
                        }
                        "xx" => {
                            if nx || xx {
                                return Err(CommandError::Syntax);
                            }
                            xx = true;
                        }
                        _ => return Err(CommandError::Syntax),
                    }
                    i += 1;
                }
            }
            "setex" | "psetex" => {
                if cmd.args.len() != 4 {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                key = cmd.args[1].clone();
                val = cmd.args[3].clone();
                let n = parse_int(&cmd.args[2])?;
                if n <= 0 {
                    return Err(CommandError::InvalidExpire("setex"));
                }
                expire_ms = Some(if name == "setex" { n.saturating_mul(1000) } else { n });
            }
            "setnx" => {
                if cmd.args.len() != 3 {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                key = cmd.args[1].clone();
                val = cmd.args[2].clone();
                nx = true;
            }
            _ => return Err(CommandError::UnknownCommand(name)),
        }

        self.write_apply(a, conn, cmd, tx, move |tx| {
            if nx && tx.get(&key).is_some() {
                return Ok(Reply::Null);
            }
            if xx && tx.get(&key).is_none() {
                return Ok(Reply::Null);
            }
            let expires_at = expire_ms.map(|ms| {
                let at = i128::from(tx.now()) + i128::from(ms);
                at.clamp(0, i128::from(u64::MAX)) as u64
            });
            tx.set(&key, val, expires_at)?;
            Ok(Reply::ok())
        })
    }

    pub(super) fn do_mset(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 3 || (cmd.args.len() - 1) % 2 == 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        for pair in cmd.args[1..].chunks(2) {
            self.check_user_key(&pair[0])?;
        }
        let pipeline = cmd.name() == "plset";
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = cmd.args[1..]
            .chunks(2)
            .map(|c| (c[0].clone(), c[1].clone()))
            .collect();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let n = pairs.len();
            for (key, val) in pairs {
                tx.set(&key, val, None)?;
            }
            if pipeline {
                Ok(Reply::Array(vec![Reply::ok(); n]))
            } else {
                Ok(Reply::ok())
            }
        })
    }

    pub(super) fn do_msetnx(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 3 || (cmd.args.len() - 1) % 2 == 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        for pair in cmd.args[1..].chunks(2) {
            self.check_user_key(&pair[0])?;
        }
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = cmd.args[1..]
            .chunks(2)
            .map(|c| (c[0].clone(), c[1].clone()))
            .collect();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            for (key, val) in pairs {
                if tx.get(&key).is_some() {
                    return Ok(Reply::Int(0));
                }
                tx.set(&key, val, None)?;
            }
            Ok(Reply::Int(1))
        })
    }

    pub(super) fn do_mget(
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
            Ok(Reply::Array(
                keys.iter()
                    .map(|k| match tx.get(k) {
                        Some(val) => Reply::bulk(val),
                        None => Reply::Null,
                    })
                    .collect(),
            ))
        })
    }

    pub(super) fn do_append(
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
        let suffix = cmd.args[2].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let mut val = tx.get(&key).map(<[u8]>::to_vec).unwrap_or_default();
            val.extend_from_slice(&suffix);
            let len = val.len();
            tx.set(&key, val, None)?;
            Ok(Reply::Int(len as i64))
        })
    }

    pub(super) fn do_getset(
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
        let val = cmd.args[2].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let prev = tx.set(&key, val, None)?;
            Ok(match prev {
                Some(entry) => Reply::bulk(entry.value),
                None => Reply::Null,
            })
        })
    }

    pub(super) fn do_incr(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let amount = match cmd.name().as_str() {
            "incr" => {
                if cmd.args.len() != 2 {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                1
            }
            "decr" => {
                if cmd.args.len() != 2 {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                -1
            }
            "incrby" | "decrby" => {
                if cmd.args.len() != 3 {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                let n = parse_int(&cmd.args[2])?;
                if cmd.name() == "decrby" {
                    n.checked_neg().ok_or(CommandError::NotAnInteger)?
                } else {
                    n
                }
            }
            name => return Err(CommandError::UnknownCommand(name.to_string())),
        };
        self.check_user_key(&cmd.args[1])?;
        let key = cmd.args[1].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let current = match tx.get(&key) {
                None => 0,
                Some(val) if val.is_empty() => 0,
                Some(val) => parse_int(val)?,
            };
            // overflow is not a wraparound: report it as a bad integer
            let next = current.checked_add(amount).ok_or(CommandError::NotAnInteger)?;
            tx.set(&key, next.to_string().into_bytes(), None)?;
            Ok(Reply::Int(next))
        })
    }

    pub(super) fn do_incrbyfloat(
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
        let amount: f64 = std::str::from_utf8(&cmd.args[2])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(CommandError::NotAFloat)?;
        let key = cmd.args[1].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let current: f64 = match tx.get(&key) {
                None => 0.0,
                Some(val) if val.is_empty() => 0.0,
                Some(val) => std::str::from_utf8(val)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(CommandError::NotAFloat)?,
            };
            let next = current + amount;
            if next.is_nan() || next.is_infinite() {
                return Err(CommandError::err("increment would produce NaN or Infinity"));
            }
            let formatted = format!("{next}");
            tx.set(&key, formatted.clone().into_bytes(), None)?;
            Ok(Reply::bulk(formatted))
        })
    }

    pub(super) fn do_getrange(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 4 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let (start, end) = parse_start_end(cmd, 2, 3)?;
        let key = cmd.args[1].clone();
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let val = tx.get(&key).unwrap_or_default();
            let (s, e) = reeval_start_end(start, end, val.len());
            Ok(Reply::bulk(&val[s..e]))
        })
    }

    pub(super) fn do_setrange(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 4 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let offset = parse_uint(&cmd.args[2])
            .map_err(|_| CommandError::err("offset is out of range"))? as usize;
        let key = cmd.args[1].clone();
        let patch = cmd.args[3].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let mut val = tx.get(&key).map(<[u8]>::to_vec).unwrap_or_default();
            if val.len() < offset + patch.len() {
                val.resize(offset + patch.len(), 0);
            }
            val[offset..offset + patch.len()].copy_from_slice(&patch);
            let len = val.len();
            tx.set(&key, val, None)?;
            Ok(Reply::Int(len as i64))
        })
    }

    pub(super) fn do_bitcount(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let range = if cmd.args.len() == 4 {
            Some(parse_start_end(cmd, 2, 3)?)
        } else if cmd.args.len() == 2 {
            None
        } else {
            return Err(CommandError::Syntax);
        };
        let key = cmd.args[1].clone();
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let val = tx.get(&key).unwrap_or_default();
            let slice = match range {
                Some((start, end)) => {
                    let (s, e) = reeval_start_end(start, end, val.len());
                    &val[s..e]
                }
                None => val,
            };
            let ones: u32 = slice.iter().map(|b| b.count_ones()).sum();
            Ok(Reply::Int(i64::from(ones)))
        })
    }

    pub(super) fn do_bitop(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 4 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let op = cmd.arg_lower(1);
        match op.as_str() {
            "and" | "or" | "xor" => {}
            "not" => {
                if cmd.args.len() > 4 {
                    return Err(CommandError::err(
                        "BITOP NOT must be called with a single source key.",
                    ));
                }
            }
            _ => return Err(CommandError::Syntax),
        }
        for key in &cmd.args[2..] {
            self.check_user_key(key)?;
        }
        let dest = cmd.args[2].clone();
        let sources: Vec<Vec<u8>> = cmd.args[3..].to_vec();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            if op == "not" {
                let val = tx.get(&sources[0]).unwrap_or_default();
                let negated: Vec<u8> = val.iter().map(|b| !b).collect();
                let len = negated.len();
                tx.set(&dest, negated, None)?;
                return Ok(Reply::Int(len as i64));
            }
            let mut vals: Vec<Vec<u8>> = sources
                .iter()
                .map(|k| tx.get(k).map(<[u8]>::to_vec).unwrap_or_default())
                .collect();
            let maxlen = vals.iter().map(Vec::len).max().unwrap_or(0);
            for val in &mut vals {
                val.resize(maxlen, 0);
            }
            let mut result = vals[0].clone();
            for val in &vals[1..] {
                for (r, v) in result.iter_mut().zip(val) {
                    match op.as_str() {
                        "and" => *r &= v,
                        "or" => *r |= v,
                        _ => *r ^= v,
                    }
                }
            }
            let len = result.len();
            tx.set(&dest, result, None)?;
            Ok(Reply::Int(len as i64))
        })
    }

    pub(super) fn do_getbit(
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
        let offset = parse_uint(&cmd.args[2])
            .map_err(|_| CommandError::err("bit offset is not an integer or out of range"))?;
        let key = cmd.args[1].clone();
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let val = tx.get(&key).unwrap_or_default();
            let byte = (offset / 8) as usize;
            let bit = if byte < val.len() {
                let pos = 7 - (offset % 8);
                i64::from((val[byte] >> pos) & 1)
            } else {
                0
            };
            Ok(Reply::Int(bit))
        })
    }

    pub(super) fn do_setbit(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 4 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let offset = parse_uint(&cmd.args[2])
            .map_err(|_| CommandError::err("bit offset is not an integer or out of range"))?;
        let bit = match parse_uint(&cmd.args[3]) {
            Ok(b) if b <= 1 => b as u8,
            _ => return Err(CommandError::err("bit is not an integer or out of range")),
        };
        let key = cmd.args[1].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let mut val = tx.get(&key).map(<[u8]>::to_vec).unwrap_or_default();
            let byte = (offset / 8) as usize;
            if byte >= val.len() {
                val.resize(byte + 1, 0);
            }
            let pos = 7 - (offset % 8);
            let prev = (val[byte] >> pos) & 1;
            if prev != bit {
                val[byte] ^= 1 << pos;
            }
            tx.set(&key, val, None)?;
            Ok(Reply::Int(i64::from(prev)))
        })
    }

    pub(super) fn do_bitpos(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 3 || cmd.args.len() > 5 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.check_user_key(&cmd.args[1])?;
        let bit = match parse_uint(&cmd.args[2]) {
            Ok(b) if b <= 1 => b as u8,
            _ => return Err(CommandError::err("bit is not an integer or out of range")),
        };
        let (start, end) = match cmd.args.len() {
            5 => parse_start_end(cmd, 3, 4)?,
            4 => (parse_int(&cmd.args[3])?, -1),
            _ => (0, -1),
        };
        let key = cmd.args[1].clone();
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let val = tx.get(&key).unwrap_or_default();
            if val.is_empty() {
                return Ok(Reply::Int(-1));
            }
            let (s, e) = reeval_start_end(start, end, val.len());
            for (i, byte) in val[s..e].iter().enumerate() {
                for j in 0..8 {
                    if (byte >> (7 - j)) & 1 == bit {
                        return Ok(Reply::Int((s as i64) * 8 + (i as i64) * 8 + j));
                    }
                }
            }
            Ok(Reply::Int(-1))
        })
    }
}
