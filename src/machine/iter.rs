//! KEYS and ITER: ordered iteration over the primary order or a named
//! index, with pivot, range, match, and limit controls.

use super::strings::parse_uint;
use super::{ConnContext, Machine};
use crate::core::error::{CommandError, StoreError};
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::{glob, is_meta_key, IndexOrder, Tx};
use std::cmp::Ordering;

#[derive(Debug, Default)]
struct IterArgs {
    keys_kind: bool,
    index: String,
    pattern: Vec<u8>,
    desc: bool,
    limit: Option<usize>,
    pivot: Option<Vec<u8>>,
    with_values: bool,
    range: Option<RangeArgs>,
    match_pattern: Option<Vec<u8>>,
}

#[derive(Debug)]
struct RangeArgs {
    /// `[`, `(`, or `-` for an unbounded minimum.
    min_kind: u8,
    min: Vec<u8>,
    /// `]`, `)`, or `+` for an unbounded maximum.
    max_kind: u8,
    max: Vec<u8>,
}

fn parse_iter_args(cmd: &Command) -> Result<IterArgs, CommandError> {
    let mut rargs = IterArgs::default();
    let mut i = 1;
    match cmd.name().as_str() {
        "keys" => {
            if cmd.args.len() < 2 {
                return Err(CommandError::WrongNumberOfArguments);
            }
            rargs.keys_kind = true;
            rargs.pattern = cmd.args[1].clone();
            i = 2;
        }
        "iter" | "iterate" => {
            if cmd.args.len() < 2 {
                return Err(CommandError::WrongNumberOfArguments);
            }
            rargs.index = cmd.arg_str(1);
            i = 2;
        }
        _ => return Err(CommandError::Syntax),
    }
    while i < cmd.args.len() {
        match cmd.arg_lower(i).as_str() {
            "withvalues" => {
                if !rargs.keys_kind {
                    return Err(CommandError::Syntax);
                }
                rargs.with_values = true;
            }
            "range" => {
                if rargs.keys_kind {
                    return Err(CommandError::Syntax);
                }
                i += 1;
                if i >= cmd.args.len() {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                let tok = cmd.args[i].clone();
                let (min_kind, min) = if !tok.is_empty() && (tok[0] == b'[' || tok[0] == b'(') {
                    (tok[0], tok[1..].to_vec())
                } else if tok == b"-inf" || tok == b"+inf" {
                    (tok[0], Vec::new())
                } else {
                    (b'[', tok)
                };
                i += 1;
                if i >= cmd.args.len() {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                let tok = cmd.args[i].clone();
                let (max_kind, max) = if !tok.is_empty()
                    && (tok[tok.len() - 1] == b']' || tok[tok.len() - 1] == b')')
                {
                    (tok[tok.len() - 1], tok[..tok.len() - 1].to_vec())
                } else if tok == b"-inf" || tok == b"+inf" {
                    (tok[0], Vec::new())
                } else {
                    (b']', tok)
                };
                rargs.range = Some(RangeArgs { min_kind, min, max_kind, max });
            }
            "desc" => rargs.desc = true,
            "asc" => rargs.desc = false,
            "pivot" => {
                i += 1;
                if i >= cmd.args.len() {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                rargs.pivot = Some(cmd.args[i].clone());
            }
            "match" => {
                if rargs.keys_kind {
                    return Err(CommandError::Syntax);
                }
                i += 1;
                if i >= cmd.args.len() {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                rargs.match_pattern = Some(cmd.args[i].clone());
            }
            "limit" => {
                i += 1;
                if i >= cmd.args.len() {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                rargs.limit = Some(parse_uint(&cmd.args[i])? as usize);
            }
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }
    Ok(rargs)
}

/// ITER over a named index. The pivot is intersected with the range
/// toward the tighter bound; a user-supplied pivot is exclusive (the
/// cursor resumes after it), a range-derived one is inclusive.
fn iterate_index(rargs: &IterArgs, tx: &Tx) -> Result<Vec<Vec<u8>>, CommandError> {
    let order: IndexOrder = match tx.index_order(&rargs.index) {
        Ok(Some(order)) => order,
        Ok(None) => return Ok(Vec::new()),
        Err(StoreError::NotFound) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut pivot = rargs.pivot.clone();
    let mut pivot_excludes_equal = pivot.is_some();
    if let Some(range) = &rargs.range {
        if rargs.desc {
            if range.max_kind != b'+' {
                match &pivot {
                    Some(p) if order.less(&range.max, p) => {
                        pivot = Some(range.max.clone());
                        pivot_excludes_equal = false;
                    }
                    Some(_) => {}
                    None => pivot = Some(range.max.clone()),
                }
            }
        } else if range.min_kind != b'-' {
            match &pivot {
                Some(p) if order.less(p, &range.min) => {
                    pivot = Some(range.min.clone());
                    pivot_excludes_equal = false;
                }
                Some(_) => {}
                None => pivot = Some(range.min.clone()),
            }
        }
    }

    let iter = match (&pivot, rargs.desc) {
        (Some(p), true) => tx.descend_from(&rargs.index, p),
        (Some(p), false) => tx.ascend_from(&rargs.index, p),
        (None, true) => tx.descend(&rargs.index),
        (None, false) => tx.ascend(&rargs.index),
    };
    let iter = match iter {
        Ok(iter) => iter,
        Err(StoreError::NotFound) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut results: Vec<Vec<u8>> = Vec::new();
    for (key, val) in iter {
        if is_meta_key(key) {
            continue;
        }
        if let Some(limit) = rargs.limit {
            if results.len() >= limit * 2 {
                break;
            }
        }
        if let Some(p) = &pivot {
            let cmp = order.cmp_values(val, p);
            let skip = if rargs.desc {
                if pivot_excludes_equal { cmp != Ordering::Less } else { cmp == Ordering::Greater }
            } else if pivot_excludes_equal {
                cmp != Ordering::Greater
            } else {
                cmp == Ordering::Less
            };
            if skip {
                continue;
            }
        }
        if let Some(range) = &rargs.range {
            if !rargs.desc {
                // stop once past the maximum
                match range.max_kind {
                    b'+' => {}
                    b')' => {
                        if order.cmp_values(val, &range.max) != Ordering::Less {
                            break;
                        }
                    }
                    _ => {
                        if order.cmp_values(val, &range.max) == Ordering::Greater {
                            break;
                        }
                    }
                }
                if range.min_kind == b'(' && order.cmp_values(val, &range.min) != Ordering::Greater
                {
                    continue;
                }
            } else {
                match range.min_kind {
                    b'-' => {}
                    b'(' => {
                        if order.cmp_values(val, &range.min) != Ordering::Greater {
                            break;
                        }
                    }
                    _ => {
                        if order.cmp_values(val, &range.min) == Ordering::Less {
                            break;
                        }
                    }
                }
                if range.max_kind == b')' && order.cmp_values(val, &range.max) != Ordering::Less {
                    continue;
                }
            }
        }
        if let Some(pat) = &rargs.match_pattern {
            if !glob::matches(key, pat) {
                continue;
            }
        }
        results.push(key.to_vec());
        results.push(val.to_vec());
    }
    Ok(results)
}

/// KEYS over the primary key order: glob-match on the key, optional
/// pivot, optional values.
fn iterate_keys(rargs: &IterArgs, tx: &Tx) -> Result<Vec<Vec<u8>>, CommandError> {
    if rargs.pattern.is_empty() {
        return Ok(Vec::new());
    }
    let limit = rargs.limit.map(|l| if rargs.with_values { l * 2 } else { l });
    let unbounded = rargs.pattern[0] == b'*';
    let (mut min, mut max) = (None, None);
    let mut pivot_skip: Option<Vec<u8>> = None;

    if !unbounded {
        let (amin, amax) = glob::allowable(&rargs.pattern);
        min = amin;
        max = amax;
        if let Some(p) = &rargs.pivot {
            if rargs.desc {
                if min.as_deref().is_some_and(|m| m > p.as_slice()) {
                    return Ok(Vec::new());
                }
                max = Some(p.clone());
            } else {
                if max.as_deref().is_some_and(|m| m < p.as_slice()) {
                    return Ok(Vec::new());
                }
                min = Some(p.clone());
            }
        }
    } else if let Some(p) = &rargs.pivot {
        // an unbounded pattern resumes strictly after the pivot
        if rargs.desc {
            max = Some(p.clone());
        } else {
            min = Some(p.clone());
        }
        pivot_skip = Some(p.clone());
    }

    let iter = if rargs.desc {
        match &max {
            Some(m) => tx.descend_from("", m)?,
            None => tx.descend("")?,
        }
    } else {
        match &min {
            Some(m) => tx.ascend_from("", m)?,
            None => tx.ascend("")?,
        }
    };

    let mut results: Vec<Vec<u8>> = Vec::new();
    for (key, val) in iter {
        if is_meta_key(key) {
            continue;
        }
        if let Some(limit) = limit {
            if results.len() >= limit {
                break;
            }
        }
        if !unbounded {
            if rargs.desc {
                if min.as_deref().is_some_and(|m| key < m) {
                    break;
                }
            } else if max.as_deref().is_some_and(|m| key > m) {
                break;
            }
        } else if let Some(p) = &pivot_skip {
            let past = if rargs.desc { key >= p.as_slice() } else { key <= p.as_slice() };
            if past {
                continue;
            }
        }
        if glob::matches(key, &rargs.pattern) {
            results.push(key.to_vec());
            if rargs.with_values {
                results.push(val.to_vec());
            }
        }
    }
    Ok(results)
}

impl Machine {
    pub(super) fn do_iter(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        let rargs = parse_iter_args(cmd)?;
        self.read_apply(a, conn, cmd, tx, move |tx| {
            let results = if rargs.keys_kind {
                iterate_keys(&rargs, tx)?
            } else {
                iterate_index(&rargs, tx)?
            };
            Ok(Reply::Array(results.into_iter().map(Reply::Bulk).collect()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::Command;

    #[test]
    fn test_parse_keys_args() {
        let cmd = Command::from_strs(&["KEYS", "user:*", "LIMIT", "10", "DESC", "WITHVALUES"]);
        let rargs = parse_iter_args(&cmd).unwrap();
        assert!(rargs.keys_kind);
        assert_eq!(rargs.pattern, b"user:*");
        assert_eq!(rargs.limit, Some(10));
        assert!(rargs.desc);
        assert!(rargs.with_values);
    }

    #[test]
    fn test_parse_iter_range() {
        let cmd = Command::from_strs(&["ITER", "idx", "RANGE", "(3", "10)"]);
        let rargs = parse_iter_args(&cmd).unwrap();
        let range = rargs.range.unwrap();
        assert_eq!(range.min_kind, b'(');
        assert_eq!(range.min, b"3");
        assert_eq!(range.max_kind, b')');
        assert_eq!(range.max, b"10");
    }

    #[test]
    fn test_parse_iter_inf_range() {
        let cmd = Command::from_strs(&["ITER", "idx", "RANGE", "-inf", "+inf"]);
        let rargs = parse_iter_args(&cmd).unwrap();
        let range = rargs.range.unwrap();
        assert_eq!(range.min_kind, b'-');
        assert_eq!(range.max_kind, b'+');
    }

    #[test]
    fn test_parse_rejects_misplaced_tokens() {
        // WITHVALUES is KEYS-only, RANGE and MATCH are ITER-only
        assert!(parse_iter_args(&Command::from_strs(&["ITER", "idx", "WITHVALUES"])).is_err());
        assert!(parse_iter_args(&Command::from_strs(&["KEYS", "*", "RANGE", "1", "2"])).is_err());
        assert!(parse_iter_args(&Command::from_strs(&["KEYS", "*", "MATCH", "x"])).is_err());
        assert!(parse_iter_args(&Command::from_strs(&["KEYS", "*", "BOGUS"])).is_err());
    }
}
