//! Spatial search commands: RECT/INTERSECTS (overlap) and WITHIN
//! (containment) over a named R-tree index.

use super::strings::parse_uint;
use super::{ConnContext, Machine};
use crate::core::error::{CommandError, StoreError};
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::{glob, is_meta_key, Rect, Tx};

#[derive(Debug)]
struct RectSearchArgs {
    index: String,
    bounds: String,
    within: bool,
    match_pattern: Option<Vec<u8>>,
    limit: Option<usize>,
    skip: Option<usize>,
}

fn parse_rect_search_args(cmd: &Command) -> Result<RectSearchArgs, CommandError> {
    let within = match cmd.name().as_str() {
        "within" => true,
        "rect" | "intersects" => false,
        _ => return Err(CommandError::Syntax),
    };
    if cmd.args.len() < 3 {
        return Err(CommandError::WrongNumberOfArguments);
    }
    let mut rargs = RectSearchArgs {
        index: cmd.arg_str(1),
        bounds: cmd.arg_str(2),
        within,
        match_pattern: None,
        limit: None,
        skip: None,
    };
    let mut i = 3;
    while i < cmd.args.len() {
        match cmd.arg_lower(i).as_str() {
            "match" => {
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
            "skip" => {
                i += 1;
                if i >= cmd.args.len() {
                    return Err(CommandError::WrongNumberOfArguments);
                }
                rargs.skip = Some(parse_uint(&cmd.args[i])? as usize);
            }
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }
    Ok(rargs)
}

impl Machine {
    pub(super) fn do_rect_search(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        let rargs = parse_rect_search_args(cmd)?;
        self.read_apply(a, conn, cmd, tx, move |tx| {
            // unparseable bounds search as the unbounded rectangle
            let query =
                Rect::parse(&rargs.bounds).unwrap_or_else(|| Rect::new(Vec::new(), Vec::new()));
            let hits = match if rargs.within {
                tx.within(&rargs.index, &query)
            } else {
                tx.intersects(&rargs.index, &query)
            } {
                Ok(hits) => hits,
                Err(StoreError::NotFound) => Vec::new(),
                Err(err) => return Err(err.into()),
            };
            let mut results: Vec<Reply> = Vec::new();
            let mut skipped = 0usize;
            for (key, val) in hits {
                if is_meta_key(key) {
                    continue;
                }
                if let Some(limit) = rargs.limit {
                    if results.len() >= limit * 2 {
                        break;
                    }
                }
                if let Some(pat) = &rargs.match_pattern {
                    if !glob::matches(key, pat) {
                        continue;
                    }
                }
                if let Some(skip) = rargs.skip {
                    if skipped < skip {
                        skipped += 1;
                        continue;
                    }
                }
                results.push(Reply::bulk(key));
                results.push(Reply::bulk(val));
            }
            Ok(Reply::Array(results))
        })
    }
}
