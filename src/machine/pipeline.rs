//! Pipeline coalescing.
//!
//! When a connection has more commands already buffered, a burst of
//! plain `GET key` commands merges into one `PLGET key...` and a burst of
//! plain `SET key value` commands into one `PLSET key value...`. The
//! replicated log then carries one composite entry for the whole burst,
//! while the client still receives one reply per original command.
//! Coalescing stops at the first command that does not match the shape.

use super::ConnContext;
use crate::core::error::CommandError;
use crate::resp::{Command, Reply};

/// Attempt to merge `cmd` with the connection's buffered commands.
/// Returns the number of commands folded in (0 when untouched) and the
/// command to dispatch.
pub(super) fn coalesce(
    conn: Option<&mut ConnContext>,
    cmd: &Command,
) -> Result<(usize, Command), CommandError> {
    let Some(ctx) = conn else {
        return Ok((0, cmd.clone()));
    };
    if ctx.queue.is_empty() {
        return Ok((0, cmd.clone()));
    }
    let name = cmd.name();
    let (shape_len, merged_name) = match name.as_str() {
        // the composite forms are internal once a pipeline is active
        "plget" | "plset" => return Err(CommandError::UnknownCommand(name)),
        "get" => (2, "plget"),
        "set" => (3, "plset"),
        _ => return Ok((0, cmd.clone())),
    };
    if cmd.args.len() != shape_len {
        return Ok((0, cmd.clone()));
    }

    let mut matching = 0;
    for queued in &ctx.queue {
        if queued.name() != name || queued.args.len() != shape_len {
            break;
        }
        matching += 1;
    }
    if matching == 0 {
        return Ok((0, cmd.clone()));
    }

    let mut args: Vec<Vec<u8>> = Vec::with_capacity(1 + (matching + 1) * (shape_len - 1));
    args.push(merged_name.as_bytes().to_vec());
    args.extend(cmd.args[1..].iter().cloned());
    for queued in ctx.queue.drain(..matching) {
        args.extend(queued.args.into_iter().skip(1));
    }
    Ok((matching + 1, Command::new(args)))
}

/// After a failed coalesced dispatch, every folded command still needs an
/// error reply: the dispatcher's caller writes one, this fans out the
/// rest. On success, the single array reply the batch produced is
/// flattened back into one reply per original command.
pub(super) fn fan_out_error(
    conn: Option<&mut ConnContext>,
    batched: usize,
    res: Result<Option<Reply>, CommandError>,
) -> Result<Option<Reply>, CommandError> {
    let Some(ctx) = conn else {
        return res;
    };
    match res {
        Ok(value) => {
            if let Some(Reply::Array(elems)) = ctx.out.pop() {
                ctx.out.extend(elems);
            }
            Ok(value)
        }
        Err(err) => {
            for _ in 1..batched.max(1) {
                ctx.out.push(Reply::Error(err.to_string()));
            }
            Err(err)
        }
    }
}
