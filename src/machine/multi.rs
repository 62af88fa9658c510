//! MULTI/EXEC/DISCARD and the composite batch commands they compile to.
//!
//! MULTI opens a queue on the connection. Queued commands validate their
//! arguments and reply `QUEUED`; EXEC re-encodes the queue as a single
//! `plwmulti` (any write queued) or `plrmulti` (read-only) entry whose
//! arguments are the raw encodings of the queued commands, so the
//! replicated log carries one entry per transaction. On apply, the batch
//! replays under one store transaction through a passive reply sink.

use super::{ConnContext, Machine};
use crate::core::error::CommandError;
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::Tx;

/// An open MULTI queue.
#[derive(Debug, Default)]
pub struct MultiState {
    pub cmds: Vec<Command>,
    /// OR-accumulated over queued commands.
    pub writable: bool,
    /// Latched when a queued command fails validation; EXEC then aborts.
    pub errs: bool,
}

impl Machine {
    pub(super) fn do_multi(
        &self,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let ctx = conn.ok_or_else(|| CommandError::err("missing connection"))?;
        ctx.multi = Some(MultiState::default());
        ctx.out.push(Reply::ok());
        Ok(None)
    }

    pub(super) fn do_exec(
        &self,
        a: &dyn Applier,
        ctx: &mut ConnContext,
        cmd: &Command,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let multi = ctx.multi.take().ok_or(CommandError::ExecWithoutMulti)?;
        if multi.errs {
            return Err(CommandError::ExecAbort);
        }
        if multi.cmds.is_empty() {
            ctx.out.push(Reply::Array(Vec::new()));
            return Ok(None);
        }
        let mut args: Vec<Vec<u8>> = Vec::with_capacity(multi.cmds.len() + 1);
        args.push(if multi.writable { b"plwmulti".to_vec() } else { b"plrmulti".to_vec() });
        for queued in &multi.cmds {
            args.push(queued.encode());
        }
        let batch = Command::new(args);
        self.do_plmulti(a, Some(ctx), &batch, None)
    }

    pub(super) fn do_discard(
        &self,
        ctx: &mut ConnContext,
        cmd: &Command,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        ctx.multi = None;
        ctx.out.push(Reply::ok());
        Ok(None)
    }

    /// Replay a batch of embedded commands under one transaction. Each
    /// command contributes exactly one reply; individual command errors
    /// become error replies without discarding the batch.
    pub(super) fn do_plmulti(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let writable = cmd.name() == "plwmulti";
        let cmds: Vec<Command> = cmd.args[1..]
            .iter()
            .map(|raw| Command::decode(raw))
            .collect::<Result<_, _>>()?;

        let replay = move |machine: &Machine, tx: &mut Tx| -> Result<Reply, CommandError> {
            let replies: Vec<Reply> =
                cmds.iter().map(|c| machine.replay_in_tx(c, tx)).collect();
            Ok(Reply::Array(replies))
        };

        if writable {
            self.write_apply(a, conn, cmd, tx, move |tx| replay(self, tx))
        } else {
            self.read_apply(a, conn, cmd, tx, move |tx| replay(self, tx))
        }
    }
}
