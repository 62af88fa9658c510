//! The command dispatcher.
//!
//! A parsed command enters [`Machine::command`] together with the caller's
//! connection context and applier. Three dispatch layers apply:
//!
//! 1. top level: every public command plus MULTI/EXEC/DISCARD, the
//!    pipeline-merged pseudo-commands, and MASSINSERT;
//! 2. transactable: commands legal inside a MULTI queue (adds SCRIPT and
//!    the EVAL family);
//! 3. scriptable: commands callable from inside a script (everything
//!    transactable minus the control commands).
//!
//! Handlers validate arity, then argument types, then semantic
//! preconditions, before touching the store through the applier's
//! mutate/respond split.

mod indexes;
mod iter;
mod json;
mod keys;
mod multi;
mod pipeline;
mod script;
mod server;
mod spatial;
mod strings;

use crate::core::error::CommandError;
use crate::raft::{Applier, Mutate, PassiveApplier, Respond, StateMachine};
use crate::resp::{Command, Reply};
use crate::script::{Engine, ScriptRegistry};
use crate::store::{is_meta_key, Store, Tx};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

pub use multi::MultiState;

/// Per-connection transient state, owned by the connection driver and
/// passed explicitly into the dispatcher.
#[derive(Default)]
pub struct ConnContext {
    /// Open MULTI queue, when the connection is inside a transaction.
    pub multi: Option<MultiState>,

    /// Commands already buffered on the connection and not yet
    /// dispatched; the pipeline coalescer inspects and drains this.
    pub queue: VecDeque<Command>,

    /// Replies awaiting encoding onto the socket.
    pub out: Vec<Reply>,

    /// Set by QUIT; the driver closes the connection after flushing.
    pub quit: bool,
}

impl ConnContext {
    /// A context for collecting replies from nested dispatch (scripts,
    /// batch replay). Never carries a MULTI queue.
    pub fn passive() -> Self {
        Self::default()
    }
}

/// The state machine behind the replicated log: dispatcher plus store
/// plus script registry.
pub struct Machine {
    store: Arc<Store>,
    scripts: ScriptRegistry,
}

impl Machine {
    pub fn new(store: Arc<Store>, engine: Arc<dyn Engine>) -> Arc<Self> {
        Arc::new(Self { store, scripts: ScriptRegistry::new(engine) })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Dispatch one command. Replies are pushed onto `conn.out`; errors
    /// are returned for the driver to encode. The returned value is the
    /// command's mutate result, used when applying log entries.
    pub fn command(
        &self,
        a: &dyn Applier,
        mut conn: Option<&mut ConnContext>,
        cmd: &Command,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.is_empty() {
            return Err(CommandError::err("empty command"));
        }

        if let Some(ctx) = conn.as_deref_mut() {
            if ctx.multi.is_some() {
                // only EXEC, DISCARD, and transactable commands are legal here
                return match cmd.name().as_str() {
                    "multi" => Err(CommandError::MultiNested),
                    "exec" => self.do_exec(a, ctx, cmd),
                    "discard" => self.do_discard(ctx, cmd),
                    _ => {
                        let res = self.do_transactable(a, Some(&mut *ctx), cmd, None);
                        if res.is_err() {
                            if let Some(multi) = &mut ctx.multi {
                                multi.errs = true;
                            }
                        }
                        res
                    }
                };
            }
        }

        // merge a burst of homogeneous GETs or SETs into one logged entry
        let (batched, cmd) = pipeline::coalesce(conn.as_deref_mut(), cmd)?;

        match cmd.name().as_str() {
            "plget" => {
                let res = self.do_mget(a, conn.as_deref_mut(), &cmd, None);
                pipeline::fan_out_error(conn, batched, res)
            }
            "plset" => {
                let res = self.do_mset(a, conn.as_deref_mut(), &cmd, None);
                pipeline::fan_out_error(conn, batched, res)
            }
            "plwmulti" | "plrmulti" => self.do_plmulti(a, conn, &cmd, None),
            "massinsert" => self.do_massinsert(a, conn, &cmd, None),
            "multi" => self.do_multi(conn, &cmd),
            "exec" => Err(CommandError::ExecWithoutMulti),
            "discard" => Err(CommandError::DiscardWithoutMulti),
            _ => self.do_transactable(a, conn, &cmd, None),
        }
    }

    /// Commands that may be queued under MULTI.
    fn do_transactable(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        match cmd.name().as_str() {
            "eval" | "evalro" | "evalsha" | "evalsharo" => self.do_eval(a, conn, cmd, tx),
            "script" => self.do_script(a, conn, cmd, tx),
            _ => self.do_scriptable(a, conn, cmd, tx),
        }
    }

    /// Commands callable from inside a script. Control commands are not
    /// reachable here; a script naming one gets *unknown command*, which
    /// the script bridge rewrites to *command not allowed from script*.
    pub(crate) fn do_scriptable(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        match cmd.name().as_str() {
            "get" | "dump" => self.do_get(a, conn, cmd, tx),
            "set" | "setex" | "psetex" | "setnx" => self.do_set(a, conn, cmd, tx),
            "mset" => self.do_mset(a, conn, cmd, tx),
            "mget" => self.do_mget(a, conn, cmd, tx),
            "msetnx" => self.do_msetnx(a, conn, cmd, tx),
            "strlen" => self.do_strlen(a, conn, cmd, tx),
            "append" => self.do_append(a, conn, cmd, tx),
            "getset" => self.do_getset(a, conn, cmd, tx),
            "getrange" => self.do_getrange(a, conn, cmd, tx),
            "setrange" => self.do_setrange(a, conn, cmd, tx),
            "incr" | "decr" | "incrby" | "decrby" => self.do_incr(a, conn, cmd, tx),
            "incrbyfloat" => self.do_incrbyfloat(a, conn, cmd, tx),
            "bitcount" => self.do_bitcount(a, conn, cmd, tx),
            "bitop" => self.do_bitop(a, conn, cmd, tx),
            "getbit" => self.do_getbit(a, conn, cmd, tx),
            "setbit" => self.do_setbit(a, conn, cmd, tx),
            "bitpos" => self.do_bitpos(a, conn, cmd, tx),
            "type" => self.do_type(a, conn, cmd, tx),
            "exists" => self.do_exists(a, conn, cmd, tx),
            "del" => self.do_del(a, conn, cmd, tx),
            "pdel" => self.do_pdel(a, conn, cmd, tx),
            "rename" | "renamenx" => self.do_rename(a, conn, cmd, tx),
            "restore" => self.do_restore(a, conn, cmd, tx),
            "ttl" | "pttl" => self.do_ttl(a, conn, cmd, tx),
            "expire" | "pexpire" | "expireat" | "pexpireat" => {
                self.do_expire(a, conn, cmd, tx)
            }
            "persist" => self.do_persist(a, conn, cmd, tx),
            "keys" | "iter" => self.do_iter(a, conn, cmd, tx),
            "dbsize" => self.do_dbsize(a, conn, cmd, tx),
            "flushdb" | "flushall" => self.do_flushdb(a, conn, cmd, tx),
            "jget" => self.do_jget(a, conn, cmd, tx),
            "jset" => self.do_jset(a, conn, cmd, tx),
            "jdel" => self.do_jdel(a, conn, cmd, tx),
            "setindex" => self.do_setindex(a, conn, cmd, tx),
            "delindex" => self.do_delindex(a, conn, cmd, tx),
            "indexes" => self.do_indexes(a, conn, cmd, tx),
            "rect" | "intersects" | "within" => self.do_rect_search(a, conn, cmd, tx),
            "time" => self.do_time(a, conn, cmd, tx),
            "fence" => self.do_fence(a, conn, cmd, tx),
            name => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    /// Leader-side reaction to expired keys: drive the deletions through
    /// the log as an ordinary DEL so every replica removes them on the
    /// committed path. Followers receive a redirect and ignore it.
    pub fn delete_expired(&self, a: &dyn Applier, keys: Vec<Vec<u8>>) {
        if keys.is_empty() {
            return;
        }
        debug!(count = keys.len(), "submitting expired keys for deletion");
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push(b"del".to_vec());
        args.extend(keys);
        let cmd = Command::new(args);
        match self.command(a, None, &cmd) {
            Ok(_) => {}
            Err(CommandError::TryLeader(_)) | Err(CommandError::LeaderUnknown) => {
                // not the leader; the leader's own submission will reach
                // this replica through the log
            }
            Err(err) => debug!(%err, "expired-key deletion failed"),
        }
    }

    /// Guard a user-supplied key argument against the reserved namespace.
    fn check_user_key(&self, key: &[u8]) -> Result<(), CommandError> {
        if is_meta_key(key) {
            Err(CommandError::KeyNotAllowed)
        } else {
            Ok(())
        }
    }

    /// Run a write command through the applier, or queue it under MULTI.
    fn write_apply(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
        wr: impl FnOnce(&mut Tx) -> Result<Reply, CommandError>,
    ) -> Result<Option<Reply>, CommandError> {
        if let Some(ctx) = conn {
            if let Some(multi) = &mut ctx.multi {
                multi.cmds.push(cmd.clone());
                multi.writable = true;
                ctx.out.push(Reply::queued());
                return Ok(None);
            }
            if let Some(tx) = tx {
                let value = wr(tx)?;
                ctx.out.push(value.clone());
                return Ok(Some(value));
            }
            let store = Arc::clone(&self.store);
            let mutate: Mutate = Box::new(move || store.update(|tx| wr(tx)));
            let out = &mut ctx.out;
            let respond: Respond = Box::new(move |value| {
                out.push(value);
                Ok(())
            });
            return a.apply(cmd, Some(mutate), Some(respond));
        }
        if let Some(tx) = tx {
            return Ok(Some(wr(tx)?));
        }
        let store = Arc::clone(&self.store);
        let mutate: Mutate = Box::new(move || store.update(|tx| wr(tx)));
        a.apply(cmd, Some(mutate), None)
    }

    /// Run a read command behind the consistency gate, or queue it under
    /// MULTI.
    fn read_apply(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
        rd: impl FnOnce(&mut Tx) -> Result<Reply, CommandError>,
    ) -> Result<Option<Reply>, CommandError> {
        if let Some(ctx) = conn {
            if let Some(multi) = &mut ctx.multi {
                multi.cmds.push(cmd.clone());
                ctx.out.push(Reply::queued());
                return Ok(None);
            }
            if let Some(tx) = tx {
                let value = rd(tx)?;
                ctx.out.push(value.clone());
                return Ok(Some(value));
            }
            let store = Arc::clone(&self.store);
            let out = &mut ctx.out;
            let mut result = None;
            let result_slot = &mut result;
            let respond: Respond = Box::new(move |_| {
                let value = store.view(|tx| rd(tx))?;
                out.push(value.clone());
                *result_slot = Some(value);
                Ok(())
            });
            a.apply(cmd, None, Some(respond))?;
            return Ok(result);
        }
        if let Some(tx) = tx {
            return Ok(Some(rd(tx)?));
        }
        let value = self.store.view(|tx| rd(tx))?;
        Ok(Some(value))
    }

    /// Replay one command inside an existing transaction, collecting its
    /// reply. Used by EXEC batches and script callbacks; errors become
    /// error replies rather than aborting the batch.
    pub(crate) fn replay_in_tx(&self, cmd: &Command, tx: &mut Tx) -> Reply {
        let mut passive = ConnContext::passive();
        match self.do_transactable(&PassiveApplier, Some(&mut passive), cmd, Some(tx)) {
            Ok(_) => passive.out.pop().unwrap_or(Reply::Null),
            Err(err) => Reply::from(err),
        }
    }
}

impl StateMachine for Machine {
    fn apply(&self, cmd: &Command) -> Result<Reply, CommandError> {
        self.command(&PassiveApplier, None, cmd)
            .map(|v| v.unwrap_or(Reply::Null))
    }

    fn snapshot(&self, w: &mut dyn std::io::Write) -> Result<(), CommandError> {
        self.store.snapshot(w).map_err(CommandError::from)
    }

    fn restore(&self, r: &mut dyn std::io::Read) -> Result<(), CommandError> {
        let restored = Store::restore(r)?;
        self.store.replace_from(restored);
        self.scripts.clear_cache();
        Ok(())
    }
}
