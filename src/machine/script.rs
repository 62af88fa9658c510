//! SCRIPT LOAD/FLUSH and the EVAL family.
//!
//! Sources persist under `script:<sha>` meta keys and ride the log like
//! any other write, so every replica serves the same scripts. A script
//! executes against the invocation's transaction; its command callback
//! re-enters the scriptable dispatch layer through a passive reply sink.

use super::{ConnContext, Machine};
use crate::core::error::CommandError;
use crate::raft::{Applier, PassiveApplier};
use crate::resp::{Command, Reply};
use crate::script::{sha1_hex, CallContext, ScriptValue};
use crate::store::{is_meta_key, Tx, META_PREFIX};

pub(crate) fn script_meta_key(sha: &str) -> Vec<u8> {
    format!("{META_PREFIX}script:{sha}").into_bytes()
}

/// Control commands are unreachable from scripts.
fn script_disallowed(name: &str) -> bool {
    matches!(
        name,
        "multi" | "exec" | "discard" | "eval" | "evalro" | "evalsha" | "evalsharo" | "script"
    )
}

/// Translate a script's return value into a wire reply.
fn value_to_reply(value: ScriptValue) -> Reply {
    match value {
        ScriptValue::Null => Reply::Null,
        ScriptValue::Status(s) => Reply::Simple(s),
        ScriptValue::Error(e) => Reply::Error(e),
        ScriptValue::Str(s) => Reply::bulk(s),
        ScriptValue::Num(n) => Reply::Int(n as i64),
        ScriptValue::Array(items) => {
            Reply::Array(items.into_iter().map(value_to_reply).collect())
        }
        ScriptValue::Json(v) => Reply::bulk(v.to_string()),
    }
}

/// Translate a command reply into the script value handed back to the
/// engine.
fn reply_to_value(reply: Reply) -> ScriptValue {
    match reply {
        Reply::Null => ScriptValue::Null,
        Reply::Simple(s) => ScriptValue::Status(s),
        Reply::Error(e) => ScriptValue::Error(e),
        Reply::Int(n) => ScriptValue::Num(n as f64),
        Reply::Bulk(b) => ScriptValue::Str(String::from_utf8_lossy(&b).into_owned()),
        Reply::Array(items) => {
            ScriptValue::Array(items.into_iter().map(reply_to_value).collect())
        }
    }
}

/// The per-invocation callback: dispatches scriptable commands against
/// the running transaction.
struct InvocationCalls<'m, 't, 's> {
    machine: &'m Machine,
    tx: &'t mut Tx<'s>,
}

impl CallContext for InvocationCalls<'_, '_, '_> {
    fn call(&mut self, args: Vec<Vec<u8>>) -> Result<ScriptValue, String> {
        let cmd = Command::new(args);
        if cmd.args.is_empty() {
            return Err("ERR empty command".to_string());
        }
        let mut passive = ConnContext::passive();
        match self.machine.do_scriptable(
            &PassiveApplier,
            Some(&mut passive),
            &cmd,
            Some(&mut *self.tx),
        ) {
            Ok(_) => Ok(reply_to_value(passive.out.pop().unwrap_or(Reply::Null))),
            Err(CommandError::UnknownCommand(name)) if script_disallowed(&name) => {
                Err(CommandError::ScriptDisallowed(name).to_string())
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

impl Machine {
    pub(super) fn do_script(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let res = match cmd.arg_lower(1).as_str() {
            "load" => self.do_script_load(a, conn, cmd, tx),
            "flush" => self.do_script_flush(a, conn, cmd, tx),
            _ => Err(CommandError::WrongNumberOfArguments),
        };
        res.map_err(|err| match err {
            CommandError::WrongNumberOfArguments => {
                CommandError::Other("ERR Unknown SCRIPT subcommand or wrong # of args.".into())
            }
            other => other,
        })
    }

    fn do_script_load(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 3 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let source_bytes = cmd.args[2].clone();
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let source = String::from_utf8_lossy(&source_bytes).into_owned();
            self.scripts
                .engine()
                .compile(&source)
                .map_err(|e| CommandError::err(format!("Error compiling script {e}")))?;
            let sha = sha1_hex(&source_bytes);
            tx.set(&script_meta_key(&sha), source_bytes.clone(), None)?;
            self.scripts.insert(&sha, source);
            Ok(Reply::bulk(sha))
        })
    }

    fn do_script_flush(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let prefix = script_meta_key("");
            let keys: Vec<Vec<u8>> = tx
                .ascend_from("", &prefix)?
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.to_vec())
                .collect();
            for key in keys {
                tx.delete(&key)?;
            }
            self.scripts.clear_cache();
            Ok(Reply::ok())
        })
    }

    pub(super) fn do_eval(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() < 3 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let (writable, by_sha) = match cmd.name().as_str() {
            "eval" => (true, false),
            "evalro" => (false, false),
            "evalsha" => (true, true),
            "evalsharo" => (false, true),
            name => return Err(CommandError::UnknownCommand(name.to_string())),
        };

        let numkeys = super::strings::parse_uint(&cmd.args[2])? as usize;
        if numkeys > cmd.args.len() - 3 {
            return Err(CommandError::err(
                "Number of keys can't be greater than number of args",
            ));
        }
        let keys: Vec<String> = cmd.args[3..3 + numkeys].iter().map(|k| {
            String::from_utf8_lossy(k).into_owned()
        }).collect();
        for key in &keys {
            if is_meta_key(key.as_bytes()) {
                return Err(CommandError::KeyNotAllowed);
            }
        }
        let argv: Vec<String> = cmd.args[3 + numkeys..]
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect();
        let script_arg = cmd.args[1].clone();

        let run = move |machine: &Machine, tx: &mut Tx| -> Result<Reply, CommandError> {
            let (sha, source) = if by_sha {
                let sha = String::from_utf8_lossy(&script_arg).into_owned();
                let source = match machine.scripts.get(&sha) {
                    Some(cached) => cached.source.clone(),
                    None => {
                        let stored = tx
                            .get(&script_meta_key(&sha))
                            .ok_or(CommandError::NoScript)?;
                        String::from_utf8_lossy(stored).into_owned()
                    }
                };
                (sha, source)
            } else {
                (
                    sha1_hex(&script_arg),
                    String::from_utf8_lossy(&script_arg).into_owned(),
                )
            };
            let cached = match machine.scripts.get(&sha) {
                Some(cached) => cached,
                None => machine.scripts.insert(&sha, source),
            };
            // one invocation at a time per compiled script
            let _running = cached.lock.lock();
            let mut calls = InvocationCalls { machine, tx };
            match machine
                .scripts
                .engine()
                .eval(&cached.source, &keys, &argv, &mut calls)
            {
                Ok(value) => Ok(value_to_reply(value)),
                Err(err) => Err(CommandError::Other(err.message)),
            }
        };

        if writable {
            self.write_apply(a, conn, cmd, tx, move |tx| run(self, tx))
        } else {
            self.read_apply(a, conn, cmd, tx, move |tx| run(self, tx))
        }
    }
}
