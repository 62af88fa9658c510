//! Server commands: TIME and the FENCE token counter.

use super::strings::parse_uint;
use super::{ConnContext, Machine};
use crate::core::error::CommandError;
use crate::core::time::now_secs_micros;
use crate::raft::Applier;
use crate::resp::{Command, Reply};
use crate::store::{Tx, META_PREFIX};

pub(crate) fn fence_meta_key(token: &str) -> Vec<u8> {
    format!("{META_PREFIX}fence:{token}").into_bytes()
}

impl Machine {
    pub(super) fn do_time(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 1 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        self.read_apply(a, conn, cmd, tx, move |_tx| {
            let (secs, micros) = now_secs_micros();
            Ok(Reply::Array(vec![
                Reply::bulk(secs.to_string()),
                Reply::bulk(micros.to_string()),
            ]))
        })
    }

    /// FENCE token: increment the named cluster-wide counter and return
    /// its new value. The counter is a meta key, so it rides the log and
    /// is monotonic across leader changes.
    pub(super) fn do_fence(
        &self,
        a: &dyn Applier,
        conn: Option<&mut ConnContext>,
        cmd: &Command,
        tx: Option<&mut Tx>,
    ) -> Result<Option<Reply>, CommandError> {
        if cmd.args.len() != 2 {
            return Err(CommandError::WrongNumberOfArguments);
        }
        let key = fence_meta_key(&cmd.arg_str(1));
        self.write_apply(a, conn, cmd, tx, move |tx| {
            let current = match tx.get(&key) {
                Some(val) => parse_uint(val)?,
                None => 0,
            };
            let next = (current + 1).to_string();
            tx.set(&key, next.clone().into_bytes(), None)?;
            Ok(Reply::bulk(next))
        })
    }
}
