//! The replicated-log integration contract.
//!
//! The consensus backend is a collaborator: anything that can linearize
//! mutations and gate reads implements [`Applier`]. Command handlers hand
//! the applier a *mutate* closure (runs under a store write transaction on
//! every replica) and a *respond* closure (runs only on the replica that
//! owns the originating connection). Reads pass no mutate closure and are
//! admitted by the configured consistency gate.
//!
//! This crate ships [`node::LogNode`], a single-node backend with a
//! durable append-only log and snapshot rotation. Scripts and batch replay
//! use [`PassiveApplier`], which short-circuits both closures inline.

pub mod node;

use crate::core::error::CommandError;
use crate::resp::{Command, Reply};

/// The mutate half of command application.
pub type Mutate<'a> = Box<dyn FnOnce() -> Result<Reply, CommandError> + 'a>;

/// The respond half: receives the mutate result and writes the reply.
pub type Respond<'a> = Box<dyn FnOnce(Reply) -> Result<(), CommandError> + 'a>;

/// Linearizes writes and gates reads.
pub trait Applier: Send + Sync {
    /// Apply a command.
    ///
    /// With `mutate` present the command is a write: the backend orders it
    /// in the log, runs `mutate` when the entry commits, and runs
    /// `respond` with the result only for the originating connection
    /// (`respond` is `None` when the entry is being applied without one,
    /// e.g. during log replay). Without `mutate` the command is a read:
    /// the backend admits it per its consistency gate, then runs
    /// `respond`.
    fn apply<'a>(
        &self,
        cmd: &Command,
        mutate: Option<Mutate<'a>>,
        respond: Option<Respond<'a>>,
    ) -> Result<Option<Reply>, CommandError>;
}

/// Runs both closures inline without touching any log. Used for commands
/// replayed inside an already-applied composite entry (MULTI batches,
/// script callbacks).
pub struct PassiveApplier;

impl Applier for PassiveApplier {
    fn apply<'a>(
        &self,
        _cmd: &Command,
        mutate: Option<Mutate<'a>>,
        respond: Option<Respond<'a>>,
    ) -> Result<Option<Reply>, CommandError> {
        let value = match mutate {
            Some(m) => Some(m()?),
            None => None,
        };
        if let Some(r) = respond {
            r(value.clone().unwrap_or(Reply::Null))?;
        }
        Ok(value)
    }
}

/// The state-machine side of the contract: what the log backend drives
/// when entries commit or snapshots transfer.
pub trait StateMachine: Send + Sync {
    /// Apply a committed log entry. Command-level failures are ordinary
    /// outcomes; the backend records them as the entry's result.
    fn apply(&self, cmd: &Command) -> Result<Reply, CommandError>;

    /// Serialize the full state for log compaction.
    fn snapshot(&self, w: &mut dyn std::io::Write) -> Result<(), CommandError>;

    /// Replace the state from a snapshot stream.
    fn restore(&self, r: &mut dyn std::io::Read) -> Result<(), CommandError>;
}
