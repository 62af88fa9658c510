//! Error types and wire mapping.
//!
//! Command errors carry the exact message written to the client after the
//! leading `-`. Messages that begin with an upper-case word other than `ERR`
//! (`BUSYKEY`, `EXECABORT`, `NOSCRIPT`, `TRY`) use that word as the error
//! class, matching the Redis convention.

use thiserror::Error;

/// Errors surfaced to clients by the command dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments")]
    WrongNumberOfArguments,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR invalid expire time in {0}")]
    InvalidExpire(&'static str),

    /// Meta-key access through a public command.
    #[error("ERR key not allowed")]
    KeyNotAllowed,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("BUSYKEY Target key name already exists.")]
    BusyKey,

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,

    #[error("ERR MULTI calls can not be nested")]
    MultiNested,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript,

    #[error("ERR command not allowed from script '{0}'")]
    ScriptDisallowed(String),

    /// Write attempted inside a read-only transaction (EVALRO et al).
    #[error("ERR tx not writable")]
    TxNotWritable,

    /// Redirect: the node is not the leader; clients retry at the address.
    #[error("TRY {0}")]
    TryLeader(String),

    #[error("ERR leader unknown")]
    LeaderUnknown,

    /// Free-form error with an explicit class prefix already applied.
    #[error("{0}")]
    Other(String),
}

impl CommandError {
    /// Build a free-form `ERR`-classed error.
    pub fn err(msg: impl std::fmt::Display) -> Self {
        Self::Other(format!("ERR {msg}"))
    }
}

/// Errors raised by the ordered store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    /// Mutation attempted through a read-only transaction.
    #[error("tx not writable")]
    TxNotWritable,

    #[error("invalid index definition: {0}")]
    InvalidIndex(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TxNotWritable => CommandError::TxNotWritable,
            StoreError::NotFound => CommandError::NoSuchKey,
            other => CommandError::err(other),
        }
    }
}
