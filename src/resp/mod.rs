//! Redis serialization protocol (RESP2).
//!
//! The server consumes commands (arrays of bulk strings, or inline
//! commands) and produces typed replies. [`Reply`] is the tagged value
//! threaded between the mutate and respond halves of command execution;
//! the encoder turns it into wire bytes at the connection edge.

mod encoder;
mod parser;

pub use encoder::encode_reply;
pub use parser::{parse_command, ParseResult};

use crate::core::error::CommandError;

/// Maximum size of a single bulk string (512 MB, the Redis limit).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a command array.
pub const MAX_ELEMENTS: usize = 1024 * 1024;

/// A typed reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple string (`+OK`).
    Simple(String),
    /// Error (`-ERR ...`). The string carries the class prefix.
    Error(String),
    /// Integer (`:42`).
    Int(i64),
    /// Bulk string (`$5\r\nhello`).
    Bulk(Vec<u8>),
    /// Array of replies.
    Array(Vec<Reply>),
    /// Null (`$-1`).
    Null,
}

impl Reply {
    /// The `+OK` reply.
    pub fn ok() -> Self {
        Self::Simple("OK".to_string())
    }

    /// The `+QUEUED` reply used inside MULTI.
    pub fn queued() -> Self {
        Self::Simple("QUEUED".to_string())
    }

    /// Bulk string reply from any byte-ish value.
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Self::Bulk(data.into())
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Self::Error(err.to_string())
    }
}

/// A parsed client command: one or more binary-safe arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub args: Vec<Vec<u8>>,
}

impl Command {
    /// Build a command from argument byte strings.
    pub fn new(args: Vec<Vec<u8>>) -> Self {
        Self { args }
    }

    /// Build a command from string arguments.
    pub fn from_strs(args: &[&str]) -> Self {
        Self::new(args.iter().map(|a| a.as_bytes().to_vec()).collect())
    }

    /// Lower-cased command name.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.args.first().map(Vec::as_slice).unwrap_or_default())
            .to_ascii_lowercase()
    }

    /// Argument at `i` as a lossy string.
    pub fn arg_str(&self, i: usize) -> String {
        String::from_utf8_lossy(&self.args[i]).into_owned()
    }

    /// Argument at `i` lower-cased, for option-token matching.
    pub fn arg_lower(&self, i: usize) -> String {
        self.arg_str(i).to_ascii_lowercase()
    }

    /// RESP encoding of this command, used for log entries and for
    /// embedding commands inside composite batch commands.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.args.iter().map(Vec::len).sum::<usize>());
        buf.push(b'*');
        buf.extend_from_slice(self.args.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        for arg in &self.args {
            buf.push(b'$');
            buf.extend_from_slice(arg.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(arg);
            buf.extend_from_slice(b"\r\n");
        }
        buf
    }

    /// Decode a command from a complete RESP encoding, as produced by
    /// [`Command::encode`]. Trailing garbage is rejected.
    pub fn decode(raw: &[u8]) -> Result<Self, CommandError> {
        match parse_command(raw) {
            ParseResult::Ok(cmd, consumed) if consumed == raw.len() => Ok(cmd),
            _ => Err(CommandError::err("invalid embedded command")),
        }
    }
}
