//! RESP2 command parser.
//!
//! Accepts the array-of-bulk-strings form (`*2\r\n$3\r\nGET\r\n$1\r\nk\r\n`)
//! and inline commands (`GET k\r\n`) on the same connection.

use super::{Command, MAX_BULK_SIZE, MAX_ELEMENTS};

/// Outcome of one parse attempt over a read buffer.
#[derive(Debug)]
pub enum ParseResult {
    /// A complete command and the number of bytes consumed.
    Ok(Command, usize),
    /// More bytes are needed.
    Incomplete,
    /// The stream is malformed; the connection should be closed.
    Error(String),
}

/// Parse one command from the front of `data`.
pub fn parse_command(data: &[u8]) -> ParseResult {
    if data.is_empty() {
        return ParseResult::Incomplete;
    }
    if data[0] == b'*' {
        parse_array_command(data)
    } else {
        parse_inline_command(data)
    }
}

fn parse_array_command(data: &[u8]) -> ParseResult {
    let (count, mut pos) = match parse_length(&data[1..]) {
        LengthResult::Ok(n, consumed) => (n, 1 + consumed),
        LengthResult::Incomplete => return ParseResult::Incomplete,
        LengthResult::Error(e) => return ParseResult::Error(e),
    };
    if count == 0 {
        return ParseResult::Error("empty command array".to_string());
    }
    if count > MAX_ELEMENTS as i64 {
        return ParseResult::Error(format!("command array too large: {count}"));
    }

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if pos >= data.len() {
            return ParseResult::Incomplete;
        }
        if data[pos] != b'$' {
            return ParseResult::Error(format!(
                "expected bulk string, got 0x{:02x}",
                data[pos]
            ));
        }
        let (len, consumed) = match parse_length(&data[pos + 1..]) {
            LengthResult::Ok(n, consumed) => (n, consumed),
            LengthResult::Incomplete => return ParseResult::Incomplete,
            LengthResult::Error(e) => return ParseResult::Error(e),
        };
        if len < 0 {
            return ParseResult::Error("null argument in command".to_string());
        }
        if len > MAX_BULK_SIZE as i64 {
            return ParseResult::Error(format!("bulk string too large: {len}"));
        }
        let start = pos + 1 + consumed;
        let end = start + len as usize;
        if data.len() < end + 2 {
            return ParseResult::Incomplete;
        }
        if &data[end..end + 2] != b"\r\n" {
            return ParseResult::Error("missing CRLF after bulk string".to_string());
        }
        args.push(data[start..end].to_vec());
        pos = end + 2;
    }
    ParseResult::Ok(Command::new(args), pos)
}

/// Inline commands split on spaces; empty lines are skipped by the caller
/// consuming zero arguments.
fn parse_inline_command(data: &[u8]) -> ParseResult {
    let Some(crlf) = find_crlf(data) else {
        return ParseResult::Incomplete;
    };
    let line = &data[..crlf];
    let args: Vec<Vec<u8>> = line
        .split(|&b| b == b' ')
        .filter(|part| !part.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    if args.is_empty() {
        return ParseResult::Error("empty inline command".to_string());
    }
    ParseResult::Ok(Command::new(args), crlf + 2)
}

enum LengthResult {
    /// Parsed value and bytes consumed including the trailing CRLF.
    Ok(i64, usize),
    Incomplete,
    Error(String),
}

fn parse_length(data: &[u8]) -> LengthResult {
    let Some(crlf) = find_crlf(data) else {
        return LengthResult::Incomplete;
    };
    match std::str::from_utf8(&data[..crlf])
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
    {
        Some(n) => LengthResult::Ok(n, crlf + 2),
        None => LengthResult::Error("invalid length".to_string()),
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
