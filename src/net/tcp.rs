//! TCP connection handling.
//!
//! Each connection gets its own task and its own [`ConnContext`]. The
//! driver reads raw bytes, parses as many commands as the buffer holds
//! (inline pipelining), and feeds them through the dispatcher one at a
//! time; the dispatcher sees the still-queued remainder and may coalesce
//! it. PING and QUIT are served here, in front of the dispatcher, so
//! they work regardless of connection state.

use crate::machine::{ConnContext, Machine};
use crate::raft::node::LogNode;
use crate::resp::{encode_reply, parse_command, Command, ParseResult, Reply};
use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 64 * 1024;

/// Accept connections forever.
pub async fn serve(
    listener: TcpListener,
    machine: Arc<Machine>,
    node: Arc<LogNode>,
) -> Result<()> {
    let addr = listener.local_addr().context("reading listener address")?;
    info!(%addr, "listening");
    loop {
        let (stream, peer) = listener.accept().await.context("accepting connection")?;
        let machine = Arc::clone(&machine);
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            debug!(%peer, "connection opened");
            if let Err(err) = handle_connection(stream, machine, node).await {
                debug!(%peer, %err, "connection ended");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    machine: Arc<Machine>,
    node: Arc<LogNode>,
) -> Result<()> {
    let mut ctx = ConnContext::default();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut write_buf: Vec<u8> = Vec::with_capacity(4 * 1024);

    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        // parse everything available; the dispatcher coalesces bursts
        loop {
            match parse_command(&buf[..]) {
                ParseResult::Ok(cmd, consumed) => {
                    buf.advance(consumed);
                    ctx.queue.push_back(cmd);
                }
                ParseResult::Incomplete => break,
                ParseResult::Error(msg) => {
                    warn!(%msg, "protocol error");
                    write_buf.clear();
                    encode_reply(&Reply::Error(format!("ERR Protocol error: {msg}")), &mut write_buf);
                    stream.write_all(&write_buf).await?;
                    return Ok(());
                }
            }
        }

        while let Some(cmd) = ctx.queue.pop_front() {
            dispatch(&machine, &node, &mut ctx, &cmd);
            if ctx.quit {
                break;
            }
        }

        if !ctx.out.is_empty() {
            write_buf.clear();
            for reply in ctx.out.drain(..) {
                encode_reply(&reply, &mut write_buf);
            }
            stream.write_all(&write_buf).await?;
            stream.flush().await?;
        }
        if ctx.quit {
            return Ok(());
        }
    }
}

fn dispatch(machine: &Machine, node: &Arc<LogNode>, ctx: &mut ConnContext, cmd: &Command) {
    match cmd.name().as_str() {
        "ping" => match cmd.args.len() {
            1 => ctx.out.push(Reply::Simple("PONG".to_string())),
            2 => ctx.out.push(Reply::bulk(cmd.args[1].clone())),
            _ => ctx
                .out
                .push(Reply::Error("ERR wrong number of arguments".to_string())),
        },
        "quit" => {
            ctx.out.push(Reply::ok());
            ctx.quit = true;
        }
        _ => {
            if let Err(err) = machine.command(node.as_ref(), Some(ctx), cmd) {
                ctx.out.push(Reply::Error(err.to_string()));
            }
        }
    }
}
