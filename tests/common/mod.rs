//! Shared test harness: a machine wired to a single-node log backend on
//! a temp directory, driven through the public dispatcher exactly as a
//! connection would be.

#![allow(dead_code)]

use crest::core::config::Level;
use crest::machine::{ConnContext, Machine};
use crest::raft::node::LogNode;
use crest::raft::StateMachine;
use crest::resp::{Command, Reply};
use crest::script::engine::BatchEngine;
use crest::store::Store;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestDb {
    pub store: Arc<Store>,
    pub machine: Arc<Machine>,
    pub node: Arc<LogNode>,
    pub ctx: ConnContext,
    dir: TempDir,
}

impl TestDb {
    /// Low-latency defaults: no fsync per append, ungated reads.
    pub fn new() -> Self {
        Self::with_levels(Level::Low, Level::Low)
    }

    pub fn with_levels(durability: Level, consistency: Level) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(Store::new());
        let machine = Machine::new(Arc::clone(&store), Arc::new(BatchEngine));
        let node = LogNode::open(
            dir.path(),
            durability,
            consistency,
            Arc::clone(&machine) as Arc<dyn StateMachine>,
        )
        .expect("open log node");
        Self { store, machine, node, ctx: ConnContext::default(), dir }
    }

    /// Reopen the node over the same data directory, replaying the log
    /// into a fresh machine.
    pub fn reopen(self) -> Self {
        let TestDb { dir, .. } = self;
        let store = Arc::new(Store::new());
        let machine = Machine::new(Arc::clone(&store), Arc::new(BatchEngine));
        let node = LogNode::open(
            dir.path(),
            Level::Low,
            Level::Low,
            Arc::clone(&machine) as Arc<dyn StateMachine>,
        )
        .expect("reopen log node");
        Self { store, machine, node, ctx: ConnContext::default(), dir }
    }

    /// Run one command given as whitespace-separated tokens.
    pub fn exec(&mut self, line: &str) -> Reply {
        let args: Vec<&str> = line.split_whitespace().collect();
        self.exec_args(&args)
    }

    /// Run one command from explicit arguments (for values with spaces).
    pub fn exec_args(&mut self, args: &[&str]) -> Reply {
        let replies = self.exec_all(args);
        replies.into_iter().last().unwrap_or(Reply::Null)
    }

    /// Run one command and collect every reply it produced.
    pub fn exec_all(&mut self, args: &[&str]) -> Vec<Reply> {
        let cmd = Command::from_strs(args);
        if let Err(err) = self
            .machine
            .command(self.node.as_ref(), Some(&mut self.ctx), &cmd)
        {
            self.ctx.out.push(Reply::Error(err.to_string()));
        }
        self.ctx.out.drain(..).collect()
    }
}

pub fn bulk(s: &str) -> Reply {
    Reply::bulk(s)
}

pub fn ok() -> Reply {
    Reply::ok()
}

/// Flatten an array reply into its bulk-string elements.
pub fn strings(reply: &Reply) -> Vec<String> {
    match reply {
        Reply::Array(items) => items
            .iter()
            .map(|r| match r {
                Reply::Bulk(b) => String::from_utf8_lossy(b).into_owned(),
                Reply::Simple(s) => s.clone(),
                Reply::Int(n) => n.to_string(),
                Reply::Null => "<nil>".to_string(),
                Reply::Error(e) => format!("<err {e}>"),
                Reply::Array(_) => "<array>".to_string(),
            })
            .collect(),
        other => panic!("expected array reply, got {other:?}"),
    }
}

/// Assert a reply is an error whose message starts with `prefix`.
pub fn assert_err_prefix(reply: &Reply, prefix: &str) {
    match reply {
        Reply::Error(msg) => {
            assert!(msg.starts_with(prefix), "error '{msg}' lacks prefix '{prefix}'")
        }
        other => panic!("expected error reply, got {other:?}"),
    }
}
