//! Crest, a replicated, ordered, in-memory key/value database speaking
//! the Redis wire protocol.
//!
//! Clients issue textual commands over RESP; a cluster of replicas runs
//! every mutation through a replicated log so that all replicas converge
//! on identical state.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    RESP clients (TCP)                     │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//! ┌───────────────────────────────────────────────────────────┐
//! │   net      connection driver, inline pipelining           │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//! ┌───────────────────────────────────────────────────────────┐
//! │   machine  dispatcher │ MULTI │ coalescer │ script bridge │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//! ┌───────────────────────────────────────────────────────────┐
//! │   raft     applier contract, log node, read gating        │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//! ┌───────────────────────────────────────────────────────────┐
//! │   store    ordered entries │ secondary indexes │ R-trees  │
//! │            TTL bookkeeping │ snapshot stream               │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core`] - configuration, error taxonomy, clock helpers
//! - [`resp`] - RESP2 parsing and encoding, the tagged [`resp::Reply`]
//! - [`store`] - the transactional ordered store and its indexes
//! - [`machine`] - the command dispatcher and every command handler
//! - [`raft`] - the replicated-log contract and the single-node backend
//! - [`script`] - script registry and the pluggable evaluator
//! - [`net`] - TCP front end

pub mod core;
pub mod machine;
pub mod net;
pub mod raft;
pub mod resp;
pub mod script;
pub mod store;
