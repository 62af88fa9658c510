//! Network front end: the TCP listener and per-connection drivers.

mod tcp;

pub use tcp::serve;
