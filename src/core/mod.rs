//! Core building blocks: configuration, error taxonomy, and clock helpers.

pub mod config;
pub mod error;
pub mod time;

pub use config::{Config, Level, LogLevel};
pub use error::{CommandError, StoreError};
