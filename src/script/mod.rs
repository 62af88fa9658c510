//! User scripts: registry, pluggable evaluator, and value model.
//!
//! Script sources are addressed by the hex SHA-1 of their bytes and
//! persist as meta keys; the compiled cache here is advisory and is
//! rebuilt from storage on demand. The evaluator itself is pluggable
//! behind [`Engine`]; the crate ships [`engine::BatchEngine`], a
//! deterministic built-in that runs each script line as a command.

pub mod engine;

use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;

/// Hex SHA-1 of a script source.
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// A value produced by (or fed back into) a script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    /// A status (`+OK`-style) value.
    Status(String),
    /// An error value; the string carries the wire error class.
    Error(String),
    Str(String),
    Num(f64),
    Array(Vec<ScriptValue>),
    /// Any other structured value, rendered as a JSON bulk string.
    Json(serde_json::Value),
}

/// A script abort: surfaced to the client as the carried error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// The command callback handed to an engine: re-enters the dispatcher
/// against the invocation's transaction.
pub trait CallContext {
    /// Execute one command. Errors return the full wire error message.
    fn call(&mut self, args: Vec<Vec<u8>>) -> Result<ScriptValue, String>;
}

/// A pluggable script evaluator.
pub trait Engine: Send + Sync {
    /// Validate a source without running it.
    fn compile(&self, source: &str) -> Result<(), String>;

    /// Run a script with its `KEYS`/`ARGV` bindings and command callback.
    fn eval(
        &self,
        source: &str,
        keys: &[String],
        argv: &[String],
        calls: &mut dyn CallContext,
    ) -> Result<ScriptValue, ScriptError>;
}

/// A cached script: the source plus the per-script execution lock that
/// serializes invocations of the same SHA.
pub struct CachedScript {
    pub source: String,
    pub lock: Mutex<()>,
}

/// The compiled-script cache keyed by SHA.
pub struct ScriptRegistry {
    engine: Arc<dyn Engine>,
    cache: Mutex<HashMap<String, Arc<CachedScript>>>,
}

impl ScriptRegistry {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine, cache: Mutex::new(HashMap::new()) }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn get(&self, sha: &str) -> Option<Arc<CachedScript>> {
        self.cache.lock().get(sha).cloned()
    }

    pub fn insert(&self, sha: &str, source: String) -> Arc<CachedScript> {
        let script = Arc::new(CachedScript { source, lock: Mutex::new(()) });
        self.cache.lock().insert(sha.to_string(), Arc::clone(&script));
        script
    }

    /// Drop every cached script. The persisted sources are untouched.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
