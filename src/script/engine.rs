//! The built-in batch evaluator.
//!
//! Scripts are newline-separated statements. Each statement is a command
//! invocation, optionally prefixed with `call` (abort the script on a
//! command error) or `pcall` (the error becomes the statement's value).
//! Tokens `KEYS[n]` and `ARGV[n]` (1-based) substitute the invocation
//! bindings. Blank lines and `#` comments are skipped. The script's value
//! is the value of its last statement.
//!
//! The evaluator is deterministic, which committed log entries require
//! of any engine plugged in behind the bridge.

use super::{CallContext, Engine, ScriptError, ScriptValue};

/// Deterministic line-per-command evaluator.
pub struct BatchEngine;

fn statements(source: &str) -> impl Iterator<Item = &str> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

fn substitute(token: &str, keys: &[String], argv: &[String]) -> Result<String, String> {
    for (name, bindings) in [("KEYS[", keys), ("ARGV[", argv)] {
        if let Some(rest) = token.strip_prefix(name) {
            let Some(idx) = rest.strip_suffix(']') else {
                return Err(format!("malformed binding '{token}'"));
            };
            let idx: usize = idx
                .parse()
                .map_err(|_| format!("malformed binding '{token}'"))?;
            if idx == 0 || idx > bindings.len() {
                return Err(format!("binding '{token}' out of range"));
            }
            return Ok(bindings[idx - 1].clone());
        }
    }
    Ok(token.to_string())
}

impl Engine for BatchEngine {
    fn compile(&self, source: &str) -> Result<(), String> {
        for line in statements(source) {
            let mut tokens = line.split_whitespace();
            let first = tokens.next().expect("statements are non-empty");
            if matches!(first, "call" | "pcall") && tokens.next().is_none() {
                return Err(format!("'{first}' without a command"));
            }
        }
        Ok(())
    }

    fn eval(
        &self,
        source: &str,
        keys: &[String],
        argv: &[String],
        calls: &mut dyn CallContext,
    ) -> Result<ScriptValue, ScriptError> {
        let mut last = ScriptValue::Null;
        for line in statements(source) {
            let mut tokens: Vec<&str> = line.split_whitespace().collect();
            let protected = match tokens.first() {
                Some(&"pcall") => {
                    tokens.remove(0);
                    true
                }
                Some(&"call") => {
                    tokens.remove(0);
                    false
                }
                _ => false,
            };
            if tokens.is_empty() {
                return Err(ScriptError::new("ERR empty call in script"));
            }
            let mut args = Vec::with_capacity(tokens.len());
            for token in tokens {
                let resolved =
                    substitute(token, keys, argv).map_err(|e| ScriptError::new(format!("ERR {e}")))?;
                args.push(resolved.into_bytes());
            }
            last = match calls.call(args) {
                Ok(value) => value,
                Err(message) if protected => ScriptValue::Error(message),
                Err(message) => return Err(ScriptError::new(message)),
            };
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        calls: Vec<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl CallContext for Recorder {
        fn call(&mut self, args: Vec<Vec<u8>>) -> Result<ScriptValue, String> {
            let args: Vec<String> = args
                .iter()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect();
            let name = args[0].to_ascii_lowercase();
            self.calls.push(args);
            if self.fail_on.is_some_and(|f| f == name) {
                return Err(format!("ERR forced failure in '{name}'"));
            }
            Ok(ScriptValue::Status("OK".to_string()))
        }
    }

    #[test]
    fn test_eval_runs_lines_in_order() {
        let mut rec = Recorder { calls: Vec::new(), fail_on: None };
        let out = BatchEngine
            .eval(
                "set a 1\n# a comment\n\nget a",
                &[],
                &[],
                &mut rec,
            )
            .unwrap();
        assert_eq!(out, ScriptValue::Status("OK".to_string()));
        assert_eq!(rec.calls.len(), 2);
        assert_eq!(rec.calls[1], vec!["get".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_keys_argv_substitution() {
        let mut rec = Recorder { calls: Vec::new(), fail_on: None };
        BatchEngine
            .eval(
                "set KEYS[1] ARGV[1]",
                &["user:1".to_string()],
                &["ann".to_string()],
                &mut rec,
            )
            .unwrap();
        assert_eq!(
            rec.calls[0],
            vec!["set".to_string(), "user:1".to_string(), "ann".to_string()]
        );
    }

    #[test]
    fn test_out_of_range_binding() {
        let mut rec = Recorder { calls: Vec::new(), fail_on: None };
        let err = BatchEngine.eval("get KEYS[2]", &["k".to_string()], &[], &mut rec).unwrap_err();
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn test_call_aborts_pcall_continues() {
        let mut rec = Recorder { calls: Vec::new(), fail_on: Some("del") };
        let err = BatchEngine.eval("call del k\nget k", &[], &[], &mut rec).unwrap_err();
        assert!(err.message.contains("forced failure"));
        assert_eq!(rec.calls.len(), 1);

        let mut rec = Recorder { calls: Vec::new(), fail_on: Some("del") };
        let out = BatchEngine.eval("pcall del k", &[], &[], &mut rec).unwrap();
        assert!(matches!(out, ScriptValue::Error(m) if m.contains("forced failure")));
    }

    #[test]
    fn test_compile_rejects_dangling_call() {
        assert!(BatchEngine.compile("call").is_err());
        assert!(BatchEngine.compile("set a 1").is_ok());
        assert!(BatchEngine.compile("").is_ok());
    }
}
