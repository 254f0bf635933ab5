//! Line-oriented script engine for testctr test files
//!
//! The engine executes declarative scripts one line at a time against a
//! per-run [`State`]. Extension points:
//! - [`ScriptCommand`] — a named command; returns an optional wait-function
//!   (a deferred future producing the command's final stdout/stderr)
//! - [`ScriptCondition`] — a `[name args]` guard evaluated before a line runs
//!
//! Commands that complete synchronously with no output contract return
//! `Ok(None)` and leave the output buffers untouched. Foreground
//! wait-functions are awaited immediately; a trailing `&` defers them until
//! the `wait` keyword (or end of script).

mod builtins;
mod error;
mod exec;
mod parse;
mod state;

pub use error::*;
pub use exec::Engine;
pub use parse::{parse_line, parse_script, Guard, ParsedLine};
pub use state::State;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;

/// Final output of a command, produced by its wait-function
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
        }
    }
}

/// Deferred completion of a command
pub type WaitFunc = BoxFuture<'static, Result<CmdOutput>>;

/// Usage strings shown when a command is invoked with bad arguments
#[derive(Debug, Clone, Copy)]
pub struct Usage {
    /// Argument grammar, e.g. `"start IMAGE NAME [-p PORT]..."`
    pub args: &'static str,
    /// One-line summary
    pub summary: &'static str,
}

/// A command callable from scripts
#[async_trait]
pub trait ScriptCommand: Send + Sync {
    fn usage(&self) -> Usage;

    /// Begin execution. `Ok(None)` means done with no output contract;
    /// `Ok(Some(wait))` defers completion to the returned wait-function.
    async fn run(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>>;
}

/// A condition usable as a `[name args]` line guard
#[async_trait]
pub trait ScriptCondition: Send + Sync {
    async fn eval(&self, state: &State, args: &[String]) -> Result<bool>;
}

/// Parse a duration of the `30s` / `5m` / `2h` / `250ms` / `1m30s` form.
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(EngineError::Parse("empty duration".to_string()));
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| EngineError::Parse(format!("invalid duration: {}", s)))?;
        if digits_end == 0 {
            return Err(EngineError::Parse(format!("invalid duration: {}", s)));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| EngineError::Parse(format!("invalid duration: {}", s)))?;
        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let unit = &rest[digits_end..unit_end];
        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(EngineError::Parse(format!("invalid duration unit: {}", unit))),
        };
        rest = &rest[unit_end..];
    }
    Ok(total)
}

/// Render a duration in the same form `parse_duration` accepts
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
