//! Per-run script state
//!
//! One `State` exists per script run. It is cheap to clone (shared interior)
//! so commands can move a handle into deferred wait-functions. The environment
//! map is the authoritative channel between commands and conditions.

use crate::CmdOutput;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct State {
    inner: Arc<Mutex<StateInner>>,
}

struct StateInner {
    env: HashMap<String, String>,
    workdir: PathBuf,
    last_stdout: String,
    last_stderr: String,
}

impl State {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                env: HashMap::new(),
                workdir: workdir.into(),
                last_stdout: String::new(),
                last_stderr: String::new(),
            })),
        }
    }

    /// Look up an environment variable
    pub fn env(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().env.get(key).cloned()
    }

    pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .env
            .insert(key.into(), value.into());
    }

    pub fn unset_env(&self, key: &str) {
        self.inner.lock().unwrap().env.remove(key);
    }

    /// Snapshot of the full environment
    pub fn envs(&self) -> HashMap<String, String> {
        self.inner.lock().unwrap().env.clone()
    }

    pub fn workdir(&self) -> PathBuf {
        self.inner.lock().unwrap().workdir.clone()
    }

    /// Stdout of the most recent command that produced output
    pub fn last_stdout(&self) -> String {
        self.inner.lock().unwrap().last_stdout.clone()
    }

    /// Stderr of the most recent command that produced output
    pub fn last_stderr(&self) -> String {
        self.inner.lock().unwrap().last_stderr.clone()
    }

    /// Record a command's output buffers
    pub fn record_output(&self, out: &CmdOutput) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_stdout = out.stdout.clone();
        inner.last_stderr = out.stderr.clone();
    }

    /// Record an expected failure: the error text lands on stderr so scripts
    /// can assert on it after a `!`-negated command
    pub fn record_failure(&self, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_stdout.clear();
        inner.last_stderr = message.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_roundtrip() {
        let state = State::new("/tmp");
        assert!(state.env("FOO").is_none());
        state.set_env("FOO", "bar");
        assert_eq!(state.env("FOO").unwrap(), "bar");
        state.unset_env("FOO");
        assert!(state.env("FOO").is_none());
    }

    #[test]
    fn test_clone_shares_state() {
        let state = State::new("/tmp");
        let clone = state.clone();
        clone.set_env("SHARED", "yes");
        assert_eq!(state.env("SHARED").unwrap(), "yes");
    }

    #[test]
    fn test_record_failure_clears_stdout() {
        let state = State::new("/tmp");
        state.record_output(&CmdOutput {
            stdout: "old".to_string(),
            stderr: String::new(),
        });
        state.record_failure("boom");
        assert!(state.last_stdout().is_empty());
        assert_eq!(state.last_stderr(), "boom");
    }
}
