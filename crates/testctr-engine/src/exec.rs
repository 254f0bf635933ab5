//! Script execution loop

use crate::parse::{parse_script, ParsedLine};
use crate::{builtins, CmdOutput, EngineError, Result, ScriptCommand, ScriptCondition, State, WaitFunc};
use std::collections::HashMap;
use std::sync::Arc;

/// A background command waiting to be collected
struct Background {
    number: usize,
    text: String,
    negated: bool,
    wait: WaitFunc,
}

/// Script engine: a registry of commands and conditions plus the run loop.
///
/// Build one engine per script run; registered commands may hold per-run
/// state (e.g. a container registry) and must not be shared across runs.
pub struct Engine {
    commands: HashMap<String, Arc<dyn ScriptCommand>>,
    conditions: HashMap<String, Arc<dyn ScriptCondition>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with the built-in command and condition set registered
    pub fn new() -> Self {
        let mut engine = Self::empty();
        builtins::register(&mut engine);
        engine
    }

    /// Engine with no commands at all
    pub fn empty() -> Self {
        Self {
            commands: HashMap::new(),
            conditions: HashMap::new(),
        }
    }

    pub fn add_command(&mut self, name: impl Into<String>, cmd: Arc<dyn ScriptCommand>) {
        self.commands.insert(name.into(), cmd);
    }

    pub fn add_condition(&mut self, name: impl Into<String>, cond: Arc<dyn ScriptCondition>) {
        self.conditions.insert(name.into(), cond);
    }

    /// Execute a script against the given state.
    ///
    /// Stops at the first failing line. Background commands still pending at
    /// end of script are waited for implicitly.
    pub async fn run(&self, state: &State, script: &str) -> Result<()> {
        let lines = parse_script(script)?;
        let mut background: Vec<Background> = Vec::new();

        for line in lines {
            if !self.guards_hold(state, &line).await? {
                tracing::debug!("skip (condition): {}", line.text);
                continue;
            }

            // `wait` is an engine keyword: collect all background commands
            if line.args[0] == "wait" && line.args.len() == 1 {
                Self::flush_background(state, &mut background).await?;
                continue;
            }

            tracing::debug!("run: {}", line.text);
            let cmd = self
                .commands
                .get(&line.args[0])
                .ok_or_else(|| {
                    EngineError::at(
                        line.number,
                        &line.text,
                        EngineError::UnknownCommand(line.args[0].clone()),
                    )
                })?
                .clone();

            match cmd.run(state, &line.args[1..]).await {
                Ok(None) => {
                    if line.negated {
                        return Err(EngineError::at(
                            line.number,
                            &line.text,
                            EngineError::UnexpectedSuccess,
                        ));
                    }
                }
                Ok(Some(wait)) => {
                    if line.background {
                        background.push(Background {
                            number: line.number,
                            text: line.text,
                            negated: line.negated,
                            wait,
                        });
                        continue;
                    }
                    match wait.await {
                        Ok(out) => {
                            if line.negated {
                                return Err(EngineError::at(
                                    line.number,
                                    &line.text,
                                    EngineError::UnexpectedSuccess,
                                ));
                            }
                            state.record_output(&out);
                        }
                        Err(e) if line.negated && !e.is_usage() => {
                            state.record_failure(&e.to_string());
                        }
                        Err(e) => return Err(EngineError::at(line.number, &line.text, e)),
                    }
                }
                Err(e) if line.negated && !e.is_usage() => {
                    state.record_failure(&e.to_string());
                }
                Err(e) => return Err(EngineError::at(line.number, &line.text, e)),
            }
        }

        Self::flush_background(state, &mut background).await
    }

    /// Await pending background commands in order, concatenating their output
    /// into the state buffers. A flush with nothing pending leaves the
    /// buffers untouched.
    async fn flush_background(state: &State, background: &mut Vec<Background>) -> Result<()> {
        if background.is_empty() {
            return Ok(());
        }
        let mut combined = CmdOutput::default();
        for bg in background.drain(..) {
            match bg.wait.await {
                Ok(out) => {
                    if bg.negated {
                        return Err(EngineError::at(
                            bg.number,
                            &bg.text,
                            EngineError::UnexpectedSuccess,
                        ));
                    }
                    combined.stdout.push_str(&out.stdout);
                    combined.stderr.push_str(&out.stderr);
                }
                Err(e) if bg.negated && !e.is_usage() => {
                    combined.stderr.push_str(&e.to_string());
                }
                Err(e) => return Err(EngineError::at(bg.number, &bg.text, e)),
            }
        }
        state.record_output(&combined);
        Ok(())
    }

    async fn guards_hold(&self, state: &State, line: &ParsedLine) -> Result<bool> {
        for guard in &line.guards {
            let cond = self.conditions.get(&guard.name).ok_or_else(|| {
                EngineError::at(
                    line.number,
                    &line.text,
                    EngineError::UnknownCondition(guard.name.clone()),
                )
            })?;
            let held = cond
                .eval(state, &guard.args)
                .await
                .map_err(|e| EngineError::at(line.number, &line.text, e))?;
            if held == guard.negated {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Usage;
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::Mutex;

    /// Records invocations and returns a canned wait-function
    struct RecordingCommand {
        calls: Arc<Mutex<Vec<Vec<String>>>>,
        fail: bool,
    }

    #[async_trait]
    impl ScriptCommand for RecordingCommand {
        fn usage(&self) -> Usage {
            Usage {
                args: "record ARGS...",
                summary: "records its arguments",
            }
        }

        async fn run(&self, _state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
            self.calls.lock().unwrap().push(args.to_vec());
            if self.fail {
                return Err(EngineError::Assertion("recorded failure".to_string()));
            }
            let joined = args.join(" ");
            Ok(Some(
                async move { Ok(CmdOutput::stdout(format!("{}\n", joined))) }.boxed(),
            ))
        }
    }

    struct FlagCondition {
        key: String,
    }

    #[async_trait]
    impl ScriptCondition for FlagCondition {
        async fn eval(&self, state: &State, _args: &[String]) -> Result<bool> {
            Ok(state.env(&self.key).is_some())
        }
    }

    fn engine_with_recorder(fail: bool) -> (Engine, Arc<Mutex<Vec<Vec<String>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();
        engine.add_command(
            "record",
            Arc::new(RecordingCommand {
                calls: calls.clone(),
                fail,
            }),
        );
        engine.add_condition(
            "flag",
            Arc::new(FlagCondition {
                key: "FLAG".to_string(),
            }),
        );
        (engine, calls)
    }

    #[tokio::test]
    async fn test_run_records_output() {
        let (engine, calls) = engine_with_recorder(false);
        let state = State::new("/tmp");
        engine.run(&state, "record a b\n").await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(state.last_stdout(), "a b\n");
    }

    #[tokio::test]
    async fn test_unknown_command_errors_with_line() {
        let engine = Engine::new();
        let state = State::new("/tmp");
        let err = engine.run(&state, "frobnicate now\n").await.unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(err.to_string().contains("unknown command"));
    }

    #[tokio::test]
    async fn test_condition_skips_line() {
        let (engine, calls) = engine_with_recorder(false);
        let state = State::new("/tmp");
        engine
            .run(&state, "[flag] record yes\n[!flag] record no\n")
            .await
            .unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["no"]);
    }

    #[tokio::test]
    async fn test_negated_command_swallows_failure() {
        let (engine, _) = engine_with_recorder(true);
        let state = State::new("/tmp");
        engine.run(&state, "! record boom\n").await.unwrap();
        assert!(state.last_stderr().contains("recorded failure"));
    }

    #[tokio::test]
    async fn test_negated_command_fails_on_success() {
        let (engine, _) = engine_with_recorder(false);
        let state = State::new("/tmp");
        let err = engine.run(&state, "! record fine\n").await.unwrap_err();
        assert!(err.to_string().contains("unexpected command success"));
    }

    #[tokio::test]
    async fn test_background_collected_at_wait() {
        let (engine, _) = engine_with_recorder(false);
        let state = State::new("/tmp");
        engine
            .run(&state, "record one &\nrecord two &\nwait\n")
            .await
            .unwrap();
        assert_eq!(state.last_stdout(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_background_collected_at_end_of_script() {
        let (engine, _) = engine_with_recorder(false);
        let state = State::new("/tmp");
        engine.run(&state, "record tail &\n").await.unwrap();
        assert_eq!(state.last_stdout(), "tail\n");
    }

    #[tokio::test]
    async fn test_stop_at_first_failure() {
        let (engine, calls) = engine_with_recorder(true);
        let state = State::new("/tmp");
        let err = engine
            .run(&state, "record first\nrecord second\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }
}
