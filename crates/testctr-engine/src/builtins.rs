//! Built-in commands and conditions
//!
//! The small host-side set scripts get for free: `echo`, `exec`, `env`,
//! `sleep`, and the `stdout`/`stderr` output matchers, plus the `[exists]`
//! condition. `wait` is an engine keyword, not a command.

use crate::{
    parse_duration, CmdOutput, Engine, EngineError, Result, ScriptCommand, ScriptCondition, State,
    Usage, WaitFunc,
};
use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use std::process::Stdio;
use std::sync::Arc;

pub(crate) fn register(engine: &mut Engine) {
    engine.add_command("echo", Arc::new(EchoCommand));
    engine.add_command("exec", Arc::new(ExecCommand));
    engine.add_command("env", Arc::new(EnvCommand));
    engine.add_command("sleep", Arc::new(SleepCommand));
    engine.add_command("stdout", Arc::new(OutputMatchCommand { stderr: false }));
    engine.add_command("stderr", Arc::new(OutputMatchCommand { stderr: true }));
    engine.add_condition("exists", Arc::new(ExistsCondition));
}

/// `echo ARGS...` — write arguments to stdout
struct EchoCommand;

#[async_trait]
impl ScriptCommand for EchoCommand {
    fn usage(&self) -> Usage {
        Usage {
            args: "echo [ARG...]",
            summary: "write arguments to stdout",
        }
    }

    async fn run(&self, _state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        let text = format!("{}\n", args.join(" "));
        Ok(Some(async move { Ok(CmdOutput::stdout(text)) }.boxed()))
    }
}

/// `exec PROG [ARG...]` — run a host process in the script workdir
struct ExecCommand;

#[async_trait]
impl ScriptCommand for ExecCommand {
    fn usage(&self) -> Usage {
        Usage {
            args: "exec PROG [ARG...]",
            summary: "run a host program in the script workdir",
        }
    }

    async fn run(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        if args.is_empty() {
            return Err(EngineError::usage_of(&self.usage()));
        }

        let program = args[0].clone();
        let rest: Vec<String> = args[1..].to_vec();
        let workdir = state.workdir();
        let env = state.envs();

        Ok(Some(
            async move {
                let output = tokio::process::Command::new(&program)
                    .args(&rest)
                    .current_dir(&workdir)
                    .envs(&env)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await?;

                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();

                if !output.status.success() {
                    return Err(EngineError::Exit {
                        code: output.status.code().unwrap_or(-1) as i64,
                        output: format!("{}{}", stdout, stderr),
                    });
                }

                Ok(CmdOutput { stdout, stderr })
            }
            .boxed(),
        ))
    }
}

/// `env` / `env KEY` / `env KEY=VALUE` — print or set script environment
struct EnvCommand;

#[async_trait]
impl ScriptCommand for EnvCommand {
    fn usage(&self) -> Usage {
        Usage {
            args: "env [KEY[=VALUE]...]",
            summary: "print or set script environment variables",
        }
    }

    async fn run(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        if args.is_empty() {
            let mut entries: Vec<String> = state
                .envs()
                .iter()
                .map(|(k, v)| format!("{}={}\n", k, v))
                .collect();
            entries.sort();
            let text = entries.concat();
            return Ok(Some(async move { Ok(CmdOutput::stdout(text)) }.boxed()));
        }

        let mut printed = String::new();
        for arg in args {
            match arg.split_once('=') {
                Some((key, value)) => state.set_env(key, value),
                None => {
                    let value = state.env(arg).unwrap_or_default();
                    printed.push_str(&format!("{}={}\n", arg, value));
                }
            }
        }

        if printed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(async move { Ok(CmdOutput::stdout(printed)) }.boxed()))
        }
    }
}

/// `sleep DURATION` — pause script execution
struct SleepCommand;

#[async_trait]
impl ScriptCommand for SleepCommand {
    fn usage(&self) -> Usage {
        Usage {
            args: "sleep DURATION",
            summary: "pause for the given duration",
        }
    }

    async fn run(&self, _state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        if args.len() != 1 {
            return Err(EngineError::usage_of(&self.usage()));
        }
        let duration = parse_duration(&args[0])?;
        tokio::time::sleep(duration).await;
        Ok(None)
    }
}

/// `stdout RE` / `stderr RE` — match the previous command's output
struct OutputMatchCommand {
    stderr: bool,
}

#[async_trait]
impl ScriptCommand for OutputMatchCommand {
    fn usage(&self) -> Usage {
        if self.stderr {
            Usage {
                args: "stderr PATTERN",
                summary: "require the last command's stderr to match PATTERN",
            }
        } else {
            Usage {
                args: "stdout PATTERN",
                summary: "require the last command's stdout to match PATTERN",
            }
        }
    }

    async fn run(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        if args.len() != 1 {
            return Err(EngineError::usage_of(&self.usage()));
        }
        let pattern = Regex::new(&args[0])
            .map_err(|e| EngineError::Parse(format!("bad pattern {:?}: {}", args[0], e)))?;

        let (channel, text) = if self.stderr {
            ("stderr", state.last_stderr())
        } else {
            ("stdout", state.last_stdout())
        };

        if pattern.is_match(&text) {
            Ok(None)
        } else {
            Err(EngineError::Assertion(format!(
                "no match for {:?} in {}:\n{}",
                args[0], channel, text
            )))
        }
    }
}

/// `[exists PATH]` — true when PATH exists relative to the script workdir
struct ExistsCondition;

#[async_trait]
impl ScriptCondition for ExistsCondition {
    async fn eval(&self, state: &State, args: &[String]) -> Result<bool> {
        if args.len() != 1 {
            return Err(EngineError::Usage {
                usage: "[exists PATH]".to_string(),
            });
        }
        Ok(state.workdir().join(&args[0]).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_echo_then_stdout_match() {
        let engine = Engine::new();
        let s = state();
        engine.run(&s, "echo hello world\nstdout hello\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_stdout_mismatch_fails() {
        let engine = Engine::new();
        let s = state();
        let err = engine
            .run(&s, "echo hello\nstdout goodbye\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no match"));
    }

    #[tokio::test]
    async fn test_stdout_is_regex() {
        let engine = Engine::new();
        let s = state();
        engine
            .run(&s, "echo version 1.42\nstdout 'version [0-9.]+'\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_env_set_and_print() {
        let engine = Engine::new();
        let s = state();
        engine.run(&s, "env GREETING=hi\nenv GREETING\nstdout GREETING=hi\n")
            .await
            .unwrap();
        assert_eq!(s.env("GREETING").unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_exec_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "payload\n").unwrap();
        let engine = Engine::new();
        let s = State::new(dir.path());
        engine
            .run(&s, "exec cat data.txt\nstdout payload\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_fails() {
        let engine = Engine::new();
        let s = state();
        let err = engine.run(&s, "exec false\n").await.unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    #[tokio::test]
    async fn test_negated_exec() {
        let engine = Engine::new();
        let s = state();
        engine.run(&s, "! exec false\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_exists_condition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present"), "").unwrap();
        let engine = Engine::new();
        let s = State::new(dir.path());
        engine
            .run(
                &s,
                "[exists present] echo found\nstdout found\n[!exists absent] echo missing\nstdout missing\n",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sleep_usage_error() {
        let engine = Engine::new();
        let s = state();
        let err = engine.run(&s, "sleep\n").await.unwrap_err();
        assert!(err.is_usage());
    }
}
