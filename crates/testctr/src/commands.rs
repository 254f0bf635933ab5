//! The `testctr` script command set
//!
//! One command multiplexing on its first argument: `start`, `stop`, `exec`,
//! `port`, `endpoint`, `wait`. Commands read and mutate the per-run registry
//! and stream results through the engine's wait-function protocol. Registry
//! locks are never held across driver I/O.

use crate::conditions::{ContainerCondition, ContainerReadyCondition};
use crate::config::Settings;
use crate::names::{self, env_key};
use crate::registry::{
    lookup, record_start, record_stop, ContainerHandle, ContainerRegistry, ContainerSpec,
};
use crate::HarnessError;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use testctr_driver::ContainerDriver;
use testctr_engine::{
    parse_duration, CmdOutput, Engine, EngineError, Result, ScriptCommand, State, Usage, WaitFunc,
};

/// Default timeout for `testctr exec`
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for `testctr wait`
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

const START_USAGE: &str = "testctr start IMAGE NAME [-p PORT]... [-e K=V]... [--async] [--cmd ARG...]";
const STOP_USAGE: &str = "testctr stop NAME";
const EXEC_USAGE: &str = "testctr exec NAME ARG...";
const PORT_USAGE: &str = "testctr port NAME PORT";
const ENDPOINT_USAGE: &str = "testctr endpoint NAME PORT";
const WAIT_USAGE: &str = "testctr wait NAME [DURATION]";

/// Register the `testctr` command and container conditions on an engine.
///
/// A fresh registry is created for this run and returned so the caller can
/// drain it during end-of-test cleanup.
pub fn register_testctr(
    engine: &mut Engine,
    driver: Arc<dyn ContainerDriver>,
    settings: &Settings,
    test_name: &str,
) -> Arc<ContainerRegistry> {
    let registry = Arc::new(ContainerRegistry::new());
    engine.add_command(
        "testctr",
        Arc::new(TestctrCommand {
            driver,
            registry: registry.clone(),
            labels: names::container_labels(&settings.label_prefix, test_name),
        }),
    );
    engine.add_condition("container", Arc::new(ContainerCondition));
    engine.add_condition(
        "container-ready",
        Arc::new(ContainerReadyCondition {
            registry: registry.clone(),
        }),
    );
    registry
}

pub struct TestctrCommand {
    driver: Arc<dyn ContainerDriver>,
    registry: Arc<ContainerRegistry>,
    /// Base labels for containers this run starts
    labels: HashMap<String, String>,
}

#[async_trait]
impl ScriptCommand for TestctrCommand {
    fn usage(&self) -> Usage {
        Usage {
            args: "testctr start|stop|exec|port|endpoint|wait ...",
            summary: "manage named test containers",
        }
    }

    async fn run(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        let Some(sub) = args.first() else {
            return Err(EngineError::usage_of(&self.usage()));
        };
        let rest = &args[1..];
        match sub.as_str() {
            "start" => self.start(state, rest).await,
            "stop" => self.stop(state, rest).await,
            "exec" => self.exec(state, rest),
            "port" => self.port(state, rest, false),
            "endpoint" => self.port(state, rest, true),
            "wait" => self.wait(state, rest).await,
            _ => Err(EngineError::usage_of(&self.usage())),
        }
    }
}

impl TestctrCommand {
    async fn start(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        let parsed = parse_start_args(args)?;

        let spec = ContainerSpec {
            image: parsed.image,
            name: parsed.name,
            ports: parsed.ports,
            env: parsed.env,
            cmd: parsed.cmd,
            labels: self.labels.clone(),
            mounts: Vec::new(),
        };

        let driver = self.driver.clone();
        let registry = self.registry.clone();
        let state = state.clone();

        if parsed.r#async {
            // The create happens lazily, when the wait-function is collected
            let name = spec.name.clone();
            return Ok(Some(
                async move {
                    start_and_record(&state, driver, &registry, spec)
                        .await
                        .map_err(EngineError::command)?;
                    Ok(CmdOutput::stdout(format!(
                        "started container {} asynchronously\n",
                        name
                    )))
                }
                .boxed(),
            ));
        }

        // Synchronous start: block the script line, produce no stdout
        start_and_record(&state, driver, &registry, spec)
            .await
            .map_err(EngineError::command)?;
        Ok(None)
    }

    async fn stop(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        let [name] = args else {
            return Err(EngineError::Usage {
                usage: STOP_USAGE.to_string(),
            });
        };
        let handle = lookup(state, &self.registry, name).map_err(EngineError::command)?;
        record_stop(state, &self.registry, name);
        handle.remove().await.map_err(EngineError::command)?;
        Ok(None)
    }

    fn exec(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        if args.len() < 2 {
            return Err(EngineError::Usage {
                usage: EXEC_USAGE.to_string(),
            });
        }
        let handle = lookup(state, &self.registry, &args[0]).map_err(EngineError::command)?;
        let argv: Vec<String> = args[1..].to_vec();

        Ok(Some(
            async move {
                let result = handle
                    .exec(&argv, Some(DEFAULT_EXEC_TIMEOUT))
                    .await
                    .map_err(EngineError::command)?;
                if result.success() {
                    Ok(CmdOutput::stdout(result.output))
                } else {
                    Err(EngineError::command(HarnessError::ExecFailed {
                        code: result.exit_code,
                        output: result.output,
                    }))
                }
            }
            .boxed(),
        ))
    }

    fn port(&self, state: &State, args: &[String], endpoint: bool) -> Result<Option<WaitFunc>> {
        let usage = if endpoint { ENDPOINT_USAGE } else { PORT_USAGE };
        let [name, port] = args else {
            return Err(EngineError::Usage {
                usage: usage.to_string(),
            });
        };
        let container_port: u16 = port
            .parse()
            .map_err(|_| EngineError::Parse(format!("invalid port: {}", port)))?;
        let handle = lookup(state, &self.registry, name).map_err(EngineError::command)?;
        let name = name.clone();

        Ok(Some(
            async move {
                if endpoint {
                    let ep = handle
                        .endpoint(container_port)
                        .await
                        .map_err(EngineError::command)?;
                    Ok(CmdOutput::stdout(format!("{}\n", ep)))
                } else {
                    match handle
                        .port(container_port)
                        .await
                        .map_err(EngineError::command)?
                    {
                        Some(host_port) => Ok(CmdOutput::stdout(format!("{}\n", host_port))),
                        None => Err(EngineError::command(HarnessError::Unmapped {
                            name,
                            port: container_port,
                        })),
                    }
                }
            }
            .boxed(),
        ))
    }

    async fn wait(&self, state: &State, args: &[String]) -> Result<Option<WaitFunc>> {
        let (name, timeout) = match args {
            [name] => (name, DEFAULT_WAIT_TIMEOUT),
            [name, duration] => (name, parse_duration(duration)?),
            _ => {
                return Err(EngineError::Usage {
                    usage: WAIT_USAGE.to_string(),
                })
            }
        };
        let handle = lookup(state, &self.registry, name).map_err(EngineError::command)?;
        handle
            .wait_ready(timeout)
            .await
            .map_err(EngineError::command)?;
        Ok(None)
    }
}

/// Create the container and record it in both registry projections.
/// The duplicate check runs before any driver call.
async fn start_and_record(
    state: &State,
    driver: Arc<dyn ContainerDriver>,
    registry: &ContainerRegistry,
    spec: ContainerSpec,
) -> crate::Result<()> {
    let name = spec.name.clone();
    if state.env(&env_key(&name)).is_some() || registry.contains(&name) {
        return Err(HarnessError::Conflict(name));
    }
    let handle = ContainerHandle::start(driver, spec).await?;
    record_start(state, registry, &name, Arc::new(handle))
}

#[derive(Debug, Default, PartialEq)]
struct StartArgs {
    image: String,
    name: String,
    ports: Vec<u16>,
    env: Vec<String>,
    r#async: bool,
    cmd: Option<Vec<String>>,
}

/// Parse `start` arguments; flags are position-insensitive except `--cmd`,
/// which consumes everything after it
fn parse_start_args(args: &[String]) -> Result<StartArgs> {
    let usage = || EngineError::Usage {
        usage: START_USAGE.to_string(),
    };

    let mut parsed = StartArgs::default();
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-p" => {
                i += 1;
                let value = args.get(i).ok_or_else(usage)?;
                let port: u16 = value
                    .parse()
                    .map_err(|_| EngineError::Parse(format!("invalid port: {}", value)))?;
                parsed.ports.push(port);
            }
            "-e" => {
                i += 1;
                let value = args.get(i).ok_or_else(usage)?;
                parsed.env.push(value.clone());
            }
            "--async" => parsed.r#async = true,
            "--cmd" => {
                let rest = &args[i + 1..];
                if rest.is_empty() {
                    return Err(usage());
                }
                parsed.cmd = Some(rest.to_vec());
                break;
            }
            flag if flag.starts_with('-') => return Err(usage()),
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let [image, name] = positional.as_slice() else {
        return Err(usage());
    };
    parsed.image = image.clone();
    parsed.name = name.clone();
    Ok(parsed)
}
