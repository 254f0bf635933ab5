//! Script conditions predicating on container state
//!
//! `[container NAME]` holds when NAME is present in the registry;
//! `[container-ready NAME [TIMEOUT]]` additionally requires the driver to
//! report the container ready. Conditions never create or mutate container
//! state.

use crate::names::env_key;
use crate::registry::ContainerRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use testctr_engine::{parse_duration, EngineError, Result, ScriptCondition, State};

/// `[container NAME]` — presence test against the env projection
pub struct ContainerCondition;

#[async_trait]
impl ScriptCondition for ContainerCondition {
    async fn eval(&self, state: &State, args: &[String]) -> Result<bool> {
        let [name] = args else {
            return Err(EngineError::Usage {
                usage: "[container NAME]".to_string(),
            });
        };
        Ok(state.env(&env_key(name)).is_some())
    }
}

/// `[container-ready NAME [TIMEOUT]]` — presence plus driver-reported
/// readiness, polling up to TIMEOUT when one is given
pub struct ContainerReadyCondition {
    pub registry: Arc<ContainerRegistry>,
}

#[async_trait]
impl ScriptCondition for ContainerReadyCondition {
    async fn eval(&self, state: &State, args: &[String]) -> Result<bool> {
        let (name, timeout) = match args {
            [name] => (name, None),
            [name, timeout] => (name, Some(parse_duration(timeout)?)),
            _ => {
                return Err(EngineError::Usage {
                    usage: "[container-ready NAME [TIMEOUT]]".to_string(),
                })
            }
        };

        if state.env(&env_key(name)).is_none() {
            return Ok(false);
        }
        let Some(handle) = self.registry.get(name) else {
            return Ok(false);
        };

        match timeout {
            None => handle.is_ready().await.map_err(EngineError::command),
            Some(limit) => Ok(handle.wait_ready(limit).await.is_ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{record_start, ContainerHandle, ContainerSpec};
    use crate::test_support::MockDriver;
    use testctr_driver::{ContainerDriver, ContainerState, ContainerStatus};

    async fn started(
        driver: &Arc<MockDriver>,
        registry: &ContainerRegistry,
        state: &State,
        name: &str,
    ) {
        let spec = ContainerSpec {
            image: "alpine:latest".to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        let handle = ContainerHandle::start(driver.clone() as Arc<dyn ContainerDriver>, spec)
            .await
            .unwrap();
        record_start(state, registry, name, Arc::new(handle)).unwrap();
    }

    #[tokio::test]
    async fn test_container_condition_presence() {
        let driver = Arc::new(MockDriver::new());
        let registry = ContainerRegistry::new();
        let state = State::new("/tmp");
        started(&driver, &registry, &state, "web").await;

        let cond = ContainerCondition;
        assert!(cond.eval(&state, &["web".to_string()]).await.unwrap());
        assert!(!cond.eval(&state, &["db".to_string()]).await.unwrap());
    }

    #[tokio::test]
    async fn test_container_condition_does_not_touch_driver() {
        let driver = Arc::new(MockDriver::new());
        let state = State::new("/tmp");

        let cond = ContainerCondition;
        cond.eval(&state, &["ghost".to_string()]).await.unwrap();
        assert!(driver.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_container_ready_absent_is_false() {
        let registry = Arc::new(ContainerRegistry::new());
        let state = State::new("/tmp");
        let cond = ContainerReadyCondition { registry };
        assert!(!cond.eval(&state, &["nope".to_string()]).await.unwrap());
    }

    #[tokio::test]
    async fn test_container_ready_consults_driver() {
        let driver = Arc::new(MockDriver::new());
        let registry = Arc::new(ContainerRegistry::new());
        let state = State::new("/tmp");
        started(&driver, &registry, &state, "svc").await;

        let cond = ContainerReadyCondition {
            registry: registry.clone(),
        };
        assert!(cond.eval(&state, &["svc".to_string()]).await.unwrap());

        *driver.inspect_result.lock().unwrap() = ContainerState {
            status: ContainerStatus::Exited,
            health: None,
            ports: Vec::new(),
        };
        assert!(!cond.eval(&state, &["svc".to_string()]).await.unwrap());
    }
}
