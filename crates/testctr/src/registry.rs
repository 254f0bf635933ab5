//! Per-test container registry and live container handles
//!
//! The registry maps logical container names to running containers for one
//! script run. The same mapping is projected into the script-state
//! environment as `TESTCTR_CONTAINER_<NAME>` so conditions can test presence
//! without touching the registry; the registry is the cache of live handles
//! behind those env entries. The two encodings always agree.

use crate::names::env_key;
use crate::{HarnessError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use testctr_driver::{
    BindMount, ContainerDriver, ContainerId, CreateConfig, ExecConfig, ExecResult, PortSpec,
};
use testctr_engine::State;

/// How long `start` waits for a container to report ready
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval while waiting on readiness
const READY_POLL: Duration = Duration::from_millis(100);

/// What to start: image plus the options parsed from a `start` line
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// Container ports to publish with auto-assigned host ports
    pub ports: Vec<u16>,
    /// `K=V` environment entries
    pub env: Vec<String>,
    /// Command override
    pub cmd: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<BindMount>,
}

/// A live container tied to the test that created it.
///
/// The handle owns a drop guard that force-removes the container through the
/// runtime binary if the test dies without running cleanup, so a container
/// never outlives its owning test even across panics.
pub struct ContainerHandle {
    driver: Arc<dyn ContainerDriver>,
    id: ContainerId,
    name: String,
    image: String,
    guard: RemoveGuard,
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("image", &self.image)
            .finish()
    }
}

impl ContainerHandle {
    /// Create and start a container, blocking until it reports ready
    pub async fn start(driver: Arc<dyn ContainerDriver>, spec: ContainerSpec) -> Result<Self> {
        let mut env = HashMap::new();
        for entry in &spec.env {
            match entry.split_once('=') {
                Some((k, v)) => env.insert(k.to_string(), v.to_string()),
                None => env.insert(entry.clone(), String::new()),
            };
        }

        let config = CreateConfig {
            image: spec.image.clone(),
            name: None,
            cmd: spec.cmd.clone(),
            env,
            ports: spec.ports.iter().map(|p| PortSpec::auto(*p)).collect(),
            labels: spec.labels.clone(),
            mounts: spec.mounts.clone(),
        };

        let id = driver.create_and_start(&config, READY_TIMEOUT).await?;
        tracing::debug!(
            "started container {} ({}) from {}",
            spec.name,
            id.short(),
            spec.image
        );

        let (runtime, prefix) = driver.runtime_args();
        let guard = RemoveGuard::new(runtime, prefix, id.0.clone());

        Ok(Self {
            driver,
            id,
            name: spec.name,
            image: spec.image,
            guard,
        })
    }

    /// Stable runtime identifier
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Logical name within the test
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Run a command inside the container, capturing combined output.
    /// `timeout` of None waits indefinitely.
    pub async fn exec(&self, argv: &[String], timeout: Option<Duration>) -> Result<ExecResult> {
        let config = ExecConfig::new(argv.iter().cloned());
        match timeout {
            None => Ok(self.driver.exec(&self.id, &config).await?),
            Some(limit) => tokio::time::timeout(limit, self.driver.exec(&self.id, &config))
                .await
                .map_err(|_| {
                    HarnessError::Timeout(format!(
                        "running {:?} in container {}",
                        argv.first().map(String::as_str).unwrap_or(""),
                        self.name
                    ))
                })?
                .map_err(Into::into),
        }
    }

    /// Shell convenience: `sh -c <script>`
    pub async fn exec_shell(&self, script: &str, timeout: Option<Duration>) -> Result<ExecResult> {
        let config = ExecConfig::shell(script);
        match timeout {
            None => Ok(self.driver.exec(&self.id, &config).await?),
            Some(limit) => tokio::time::timeout(limit, self.driver.exec(&self.id, &config))
                .await
                .map_err(|_| {
                    HarnessError::Timeout(format!("running shell in container {}", self.name))
                })?
                .map_err(Into::into),
        }
    }

    /// Host port mapped to the given container port, if published
    pub async fn port(&self, container_port: u16) -> Result<Option<u16>> {
        let state = self.driver.inspect(&self.id).await?;
        Ok(state.host_port(container_port))
    }

    /// `host:port` endpoint for a published container port
    pub async fn endpoint(&self, container_port: u16) -> Result<String> {
        match self.port(container_port).await? {
            Some(host_port) => Ok(format!("127.0.0.1:{}", host_port)),
            None => Err(HarnessError::Unmapped {
                name: self.name.clone(),
                port: container_port,
            }),
        }
    }

    /// True when the container currently reports ready
    pub async fn is_ready(&self) -> Result<bool> {
        Ok(self.driver.inspect(&self.id).await?.is_ready())
    }

    /// Poll until ready or the timeout elapses
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_ready().await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::Timeout(format!(
                    "waiting for container {} to become ready",
                    self.name
                )));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    /// Remove the container. Idempotent; disarms the drop guard.
    pub async fn remove(&self) -> Result<()> {
        self.driver.remove(&self.id).await?;
        self.guard.mark_cleaned();
        Ok(())
    }
}

/// Synchronous force-remove fallback, run on drop unless cleanup already
/// happened through the driver
struct RemoveGuard {
    runtime: String,
    prefix: Vec<String>,
    container_id: String,
    cleaned: AtomicBool,
}

impl RemoveGuard {
    fn new(runtime: String, prefix: Vec<String>, container_id: String) -> Self {
        Self {
            runtime,
            prefix,
            container_id,
            cleaned: AtomicBool::new(false),
        }
    }

    fn mark_cleaned(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
    }
}

impl Drop for RemoveGuard {
    fn drop(&mut self) {
        if self.cleaned.load(Ordering::SeqCst) {
            return;
        }
        let mut cmd = if self.prefix.is_empty() {
            std::process::Command::new(&self.runtime)
        } else {
            let mut c = std::process::Command::new(&self.prefix[0]);
            for arg in &self.prefix[1..] {
                c.arg(arg);
            }
            c.arg(&self.runtime);
            c
        };
        let _ = cmd.args(["rm", "-f", &self.container_id]).output();
    }
}

/// Per-test map from logical container name to live handle.
///
/// One registry exists per script run; it is never shared across tests.
/// Reads are frequent (conditions), writes rare (start/stop).
#[derive(Default)]
pub struct ContainerRegistry {
    containers: RwLock<HashMap<String, Arc<ContainerHandle>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a started container; duplicate names are a conflict
    pub fn insert(&self, name: &str, handle: Arc<ContainerHandle>) -> Result<()> {
        let mut containers = self.containers.write().unwrap();
        if containers.contains_key(name) {
            return Err(HarnessError::Conflict(name.to_string()));
        }
        containers.insert(name.to_string(), handle);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ContainerHandle>> {
        self.containers.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.read().unwrap().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ContainerHandle>> {
        self.containers.write().unwrap().remove(name)
    }

    /// Take everything, for end-of-test cleanup
    pub fn drain(&self) -> Vec<(String, Arc<ContainerHandle>)> {
        self.containers.write().unwrap().drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.read().unwrap().is_empty()
    }
}

/// Record a successful `start` in both projections: registry cache and
/// script-state environment. The env entry is checked first so a duplicate
/// is caught before either encoding is touched.
pub fn record_start(
    state: &State,
    registry: &ContainerRegistry,
    name: &str,
    handle: Arc<ContainerHandle>,
) -> Result<()> {
    let key = env_key(name);
    if state.env(&key).is_some() || registry.contains(name) {
        return Err(HarnessError::Conflict(name.to_string()));
    }
    let id = handle.id().to_string();
    registry.insert(name, handle)?;
    state.set_env(key, id);
    Ok(())
}

/// Clear both projections on `stop`
pub fn record_stop(state: &State, registry: &ContainerRegistry, name: &str) {
    registry.remove(name);
    state.unset_env(&env_key(name));
}

/// Resolve a logical name to a live handle. The environment is authoritative
/// for presence; the registry cache must then hold the handle.
pub fn lookup(
    state: &State,
    registry: &ContainerRegistry,
    name: &str,
) -> Result<Arc<ContainerHandle>> {
    if state.env(&env_key(name)).is_none() {
        return Err(HarnessError::NotFound(name.to_string()));
    }
    registry
        .get(name)
        .ok_or_else(|| HarnessError::NotInCache(name.to_string()))
}
