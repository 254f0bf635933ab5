//! Container driver trait and implementations for testctr
//!
//! This crate is the only part of the harness allowed to talk to a container
//! runtime. Everything else goes through the [`ContainerDriver`] trait, which
//! has a CLI implementation (docker or podman binary) and a bollard-based
//! Docker API implementation.

mod cli;
mod docker;
mod error;
mod types;

pub use cli::CliDriver;
pub use docker::DockerDriver;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Narrow capability set over a container runtime.
///
/// `remove` and `remove_image` are idempotent: removing something that is
/// already gone succeeds. All blocking operations are expected to be wrapped
/// in caller-side timeouts; only `create_and_start` enforces one itself.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create a container without starting it
    async fn create(&self, config: &CreateConfig) -> Result<ContainerId>;

    /// Start a created container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Inspect status, health, and port mappings
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerState>;

    /// Execute a command in a running container, capturing combined output
    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult>;

    /// Force-remove a container
    async fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Build an image from a context directory
    async fn build_image(&self, request: &BuildRequest) -> Result<ImageId>;

    /// Force-remove an image by name or id
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// List images carrying the given label (`key` or `key=value` form)
    async fn list_images(&self, label: &str) -> Result<Vec<ImageSummary>>;

    /// Get detailed information about an image
    async fn inspect_image(&self, image: &str) -> Result<ImageDetails>;

    /// List all containers (running or not) with their image references
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Check if the runtime is available/connected
    async fn ping(&self) -> Result<()>;

    /// Get driver information
    fn info(&self) -> DriverInfo;

    /// Runtime binary and command prefix, for synchronous fallback cleanup
    fn runtime_args(&self) -> (String, Vec<String>);

    /// The runtime's active endpoint, when the driver can determine one
    async fn docker_endpoint(&self) -> Option<String> {
        None
    }

    /// Create and start a container, blocking until it reports ready.
    ///
    /// Ready means running, plus healthy when the image carries a health
    /// check. A container that exits or fails to become ready within
    /// `ready_timeout` is removed before the error is returned.
    async fn create_and_start(
        &self,
        config: &CreateConfig,
        ready_timeout: Duration,
    ) -> Result<ContainerId> {
        let id = self.create(config).await?;
        if let Err(e) = self.start(&id).await {
            let _ = self.remove(&id).await;
            return Err(e);
        }

        let deadline = tokio::time::Instant::now() + ready_timeout;
        loop {
            let state = self.inspect(&id).await?;
            if state.is_ready() {
                return Ok(id);
            }
            if matches!(state.status, ContainerStatus::Exited | ContainerStatus::Dead) {
                let _ = self.remove(&id).await;
                return Err(DriverError::Runtime(format!(
                    "container {} exited before becoming ready",
                    id.short()
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = self.remove(&id).await;
                return Err(DriverError::Timeout(format!(
                    "waiting for container {} to become ready",
                    id.short()
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Test if a specific runtime is available and responsive
pub async fn runtime_available(kind: RuntimeKind) -> bool {
    let driver = match kind {
        RuntimeKind::Docker => CliDriver::new_docker().await,
        RuntimeKind::Podman => CliDriver::new_podman().await,
    };
    driver.is_ok()
}

/// Create a driver for the requested runtime, or auto-detect one.
///
/// Auto-detection tries the docker CLI first, then podman, then falls back to
/// the Docker API socket. Detection order matters on machines with both
/// runtimes installed: docker is the more common default.
pub async fn detect_driver(kind: Option<RuntimeKind>) -> Result<Arc<dyn ContainerDriver>> {
    match kind {
        Some(RuntimeKind::Docker) => Ok(Arc::new(CliDriver::new_docker().await?)),
        Some(RuntimeKind::Podman) => Ok(Arc::new(CliDriver::new_podman().await?)),
        None => {
            if let Ok(driver) = CliDriver::new_docker().await {
                tracing::debug!("Auto-detected docker CLI runtime");
                return Ok(Arc::new(driver));
            }
            if let Ok(driver) = CliDriver::new_podman().await {
                tracing::debug!("Auto-detected podman CLI runtime");
                return Ok(Arc::new(driver));
            }
            match DockerDriver::new(default_docker_socket()).await {
                Ok(driver) => {
                    tracing::debug!("Auto-detected Docker API socket");
                    Ok(Arc::new(driver))
                }
                Err(e) => Err(DriverError::Connection(format!(
                    "no container runtime found (tried docker, podman, {}): {}",
                    default_docker_socket(),
                    e
                ))),
            }
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> &'static str {
    "//./pipe/docker_engine"
}

#[cfg(not(windows))]
fn default_docker_socket() -> &'static str {
    "/var/run/docker.sock"
}
