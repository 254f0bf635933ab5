//! Docker-in-Docker provisioning
//!
//! Resolves a Docker endpoint on the host so tests that drive a container
//! runtime from inside their container can reach one. Resolution order:
//! `DOCKER_HOST`, the driver's context endpoint, then the default socket
//! path. Absence of all three is non-fatal; the test simply runs isolated.

use std::path::{Path, PathBuf};
use testctr_driver::{BindMount, ContainerDriver};

/// Default socket path probed as the last resort
const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// A resolved Docker endpoint on the host
#[derive(Debug, Clone, PartialEq)]
pub struct DockerEndpoint {
    /// Endpoint string, e.g. `unix:///var/run/docker.sock`
    pub endpoint: String,
    /// Local socket path when the endpoint is a unix socket that exists
    pub socket: Option<PathBuf>,
}

impl DockerEndpoint {
    fn from_endpoint(endpoint: String) -> Self {
        let socket = endpoint
            .strip_prefix("unix://")
            .map(PathBuf::from)
            .filter(|p| p.exists());
        Self { endpoint, socket }
    }
}

/// Resolve the host's Docker endpoint, if any
pub async fn detect_endpoint(driver: &dyn ContainerDriver) -> Option<DockerEndpoint> {
    if let Ok(host) = std::env::var("DOCKER_HOST") {
        if !host.is_empty() {
            tracing::info!("docker-in-docker endpoint from DOCKER_HOST: {}", host);
            return Some(DockerEndpoint::from_endpoint(host));
        }
    }

    if let Some(host) = driver.docker_endpoint().await {
        tracing::info!("docker-in-docker endpoint from runtime context: {}", host);
        return Some(DockerEndpoint::from_endpoint(host));
    }

    if Path::new(DEFAULT_SOCKET).exists() {
        let endpoint = format!("unix://{}", DEFAULT_SOCKET);
        tracing::info!("docker-in-docker endpoint from socket probe: {}", endpoint);
        return Some(DockerEndpoint::from_endpoint(endpoint));
    }

    tracing::info!("no docker endpoint found; test container runs isolated");
    None
}

/// Container provisions for a resolved endpoint: a socket bind mount plus a
/// matching `DOCKER_HOST` for processes inside the container
pub fn provision(endpoint: &Option<DockerEndpoint>) -> (Vec<BindMount>, Vec<(String, String)>) {
    let Some(ep) = endpoint else {
        return (Vec::new(), Vec::new());
    };
    match &ep.socket {
        Some(socket) => (
            vec![BindMount {
                source: socket.to_string_lossy().to_string(),
                target: DEFAULT_SOCKET.to_string(),
                read_only: false,
            }],
            vec![(
                "DOCKER_HOST".to_string(),
                format!("unix://{}", DEFAULT_SOCKET),
            )],
        ),
        // Remote endpoints are forwarded by address only
        None => (
            Vec::new(),
            vec![("DOCKER_HOST".to_string(), ep.endpoint.clone())],
        ),
    }
}
