//! Common types for container drivers

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        if self.0.len() > 12 {
            &self.0[..12]
        } else {
            &self.0
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Short form with any `sha256:` prefix stripped, truncated to 12 chars
    pub fn short(&self) -> &str {
        let id = self.0.strip_prefix("sha256:").unwrap_or(&self.0);
        if id.len() > 12 {
            &id[..12]
        } else {
            id
        }
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container runtime flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(format!("Unknown container runtime: {}", s)),
        }
    }
}

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ContainerStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Health-check state, present only when the image defines a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

impl From<&str> for HealthStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            _ => Self::Starting,
        }
    }
}

/// Runtime state of a container as reported by inspect
#[derive(Debug, Clone)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub health: Option<HealthStatus>,
    pub ports: Vec<PortMapping>,
}

impl ContainerState {
    /// Ready means running, and healthy when the image advertises a health check
    pub fn is_ready(&self) -> bool {
        self.status == ContainerStatus::Running
            && self.health.map_or(true, |h| h == HealthStatus::Healthy)
    }

    /// Host port bound to the given container port, if published
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port)
            .and_then(|p| p.host_port)
    }
}

/// A published port as reported by inspect
#[derive(Debug, Clone)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

/// A port to publish when creating a container (host None = auto-assign)
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub container_port: u16,
    pub host_port: Option<u16>,
}

impl PortSpec {
    pub fn auto(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
        }
    }
}

/// Bind mount for a created container
#[derive(Debug, Clone)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Configuration for creating a container
#[derive(Debug, Clone, Default)]
pub struct CreateConfig {
    /// Image to use
    pub image: String,
    /// Container name
    pub name: Option<String>,
    /// Command override
    pub cmd: Option<Vec<String>>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Ports to publish
    pub ports: Vec<PortSpec>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Bind mounts
    pub mounts: Vec<BindMount>,
}

/// Exec configuration
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Command to execute
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
}

impl ExecConfig {
    pub fn new(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Shorthand for `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(["sh".to_string(), "-c".to_string(), script.into()])
    }
}

/// Result of exec command
#[derive(Debug)]
pub struct ExecResult {
    /// Exit code
    pub exit_code: i64,
    /// Combined stdout/stderr output
    pub output: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Configuration for building an image
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Path to the build context
    pub context: PathBuf,
    /// Dockerfile path relative to the context
    pub dockerfile: String,
    /// Image tag
    pub tag: String,
    /// Labels to apply
    pub labels: HashMap<String, String>,
    /// Extra CLI build arguments, passed through verbatim
    pub extra_args: Vec<String>,
}

/// Basic image info for label-filtered listings
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub id: ImageId,
    pub created: Option<DateTime<Utc>>,
    pub repo_tags: Vec<String>,
}

/// Detailed image information
#[derive(Debug, Clone)]
pub struct ImageDetails {
    pub id: ImageId,
    pub created: Option<DateTime<Utc>>,
    pub repo_tags: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Basic container info for listing
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub image: String,
}

/// Driver information
#[derive(Debug, Clone)]
pub struct DriverInfo {
    pub kind: RuntimeKind,
    pub version: String,
}
