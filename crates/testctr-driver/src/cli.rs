//! CLI-based container driver for Docker and Podman
//!
//! Uses direct CLI commands instead of the API for:
//! - Automatic credential handling (via ~/.docker/config.json)
//! - Proper user context handling (no permissions issues)
//! - Works with Docker alternatives (Colima, Rancher, Lima, OrbStack)
//! - Verbatim pass-through of build flags (buildx, --platform, caching)

use crate::{
    BuildRequest, ContainerDriver, ContainerId, ContainerState, ContainerStatus, ContainerSummary,
    CreateConfig, DriverError, DriverInfo, ExecConfig, ExecResult, HealthStatus, ImageDetails,
    ImageId, ImageSummary, PortMapping, Result, RuntimeKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

/// CLI-based container driver for Docker and Podman
pub struct CliDriver {
    /// Command to use ("docker" or "podman")
    cmd: String,
    /// Optional prefix (e.g., ["flatpak-spawn", "--host"] for Toolbox)
    cmd_prefix: Vec<String>,
    /// Runtime flavor
    kind: RuntimeKind,
}

impl CliDriver {
    /// Create a docker driver, verifying the binary responds
    pub async fn new_docker() -> Result<Self> {
        let driver = Self::with_binary("docker", RuntimeKind::Docker);
        driver.ping().await?;
        Ok(driver)
    }

    /// Create a podman driver, verifying the binary responds
    pub async fn new_podman() -> Result<Self> {
        let driver = Self::with_binary("podman", RuntimeKind::Podman);
        driver.ping().await?;
        Ok(driver)
    }

    /// Construct without connectivity check (useful when the runtime may not
    /// be needed, e.g. host-mode scripts that never start a container)
    pub fn with_binary(cmd: impl Into<String>, kind: RuntimeKind) -> Self {
        Self {
            cmd: cmd.into(),
            cmd_prefix: Vec::new(),
            kind,
        }
    }

    /// Prefix every invocation (e.g. ["flatpak-spawn", "--host"])
    pub fn with_prefix(mut self, prefix: Vec<String>) -> Self {
        self.cmd_prefix = prefix;
        self
    }

    /// Run a command and get stdout
    async fn run_cmd(&self, args: &[&str]) -> Result<String> {
        let mut cmd = self.build_command();
        cmd.args(args);

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DriverError::Runtime(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Runtime(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Build a command with the correct prefix
    fn build_command(&self) -> Command {
        if self.cmd_prefix.is_empty() {
            Command::new(&self.cmd)
        } else {
            let mut c = Command::new(&self.cmd_prefix[0]);
            for prefix_arg in &self.cmd_prefix[1..] {
                c.arg(prefix_arg);
            }
            c.arg(&self.cmd);
            c
        }
    }
}

/// Build `--env=K=V` arguments from an environment variable map
fn env_args(env: &HashMap<String, String>) -> Vec<String> {
    let mut args: Vec<String> = env
        .iter()
        .map(|(k, v)| format!("--env={}={}", k, v))
        .collect();
    args.sort();
    args
}

/// Treat "already gone" errors from rm/rmi as success
fn ignore_missing(result: Result<String>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(DriverError::Runtime(msg))
            if msg.to_lowercase().contains("no such") || msg.contains("not found") =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ContainerDriver for CliDriver {
    async fn create(&self, config: &CreateConfig) -> Result<ContainerId> {
        let mut args = vec!["create".to_string()];

        if let Some(ref name) = config.name {
            args.push(format!("--name={}", name));
        }

        args.extend(env_args(&config.env));

        for port in &config.ports {
            let port_str = match port.host_port {
                Some(hp) => format!("-p={}:{}", hp, port.container_port),
                None => format!("-p={}", port.container_port),
            };
            args.push(port_str);
        }

        for (k, v) in &config.labels {
            args.push(format!("--label={}={}", k, v));
        }

        for mount in &config.mounts {
            let ro = if mount.read_only { ":ro" } else { "" };
            args.push(format!("-v={}:{}{}", mount.source, mount.target, ro));
        }

        args.push(config.image.clone());

        if let Some(ref cmd) = config.cmd {
            args.extend(cmd.clone());
        }

        let args_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let output = self.run_cmd(&args_refs).await?;

        Ok(ContainerId::new(output.trim()))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.run_cmd(&["start", &id.0]).await?;
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerState> {
        let output = self.run_cmd(&["inspect", "--format=json", &id.0]).await?;

        let inspect: Vec<serde_json::Value> = serde_json::from_str(&output)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;

        let info = inspect
            .first()
            .ok_or_else(|| DriverError::NotFound(id.0.clone()))?;

        Ok(parse_inspect_state(info))
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        let mut args = vec!["exec".to_string()];

        if let Some(ref wd) = config.working_dir {
            args.push(format!("--workdir={}", wd));
        }

        args.extend(env_args(&config.env));

        args.push(id.0.clone());
        args.extend(config.cmd.clone());

        let mut cmd = self.build_command();
        cmd.args(args.iter().map(|s| s.as_str()));

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DriverError::Exec(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1) as i64,
            output: format!("{}{}", stdout, stderr),
        })
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        ignore_missing(self.run_cmd(&["rm", "-f", &id.0]).await)
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<ImageId> {
        let context = request.context.to_string_lossy();
        // Use an absolute path for the Dockerfile so BuildKit finds it
        let dockerfile_path = request.context.join(&request.dockerfile);
        let dockerfile = format!("-f={}", dockerfile_path.display());
        let tag = format!("-t={}", request.tag);

        let mut args = vec!["build".to_string(), dockerfile, tag];

        for (k, v) in &request.labels {
            args.push(format!("--label={}={}", k, v));
        }

        // Extra args go through verbatim (buildx, --platform, --build-arg, cache flags)
        args.extend(request.extra_args.clone());

        args.push(context.to_string());

        let args_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let output = self
            .run_cmd(&args_refs)
            .await
            .map_err(|e| DriverError::Build(e.to_string()))?;
        tracing::debug!("Build output: {}", output);

        let inspect_output = self
            .run_cmd(&["image", "inspect", "--format={{.Id}}", &request.tag])
            .await?;
        Ok(ImageId::new(inspect_output.trim()))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        ignore_missing(self.run_cmd(&["rmi", "-f", image]).await)
    }

    async fn list_images(&self, label: &str) -> Result<Vec<ImageSummary>> {
        let filter = format!("--filter=label={}", label);
        let output = self
            .run_cmd(&[
                "image",
                "ls",
                &filter,
                "--format={{.ID}}|{{.Repository}}:{{.Tag}}|{{.CreatedAt}}",
            ])
            .await?;

        Ok(output.lines().filter_map(parse_image_line).collect())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails> {
        let output = self
            .run_cmd(&["image", "inspect", "--format=json", image])
            .await
            .map_err(|e| DriverError::ImageNotFound(format!("{}: {}", image, e)))?;

        let inspect: Vec<serde_json::Value> = serde_json::from_str(&output)
            .map_err(|e| DriverError::Runtime(e.to_string()))?;

        let info = inspect
            .first()
            .ok_or_else(|| DriverError::ImageNotFound(image.to_string()))?;

        Ok(parse_image_details(info))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let output = self
            .run_cmd(&["ps", "-a", "--format={{.ID}}|{{.Image}}"])
            .await?;

        let mut containers = Vec::new();
        for line in output.lines() {
            if let Some((id, image)) = line.split_once('|') {
                containers.push(ContainerSummary {
                    id: ContainerId::new(id),
                    image: image.to_string(),
                });
            }
        }
        Ok(containers)
    }

    async fn ping(&self) -> Result<()> {
        self.run_cmd(&["--version"])
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            kind: self.kind,
            version: "cli".to_string(),
        }
    }

    fn runtime_args(&self) -> (String, Vec<String>) {
        (self.cmd.clone(), self.cmd_prefix.clone())
    }

    async fn docker_endpoint(&self) -> Option<String> {
        if self.kind != RuntimeKind::Docker {
            return None;
        }
        let output = self
            .run_cmd(&[
                "context",
                "inspect",
                "--format={{(index .Endpoints \"docker\").Host}}",
            ])
            .await
            .ok()?;
        let endpoint = output.trim();
        if endpoint.is_empty() {
            None
        } else {
            Some(endpoint.to_string())
        }
    }
}

/// Parse one line of `image ls --format '{{.ID}}|{{.Repository}}:{{.Tag}}|{{.CreatedAt}}'`
fn parse_image_line(line: &str) -> Option<ImageSummary> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.splitn(3, '|');
    let id = parts.next()?;
    let tag = parts.next().unwrap_or("");
    let created = parts.next().and_then(parse_cli_timestamp);

    let repo_tags = if tag.is_empty() || tag.starts_with("<none>") {
        Vec::new()
    } else {
        vec![tag.to_string()]
    };

    Some(ImageSummary {
        id: ImageId::new(id),
        created,
        repo_tags,
    })
}

/// Parse the CLI's CreatedAt format, e.g. "2024-05-01 12:30:00 +0000 UTC".
/// The trailing zone name is dropped; the numeric offset is authoritative.
fn parse_cli_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let fields: Vec<&str> = s.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    let candidate = format!("{} {} {}", fields[0], fields[1], fields[2]);
    DateTime::parse_from_str(&candidate, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extract status, health, and port mappings from container inspect JSON
fn parse_inspect_state(info: &serde_json::Value) -> ContainerState {
    let state = info.get("State").and_then(serde_json::Value::as_object);

    let status = state
        .and_then(|s| s.get("Status"))
        .and_then(serde_json::Value::as_str)
        .map(ContainerStatus::from)
        .unwrap_or(ContainerStatus::Unknown);

    let health = state
        .and_then(|s| s.get("Health"))
        .and_then(|h| h.get("Status"))
        .and_then(serde_json::Value::as_str)
        .map(HealthStatus::from);

    let mut ports = Vec::new();
    if let Some(port_map) = info
        .get("NetworkSettings")
        .and_then(|n| n.get("Ports"))
        .and_then(|p| p.as_object())
    {
        for (container_port_str, bindings) in port_map {
            // "80/tcp" form
            let parts: Vec<&str> = container_port_str.split('/').collect();
            let port_num: u16 = parts[0].parse().unwrap_or(0);
            let protocol = parts.get(1).unwrap_or(&"tcp").to_string();

            if let Some(binding_array) = bindings.as_array() {
                for binding in binding_array {
                    let host_ip = binding
                        .get("HostIp")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    let host_port = binding
                        .get("HostPort")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok());

                    ports.push(PortMapping {
                        container_port: port_num,
                        host_port,
                        protocol: protocol.clone(),
                        host_ip,
                    });
                }
            } else if !bindings.is_null() {
                ports.push(PortMapping {
                    container_port: port_num,
                    host_port: None,
                    protocol,
                    host_ip: None,
                });
            }
        }
    }

    ContainerState {
        status,
        health,
        ports,
    }
}

/// Extract id, creation time, tags, and labels from image inspect JSON
fn parse_image_details(info: &serde_json::Value) -> ImageDetails {
    let id = info
        .get("Id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
        .to_string();

    let created = info
        .get("Created")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let repo_tags = info
        .get("RepoTags")
        .and_then(serde_json::Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let labels = info
        .get("Config")
        .and_then(|c| c.get("Labels"))
        .and_then(serde_json::Value::as_object)
        .map(|l| {
            l.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    ImageDetails {
        id: ImageId::new(id),
        created,
        repo_tags,
        labels,
    }
}
