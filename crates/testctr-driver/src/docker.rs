//! Docker API driver implementation using bollard

use crate::{
    BuildRequest, ContainerDriver, ContainerId, ContainerState, ContainerStatus, ContainerSummary,
    CreateConfig, DriverError, DriverInfo, ExecConfig, ExecResult, HealthStatus, ImageDetails,
    ImageId, ImageSummary, PortMapping, Result, RuntimeKind,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::service::{HealthStatusEnum, HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::Docker;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Docker API driver using the bollard crate
pub struct DockerDriver {
    client: Docker,
    kind: RuntimeKind,
}

impl DockerDriver {
    /// Connect over a unix socket or http endpoint and verify the daemon responds
    pub async fn new(endpoint: &str) -> Result<Self> {
        let client = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| DriverError::Connection(e.to_string()))?
        } else {
            let path = endpoint.trim_start_matches("unix://");
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| DriverError::Connection(e.to_string()))?
        };

        client
            .ping()
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            kind: RuntimeKind::Docker,
        })
    }

    /// Connect to a Podman socket (Docker-compatible API)
    pub async fn new_podman(endpoint: &str) -> Result<Self> {
        let mut driver = Self::new(endpoint).await?;
        driver.kind = RuntimeKind::Podman;
        Ok(driver)
    }
}

impl From<bollard::errors::Error> for DriverError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => DriverError::NotFound(message),
            other => DriverError::Runtime(other.to_string()),
        }
    }
}

fn is_not_found(e: &DriverError) -> bool {
    matches!(e, DriverError::NotFound(_) | DriverError::ImageNotFound(_))
}

/// Map `--build-arg K=V` entries from verbatim CLI args to API build args.
/// Anything else cannot be expressed through the API and is reported back.
fn api_build_args(extra_args: &[String]) -> (HashMap<String, String>, Vec<String>) {
    let mut build_args = HashMap::new();
    let mut unsupported = Vec::new();

    let mut iter = extra_args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(kv) = arg.strip_prefix("--build-arg=") {
            if let Some((k, v)) = kv.split_once('=') {
                build_args.insert(k.to_string(), v.to_string());
            }
        } else if arg == "--build-arg" {
            if let Some(kv) = iter.next() {
                if let Some((k, v)) = kv.split_once('=') {
                    build_args.insert(k.to_string(), v.to_string());
                }
            }
        } else {
            unsupported.push(arg.clone());
        }
    }

    (build_args, unsupported)
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn create(&self, config: &CreateConfig) -> Result<ContainerId> {
        let options = config.name.as_ref().map(|name| CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        });

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &config.ports {
            let container_port = format!("{}/tcp", port.container_port);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = PortBinding {
                host_ip: None,
                host_port: port.host_port.map(|p| p.to_string()),
            };
            port_bindings.insert(container_port, Some(vec![binding]));
        }

        let mounts: Vec<Mount> = config
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: if mounts.is_empty() { None } else { Some(mounts) },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.cmd.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(options, container_config)
            .await?;

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerState> {
        let info = self.client.inspect_container(&id.0, None).await?;

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerStatus::Unknown);

        let health = state
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status)
            .and_then(|h| match h {
                HealthStatusEnum::STARTING => Some(HealthStatus::Starting),
                HealthStatusEnum::HEALTHY => Some(HealthStatus::Healthy),
                HealthStatusEnum::UNHEALTHY => Some(HealthStatus::Unhealthy),
                HealthStatusEnum::EMPTY | HealthStatusEnum::NONE => None,
            });

        let mut ports = Vec::new();
        if let Some(network) = &info.network_settings {
            if let Some(port_map) = &network.ports {
                for (container_port, bindings) in port_map {
                    let parts: Vec<&str> = container_port.split('/').collect();
                    let port_num: u16 = parts[0].parse().unwrap_or(0);
                    let protocol = parts.get(1).unwrap_or(&"tcp").to_string();

                    if let Some(bindings) = bindings {
                        for binding in bindings {
                            ports.push(PortMapping {
                                container_port: port_num,
                                host_port: binding.host_port.as_ref().and_then(|p| p.parse().ok()),
                                protocol: protocol.clone(),
                                host_ip: binding.host_ip.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(ContainerState {
            status,
            health,
            ports,
        })
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        let options = CreateExecOptions {
            cmd: Some(config.cmd.clone()),
            env: Some(
                config
                    .env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            working_dir: config.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.client.create_exec(&id.0, options).await?;

        let result = self
            .client
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await?;

        let mut output_str = String::new();

        match result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message })
                        | Ok(bollard::container::LogOutput::StdErr { message }) => {
                            output_str.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(0);

        Ok(ExecResult {
            exit_code,
            output: output_str,
        })
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.client.remove_container(&id.0, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = DriverError::from(e);
                if is_not_found(&err) {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<ImageId> {
        let tar_data = create_build_context(&request.context)?;

        let (buildargs, unsupported) = api_build_args(&request.extra_args);
        if !unsupported.is_empty() {
            tracing::warn!(
                "Build args not expressible through the Docker API are ignored: {:?}",
                unsupported
            );
        }

        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone(),
            buildargs,
            labels: request.labels.clone(),
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(tar_data.into()));

        let mut image_id = None;
        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(DriverError::Build(error));
                    }
                    if let Some(aux) = output.aux {
                        if let Some(id) = aux.id {
                            image_id = Some(id);
                        }
                    }
                    if let Some(stream) = output.stream {
                        tracing::debug!("{}", stream.trim());
                    }
                }
                Err(e) => return Err(DriverError::Build(e.to_string())),
            }
        }

        image_id
            .map(ImageId::new)
            .ok_or_else(|| DriverError::Build("No image ID returned".to_string()))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        match self.client.remove_image(image, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = DriverError::from(e);
                if is_not_found(&err) {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn list_images(&self, label: &str) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptions {
            all: false,
            filters: HashMap::from([("label".to_string(), vec![label.to_string()])]),
            ..Default::default()
        };

        let images = self.client.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|img| ImageSummary {
                id: ImageId::new(img.id),
                created: Utc.timestamp_opt(img.created, 0).single(),
                repo_tags: img.repo_tags,
            })
            .collect())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails> {
        let info = self
            .client
            .inspect_image(image)
            .await
            .map_err(|e| DriverError::ImageNotFound(format!("{}: {}", image, e)))?;

        Ok(ImageDetails {
            id: ImageId::new(info.id.unwrap_or_else(|| image.to_string())),
            created: info
                .created
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            repo_tags: info.repo_tags.unwrap_or_default(),
            labels: info
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: ContainerId::new(c.id.unwrap_or_default()),
                image: c.image.unwrap_or_default(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            kind: self.kind,
            version: bollard::API_DEFAULT_VERSION.to_string(),
        }
    }

    fn runtime_args(&self) -> (String, Vec<String>) {
        // Fallback cleanup shells out to the matching CLI binary
        (self.kind.to_string(), Vec::new())
    }
}

/// Create a tar archive of the build context for the API build endpoint
fn create_build_context(context: &Path) -> Result<Vec<u8>> {
    use std::io::Cursor;
    use tar::Builder;

    let mut tar_data = Vec::new();
    {
        let cursor = Cursor::new(&mut tar_data);
        let mut builder = Builder::new(cursor);
        add_dir_to_tar(&mut builder, context, Path::new(""))?;
        builder.finish().map_err(DriverError::Io)?;
    }

    Ok(tar_data)
}

/// Recursively add directory contents to tar
fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    prefix: &Path,
) -> Result<()> {
    let entries = std::fs::read_dir(base).map_err(DriverError::Io)?;

    for entry in entries {
        let entry = entry.map_err(DriverError::Io)?;
        let path = entry.path();
        let name = prefix.join(entry.file_name());

        if path.is_dir() {
            add_dir_to_tar(builder, &path, &name)?;
        } else if path.is_file() {
            builder
                .append_path_with_name(&path, &name)
                .map_err(DriverError::Io)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    // ==================== api_build_args tests ====================

    #[test]
    fn test_api_build_args_equals_form() {
        let args = vec!["--build-arg=FOO=bar".to_string()];
        let (build_args, unsupported) = api_build_args(&args);
        assert_eq!(build_args.get("FOO").unwrap(), "bar");
        assert!(unsupported.is_empty());
    }

    #[test]
    fn test_api_build_args_split_form() {
        let args = vec!["--build-arg".to_string(), "A=1".to_string()];
        let (build_args, _) = api_build_args(&args);
        assert_eq!(build_args.get("A").unwrap(), "1");
    }

    #[test]
    fn test_api_build_args_reports_unsupported() {
        let args = vec![
            "--platform".to_string(),
            "linux/arm64".to_string(),
            "--build-arg=B=2".to_string(),
        ];
        let (build_args, unsupported) = api_build_args(&args);
        assert_eq!(build_args.len(), 1);
        assert_eq!(unsupported, vec!["--platform", "linux/arm64"]);
    }

    // ==================== build context tests ====================

    #[test]
    fn test_create_build_context_contains_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        fs::create_dir_all(dir.path().join("scripts")).unwrap();
        fs::write(dir.path().join("scripts/run.sh"), "#!/bin/sh\n").unwrap();

        let tar_data = create_build_context(dir.path()).unwrap();

        let mut archive = tar::Archive::new(std::io::Cursor::new(tar_data));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"scripts/run.sh".to_string()));
    }
}
