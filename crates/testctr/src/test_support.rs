//! Test support utilities for the testctr crate
//!
//! Provides MockDriver and helpers for unit testing the harness without
//! requiring a real Docker/Podman runtime.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use testctr_driver::*;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Create {
        image: String,
        name: Option<String>,
    },
    Start {
        id: String,
    },
    Inspect {
        id: String,
    },
    Exec {
        id: String,
        cmd: Vec<String>,
    },
    Remove {
        id: String,
    },
    BuildImage {
        tag: String,
    },
    RemoveImage {
        image: String,
    },
    ListImages {
        label: String,
    },
    InspectImage {
        image: String,
    },
    ListContainers,
    Ping,
}

/// Configurable mock container driver for testing
pub struct MockDriver {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    /// Error for create calls (if Some, create fails)
    pub create_error: Arc<Mutex<Option<String>>>,
    /// Inspect result returned unless a queued response matches first
    pub inspect_result: Arc<Mutex<ContainerState>>,
    /// Per-call inspect response queue, popped before the fallback
    pub inspect_responses: Arc<Mutex<Vec<ContainerState>>>,
    /// Default exit code and output for exec calls
    pub exec_exit_code: Arc<Mutex<i64>>,
    pub exec_output: Arc<Mutex<String>>,
    /// Substring-matched exec overrides: first rule contained in the joined
    /// command wins. Checked before the default exit code/output.
    pub exec_rules: Arc<Mutex<Vec<(String, i64, String)>>>,
    /// Error for build calls (if Some, build fails)
    pub build_error: Arc<Mutex<Option<String>>>,
    /// Images visible to list_images / inspect_image
    pub images: Arc<Mutex<Vec<ImageDetails>>>,
    /// Containers visible to list_containers
    pub containers: Arc<Mutex<Vec<ContainerSummary>>>,
    next_id: AtomicU64,
}

impl MockDriver {
    /// Create a new mock with default success results: containers come up
    /// running and healthy immediately, execs succeed with empty output
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            create_error: Arc::new(Mutex::new(None)),
            inspect_result: Arc::new(Mutex::new(ContainerState {
                status: ContainerStatus::Running,
                health: None,
                ports: Vec::new(),
            })),
            inspect_responses: Arc::new(Mutex::new(Vec::new())),
            exec_exit_code: Arc::new(Mutex::new(0)),
            exec_output: Arc::new(Mutex::new(String::new())),
            exec_rules: Arc::new(Mutex::new(Vec::new())),
            build_error: Arc::new(Mutex::new(None)),
            images: Arc::new(Mutex::new(Vec::new())),
            containers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Count calls matching a predicate
    pub fn call_count<F: Fn(&MockCall) -> bool>(&self, filter: F) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| filter(c))
            .count()
    }

    /// All exec command vecs, in order (convenience)
    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                MockCall::Exec { cmd, .. } => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Publish a port in the default inspect result
    pub fn publish_port(&self, container_port: u16, host_port: u16) {
        self.inspect_result
            .lock()
            .unwrap()
            .ports
            .push(PortMapping {
                container_port,
                host_port: Some(host_port),
                protocol: "tcp".to_string(),
                host_ip: Some("0.0.0.0".to_string()),
            });
    }

    /// Add an exec override: any exec whose joined command contains `needle`
    /// returns the given exit code and output
    pub fn add_exec_rule(&self, needle: &str, exit_code: i64, output: &str) {
        self.exec_rules
            .lock()
            .unwrap()
            .push((needle.to_string(), exit_code, output.to_string()));
    }

    /// Add an image visible to listing and inspection
    pub fn add_image(&self, details: ImageDetails) {
        self.images.lock().unwrap().push(details);
    }

    /// Add a container visible to list_containers
    pub fn add_container(&self, id: &str, image: &str) {
        self.containers.lock().unwrap().push(ContainerSummary {
            id: ContainerId::new(id),
            image: image.to_string(),
        });
    }

    /// Ids of images removed through remove_image, in order
    pub fn removed_images(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                MockCall::RemoveImage { image } => Some(image.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn create(&self, config: &CreateConfig) -> Result<ContainerId> {
        self.record(MockCall::Create {
            image: config.image.clone(),
            name: config.name.clone(),
        });
        if let Some(msg) = self.create_error.lock().unwrap().as_ref() {
            return Err(DriverError::Runtime(msg.clone()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerId::new(format!("mock_container_{}", n)))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Start { id: id.0.clone() });
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerState> {
        self.record(MockCall::Inspect { id: id.0.clone() });
        let mut queue = self.inspect_responses.lock().unwrap();
        if !queue.is_empty() {
            return Ok(queue.remove(0));
        }
        drop(queue);
        Ok(self.inspect_result.lock().unwrap().clone())
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        self.record(MockCall::Exec {
            id: id.0.clone(),
            cmd: config.cmd.clone(),
        });
        let joined = config.cmd.join(" ");
        for (needle, exit_code, output) in self.exec_rules.lock().unwrap().iter() {
            if joined.contains(needle.as_str()) {
                return Ok(ExecResult {
                    exit_code: *exit_code,
                    output: output.clone(),
                });
            }
        }
        Ok(ExecResult {
            exit_code: *self.exec_exit_code.lock().unwrap(),
            output: self.exec_output.lock().unwrap().clone(),
        })
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Remove { id: id.0.clone() });
        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<ImageId> {
        self.record(MockCall::BuildImage {
            tag: request.tag.clone(),
        });
        if let Some(msg) = self.build_error.lock().unwrap().as_ref() {
            return Err(DriverError::Build(msg.clone()));
        }
        Ok(ImageId::new("sha256:mock_image_id"))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.record(MockCall::RemoveImage {
            image: image.to_string(),
        });
        Ok(())
    }

    async fn list_images(&self, label: &str) -> Result<Vec<ImageSummary>> {
        self.record(MockCall::ListImages {
            label: label.to_string(),
        });
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .map(|img| ImageSummary {
                id: img.id.clone(),
                created: img.created,
                repo_tags: img.repo_tags.clone(),
            })
            .collect())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails> {
        self.record(MockCall::InspectImage {
            image: image.to_string(),
        });
        self.images
            .lock()
            .unwrap()
            .iter()
            .find(|img| img.id.0 == image || img.repo_tags.iter().any(|t| t == image))
            .cloned()
            .ok_or_else(|| DriverError::ImageNotFound(image.to_string()))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.record(MockCall::ListContainers);
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        Ok(())
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            kind: RuntimeKind::Docker,
            version: "mock".to_string(),
        }
    }

    fn runtime_args(&self) -> (String, Vec<String>) {
        // Drop guards shell out to `true`, which swallows any arguments
        ("true".to_string(), Vec::new())
    }
}

/// Image details helper for sweeper tests
pub fn mock_image(id: &str, tag: &str, age: std::time::Duration, labels: &[(&str, &str)]) -> ImageDetails {
    ImageDetails {
        id: ImageId::new(id),
        created: Some(chrono::Utc::now() - chrono::Duration::from_std(age).unwrap()),
        repo_tags: if tag.is_empty() {
            Vec::new()
        } else {
            vec![tag.to_string()]
        },
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}
