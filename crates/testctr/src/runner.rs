//! Test drivers: host mode and container mode
//!
//! Both runners glob a pattern of test files and run each file as its own
//! parallel task. Host mode feeds the archive script straight to the engine
//! with the `testctr` command set registered; container mode provisions a
//! long-lived container, materializes the archive inside it, and executes the
//! script under `sh`. A test's containers and built image are always cleaned
//! up, pass or fail; panics inside a test task are recovered and reported as
//! failures.

use crate::archive::Archive;
use crate::build::{build_archive_image, BuiltImage};
use crate::commands::register_testctr;
use crate::config::Settings;
use crate::names::{self, test_name_from_path};
use crate::registry::{ContainerHandle, ContainerSpec};
use crate::sweep::sweep_once;
use crate::transfer::{self, shell_quote};
use crate::{dind, HarnessError, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testctr_driver::ContainerDriver;
use testctr_engine::{Engine, State};
use tokio::task::JoinSet;

/// Image used when no option overrides it
pub const DEFAULT_IMAGE: &str = "ubuntu:latest";

/// Timeout for provisioning execs (mkdir, tool install, transfers)
const PREP_TIMEOUT: Duration = Duration::from_secs(60);

/// Keep-alive command for the test container
const KEEPALIVE_CMD: [&str; 2] = ["sleep", "3600"];

/// Best-effort install of download tools on apk-based images
const TOOL_INSTALL: &str = "if command -v apk >/dev/null 2>&1; then \
if ! command -v wget >/dev/null 2>&1 && ! command -v curl >/dev/null 2>&1; then \
apk add --no-cache wget curl; fi; fi";

/// Options for container-mode runs, folded into a plain record
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerTestConfig {
    /// Image tests run in when the archive has no Dockerfile
    pub image: String,
    /// `K=V` entries exported inside the container
    pub env: Vec<String>,
    /// Provision a Docker endpoint inside the test container
    pub docker_in_docker: bool,
    /// Extra build arguments passed verbatim to image builds
    pub build_args: Vec<String>,
}

impl Default for ContainerTestConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            env: Vec::new(),
            docker_in_docker: false,
            build_args: Vec::new(),
        }
    }
}

impl ContainerTestConfig {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn with_docker_in_docker(mut self) -> Self {
        self.docker_in_docker = true;
        self
    }

    pub fn with_build_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.build_args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Outcome of a run over a set of test files
#[derive(Debug, Default)]
pub struct RunReport {
    pub passed: Vec<String>,
    pub failed: Vec<TestFailure>,
}

/// One failed test file
#[derive(Debug)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
}

impl RunReport {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }

    /// Human-readable summary, one line per failure
    pub fn summarize(&self) -> String {
        let mut out = format!("{} passed, {} failed", self.passed.len(), self.failed.len());
        for failure in &self.failed {
            out.push_str(&format!("\n--- {}: {}", failure.name, failure.message));
        }
        out
    }
}

/// Canonical host-mode runner: glob test files and feed each archive's
/// script to the engine with the `testctr` set registered
pub async fn run_host(
    driver: Arc<dyn ContainerDriver>,
    pattern: &str,
    settings: &Settings,
) -> Result<RunReport> {
    let files = glob_files(pattern)?;

    let mut tasks = JoinSet::new();
    for file in files {
        let driver = driver.clone();
        let settings = settings.clone();
        let name = test_name_from_path(&file);
        tasks.spawn(async move {
            let result = AssertUnwindSafe(host_test(driver, file, settings))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(format!("panic: {}", panic_message(payload))));
            (name, result)
        });
    }

    Ok(collect(tasks).await)
}

/// Container-mode runner: each test file runs inside its own ephemeral
/// container, built from an inline Dockerfile when the archive has one
pub async fn run_in_container(
    driver: Arc<dyn ContainerDriver>,
    pattern: &str,
    config: &ContainerTestConfig,
    settings: &Settings,
    deadline: Option<Duration>,
) -> Result<RunReport> {
    if *config == ContainerTestConfig::default() {
        tracing::info!("no container options set; tests run in {}", DEFAULT_IMAGE);
    }

    sweep_once(&driver, settings).await;

    let files = glob_files(pattern)?;
    let budget = child_budget(deadline);

    let mut tasks = JoinSet::new();
    for file in files {
        let driver = driver.clone();
        let config = config.clone();
        let settings = settings.clone();
        let name = test_name_from_path(&file);
        tasks.spawn(async move {
            let test = AssertUnwindSafe(container_test(driver, file, config, settings, budget))
                .catch_unwind();
            let result = match budget {
                Some(limit) => match tokio::time::timeout(limit, test).await {
                    Ok(caught) => caught,
                    Err(_) => Ok(Err(format!("timed out after {:?}", limit))),
                },
                None => test.await,
            }
            .unwrap_or_else(|payload| Err(format!("panic: {}", panic_message(payload))));
            (name, result)
        });
    }

    Ok(collect(tasks).await)
}

/// Grace handling: with a deadline, reserve `max(100ms, deadline/20)` on each
/// end and give the rest to the tests
fn child_budget(deadline: Option<Duration>) -> Option<Duration> {
    let deadline = deadline?;
    let grace = std::cmp::max(Duration::from_millis(100), deadline / 20);
    Some(deadline.saturating_sub(grace * 2))
}

fn glob_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = glob::glob(pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(HarnessError::NoTestData(pattern.to_string()));
    }
    Ok(files)
}

async fn collect(mut tasks: JoinSet<(String, std::result::Result<(), String>)>) -> RunReport {
    let mut report = RunReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(()))) => {
                tracing::debug!("PASS {}", name);
                report.passed.push(name);
            }
            Ok((name, Err(message))) => {
                tracing::error!("FAIL {}: {}", name, message);
                report.failed.push(TestFailure { name, message });
            }
            Err(e) => {
                report.failed.push(TestFailure {
                    name: "<test task>".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
    report.passed.sort();
    report
}

/// One host-mode test: extract files to a temp dir, run the script through
/// the engine, then remove every container the script left running
async fn host_test(
    driver: Arc<dyn ContainerDriver>,
    file: PathBuf,
    settings: Settings,
) -> std::result::Result<(), String> {
    let test_name = test_name_from_path(&file);
    let input = tokio::fs::read_to_string(&file)
        .await
        .map_err(|e| format!("reading {}: {}", file.display(), e))?;
    let archive = Archive::parse(&input);

    let workdir = tempfile::tempdir().map_err(|e| format!("creating workdir: {}", e))?;
    archive
        .materialize(workdir.path())
        .map_err(|e| format!("extracting archive: {}", e))?;

    let state = State::new(workdir.path());
    state.set_env("WORK", workdir.path().to_string_lossy());

    let mut engine = Engine::new();
    let registry = register_testctr(&mut engine, driver, &settings, &test_name);

    let result = engine.run(&state, &archive.script).await;

    // Guaranteed teardown: remove everything the script started, pass or fail
    for (name, handle) in registry.drain() {
        if let Err(e) = handle.remove().await {
            tracing::warn!("failed to remove container {}: {}", name, e);
        }
    }

    result.map_err(|e| e.to_string())
}

/// One container-mode test: build (when a Dockerfile blob exists), start,
/// provision, extract, wrap, execute, capture, clean up
async fn container_test(
    driver: Arc<dyn ContainerDriver>,
    file: PathBuf,
    config: ContainerTestConfig,
    settings: Settings,
    budget: Option<Duration>,
) -> std::result::Result<(), String> {
    let test_name = test_name_from_path(&file);
    let script_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| test_name.clone());
    let input = tokio::fs::read_to_string(&file)
        .await
        .map_err(|e| format!("reading {}: {}", file.display(), e))?;
    let archive = Archive::parse(&input);

    let built: Option<BuiltImage> = if archive.dockerfile().is_some() {
        Some(
            build_archive_image(
                driver.clone(),
                &archive,
                &test_name,
                &script_name,
                &settings,
                &config.build_args,
            )
            .await
            .map_err(|e| format!("materializing build context: {}", e))?,
        )
    } else {
        None
    };
    let final_image = built
        .as_ref()
        .map(|b| b.name().to_string())
        .unwrap_or_else(|| config.image.clone());

    let result = run_script_in_container(
        &driver,
        &archive,
        &test_name,
        final_image,
        &config,
        &settings,
        budget,
    )
    .await;

    if let Some(built) = built {
        built.cleanup().await;
    }

    result
}

async fn run_script_in_container(
    driver: &Arc<dyn ContainerDriver>,
    archive: &Archive,
    test_name: &str,
    image: String,
    config: &ContainerTestConfig,
    settings: &Settings,
    budget: Option<Duration>,
) -> std::result::Result<(), String> {
    let (mounts, dind_env) = if config.docker_in_docker {
        let endpoint = dind::detect_endpoint(driver.as_ref()).await;
        dind::provision(&endpoint)
    } else {
        (Vec::new(), Vec::new())
    };

    let spec = ContainerSpec {
        image,
        name: test_name.to_string(),
        ports: Vec::new(),
        env: dind_env
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect(),
        cmd: Some(KEEPALIVE_CMD.iter().map(|s| s.to_string()).collect()),
        labels: names::container_labels(&settings.label_prefix, test_name),
        mounts,
    };

    // Container creation failure is fatal to this test
    let handle = ContainerHandle::start(driver.clone(), spec)
        .await
        .map_err(|e| format!("starting test container: {}", e))?;

    let result = drive_script(&handle, archive, test_name, config, budget).await;

    if let Err(e) = handle.remove().await {
        tracing::warn!("failed to remove test container {}: {}", test_name, e);
    }

    result
}

/// Workspace provisioning and script execution inside a running container.
/// Everything up to the script exec is best-effort: a broken step surfaces
/// as a useful script failure rather than aborting the test outright.
async fn drive_script(
    handle: &ContainerHandle,
    archive: &Archive,
    test_name: &str,
    config: &ContainerTestConfig,
    budget: Option<Duration>,
) -> std::result::Result<(), String> {
    let prep = "mkdir -p /tmp/testwork /tmp/scripts";
    if let Err(e) = handle.exec_shell(prep, Some(PREP_TIMEOUT)).await {
        tracing::warn!("environment prep failed in {}: {}", test_name, e);
    }
    match handle.exec_shell(TOOL_INSTALL, Some(PREP_TIMEOUT)).await {
        Ok(result) if !result.success() => {
            tracing::warn!("tool install failed in {}: {}", test_name, result.output);
        }
        Err(e) => tracing::warn!("tool install failed in {}: {}", test_name, e),
        Ok(_) => {}
    }

    let nanos = names::unix_nanos();
    let workdir = names::workspace_path(test_name, nanos);
    let mkdir = format!("mkdir -p {}", shell_quote(&workdir));
    if let Err(e) = handle.exec_shell(&mkdir, Some(PREP_TIMEOUT)).await {
        tracing::warn!("workspace creation failed in {}: {}", test_name, e);
    }

    transfer::extract_archive(handle, &workdir, archive).await;

    let wrapper = wrapper_script(&workdir, &config.env, &archive.script);
    let script_path = names::script_path(test_name, nanos);
    if let Err(e) = transfer::write_script(handle, &script_path, &wrapper).await {
        tracing::warn!("wrapper script transfer failed in {}: {}", test_name, e);
    }

    let argv = vec!["sh".to_string(), script_path.clone()];
    let outcome = match handle.exec(&argv, budget).await {
        Ok(result) if result.success() => {
            tracing::info!("{} output:\n{}", test_name, result.output);
            Ok(())
        }
        Ok(result) => Err(format!(
            "script exited with status {}:\n{}",
            result.exit_code, result.output
        )),
        Err(e) => Err(format!("script execution failed: {}", e)),
    };

    // Best-effort workspace cleanup
    let cleanup = format!("rm -rf {}", shell_quote(&workdir));
    if let Err(e) = handle.exec_shell(&cleanup, Some(PREP_TIMEOUT)).await {
        tracing::warn!("workspace cleanup failed in {}: {}", test_name, e);
    }

    outcome
}

/// The synthesized wrapper: strict shell, workspace cwd, `WORK` plus user
/// env exported, then the script text verbatim
pub fn wrapper_script(workdir: &str, env: &[String], script: &str) -> String {
    let mut exports = format!("export WORK={}", workdir);
    for entry in env {
        exports.push_str(" && export ");
        exports.push_str(entry);
    }
    let mut body = script.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    format!("#!/bin/sh\nset -e\ncd {}\n{}\n{}", workdir, exports, body)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockDriver};
    use std::fs;

    fn testdata(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    fn pattern(dir: &tempfile::TempDir) -> String {
        format!("{}/*.txt", dir.path().display())
    }

    // ==================== helper tests ====================

    #[test]
    fn test_wrapper_script_shape() {
        let wrapper = wrapper_script(
            "/tmp/testwork/test_demo_1",
            &["FOO=bar".to_string(), "BAZ=qux".to_string()],
            "echo hello",
        );
        assert_eq!(
            wrapper,
            "#!/bin/sh\n\
             set -e\n\
             cd /tmp/testwork/test_demo_1\n\
             export WORK=/tmp/testwork/test_demo_1 && export FOO=bar && export BAZ=qux\n\
             echo hello\n"
        );
    }

    #[test]
    fn test_wrapper_script_keeps_script_verbatim() {
        let script = "line one\nline two\n";
        let wrapper = wrapper_script("/w", &[], script);
        assert!(wrapper.ends_with("line one\nline two\n"));
    }

    #[test]
    fn test_child_budget_reserves_grace() {
        assert_eq!(child_budget(None), None);

        // Long deadline: grace is deadline/20 on each end
        let budget = child_budget(Some(Duration::from_secs(100))).unwrap();
        assert_eq!(budget, Duration::from_secs(90));

        // Short deadline: the 100ms floor applies
        let budget = child_budget(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(budget, Duration::from_millis(800));
    }

    #[test]
    fn test_config_builders() {
        let config = ContainerTestConfig::default()
            .with_image("golang:1.21")
            .with_env("CI=1")
            .with_docker_in_docker()
            .with_build_args(["--platform", "linux/amd64"]);
        assert_eq!(config.image, "golang:1.21");
        assert_eq!(config.env, vec!["CI=1"]);
        assert!(config.docker_in_docker);
        assert_eq!(config.build_args.len(), 2);
    }

    // ==================== container-mode tests ====================

    #[tokio::test]
    async fn test_container_mode_happy_path() {
        let dir = testdata(&[("hello.txt", "echo hello\n-- note.txt --\nignored\n")]);
        let driver = Arc::new(MockDriver::new());
        let settings = Settings::default();

        let report = run_in_container(
            driver.clone(),
            &pattern(&dir),
            &ContainerTestConfig::default(),
            &settings,
            None,
        )
        .await
        .unwrap();

        assert!(report.ok(), "{}", report.summarize());
        assert_eq!(report.passed, vec!["hello"]);

        // The default image was used and the container torn down
        assert!(driver.get_calls().iter().any(|c| matches!(
            c,
            MockCall::Create { image, .. } if image == DEFAULT_IMAGE
        )));
        assert_eq!(driver.call_count(|c| matches!(c, MockCall::Remove { .. })), 1);

        // Workspace created, script executed, workspace removed
        let execs: Vec<String> = driver.exec_commands().iter().map(|c| c.join(" ")).collect();
        assert!(execs.iter().any(|c| c.contains("mkdir -p '/tmp/testwork/test_hello_")));
        assert!(execs.iter().any(|c| c.starts_with("sh /tmp/scripts/test_hello_")));
        assert!(execs.iter().any(|c| c.contains("rm -rf '/tmp/testwork/test_hello_")));
    }

    #[tokio::test]
    async fn test_container_mode_script_failure_reported() {
        let dir = testdata(&[("broken.txt", "exit 3\n")]);
        let driver = Arc::new(MockDriver::new());
        driver.add_exec_rule("sh /tmp/scripts/test_broken_", 3, "something went wrong\n");

        let report = run_in_container(
            driver.clone(),
            &pattern(&dir),
            &ContainerTestConfig::default(),
            &Settings::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.failed.len(), 1);
        let failure = &report.failed[0];
        assert_eq!(failure.name, "broken");
        assert!(failure.message.contains("status 3"));
        assert!(failure.message.contains("something went wrong"));

        // Cleanup still ran
        assert_eq!(driver.call_count(|c| matches!(c, MockCall::Remove { .. })), 1);
    }

    #[tokio::test]
    async fn test_container_mode_builds_dockerfile_image() {
        let dir = testdata(&[(
            "build.txt",
            "go version\n-- Dockerfile --\nFROM golang:1.21-alpine\n",
        )]);
        let driver = Arc::new(MockDriver::new());

        let report = run_in_container(
            driver.clone(),
            &pattern(&dir),
            &ContainerTestConfig::default(),
            &Settings::default(),
            None,
        )
        .await
        .unwrap();
        assert!(report.ok(), "{}", report.summarize());

        // Built image used for the container, then scheduled for removal
        let calls = driver.get_calls();
        let built_tag = calls
            .iter()
            .find_map(|c| match c {
                MockCall::BuildImage { tag } => Some(tag.clone()),
                _ => None,
            })
            .expect("image was built");
        assert!(built_tag.starts_with("testctr-build:"));
        assert!(calls.iter().any(|c| matches!(
            c,
            MockCall::Create { image, .. } if *image == built_tag
        )));
        assert_eq!(driver.removed_images(), vec![built_tag]);
    }

    #[tokio::test]
    async fn test_container_mode_no_testdata() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(MockDriver::new());

        let err = run_in_container(
            driver,
            &format!("{}/*.txt", dir.path().display()),
            &ContainerTestConfig::default(),
            &Settings::default(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::NoTestData(_)));
    }

    #[tokio::test]
    async fn test_container_mode_parallel_files_isolated() {
        let dir = testdata(&[
            ("one.txt", "echo one\n"),
            ("two.txt", "echo two\n"),
            ("three.txt", "echo three\n"),
        ]);
        let driver = Arc::new(MockDriver::new());

        let report = run_in_container(
            driver.clone(),
            &pattern(&dir),
            &ContainerTestConfig::default(),
            &Settings::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.passed, vec!["one", "three", "two"]);
        // One container per file, each removed
        assert_eq!(driver.call_count(|c| matches!(c, MockCall::Create { .. })), 3);
        assert_eq!(driver.call_count(|c| matches!(c, MockCall::Remove { .. })), 3);
    }

    // ==================== host-mode tests ====================

    #[tokio::test]
    async fn test_host_mode_engine_script() {
        let dir = testdata(&[(
            "greet.txt",
            "echo hello\nstdout hello\n-- input.txt --\npayload\n",
        )]);
        let driver = Arc::new(MockDriver::new());

        let report = run_host(driver.clone(), &pattern(&dir), &Settings::default())
            .await
            .unwrap();
        assert!(report.ok(), "{}", report.summarize());
        assert!(driver.get_calls().is_empty(), "no containers were needed");
    }

    #[tokio::test]
    async fn test_host_mode_extracts_files_to_workdir() {
        let dir = testdata(&[(
            "files.txt",
            "exec cat sub/data.txt\nstdout payload\n-- sub/data.txt --\npayload\n",
        )]);
        let driver = Arc::new(MockDriver::new());

        let report = run_host(driver, &pattern(&dir), &Settings::default())
            .await
            .unwrap();
        assert!(report.ok(), "{}", report.summarize());
    }

    #[tokio::test]
    async fn test_host_mode_failure_reported() {
        let dir = testdata(&[("bad.txt", "echo hi\nstdout goodbye\n")]);
        let driver = Arc::new(MockDriver::new());

        let report = run_host(driver, &pattern(&dir), &Settings::default())
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].message.contains("no match"));
    }

    #[tokio::test]
    async fn test_host_mode_removes_leftover_containers() {
        let dir = testdata(&[("leak.txt", "testctr start redis:7 cache\n")]);
        let driver = Arc::new(MockDriver::new());

        let report = run_host(driver.clone(), &pattern(&dir), &Settings::default())
            .await
            .unwrap();
        assert!(report.ok(), "{}", report.summarize());

        // The script never stopped `cache`; the runner did
        assert_eq!(driver.call_count(|c| matches!(c, MockCall::Create { .. })), 1);
        assert_eq!(driver.call_count(|c| matches!(c, MockCall::Remove { .. })), 1);
    }

    #[tokio::test]
    async fn test_host_mode_failure_still_cleans_up() {
        let dir = testdata(&[(
            "failing.txt",
            "testctr start redis:7 cache\nstdout never-matches\n",
        )]);
        let driver = Arc::new(MockDriver::new());

        let report = run_host(driver.clone(), &pattern(&dir), &Settings::default())
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(driver.call_count(|c| matches!(c, MockCall::Remove { .. })), 1);
    }
}
