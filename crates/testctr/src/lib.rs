//! Container-aware script test harness
//!
//! This crate runs declarative test files (a script body plus named file
//! blobs) either directly on the host through the script engine, or inside
//! ephemeral containers built and torn down per test. It provides:
//! - The test-file archive loader
//! - The `testctr` script command set and container conditions
//! - Per-test container registries with guaranteed teardown
//! - Per-test image builds from inline Dockerfiles, with a label-based
//!   image-lifecycle sweeper reclaiming leaked images across runs
//! - Host-mode and container-mode test runners

mod archive;
mod build;
mod commands;
mod conditions;
mod config;
mod dind;
mod error;
mod names;
mod registry;
mod runner;
mod sweep;
mod transfer;

pub use archive::{Archive, ArchiveFile};
pub use build::{build_archive_image, BuiltImage, FALLBACK_IMAGE};
pub use commands::{register_testctr, TestctrCommand, DEFAULT_EXEC_TIMEOUT, DEFAULT_WAIT_TIMEOUT};
pub use conditions::{ContainerCondition, ContainerReadyCondition};
pub use config::{Settings, DEFAULT_CLEANUP_AGE, DEFAULT_LABEL_PREFIX};
pub use dind::{detect_endpoint, DockerEndpoint};
pub use error::*;
pub use names::{env_key, sanitize_name};
pub use registry::{ContainerHandle, ContainerRegistry, ContainerSpec};
pub use runner::{
    run_host, run_in_container, wrapper_script, ContainerTestConfig, RunReport, TestFailure,
    DEFAULT_IMAGE,
};
pub use sweep::{sweep_images, sweep_once, SweepReport};
pub use transfer::{is_printable_text, shell_quote, TEXT_LIMIT};

#[cfg(test)]
pub mod test_support;
