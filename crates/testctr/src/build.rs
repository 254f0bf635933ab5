//! Per-test image builds from inline Dockerfiles
//!
//! When a test archive carries a Dockerfile blob, the whole archive becomes a
//! build context and the test runs from the resulting image. A failed build
//! falls back to a stock image so one bad Dockerfile cannot abort unrelated
//! tests; label-based naming lets the sweeper reclaim images that outlive a
//! crashed process.

use crate::archive::Archive;
use crate::config::Settings;
use crate::names;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use testctr_driver::{BuildRequest, ContainerDriver};

/// Image used when a Dockerfile build fails
pub const FALLBACK_IMAGE: &str = "alpine:latest";

/// A script-built image and its cleanup obligation
pub struct BuiltImage {
    driver: Arc<dyn ContainerDriver>,
    name: String,
    fallback: bool,
    keep: bool,
    removed: AtomicBool,
}

impl BuiltImage {
    /// Image reference to run the test from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the build failed and the stock fallback is in use
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Remove the built image unless retention was requested. Idempotent.
    pub async fn cleanup(&self) {
        if self.fallback || self.keep || self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.driver.remove_image(&self.name).await {
            tracing::warn!("failed to remove built image {}: {}", self.name, e);
        }
    }
}

/// Build an image from an archive containing a Dockerfile.
///
/// Returns an error only when the build context cannot be materialized on
/// disk; a failed build logs the error and yields the fallback image so the
/// test still runs (and usually produces a pointed failure of its own).
pub async fn build_archive_image(
    driver: Arc<dyn ContainerDriver>,
    archive: &Archive,
    test_name: &str,
    script_name: &str,
    settings: &Settings,
    build_args: &[String],
) -> Result<BuiltImage> {
    let dockerfile = archive
        .dockerfile()
        .map(|f| f.name.clone())
        .unwrap_or_else(|| "Dockerfile".to_string());

    let context = tempfile::tempdir()?;
    archive.materialize(context.path())?;

    let tag = names::image_name(&settings.label_prefix, test_name, names::unix_nanos());
    let labels = names::image_labels(&settings.label_prefix, test_name, script_name);

    let request = BuildRequest {
        context: context.path().to_path_buf(),
        dockerfile,
        tag: tag.clone(),
        labels,
        extra_args: build_args.to_vec(),
    };

    match driver.build_image(&request).await {
        Ok(id) => {
            tracing::info!("built image {} ({}) for {}", tag, id.short(), test_name);
            Ok(BuiltImage {
                driver,
                name: tag,
                fallback: false,
                keep: settings.keep_failed,
                removed: AtomicBool::new(false),
            })
        }
        Err(e) => {
            tracing::error!("image build for {} failed: {}", test_name, e);
            tracing::error!("falling back to {}; the test runs without its Dockerfile", FALLBACK_IMAGE);
            Ok(BuiltImage {
                driver,
                name: FALLBACK_IMAGE.to_string(),
                fallback: true,
                keep: settings.keep_failed,
                removed: AtomicBool::new(false),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveFile;
    use crate::test_support::{MockCall, MockDriver};

    fn dockerfile_archive() -> Archive {
        Archive {
            script: "go version\n".to_string(),
            files: vec![
                ArchiveFile {
                    name: "Dockerfile".to_string(),
                    data: b"FROM golang:1.21-alpine\n".to_vec(),
                },
                ArchiveFile {
                    name: "scripts/setup.sh".to_string(),
                    data: b"#!/bin/sh\necho setup\n".to_vec(),
                },
            ],
        }
    }

    // ==================== build context tests ====================

    #[test]
    fn test_build_context_materializes_files_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        dockerfile_archive().materialize(dir.path()).unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("Dockerfile")).unwrap(),
            b"FROM golang:1.21-alpine\n"
        );
        assert!(dir.path().join("scripts/setup.sh").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_context_modes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        dockerfile_archive().materialize(dir.path()).unwrap();

        let script = std::fs::metadata(dir.path().join("scripts/setup.sh")).unwrap();
        assert_eq!(script.permissions().mode() & 0o777, 0o755);
        let plain = std::fs::metadata(dir.path().join("Dockerfile")).unwrap();
        assert_eq!(plain.permissions().mode() & 0o777, 0o644);
    }

    // ==================== build tests ====================

    #[tokio::test]
    async fn test_build_success_names_and_cleanup() {
        let driver = Arc::new(MockDriver::new());
        let settings = Settings::default();
        let built = build_archive_image(
            driver.clone(),
            &dockerfile_archive(),
            "node_check",
            "node_check.txt",
            &settings,
            &[],
        )
        .await
        .unwrap();

        assert!(!built.is_fallback());
        assert!(built.name().starts_with("testctr-node_check:"));
        assert_eq!(
            driver.call_count(|c| matches!(c, MockCall::BuildImage { .. })),
            1
        );

        built.cleanup().await;
        built.cleanup().await;
        assert_eq!(driver.removed_images(), vec![built.name().to_string()]);
    }

    #[tokio::test]
    async fn test_build_failure_falls_back() {
        let driver = Arc::new(MockDriver::new());
        *driver.build_error.lock().unwrap() = Some("syntax error in Dockerfile".to_string());
        let settings = Settings::default();

        let built = build_archive_image(
            driver.clone(),
            &dockerfile_archive(),
            "bad",
            "bad.txt",
            &settings,
            &[],
        )
        .await
        .unwrap();

        assert!(built.is_fallback());
        assert_eq!(built.name(), FALLBACK_IMAGE);

        // The fallback image is never removed
        built.cleanup().await;
        assert!(driver.removed_images().is_empty());
    }

    #[tokio::test]
    async fn test_keep_failed_suppresses_removal() {
        let driver = Arc::new(MockDriver::new());
        let settings = Settings {
            keep_failed: true,
            ..Default::default()
        };

        let built = build_archive_image(
            driver.clone(),
            &dockerfile_archive(),
            "kept",
            "kept.txt",
            &settings,
            &[],
        )
        .await
        .unwrap();

        built.cleanup().await;
        assert!(driver.removed_images().is_empty());
    }
}
