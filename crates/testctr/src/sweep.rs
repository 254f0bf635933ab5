//! Image-lifecycle sweeper
//!
//! Test binaries killed by signals never run their cleanups, so script-built
//! images can leak. The sweeper runs once per process, before the first
//! container action: it lists images carrying the harness label, warns about
//! and removes those older than the configured age, and optionally reclaims
//! labeled images no container references. Label-based discovery means debris
//! from prior crashed runs is collected too.

use crate::config::Settings;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use testctr_driver::ContainerDriver;
use tokio::sync::OnceCell;

/// The once-per-process guard; the only sanctioned process-global state
static SWEEP: OnceCell<()> = OnceCell::const_new();

/// What a sweep did, for logging and tests
#[derive(Debug, Default, PartialEq)]
pub struct SweepReport {
    pub warned: usize,
    pub removed: usize,
    pub orphans_removed: usize,
}

/// Run the sweep at most once per process
pub async fn sweep_once(driver: &Arc<dyn ContainerDriver>, settings: &Settings) {
    SWEEP
        .get_or_init(|| async {
            let report = sweep_images(driver.as_ref(), settings).await;
            tracing::debug!(
                "image sweep: {} warned, {} removed, {} orphans removed",
                report.warned,
                report.removed,
                report.orphans_removed
            );
        })
        .await;
}

/// One full sweep pass. Per-image errors are logged and skipped; a single
/// bad image never aborts the run.
pub async fn sweep_images(driver: &dyn ContainerDriver, settings: &Settings) -> SweepReport {
    let mut report = SweepReport::default();

    let images = match driver.list_images(&settings.label_filter()).await {
        Ok(images) => images,
        Err(e) => {
            tracing::warn!("image sweep skipped, listing failed: {}", e);
            return report;
        }
    };

    let now = Utc::now();
    let max_age = chrono::Duration::from_std(settings.cleanup_age)
        .unwrap_or_else(|_| chrono::Duration::minutes(5));
    let mut stale: Vec<String> = Vec::new();

    for image in &images {
        let details = match driver.inspect_image(&image.id.0).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!("cannot inspect image {}: {}", image.id.short(), e);
                continue;
            }
        };
        let Some(created) = details.created.or(image.created) else {
            continue;
        };
        let age = now - created;
        if age <= max_age {
            continue;
        }

        let tag = details
            .repo_tags
            .first()
            .map(String::as_str)
            .unwrap_or("<untagged>");
        if settings.warn_images {
            tracing::warn!(
                "stale test image {} ({}) is {}m old",
                image.id.short(),
                tag,
                age.num_minutes()
            );
            report.warned += 1;
        }
        if settings.cleanup_images && !settings.keep_failed {
            stale.push(image.id.0.clone());
        }
    }

    for id in stale {
        match driver.remove_image(&id).await {
            Ok(()) => report.removed += 1,
            Err(e) => tracing::warn!("cannot remove image {}: {}", id, e),
        }
    }

    if settings.cleanup_orphans && !settings.keep_failed {
        report.orphans_removed = sweep_orphans(driver, settings).await;
    }

    report
}

/// Remove labeled images that no container references. The in-use set is the
/// union of container image refs and their truncated-id forms.
async fn sweep_orphans(driver: &dyn ContainerDriver, settings: &Settings) -> usize {
    let containers = match driver.list_containers().await {
        Ok(containers) => containers,
        Err(e) => {
            tracing::warn!("orphan sweep skipped, container listing failed: {}", e);
            return 0;
        }
    };

    let mut in_use: HashSet<String> = HashSet::new();
    for container in &containers {
        in_use.insert(container.image.clone());
        let short: String = container
            .image
            .trim_start_matches("sha256:")
            .chars()
            .take(12)
            .collect();
        in_use.insert(short);
    }

    let images = match driver.list_images(&settings.label_filter()).await {
        Ok(images) => images,
        Err(e) => {
            tracing::warn!("orphan sweep skipped, image listing failed: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for image in images {
        let referenced = image.repo_tags.iter().any(|t| in_use.contains(t))
            || in_use.contains(image.id.short())
            || in_use.contains(&image.id.0);
        if referenced {
            continue;
        }
        match driver.remove_image(&image.id.0).await {
            Ok(()) => {
                tracing::debug!("removed orphaned test image {}", image.id.short());
                removed += 1;
            }
            Err(e) => tracing::warn!("cannot remove orphaned image {}: {}", image.id.short(), e),
        }
    }
    removed
}
