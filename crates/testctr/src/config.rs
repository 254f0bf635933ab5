//! Process-global harness settings
//!
//! Sources, last one wins: built-in defaults, an optional `testctr.toml`
//! (path overridable via `TESTCTR_CONFIG`), then `TESTCTR_*` environment
//! variables. Settings are read once before tests start and consulted
//! read-only afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default image-age threshold for the sweeper
pub const DEFAULT_CLEANUP_AGE: Duration = Duration::from_secs(5 * 60);

/// Label and image-name namespace default
pub const DEFAULT_LABEL_PREFIX: &str = "testctr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Remove script-built images older than `cleanup_age` at process start
    pub cleanup_images: bool,
    /// Log warnings about old images
    pub warn_images: bool,
    /// Also remove labeled images not referenced by any container
    pub cleanup_orphans: bool,
    /// Age threshold for sweeping
    #[serde(with = "duration_text")]
    pub cleanup_age: Duration,
    /// Label and image-name namespace
    pub label_prefix: String,
    /// Suppress image deletion for this run (debugging)
    pub keep_failed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cleanup_images: true,
            warn_images: true,
            cleanup_orphans: true,
            cleanup_age: DEFAULT_CLEANUP_AGE,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
            keep_failed: false,
        }
    }
}

impl Settings {
    /// Load settings from the optional toml file and the environment.
    /// Bad values are logged and skipped; settings never abort a test run.
    pub fn load() -> Self {
        let path = std::env::var("TESTCTR_CONFIG").unwrap_or_else(|_| "testctr.toml".to_string());
        let mut settings = match Self::load_from(Path::new(&path)) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Ignoring settings file {}: {}", path, e);
                Self::default()
            }
        };
        settings.apply_env();
        settings
    }

    /// Load from a specific toml file; missing file means defaults
    pub fn load_from(path: &Path) -> Result<Self, toml::de::Error> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Apply `TESTCTR_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Some(v) = env_bool("TESTCTR_CLEANUP_IMAGES") {
            self.cleanup_images = v;
        }
        if let Some(v) = env_bool("TESTCTR_WARN_IMAGES") {
            self.warn_images = v;
        }
        if let Some(v) = env_bool("TESTCTR_CLEANUP_ORPHANS") {
            self.cleanup_orphans = v;
        }
        if let Ok(v) = std::env::var("TESTCTR_CLEANUP_AGE") {
            match testctr_engine::parse_duration(&v) {
                Ok(d) => self.cleanup_age = d,
                Err(e) => tracing::warn!("Ignoring TESTCTR_CLEANUP_AGE={}: {}", v, e),
            }
        }
        if let Ok(v) = std::env::var("TESTCTR_LABEL_PREFIX") {
            if !v.is_empty() {
                self.label_prefix = v;
            }
        }
        if let Some(v) = env_bool("TESTCTR_KEEP_FAILED") {
            self.keep_failed = v;
        }
    }

    /// The `{prefix}=true` filter the sweeper lists images by
    pub fn label_filter(&self) -> String {
        format!("{}=true", self.label_prefix)
    }
}

fn env_bool(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!("Ignoring {}={}: not a boolean", key, other);
            None
        }
    }
}

/// Durations in toml are written in the `30s` / `5m` form
mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&testctr_engine::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(de)?;
        testctr_engine::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
