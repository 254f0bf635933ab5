//! Naming helpers: sanitized image names, label values, workspace paths,
//! and the script-state environment key projection

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;

/// Value namespace for the `{prefix}.type` label on script-built images
pub const IMAGE_TYPE_SCRIPT_BUILT: &str = "script-built";

/// Value for the `{prefix}.created-by` label
pub const CREATED_BY: &str = "testctrscript";

/// Sanitize a test or image name for use in image tags and label values:
/// `/` becomes `_`, `:` becomes `-`, lowercased, truncated to 63 chars
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' => '_',
            ':' => '-',
            c => c.to_ascii_lowercase(),
        })
        .take(63)
        .collect()
}

/// Label values share the image-name sanitization rules
pub fn sanitize_label_value(value: &str) -> String {
    sanitize_name(value)
}

/// Script-state environment key for a logical container name:
/// `TESTCTR_CONTAINER_<UPPER(name with '-' mapped to '_')>`
pub fn env_key(name: &str) -> String {
    let key: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TESTCTR_CONTAINER_{}", key)
}

/// Current wall-clock time in nanoseconds since the epoch
pub fn unix_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_else(|| {
        // Past 2262 the i64 nanos overflow; fall back to micros resolution
        Utc::now().timestamp_micros().saturating_mul(1000)
    })
}

/// Image name for a script-built image: `{prefix}-{sanitized}:{unix_nanos}`
pub fn image_name(prefix: &str, test_name: &str, nanos: i64) -> String {
    format!("{}-{}:{}", prefix, sanitize_name(test_name), nanos)
}

/// Labels stamped on every script-built image
pub fn image_labels(prefix: &str, test_name: &str, script_name: &str) -> HashMap<String, String> {
    HashMap::from([
        (prefix.to_string(), "true".to_string()),
        (
            format!("{}.testname", prefix),
            sanitize_label_value(test_name),
        ),
        (
            format!("{}.script", prefix),
            sanitize_label_value(script_name),
        ),
        (format!("{}.timestamp", prefix), Utc::now().to_rfc3339()),
        (
            format!("{}.type", prefix),
            IMAGE_TYPE_SCRIPT_BUILT.to_string(),
        ),
        (format!("{}.created-by", prefix), CREATED_BY.to_string()),
    ])
}

/// Base labels for containers the harness starts
pub fn container_labels(prefix: &str, test_name: &str) -> HashMap<String, String> {
    HashMap::from([
        (prefix.to_string(), "true".to_string()),
        (
            format!("{}.testname", prefix),
            sanitize_label_value(test_name),
        ),
        (format!("{}.created-by", prefix), CREATED_BY.to_string()),
    ])
}

/// Per-test workspace directory inside the container
pub fn workspace_path(test_name: &str, nanos: i64) -> String {
    format!("/tmp/testwork/test_{}_{}", sanitize_name(test_name), nanos)
}

/// Path for the synthesized wrapper script inside the container
pub fn script_path(test_name: &str, nanos: i64) -> String {
    format!("/tmp/scripts/test_{}_{}.sh", sanitize_name(test_name), nanos)
}

/// Test name derived from a test file path (the file stem)
pub fn test_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== sanitize_name tests ====================

    #[test]
    fn test_sanitize_name_replacements() {
        assert_eq!(sanitize_name("Suite/Case:One"), "suite_case-one");
    }

    #[test]
    fn test_sanitize_name_truncates_to_63() {
        let long = "x".repeat(100);
        assert_eq!(sanitize_name(&long).len(), 63);
    }

    #[test]
    fn test_sanitize_name_passthrough() {
        assert_eq!(sanitize_name("simple-test_1"), "simple-test_1");
    }

    // ==================== env_key tests ====================

    #[test]
    fn test_env_key_uppercases_and_maps_hyphen() {
        assert_eq!(env_key("my-cache"), "TESTCTR_CONTAINER_MY_CACHE");
    }

    #[test]
    fn test_env_key_maps_punctuation() {
        assert_eq!(env_key("web.1"), "TESTCTR_CONTAINER_WEB_1");
    }

    // ==================== naming tests ====================

    #[test]
    fn test_image_name_shape() {
        let name = image_name("testctr", "My/Test", 123456789);
        assert_eq!(name, "testctr-my_test:123456789");
    }

    #[test]
    fn test_workspace_path_shape() {
        let path = workspace_path("My Test", 42);
        assert_eq!(path, "/tmp/testwork/test_my test_42");
    }

    #[test]
    fn test_image_labels_complete() {
        let labels = image_labels("testctr", "demo", "demo.txt");
        assert_eq!(labels.get("testctr").unwrap(), "true");
        assert_eq!(labels.get("testctr.testname").unwrap(), "demo");
        assert_eq!(labels.get("testctr.script").unwrap(), "demo.txt");
        assert_eq!(labels.get("testctr.type").unwrap(), "script-built");
        assert_eq!(labels.get("testctr.created-by").unwrap(), "testctrscript");
        assert!(labels.contains_key("testctr.timestamp"));
    }

    #[test]
    fn test_test_name_from_path() {
        assert_eq!(
            test_name_from_path(Path::new("testdata/basic_redis.txt")),
            "basic_redis"
        );
    }
}
