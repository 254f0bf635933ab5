//! Test-file archive loader
//!
//! A test file is a two-part text document: a leading free-form comment
//! section (the script body), followed by zero or more file blobs, each
//! introduced by a `-- name --` marker line. Blob order is preserved and is
//! the extraction order. The loader performs no interpretation of contents.

/// A parsed test file: script text plus named file blobs
#[derive(Debug, Clone, Default)]
pub struct Archive {
    pub script: String,
    pub files: Vec<ArchiveFile>,
}

/// A named blob; `name` is a relative path, `/` denotes subdirectories
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveFile {
    /// Executable bit is inferred: `.sh` suffix or a basename of `entrypoint`
    pub fn executable(&self) -> bool {
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        base.ends_with(".sh") || base == "entrypoint"
    }
}

impl Archive {
    /// Parse a test file. Lines before the first marker form the script;
    /// each marker starts a blob running to the next marker or EOF.
    pub fn parse(input: &str) -> Archive {
        let mut script = String::new();
        let mut files: Vec<ArchiveFile> = Vec::new();
        let mut current: Option<(String, String)> = None;

        for line in input.lines() {
            if let Some(name) = marker_name(line) {
                if let Some((name, content)) = current.take() {
                    files.push(ArchiveFile {
                        name,
                        data: content.into_bytes(),
                    });
                }
                current = Some((name.to_string(), String::new()));
                continue;
            }

            match current {
                Some((_, ref mut content)) => {
                    content.push_str(line);
                    content.push('\n');
                }
                None => {
                    script.push_str(line);
                    script.push('\n');
                }
            }
        }

        if let Some((name, content)) = current.take() {
            files.push(ArchiveFile {
                name,
                data: content.into_bytes(),
            });
        }

        Archive { script, files }
    }

    /// The first blob named `Dockerfile` or `dockerfile`, if any
    pub fn dockerfile(&self) -> Option<&ArchiveFile> {
        self.files
            .iter()
            .find(|f| f.name == "Dockerfile" || f.name == "dockerfile")
    }

    /// Write every blob under `dir`, creating parent directories. On unix,
    /// executable blobs get mode 0755, everything else 0644.
    pub fn materialize(&self, dir: &std::path::Path) -> std::io::Result<()> {
        for file in &self.files {
            let path = dir.join(&file.name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &file.data)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = if file.executable() { 0o755 } else { 0o644 };
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;
            }
        }
        Ok(())
    }
}

/// Recognize a `-- name --` marker line (CRLF input tolerated)
fn marker_name(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let rest = line.strip_prefix("-- ")?;
    let name = rest.strip_suffix(" --")?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== marker tests ====================

    #[test]
    fn test_marker_name_basic() {
        assert_eq!(marker_name("-- config.json --"), Some("config.json"));
    }

    #[test]
    fn test_marker_name_with_subdir() {
        assert_eq!(marker_name("-- scripts/run.sh --"), Some("scripts/run.sh"));
    }

    #[test]
    fn test_marker_name_crlf() {
        assert_eq!(marker_name("-- a.txt --\r"), Some("a.txt"));
    }

    #[test]
    fn test_marker_name_rejects_non_markers() {
        assert!(marker_name("--not a marker--").is_none());
        assert!(marker_name("--  --").is_none());
        assert!(marker_name("echo -- hi").is_none());
    }

    // ==================== parse tests ====================

    #[test]
    fn test_parse_script_only() {
        let archive = Archive::parse("echo hello\nstdout hello\n");
        assert_eq!(archive.script, "echo hello\nstdout hello\n");
        assert!(archive.files.is_empty());
    }

    #[test]
    fn test_parse_script_and_files() {
        let input = "cat input.txt\n-- input.txt --\nline one\nline two\n-- other.txt --\ndata\n";
        let archive = Archive::parse(input);
        assert_eq!(archive.script, "cat input.txt\n");
        assert_eq!(archive.files.len(), 2);
        assert_eq!(archive.files[0].name, "input.txt");
        assert_eq!(archive.files[0].data, b"line one\nline two\n");
        assert_eq!(archive.files[1].name, "other.txt");
        assert_eq!(archive.files[1].data, b"data\n");
    }

    #[test]
    fn test_parse_preserves_blob_order() {
        let input = "script\n-- b --\n1\n-- a --\n2\n-- c --\n3\n";
        let archive = Archive::parse(input);
        let names: Vec<&str> = archive.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_parse_empty_blob() {
        let input = "script\n-- empty --\n-- full --\nx\n";
        let archive = Archive::parse(input);
        assert_eq!(archive.files[0].data, b"");
        assert_eq!(archive.files[1].data, b"x\n");
    }

    #[test]
    fn test_parse_no_trailing_newline() {
        let archive = Archive::parse("script\n-- f --\ndata");
        assert_eq!(archive.files[0].data, b"data\n");
    }

    #[test]
    fn test_dockerfile_detection() {
        let archive = Archive::parse("go version\n-- Dockerfile --\nFROM golang:1.21-alpine\n");
        assert_eq!(archive.dockerfile().unwrap().name, "Dockerfile");

        let lower = Archive::parse("x\n-- dockerfile --\nFROM alpine\n");
        assert!(lower.dockerfile().is_some());

        let none = Archive::parse("x\n-- Dockerfile.dev --\nFROM alpine\n");
        assert!(none.dockerfile().is_none());
    }

    #[test]
    fn test_executable_inference() {
        let sh = ArchiveFile {
            name: "scripts/setup.sh".to_string(),
            data: Vec::new(),
        };
        let entry = ArchiveFile {
            name: "entrypoint".to_string(),
            data: Vec::new(),
        };
        let plain = ArchiveFile {
            name: "data.bin".to_string(),
            data: Vec::new(),
        };
        assert!(sh.executable());
        assert!(entry.executable());
        assert!(!plain.executable());
    }
}
