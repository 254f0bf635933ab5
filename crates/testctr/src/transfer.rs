//! File transfer into running containers
//!
//! Each archive blob is written into the container workspace over one of two
//! channels: a shell here-doc for printable text, or base64 for everything
//! else. Channel selection is conservative so the transfer is binary-safe
//! for any blob: the text channel requires printable content that ends in a
//! newline and cannot collide with the here-doc sentinel.

use crate::archive::Archive;
use crate::registry::ContainerHandle;
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Duration;

/// Largest blob sent over the text channel
pub const TEXT_LIMIT: usize = 32 * 1024;

/// Here-doc sentinel for archive files
pub const FILE_SENTINEL: &str = "EOF";

/// Here-doc sentinel for the wrapper script
pub const SCRIPT_SENTINEL: &str = "SCRIPT_EOF";

/// Sentinel for the base64 channel; `_` never occurs in base64 output
const BASE64_SENTINEL: &str = "B64_EOF";

/// Timeout for each transfer exec
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

/// True when every byte is printable ASCII or one of tab/newline/CR
pub fn is_printable_text(data: &[u8]) -> bool {
    data.iter()
        .all(|&b| (0x20..0x7f).contains(&b) || b == b'\t' || b == b'\n' || b == b'\r')
}

/// True when `data` can go over the here-doc channel byte-for-byte:
/// printable, within the size limit, newline-terminated, and free of any
/// line equal to the sentinel
pub fn text_channel_ok(data: &[u8], sentinel: &str) -> bool {
    if data.len() > TEXT_LIMIT || !is_printable_text(data) {
        return false;
    }
    if !data.ends_with(b"\n") {
        return false;
    }
    // Safe: printable ASCII only
    let text = std::str::from_utf8(data).unwrap_or("");
    !text.lines().any(|line| line == sentinel)
}

/// Single-quote a string for POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Here-doc command writing `content` to `path`
fn heredoc_script(path: &str, content: &str, sentinel: &str) -> String {
    format!(
        "cat > {} <<'{}'\n{}{}",
        shell_quote(path),
        sentinel,
        content,
        sentinel
    )
}

/// Base64 command writing `data` to `path`
fn base64_script(path: &str, data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 76 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or(""));
        wrapped.push('\n');
    }
    format!(
        "base64 -d > {} <<'{}'\n{}{}",
        shell_quote(path),
        BASE64_SENTINEL,
        wrapped,
        BASE64_SENTINEL
    )
}

/// Parent directory of a slash-separated container path, if any
fn parent_dir(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(dir, _)| dir).filter(|d| !d.is_empty())
}

/// Write one blob to `{workdir}/{name}` inside the container
pub async fn write_file(
    handle: &ContainerHandle,
    workdir: &str,
    name: &str,
    data: &[u8],
) -> Result<()> {
    let path = format!("{}/{}", workdir, name);

    if let Some(dir) = parent_dir(&path) {
        let mkdir = format!("mkdir -p {}", shell_quote(dir));
        handle.exec_shell(&mkdir, Some(TRANSFER_TIMEOUT)).await?;
    }

    let script = if text_channel_ok(data, FILE_SENTINEL) {
        // Printable ASCII guaranteed by the channel check
        heredoc_script(&path, std::str::from_utf8(data).unwrap_or(""), FILE_SENTINEL)
    } else {
        base64_script(&path, data)
    };

    let result = handle.exec_shell(&script, Some(TRANSFER_TIMEOUT)).await?;
    if !result.success() {
        return Err(crate::HarnessError::ExecFailed {
            code: result.exit_code,
            output: result.output,
        });
    }
    Ok(())
}

/// Write the wrapper script with execute bits set
pub async fn write_script(handle: &ContainerHandle, path: &str, content: &str) -> Result<()> {
    let script = if text_channel_ok(content.as_bytes(), SCRIPT_SENTINEL) {
        heredoc_script(path, content, SCRIPT_SENTINEL)
    } else {
        base64_script(path, content.as_bytes())
    };

    let result = handle.exec_shell(&script, Some(TRANSFER_TIMEOUT)).await?;
    if !result.success() {
        return Err(crate::HarnessError::ExecFailed {
            code: result.exit_code,
            output: result.output,
        });
    }

    let chmod = format!("chmod +x {}", shell_quote(path));
    handle.exec_shell(&chmod, Some(TRANSFER_TIMEOUT)).await?;
    Ok(())
}

/// Extract every archive blob into the container workspace. Failures are
/// logged, not fatal: a missing file surfaces later as a useful script error.
pub async fn extract_archive(handle: &ContainerHandle, workdir: &str, archive: &Archive) {
    for file in &archive.files {
        if let Err(e) = write_file(handle, workdir, &file.name, &file.data).await {
            tracing::warn!(
                "failed to transfer {} into container {}: {}",
                file.name,
                handle.name(),
                e
            );
            continue;
        }
        if file.executable() {
            let chmod = format!("chmod +x {}", shell_quote(&format!("{}/{}", workdir, file.name)));
            if let Err(e) = handle.exec_shell(&chmod, Some(TRANSFER_TIMEOUT)).await {
                tracing::warn!("failed to chmod {}: {}", file.name, e);
            }
        }
    }
}
