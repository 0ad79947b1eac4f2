use std::{fs, io::Write, path::Path};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Writes `bytes` to `path` through a temp file in the same directory, so
/// readers see either the old file or the complete new one.
#[instrument(skip(bytes), fields(path = %path.display(), bytes = bytes.len()))]
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory: {}", parent.display()))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    temp_file
        .write_all(bytes)
        .context("failed to write temp file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist file: {}", path.display()))?;

    debug!("atomic write complete");
    Ok(())
}

/// Keeps letters, digits, `-` and `_`; everything else becomes `_`.
#[must_use]
pub fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem
    }
}
