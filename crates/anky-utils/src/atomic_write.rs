//! Atomic file writes for file-backed pipeline state
//!
//! Content goes to a temporary file in the target's directory, is fsynced,
//! and is then renamed over the target, so a reader (or a crash) never sees a
//! half-written record.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;

use tempfile::NamedTempFile;

/// Atomically replace `path` with `content`.
///
/// Parent directories are created as needed.
pub fn write_file_atomic(path: &Utf8Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create parent directory: {parent}"))?;

    let mut temp_file = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in: {parent}"))?;

    temp_file
        .write_all(content)
        .context("Failed to write content to temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;

    temp_file
        .persist(path.as_std_path())
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to atomically write file: {path}"))?;

    Ok(())
}

/// Like [`write_file_atomic`], but skips the write when `path` already holds
/// exactly `content`. Returns whether the file changed.
pub fn write_file_atomic_if_changed(path: &Utf8Path, content: &[u8]) -> Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == content => Ok(false),
        _ => {
            write_file_atomic(path, content)?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn target(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn writes_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = target(&dir, "nested/deeper/record.json");
        write_file_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = target(&dir, "record.json");
        write_file_atomic(&path, b"old").unwrap();
        write_file_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn identical_content_is_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = target(&dir, "record.json");
        assert!(write_file_atomic_if_changed(&path, b"same").unwrap());
        assert!(!write_file_atomic_if_changed(&path, b"same").unwrap());
        assert!(write_file_atomic_if_changed(&path, b"different").unwrap());
    }
}
