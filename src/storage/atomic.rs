//! Write-then-rename file helpers.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix of in-flight files; such files are never part of the index.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Hidden sibling used while `path` is being written.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{TEMP_SUFFIX}"))
}

/// Writes `bytes` to `path` so that `path` either does not exist or is complete.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Copies `src` to `dst` through a temporary file in the destination directory.
pub(crate) fn copy_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    let tmp = temp_path(dst);
    let result = fs::copy(src, &tmp).and_then(|_| fs::rename(&tmp, dst));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Removes leftover temporary files from an interrupted write.
pub(crate) fn remove_stale_temps(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for path in entries.filter_map(Result::ok).map(|e| e.path()) {
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX));
        if is_temp && fs::remove_file(&path).is_ok() {
            tracing::debug!(path = %path.display(), "Removed stale temporary file");
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_leaves_only_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");

        write_atomic(&path, b"hello").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"hello");
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("a.png");

        assert!(write_atomic(&path, b"hello").is_err());
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_stale_temps_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(temp_path(&dir.path().join("x.png")), b"partial").unwrap();
        fs::write(dir.path().join("keep.png"), b"done").unwrap();

        assert_eq!(remove_stale_temps(dir.path()), 1);
        assert!(dir.path().join("keep.png").exists());
    }
}
