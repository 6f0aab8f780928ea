//! Local photo storage, capacity eviction and sync mirroring.
//!
//! Committed photos live as `originals/<session>_<timestamp>.png` and
//! `framed/<session>_<timestamp>.png`. Every file is written under a
//! temporary name and renamed into place, so readers never observe a
//! partial image. The sync target mirrors the same relative names.

mod atomic;
mod manager;
mod photo;
mod sync;

pub use manager::{PhotoStore, StorageManager, StorageStats, SyncReport};
pub use photo::{PhotoId, StoredPhoto};
pub use sync::{SyncHandle, SyncWorker};

use crate::error::ErrorKind;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `ENOSPC` on Linux and macOS.
const ENOSPC: i32 = 28;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("disk full while writing {path}")]
    DiskFull { path: PathBuf },
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },
    #[error("path collision: {path} already exists")]
    PathCollision { path: PathBuf },
    #[error("photo not found: {0}")]
    NotFound(PhotoId),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Maps an I/O error on `path` onto the storage taxonomy.
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if source.raw_os_error() == Some(ENOSPC) {
            return StorageError::DiskFull { path };
        }
        match source.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied { path },
            io::ErrorKind::AlreadyExists => StorageError::PathCollision { path },
            _ => StorageError::Io { path, source },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::DiskFull { .. }
            | StorageError::PermissionDenied { .. }
            | StorageError::Io { .. } => ErrorKind::Resource,
            StorageError::PathCollision { .. } => ErrorKind::Integrity,
            StorageError::NotFound(_) => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let path = Path::new("/tmp/x.png");
        assert!(matches!(
            StorageError::from_io(path, io::Error::from_raw_os_error(ENOSPC)),
            StorageError::DiskFull { .. }
        ));
        assert!(matches!(
            StorageError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied)),
            StorageError::PermissionDenied { .. }
        ));
        let collision = StorageError::from_io(path, io::Error::from(io::ErrorKind::AlreadyExists));
        assert_eq!(collision.kind(), ErrorKind::Integrity);
    }
}
