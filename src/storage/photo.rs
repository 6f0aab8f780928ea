//! Stored photo records and on-disk naming.

use crate::session::SessionId;
use chrono::NaiveDateTime;
use std::fmt;
use std::path::{Path, PathBuf};

/// Timestamp part of a stored file name, e.g. `20261016_101500_123`.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const EXTENSION: &str = "png";

/// Identifier of a stored photo: the shared file stem `<session>_<timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhotoId(String);

impl PhotoId {
    pub(crate) fn compose(session_id: SessionId, created_at: NaiveDateTime) -> Self {
        Self(format!(
            "{}_{}",
            session_id,
            created_at.format(TIMESTAMP_FORMAT)
        ))
    }

    /// Parses a file stem back into its session id and creation time.
    pub(crate) fn parse(stem: &str) -> Option<(Self, SessionId, NaiveDateTime)> {
        let (session, timestamp) = stem.split_once('_')?;
        let session = SessionId::new(session.parse().ok()?);
        let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some((Self(stem.to_string()), session, created_at))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name used in both the originals and the framed directory.
    pub fn file_name(&self) -> String {
        format!("{}.{EXTENSION}", self.0)
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhotoId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A committed original + framed image pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPhoto {
    pub id: PhotoId,
    pub session_id: SessionId,
    pub original_path: PathBuf,
    pub framed_path: PathBuf,
    pub created_at: NaiveDateTime,
    pub synced: bool,
}

impl StoredPhoto {
    pub(crate) fn new(
        id: PhotoId,
        session_id: SessionId,
        originals_dir: &Path,
        framed_dir: &Path,
        created_at: NaiveDateTime,
    ) -> Self {
        let file_name = id.file_name();
        Self {
            original_path: originals_dir.join(&file_name),
            framed_path: framed_dir.join(&file_name),
            id,
            session_id,
            created_at,
            synced: false,
        }
    }

    /// Whether the image to print is still on disk.
    pub fn is_present(&self) -> bool {
        self.framed_path.is_file()
    }
}

/// Whether `path` looks like a committed image (not a temp file).
pub(crate) fn is_photo_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.extension().is_some_and(|ext| ext == EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_id_round_trips_through_file_stem() {
        let created = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_milli_opt(10, 15, 0, 123)
            .unwrap();
        let id = PhotoId::compose(SessionId::new(7), created);

        assert_eq!(id.as_str(), "7_20261016_101500_123");
        assert_eq!(id.file_name(), "7_20261016_101500_123.png");

        let (parsed, session, at) = PhotoId::parse(id.as_str()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(session, SessionId::new(7));
        assert_eq!(at, created);
    }

    #[test]
    fn test_foreign_names_rejected() {
        assert!(PhotoId::parse("photo_20250101_120000").is_none());
        assert!(PhotoId::parse("holiday").is_none());
        assert!(!is_photo_file(Path::new("/x/.7_1.png.tmp")));
        assert!(is_photo_file(Path::new("/x/7_20261016_101500_123.png")));
    }
}
