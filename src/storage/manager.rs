//! Photo persistence, eviction and sync mirroring.

use super::atomic::{copy_atomic, remove_stale_temps, write_atomic};
use super::photo::is_photo_file;
use super::{PhotoId, StorageError, StoredPhoto};
use crate::config::StorageConfig;
use crate::session::SessionId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Sub-directories of the sync root.
const SYNC_ORIGINALS: &str = "originals";
const SYNC_FRAMED: &str = "framed";

/// Persistence seam used by the session controller and the print manager.
pub trait PhotoStore: Send + Sync {
    /// Atomically writes both images of a session and enforces the capacity limit.
    fn persist(
        &self,
        original: &[u8],
        framed: &[u8],
        session_id: SessionId,
    ) -> Result<StoredPhoto, StorageError>;

    /// Removes a stored photo and both of its files.
    fn discard(&self, id: &PhotoId) -> Result<(), StorageError>;

    /// Path of the framed image, provided it is still on disk.
    fn printable_path(&self, id: &PhotoId) -> Result<PathBuf, StorageError>;
}

/// Counters exposed for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub stored: usize,
    pub unsynced: usize,
    pub evicted_total: u64,
}

/// Outcome of a sync sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

/// Owns the committed photos on disk.
///
/// The index is ordered oldest first. Persist and eviction hold the index
/// lock for the whole write or delete. Sync only takes it to read a photo
/// and to mark it synced; mirror copies are serialized by their own lock.
pub struct StorageManager {
    config: StorageConfig,
    index: Mutex<Vec<StoredPhoto>>,
    sync_gate: Mutex<()>,
    evicted_total: AtomicU64,
}

impl StorageManager {
    /// Creates the storage directories and rebuilds the index from disk.
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        let mut dirs = vec![config.originals_path.clone(), config.framed_path.clone()];
        if config.auto_sync {
            dirs.push(config.sync_path.join(SYNC_ORIGINALS));
            dirs.push(config.sync_path.join(SYNC_FRAMED));
        }
        for dir in &dirs {
            fs::create_dir_all(dir).map_err(|e| StorageError::from_io(dir, e))?;
        }

        let stale = remove_stale_temps(&config.originals_path)
            + remove_stale_temps(&config.framed_path);
        if stale > 0 {
            tracing::warn!(count = stale, "Removed partial files from an interrupted commit");
        }

        let index = scan(&config)?;
        tracing::info!(
            photos = index.len(),
            max_local_photos = config.max_local_photos,
            originals = %config.originals_path.display(),
            "Storage opened"
        );

        let manager = Self {
            config,
            index: Mutex::new(index),
            sync_gate: Mutex::new(()),
            evicted_total: AtomicU64::new(0),
        };
        {
            // A lowered limit applies from startup on.
            let mut index = manager.lock();
            if let Some(newest) = index.last().map(|p| p.id.clone()) {
                manager.evict_locked(&mut index, &newest);
            }
        }
        Ok(manager)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoredPhoto>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes both images and evicts the oldest photos beyond the limit.
    ///
    /// Eviction failures are logged and never fail the persist.
    pub fn persist(
        &self,
        original: &[u8],
        framed: &[u8],
        session_id: SessionId,
    ) -> Result<StoredPhoto, StorageError> {
        let mut index = self.lock();

        let created_at = chrono::Local::now().naive_local();
        let id = PhotoId::compose(session_id, created_at);
        let photo = StoredPhoto::new(
            id,
            session_id,
            &self.config.originals_path,
            &self.config.framed_path,
            created_at,
        );

        for path in [&photo.original_path, &photo.framed_path] {
            if path.exists() {
                tracing::error!(path = %path.display(), "Path collision on commit");
                return Err(StorageError::PathCollision { path: path.clone() });
            }
        }

        write_atomic(&photo.original_path, original)
            .map_err(|e| StorageError::from_io(&photo.original_path, e))?;
        if let Err(e) = write_atomic(&photo.framed_path, framed) {
            // Never leave an original without its framed counterpart.
            if let Err(cleanup) = fs::remove_file(&photo.original_path) {
                tracing::error!(
                    path = %photo.original_path.display(),
                    error = %cleanup,
                    "Failed to roll back original after framed write failed"
                );
            }
            return Err(StorageError::from_io(&photo.framed_path, e));
        }

        index.push(photo.clone());
        tracing::info!(
            photo_id = %photo.id,
            session_id = %session_id,
            stored = index.len(),
            "Photo persisted"
        );

        self.evict_locked(&mut index, &photo.id);
        Ok(photo)
    }

    /// Removes the oldest photos until the index fits the limit, never `keep`.
    ///
    /// A photo that cannot be removed is skipped and the next oldest is tried.
    fn evict_locked(&self, index: &mut Vec<StoredPhoto>, keep: &PhotoId) {
        let mut pos = 0;
        while index.len() > self.config.max_local_photos && pos < index.len() {
            let victim = &index[pos];
            if &victim.id == keep {
                pos += 1;
                continue;
            }
            if let Err(e) = remove_pair(victim) {
                tracing::warn!(
                    photo_id = %victim.id,
                    error = %e,
                    "Eviction failed, trying the next oldest photo"
                );
                pos += 1;
                continue;
            }

            let victim = index.remove(pos);
            self.evicted_total.fetch_add(1, Ordering::Relaxed);
            tracing::info!(photo_id = %victim.id, "Evicted oldest photo");
        }
        if index.len() > self.config.max_local_photos {
            tracing::warn!(
                stored = index.len(),
                max_local_photos = self.config.max_local_photos,
                "Storage over limit, eviction will be retried on the next commit"
            );
        }
    }

    /// Mirrors a photo to the sync target. Returns `false` when sync is disabled.
    ///
    /// The copies run without the index lock, so a slow mirror never holds up
    /// persist, eviction or print lookups.
    pub fn sync(&self, id: &PhotoId) -> Result<bool, StorageError> {
        if !self.config.auto_sync {
            return Ok(false);
        }

        let _sweep = self.sync_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let photo = match self.get(id) {
            Some(photo) if photo.synced => return Ok(true),
            Some(photo) => photo,
            None => return Err(StorageError::NotFound(id.clone())),
        };

        let copied = self.mirror(&photo);

        let mut index = self.lock();
        let Some(entry) = index.iter_mut().find(|p| &p.id == id) else {
            // Evicted while copying; mirrored copies outlive local eviction.
            return Err(StorageError::NotFound(id.clone()));
        };
        copied?;
        entry.synced = true;
        tracing::debug!(photo_id = %id, "Photo synced");
        Ok(true)
    }

    fn mirror(&self, photo: &StoredPhoto) -> Result<(), StorageError> {
        let file_name = photo.id.file_name();
        for (source, sub) in [
            (&photo.original_path, SYNC_ORIGINALS),
            (&photo.framed_path, SYNC_FRAMED),
        ] {
            if !source.is_file() {
                continue;
            }
            let dir = self.config.sync_path.join(sub);
            fs::create_dir_all(&dir).map_err(|e| StorageError::from_io(&dir, e))?;
            let target = dir.join(&file_name);
            copy_atomic(source, &target).map_err(|e| StorageError::from_io(&target, e))?;
        }
        Ok(())
    }

    /// Syncs every photo not yet mirrored. Failures are retried on the next sweep.
    pub fn sync_pending(&self) -> SyncReport {
        let mut report = SyncReport::default();
        if !self.config.auto_sync {
            return report;
        }

        for photo in self.unsynced() {
            match self.sync(&photo.id) {
                Ok(_) => report.synced += 1,
                // Evicted between listing and syncing.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(photo_id = %photo.id, error = %e, "Sync failed, will retry");
                }
            }
        }

        if report.synced > 0 || report.failed > 0 {
            tracing::info!(synced = report.synced, failed = report.failed, "Sync sweep finished");
        }
        report
    }

    /// All stored photos, oldest first.
    pub fn photos(&self) -> Vec<StoredPhoto> {
        self.lock().clone()
    }

    pub fn get(&self, id: &PhotoId) -> Option<StoredPhoto> {
        self.lock().iter().find(|p| &p.id == id).cloned()
    }

    pub fn unsynced(&self) -> Vec<StoredPhoto> {
        self.lock().iter().filter(|p| !p.synced).cloned().collect()
    }

    /// Highest session id among stored photos, used to keep ids monotonic across restarts.
    pub fn last_session_id(&self) -> Option<SessionId> {
        self.lock().iter().map(|p| p.session_id).max()
    }

    pub fn stats(&self) -> StorageStats {
        let index = self.lock();
        StorageStats {
            stored: index.len(),
            unsynced: index.iter().filter(|p| !p.synced).count(),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }
}

impl PhotoStore for StorageManager {
    fn persist(
        &self,
        original: &[u8],
        framed: &[u8],
        session_id: SessionId,
    ) -> Result<StoredPhoto, StorageError> {
        StorageManager::persist(self, original, framed, session_id)
    }

    fn discard(&self, id: &PhotoId) -> Result<(), StorageError> {
        let mut index = self.lock();
        let pos = index
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        remove_pair(&index[pos])?;
        index.remove(pos);
        tracing::info!(photo_id = %id, "Photo discarded");
        Ok(())
    }

    fn printable_path(&self, id: &PhotoId) -> Result<PathBuf, StorageError> {
        let index = self.lock();
        index
            .iter()
            .find(|p| &p.id == id)
            .filter(|p| p.is_present())
            .map(|p| p.framed_path.clone())
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }
}

/// Deletes the framed image and then the original; missing files are fine.
fn remove_pair(photo: &StoredPhoto) -> Result<(), StorageError> {
    for path in [&photo.framed_path, &photo.original_path] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::from_io(path, e)),
        }
    }
    Ok(())
}

/// Rebuilds the index from the originals directory.
fn scan(config: &StorageConfig) -> Result<Vec<StoredPhoto>, StorageError> {
    let dir = &config.originals_path;
    let entries = fs::read_dir(dir).map_err(|e| StorageError::from_io(dir, e))?;

    let mut photos: Vec<StoredPhoto> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_photo_file(path))
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            let parsed = PhotoId::parse(stem);
            if parsed.is_none() {
                tracing::debug!(path = %path.display(), "Ignoring foreign file in originals");
            }
            parsed
        })
        .map(|(id, session_id, created_at)| {
            let mut photo = StoredPhoto::new(
                id,
                session_id,
                &config.originals_path,
                &config.framed_path,
                created_at,
            );
            photo.synced = config.auto_sync && is_mirrored(&config.sync_path, &photo);
            photo
        })
        .collect();

    photos.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.session_id.cmp(&b.session_id))
    });
    Ok(photos)
}

fn is_mirrored(sync_root: &Path, photo: &StoredPhoto) -> bool {
    let name = photo.id.file_name();
    let original = sync_root.join(SYNC_ORIGINALS).join(&name).is_file();
    let framed = !photo.framed_path.is_file() || sync_root.join(SYNC_FRAMED).join(&name).is_file();
    original && framed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open(root: &Path, max: usize) -> StorageManager {
        StorageManager::open(StorageConfig::rooted_at(root, max)).unwrap()
    }

    fn count_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_persist_writes_both_images() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 10);

        let photo = storage
            .persist(b"original", b"framed", SessionId::new(1))
            .unwrap();

        assert_eq!(fs::read(&photo.original_path).unwrap(), b"original");
        assert_eq!(fs::read(&photo.framed_path).unwrap(), b"framed");
        assert!(photo.id.as_str().starts_with("1_"));
        assert_eq!(storage.photos(), vec![photo]);
    }

    #[test]
    fn test_scenario_keeps_two_newest() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 2);

        let a = storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();
        let b = storage.persist(b"b", b"fb", SessionId::new(2)).unwrap();
        let c = storage.persist(b"c", b"fc", SessionId::new(3)).unwrap();

        assert!(!a.original_path.exists());
        assert!(!a.framed_path.exists());
        for photo in [&b, &c] {
            assert!(photo.original_path.exists());
            assert!(photo.framed_path.exists());
        }
        let ids: Vec<_> = storage.photos().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);
        assert_eq!(storage.stats().evicted_total, 1);
    }

    #[test]
    fn test_limit_of_one_never_evicts_new_photo() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 1);

        storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();
        let newest = storage.persist(b"b", b"fb", SessionId::new(2)).unwrap();

        assert_eq!(storage.photos(), vec![newest.clone()]);
        assert!(newest.original_path.exists());
    }

    #[test]
    fn test_reopen_rebuilds_index_and_session_counter() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = open(dir.path(), 10);
            storage.persist(b"a", b"fa", SessionId::new(4)).unwrap();
            storage.persist(b"b", b"fb", SessionId::new(9)).unwrap();
        }
        fs::write(dir.path().join("originals").join("notes.png"), b"x").unwrap();

        let storage = open(dir.path(), 10);
        assert_eq!(storage.photos().len(), 2);
        assert_eq!(storage.last_session_id(), Some(SessionId::new(9)));
    }

    #[test]
    fn test_reopen_with_lower_limit_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = open(dir.path(), 10);
            for i in 1..=3 {
                storage.persist(b"x", b"y", SessionId::new(i)).unwrap();
            }
        }
        let storage = open(dir.path(), 1);
        let photos = storage.photos();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].session_id, SessionId::new(3));
        assert_eq!(count_files(&dir.path().join("originals")), 1);
    }

    #[test]
    fn test_failed_framed_write_rolls_back_original() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 10);
        // A directory in place of the framed folder makes the framed write fail.
        fs::remove_dir_all(dir.path().join("framed")).unwrap();
        fs::write(dir.path().join("framed"), b"not a dir").unwrap();

        assert!(storage.persist(b"a", b"fa", SessionId::new(1)).is_err());
        assert_eq!(count_files(&dir.path().join("originals")), 0);
        assert!(storage.photos().is_empty());
    }

    #[test]
    fn test_sync_mirrors_relative_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 10);
        let photo = storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();

        assert_eq!(storage.unsynced().len(), 1);
        assert!(storage.sync(&photo.id).unwrap());

        let name = photo.id.file_name();
        let sync = dir.path().join("sync");
        assert_eq!(fs::read(sync.join("originals").join(&name)).unwrap(), b"a");
        assert_eq!(fs::read(sync.join("framed").join(&name)).unwrap(), b"fa");
        assert!(storage.unsynced().is_empty());

        // The synced flag is recovered from the mirror after a restart.
        drop(storage);
        let storage = open(dir.path(), 10);
        assert!(storage.unsynced().is_empty());
    }

    #[test]
    fn test_sync_disabled_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::rooted_at(dir.path(), 10);
        config.auto_sync = false;
        let storage = StorageManager::open(config).unwrap();
        let photo = storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();

        assert!(!storage.sync(&photo.id).unwrap());
        assert_eq!(storage.sync_pending(), SyncReport::default());
        assert!(!dir.path().join("sync").exists());
    }

    #[test]
    fn test_sync_failure_is_retried_on_next_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 10);
        storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();

        let mirror = dir.path().join("sync").join("originals");
        fs::remove_dir_all(&mirror).unwrap();
        fs::write(&mirror, b"blocks the mirror").unwrap();
        let report = storage.sync_pending();
        assert_eq!(report, SyncReport { synced: 0, failed: 1 });
        assert_eq!(storage.unsynced().len(), 1);

        fs::remove_file(&mirror).unwrap();
        let report = storage.sync_pending();
        assert_eq!(report, SyncReport { synced: 1, failed: 0 });
    }

    #[test]
    fn test_eviction_skips_photo_that_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 2);
        let a = storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();
        let b = storage.persist(b"b", b"fb", SessionId::new(2)).unwrap();

        // A non-empty directory where A's framed image was cannot be unlinked.
        fs::remove_file(&a.framed_path).unwrap();
        fs::create_dir(&a.framed_path).unwrap();
        fs::write(a.framed_path.join("pinned"), b"x").unwrap();

        let c = storage.persist(b"c", b"fc", SessionId::new(3)).unwrap();

        let ids: Vec<_> = storage.photos().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert!(!b.original_path.exists());
        assert!(!b.framed_path.exists());
        assert_eq!(storage.stats().evicted_total, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_mirror_does_not_block_persist() {
        use std::io::Read;
        use std::sync::{mpsc, Arc};
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(open(dir.path(), 10));
        let photo = storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();

        // A FIFO at the mirror's temp name stalls the copy until it is read.
        let fifo = dir
            .path()
            .join("sync")
            .join("originals")
            .join(format!(".{}.tmp", photo.id.file_name()));
        let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(status.success());

        let syncing = {
            let storage = Arc::clone(&storage);
            std::thread::spawn(move || storage.sync_pending())
        };
        std::thread::sleep(Duration::from_millis(200));

        let (tx, rx) = mpsc::channel();
        {
            let storage = Arc::clone(&storage);
            std::thread::spawn(move || {
                let stored = storage.stats().stored;
                let persisted = storage.persist(b"b", b"fb", SessionId::new(2)).is_ok();
                let _ = tx.send((stored, persisted));
            });
        }
        let outcome = rx.recv_timeout(Duration::from_secs(5));

        let mut drained = Vec::new();
        fs::File::open(&fifo)
            .unwrap()
            .read_to_end(&mut drained)
            .unwrap();
        syncing.join().unwrap();

        assert_eq!(outcome, Ok((1, true)), "persist waited for the mirror");
        assert_eq!(drained, b"a");
    }

    #[test]
    fn test_discard_and_printable_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(dir.path(), 10);
        let photo = storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();

        assert_eq!(storage.printable_path(&photo.id).unwrap(), photo.framed_path);

        storage.discard(&photo.id).unwrap();
        assert!(!photo.original_path.exists());
        assert!(matches!(
            storage.printable_path(&photo.id),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.discard(&photo.id),
            Err(StorageError::NotFound(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_count_never_exceeds_limit(
            max in 1usize..5,
            preexisting in 0usize..8,
        ) {
            let dir = tempfile::tempdir().unwrap();
            {
                let storage = open(dir.path(), 50);
                for i in 0..preexisting {
                    storage.persist(b"o", b"f", SessionId::new(i as u64 + 1)).unwrap();
                }
            }

            let storage = open(dir.path(), max);
            let before = storage.photos();
            let newest = storage
                .persist(b"new", b"new", SessionId::new(1000))
                .unwrap();
            let after = storage.photos();

            prop_assert!(count_files(&dir.path().join("originals")) <= max);
            prop_assert!(after.len() <= max);
            prop_assert_eq!(after.last().map(|p| &p.id), Some(&newest.id));

            // Survivors are exactly the newest of the previous photos.
            let kept = after.len() - 1;
            let expected: Vec<_> = before[before.len() - kept..].iter().map(|p| p.id.clone()).collect();
            let actual: Vec<_> = after[..kept].iter().map(|p| p.id.clone()).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
