//! Background sync worker.
//!
//! Mirrors unsynced photos to the sync target on a fixed interval and
//! whenever a commit requests it. A failed copy stays unsynced and is
//! picked up by the next sweep.

use super::StorageManager;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Cheap handle used to request an immediate sweep.
#[derive(Clone)]
pub struct SyncHandle {
    notify: Arc<Notify>,
}

impl SyncHandle {
    /// Wakes the worker. Requests made while a sweep runs coalesce into one.
    pub fn request(&self) {
        self.notify.notify_one();
    }
}

/// Owns the sync task.
pub struct SyncWorker {
    handle: SyncHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(storage: Arc<StorageManager>) -> Self {
        let notify = Arc::new(Notify::new());
        let (shutdown, mut stop) = watch::channel(false);
        let interval = storage.config().sync_interval();
        let wake = Arc::clone(&notify);

        let task = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Sync worker started");
            loop {
                let sweep = Arc::clone(&storage);
                if let Err(e) = tokio::task::spawn_blocking(move || sweep.sync_pending()).await {
                    tracing::error!(error = %e, "Sync sweep panicked");
                }

                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop.changed() => break,
                }
            }
            tracing::info!("Sync worker stopped");
        });

        Self {
            handle: SyncHandle { notify },
            shutdown,
            task,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stops the worker after the current sweep finishes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Sync worker task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::session::SessionId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_requested_sweep_mirrors_new_photo() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::rooted_at(dir.path(), 10);
        config.sync_interval_secs = 3600;
        let storage = Arc::new(StorageManager::open(config).unwrap());

        let worker = SyncWorker::spawn(Arc::clone(&storage));
        let photo = storage.persist(b"a", b"fa", SessionId::new(1)).unwrap();
        worker.handle().request();

        let mirrored = dir
            .path()
            .join("sync")
            .join("framed")
            .join(photo.id.file_name());
        let mut synced = false;
        for _ in 0..100 {
            if storage.unsynced().is_empty() {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(synced);
        assert!(mirrored.exists());
        worker.shutdown().await;
    }
}
