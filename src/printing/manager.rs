//! Print job manager.

use super::{
    BackendJobState, JobHandle, PrintBackend, PrintBackendError, PrintError, PrintJob, PrintJobId,
    PrintJobStatus, PrintRequest, JOB_TITLE_PREFIX,
};
use crate::config::PrintingConfig;
use crate::storage::{PhotoId, PhotoStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Completed and failed jobs kept for status queries.
const FINISHED_JOBS_KEPT: usize = 256;

/// Job counts exposed for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrintStats {
    pub pending: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Queues print requests and tracks their outcome.
///
/// The job table is only locked for short, non-blocking updates; backend
/// calls run on the blocking pool so status queries never wait on the
/// printer.
pub struct PrintJobManager {
    backend: Arc<dyn PrintBackend>,
    store: Arc<dyn PhotoStore>,
    config: PrintingConfig,
    jobs: Mutex<BTreeMap<PrintJobId, PrintJob>>,
    next_id: AtomicU64,
    finished_kept: usize,
    /// Finished jobs dropped from the table, still counted in stats.
    retired_completed: AtomicU64,
    retired_failed: AtomicU64,
}

impl PrintJobManager {
    pub fn new(
        backend: Arc<dyn PrintBackend>,
        store: Arc<dyn PhotoStore>,
        config: PrintingConfig,
    ) -> Self {
        tracing::info!(
            backend = backend.name(),
            printer = %config.printer_name,
            max_copies = config.max_copies,
            "Print manager ready"
        );
        Self {
            backend,
            store,
            config,
            jobs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            finished_kept: FINISHED_JOBS_KEPT,
            retired_completed: AtomicU64::new(0),
            retired_failed: AtomicU64::new(0),
        }
    }

    /// Limits how many finished jobs stay queryable.
    pub fn with_finished_history(mut self, kept: usize) -> Self {
        self.finished_kept = kept;
        self
    }

    pub fn config(&self) -> &PrintingConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PrintJobId, PrintJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the oldest finished jobs beyond the history limit.
    fn retire_finished(&self, jobs: &mut BTreeMap<PrintJobId, PrintJob>) {
        let finished: Vec<PrintJobId> = jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| job.id)
            .collect();
        let excess = finished.len().saturating_sub(self.finished_kept);
        for id in &finished[..excess] {
            if let Some(job) = jobs.remove(id) {
                let counter = match job.status {
                    PrintJobStatus::Completed => &self.retired_completed,
                    _ => &self.retired_failed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(job_id = %job.id, "Retired finished print job");
            }
        }
    }

    fn allocate_id(&self) -> PrintJobId {
        PrintJobId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Validates a copy count against `1..=max_copies`.
    pub fn validate_copies(&self, copies: u32) -> Result<(), PrintError> {
        if copies == 0 || copies > self.config.max_copies {
            tracing::debug!(copies, max = self.config.max_copies, "Rejected copy count");
            return Err(PrintError::InvalidCopyCount {
                copies,
                max: self.config.max_copies,
            });
        }
        Ok(())
    }

    /// Submits `copies` prints of a stored photo.
    ///
    /// Fails fast with `SourceNotFound`, without contacting the backend, when
    /// the photo has been evicted.
    pub async fn submit(&self, photo_id: &PhotoId, copies: u32) -> Result<PrintJob, PrintError> {
        self.validate_copies(copies)?;
        let file = self.store.printable_path(photo_id).map_err(|e| {
            tracing::warn!(photo_id = %photo_id, error = %e, "Print source unavailable");
            PrintError::from(e)
        })?;

        let job = PrintJob::new(self.allocate_id(), photo_id.clone(), copies);
        let job_id = job.id;
        self.lock().insert(job_id, job);
        tracing::info!(job_id = %job_id, photo_id = %photo_id, copies, "Print job queued");

        let request = PrintRequest {
            file,
            copies,
            printer: self.config.printer_name.clone(),
            title: format!("{JOB_TITLE_PREFIX}{photo_id}"),
            media: Some(self.config.paper_size.cups_media()),
        };
        let backend = Arc::clone(&self.backend);
        let result = tokio::task::spawn_blocking(move || backend.submit(&request))
            .await
            .unwrap_or_else(|e| Err(PrintBackendError::Unknown(e.to_string())));

        let mut jobs = self.lock();
        let job = jobs.get_mut(&job_id).ok_or(PrintError::UnknownJob(job_id))?;
        match result {
            Ok(handle) => {
                job.handle = Some(handle);
                job.transition(PrintJobStatus::Submitted);
                Ok(job.clone())
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Print submission failed");
                job.transition(PrintJobStatus::Failed(e.to_string()));
                self.retire_finished(&mut jobs);
                Err(PrintError::Backend {
                    job: Some(job_id),
                    source: e,
                })
            }
        }
    }

    /// Submits a failed job again as a new job.
    pub async fn resubmit(&self, id: PrintJobId) -> Result<PrintJob, PrintError> {
        let job = self.job(id).ok_or(PrintError::UnknownJob(id))?;
        if !matches!(job.status, PrintJobStatus::Failed(_)) {
            return Err(PrintError::NotRetryable(id));
        }
        self.submit(&job.source_photo_id, job.copies).await
    }

    pub fn job(&self, id: PrintJobId) -> Option<PrintJob> {
        self.lock().get(&id).cloned()
    }

    /// All jobs in submission order.
    pub fn jobs(&self) -> Vec<PrintJob> {
        self.lock().values().cloned().collect()
    }

    /// Applies a backend-reported state to the job holding `handle`.
    pub fn report(&self, handle: &JobHandle, state: BackendJobState) -> Option<PrintJobStatus> {
        let next = match state {
            BackendJobState::Queued | BackendJobState::Printing => return None,
            BackendJobState::Completed => PrintJobStatus::Completed,
            BackendJobState::Failed(reason) => PrintJobStatus::Failed(reason),
            BackendJobState::Unknown => PrintJobStatus::Failed("lost by print backend".to_string()),
        };

        let mut jobs = self.lock();
        let job = jobs
            .values_mut()
            .find(|job| job.handle.as_ref() == Some(handle))?;
        if !job.transition(next) {
            return None;
        }
        if let PrintJobStatus::Failed(reason) = &job.status {
            tracing::warn!(job_id = %job.id, reason = %reason, "Print job failed");
        }
        let status = job.status.clone();
        self.retire_finished(&mut jobs);
        Some(status)
    }

    /// Polls the backend for every submitted job. Returns how many changed.
    pub async fn refresh(&self) -> usize {
        let submitted: Vec<JobHandle> = self
            .lock()
            .values()
            .filter(|job| job.status == PrintJobStatus::Submitted)
            .filter_map(|job| job.handle.clone())
            .collect();
        if submitted.is_empty() {
            return 0;
        }

        let backend = Arc::clone(&self.backend);
        let states = tokio::task::spawn_blocking(move || {
            submitted
                .into_iter()
                .map(|handle| {
                    let state = backend.job_state(&handle);
                    (handle, state)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let states = match states {
            Ok(states) => states,
            Err(e) => {
                tracing::error!(error = %e, "Print status poll panicked");
                return 0;
            }
        };

        let mut changed = 0;
        for (handle, state) in states {
            match state {
                Ok(state) => {
                    if self.report(&handle, state).is_some() {
                        changed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(handle = %handle, error = %e, "Print status query failed");
                }
            }
        }
        changed
    }

    /// Polls job status every `poll_interval_secs` until `shutdown` fires.
    pub fn spawn_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.config.poll_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.refresh().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Print monitor stopped");
        })
    }

    /// Cancels everything still queued at the printer. Returns the number of
    /// backend jobs cancelled.
    pub async fn clear_queue(&self) -> Result<usize, PrintError> {
        let local: Vec<JobHandle> = self
            .lock()
            .values()
            .filter(|job| !job.status.is_terminal())
            .filter_map(|job| job.handle.clone())
            .collect();

        let backend = Arc::clone(&self.backend);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut handles: Vec<JobHandle> = match backend.active_jobs() {
                Ok(active) => active.into_iter().map(|job| job.handle).collect(),
                Err(PrintBackendError::Unsupported(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            for handle in local {
                if !handles.contains(&handle) {
                    handles.push(handle);
                }
            }

            let mut cancelled = Vec::new();
            for handle in handles {
                match backend.cancel(&handle) {
                    Ok(()) => cancelled.push(handle),
                    Err(e) => tracing::warn!(handle = %handle, error = %e, "Failed to cancel print job"),
                }
            }
            Ok(cancelled)
        })
        .await
        .unwrap_or_else(|e| Err(PrintBackendError::Unknown(e.to_string())))
        .map_err(|source| PrintError::Backend { job: None, source })?;

        for handle in &outcome {
            self.report(handle, BackendJobState::Failed("cancelled".to_string()));
        }
        tracing::info!(cancelled = outcome.len(), "Print queue cleared");
        Ok(outcome.len())
    }

    /// Adopts jobs left at the backend by a previous run.
    ///
    /// Only jobs titled after a stored photo are adopted, as `Submitted`.
    /// Without a backend job registry nothing can be confirmed and earlier
    /// jobs are treated as lost.
    pub async fn reconcile(&self) -> Result<usize, PrintError> {
        let backend = Arc::clone(&self.backend);
        let active = tokio::task::spawn_blocking(move || backend.active_jobs())
            .await
            .unwrap_or_else(|e| Err(PrintBackendError::Unknown(e.to_string())));

        let active = match active {
            Ok(active) => active,
            Err(PrintBackendError::Unsupported(_)) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    "Print backend keeps no job registry, jobs from a previous run are treated as lost"
                );
                return Ok(0);
            }
            Err(source) => return Err(PrintError::Backend { job: None, source }),
        };

        let mut jobs = self.lock();
        let mut adopted = 0;
        for entry in active {
            let Some(photo_id) = entry
                .title
                .as_deref()
                .and_then(|title| title.strip_prefix(JOB_TITLE_PREFIX))
            else {
                continue;
            };
            if jobs.values().any(|job| job.handle.as_ref() == Some(&entry.handle)) {
                continue;
            }

            // Copy counts are not reported back by the spooler.
            let mut job = PrintJob::new(self.allocate_id(), PhotoId::from(photo_id), 1);
            job.handle = Some(entry.handle.clone());
            job.transition(PrintJobStatus::Submitted);
            tracing::info!(job_id = %job.id, handle = %entry.handle, photo_id, "Adopted print job from previous run");
            jobs.insert(job.id, job);
            adopted += 1;
        }
        Ok(adopted)
    }

    /// Job counts; finished jobs count even after they leave the history.
    pub fn stats(&self) -> PrintStats {
        let jobs = self.lock();
        let retired = |c: &AtomicU64| c.load(Ordering::Relaxed) as usize;
        let mut stats = PrintStats {
            completed: retired(&self.retired_completed),
            failed: retired(&self.retired_failed),
            ..PrintStats::default()
        };
        for job in jobs.values() {
            match job.status {
                PrintJobStatus::Pending => stats.pending += 1,
                PrintJobStatus::Submitted => stats.submitted += 1,
                PrintJobStatus::Completed => stats.completed += 1,
                PrintJobStatus::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::printing::MockPrintBackend;
    use crate::session::SessionId;
    use crate::storage::{StorageManager, StoredPhoto};
    use proptest::prelude::*;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<StorageManager>,
        backend: Arc<MockPrintBackend>,
        manager: PrintJobManager,
    }

    fn fixture_with(backend: MockPrintBackend, max_photos: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            StorageManager::open(StorageConfig::rooted_at(dir.path(), max_photos)).unwrap(),
        );
        let backend = Arc::new(backend);
        let manager = PrintJobManager::new(
            backend.clone(),
            storage.clone(),
            PrintingConfig::default(),
        );
        Fixture {
            _dir: dir,
            storage,
            backend,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockPrintBackend::new(), 10)
    }

    fn photo(storage: &StorageManager, session: u64) -> StoredPhoto {
        storage
            .persist(b"original", b"framed", SessionId::new(session))
            .unwrap()
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_copy_count_bounds() {
        let f = fixture();
        let photo = photo(&f.storage, 1);
        let max = f.manager.config().max_copies;

        for copies in [0, max + 1] {
            assert!(matches!(
                f.manager.submit(&photo.id, copies).await,
                Err(PrintError::InvalidCopyCount { .. })
            ));
        }
        for copies in [1, max] {
            let job = f.manager.submit(&photo.id, copies).await.unwrap();
            assert_eq!(job.copies, copies);
            assert_eq!(job.status, PrintJobStatus::Submitted);
        }
        assert_eq!(f.backend.submit_count(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_copies_accepted_iff_in_range(copies in 0u32..20) {
            let f = fixture();
            let photo = photo(&f.storage, 1);
            let max = f.manager.config().max_copies;

            let result = runtime().block_on(f.manager.submit(&photo.id, copies));
            prop_assert_eq!(result.is_ok(), (1..=max).contains(&copies));
            prop_assert_eq!(f.backend.submit_count(), usize::from(result.is_ok()));
        }
    }

    #[tokio::test]
    async fn test_evicted_source_fails_without_backend_call() {
        let f = fixture_with(MockPrintBackend::new(), 1);
        let first = photo(&f.storage, 1);
        photo(&f.storage, 2);
        assert!(!first.framed_path.exists());

        let err = f.manager.submit(&first.id, 1).await.unwrap_err();
        assert!(matches!(err, PrintError::SourceNotFound(ref id) if id == &first.id));
        assert_eq!(f.backend.submit_count(), 0);
        assert!(f.manager.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_request_carries_title_media_and_printer() {
        let f = fixture();
        let photo = photo(&f.storage, 3);
        f.manager.submit(&photo.id, 2).await.unwrap();

        let request = &f.backend.submissions()[0];
        assert_eq!(request.file, photo.framed_path);
        assert_eq!(request.title, format!("photobooth-{}", photo.id));
        assert_eq!(request.media, Some("na_index-4x6_4x6in"));
        assert_eq!(request.printer, "Canon_Printer");
    }

    #[tokio::test]
    async fn test_failed_job_is_resubmitted_as_new_job() {
        let f = fixture();
        let photo = photo(&f.storage, 1);
        f.backend
            .fail_next_submit(PrintBackendError::PrinterUnavailable("offline".into()));

        let err = f.manager.submit(&photo.id, 2).await.unwrap_err();
        let PrintError::Backend { job: Some(failed_id), .. } = err else {
            panic!("unexpected error {err:?}");
        };
        assert!(matches!(
            f.manager.job(failed_id).unwrap().status,
            PrintJobStatus::Failed(_)
        ));

        let retried = f.manager.resubmit(failed_id).await.unwrap();
        assert_ne!(retried.id, failed_id);
        assert_eq!(retried.copies, 2);
        assert!(matches!(
            f.manager.job(failed_id).unwrap().status,
            PrintJobStatus::Failed(_)
        ));
        assert!(matches!(
            f.manager.resubmit(retried.id).await,
            Err(PrintError::NotRetryable(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_observes_completion_and_loss() {
        let f = fixture();
        let a = f.manager.submit(&photo(&f.storage, 1).id, 1).await.unwrap();
        let b = f.manager.submit(&photo(&f.storage, 2).id, 1).await.unwrap();
        assert_eq!(f.manager.refresh().await, 0);

        f.backend
            .set_state(a.handle.as_ref().unwrap(), BackendJobState::Completed);
        f.backend.set_state(
            b.handle.as_ref().unwrap(),
            BackendJobState::Failed("paper jam".into()),
        );
        assert_eq!(f.manager.refresh().await, 2);

        assert_eq!(f.manager.job(a.id).unwrap().status, PrintJobStatus::Completed);
        assert_eq!(
            f.manager.job(b.id).unwrap().status,
            PrintJobStatus::Failed("paper jam".into())
        );
        assert_eq!(
            f.manager.stats(),
            PrintStats {
                completed: 1,
                failed: 1,
                ..PrintStats::default()
            }
        );
    }

    #[tokio::test]
    async fn test_finished_history_is_capped() {
        let f = fixture();
        let manager = PrintJobManager::new(
            f.backend.clone(),
            f.storage.clone(),
            PrintingConfig::default(),
        )
        .with_finished_history(2);
        let photo = photo(&f.storage, 1);

        let mut failed = Vec::new();
        for _ in 0..4 {
            f.backend
                .fail_next_submit(PrintBackendError::PrinterUnavailable("offline".into()));
            if let Err(PrintError::Backend { job: Some(id), .. }) = manager.submit(&photo.id, 1).await {
                failed.push(id);
            }
        }
        let pending = manager.submit(&photo.id, 1).await.unwrap();

        let kept: Vec<_> = manager.jobs().into_iter().map(|job| job.id).collect();
        assert_eq!(kept, vec![failed[2], failed[3], pending.id]);
        assert!(manager.job(failed[0]).is_none());
        assert_eq!(
            manager.stats(),
            PrintStats {
                submitted: 1,
                failed: 4,
                ..PrintStats::default()
            }
        );
    }

    #[tokio::test]
    async fn test_clear_queue_fails_outstanding_jobs() {
        let f = fixture();
        let job = f.manager.submit(&photo(&f.storage, 1).id, 1).await.unwrap();

        assert_eq!(f.manager.clear_queue().await.unwrap(), 1);
        assert_eq!(
            f.manager.job(job.id).unwrap().status,
            PrintJobStatus::Failed("cancelled".into())
        );
    }

    #[tokio::test]
    async fn test_reconcile_adopts_titled_jobs() {
        let backend = MockPrintBackend::new();
        let handle = backend.preload("photobooth-5_20261016_101500_123");
        backend.preload("someone-elses-document");
        let f = fixture_with(backend, 10);

        assert_eq!(f.manager.reconcile().await.unwrap(), 1);
        let jobs = f.manager.jobs();
        assert_eq!(jobs[0].handle.as_ref(), Some(&handle));
        assert_eq!(jobs[0].status, PrintJobStatus::Submitted);
        assert_eq!(jobs[0].source_photo_id.as_str(), "5_20261016_101500_123");

        // Running it again adopts nothing new.
        assert_eq!(f.manager.reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_without_registry_adopts_nothing() {
        let f = fixture_with(MockPrintBackend::without_registry(), 10);
        assert_eq!(f.manager.reconcile().await.unwrap(), 0);
        assert!(f.manager.jobs().is_empty());
    }

    #[test]
    fn test_error_kinds() {
        let path = Path::new("/x");
        assert_eq!(
            PrintError::from(crate::storage::StorageError::PermissionDenied {
                path: path.to_path_buf()
            })
            .kind(),
            crate::error::ErrorKind::Resource
        );
    }
}
