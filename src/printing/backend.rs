//! Print transport abstraction.

use super::JobHandle;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors reported by a print backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrintBackendError {
    #[error("printer unavailable: {0}")]
    PrinterUnavailable(String),
    #[error("printer rejected copy count {0}")]
    InvalidCopies(u32),
    #[error("backend does not support {0}")]
    Unsupported(&'static str),
    #[error("print backend error: {0}")]
    Unknown(String),
}

/// Everything the transport needs to print one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintRequest {
    pub file: PathBuf,
    pub copies: u32,
    /// Destination; empty selects the system default.
    pub printer: String,
    pub title: String,
    /// CUPS media keyword.
    pub media: Option<&'static str>,
}

/// State of a job as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendJobState {
    Queued,
    Printing,
    Completed,
    Failed(String),
    /// The backend no longer knows the job.
    Unknown,
}

/// A job still held by the backend queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub handle: JobHandle,
    pub title: Option<String>,
}

/// Narrow interface to the OS print spooler.
///
/// Calls may block; callers run them on a blocking worker.
pub trait PrintBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn submit(&self, request: &PrintRequest) -> Result<JobHandle, PrintBackendError>;

    fn job_state(&self, handle: &JobHandle) -> Result<BackendJobState, PrintBackendError>;

    /// Jobs still queued at the backend. Backends without a persistent
    /// registry return `Unsupported`.
    fn active_jobs(&self) -> Result<Vec<ActiveJob>, PrintBackendError>;

    fn cancel(&self, handle: &JobHandle) -> Result<(), PrintBackendError>;
}

#[derive(Default)]
struct MockState {
    next: u64,
    submissions: Vec<PrintRequest>,
    jobs: HashMap<JobHandle, (String, BackendJobState)>,
    order: Vec<JobHandle>,
    failures: VecDeque<PrintBackendError>,
}

/// In-memory backend that prints nothing.
#[derive(Default)]
pub struct MockPrintBackend {
    state: Mutex<MockState>,
    registry: bool,
    auto_complete: bool,
}

impl MockPrintBackend {
    /// Backend whose jobs stay queued until told otherwise.
    pub fn new() -> Self {
        Self {
            registry: true,
            ..Self::default()
        }
    }

    /// Backend that reports every job completed right away.
    pub fn auto_completing() -> Self {
        Self {
            registry: true,
            auto_complete: true,
            ..Self::default()
        }
    }

    /// Backend that keeps no job registry across restarts.
    pub fn without_registry() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next submission fail with `error`.
    pub fn fail_next_submit(&self, error: PrintBackendError) {
        self.lock().failures.push_back(error);
    }

    /// Sets the state reported for `handle`.
    pub fn set_state(&self, handle: &JobHandle, state: BackendJobState) {
        if let Some(entry) = self.lock().jobs.get_mut(handle) {
            entry.1 = state;
        }
    }

    /// Adds a job as if it had been queued before a restart.
    pub fn preload(&self, title: impl Into<String>) -> JobHandle {
        let mut state = self.lock();
        state.next += 1;
        let handle = JobHandle::new(format!("mock-{}", state.next));
        state
            .jobs
            .insert(handle.clone(), (title.into(), BackendJobState::Queued));
        state.order.push(handle.clone());
        handle
    }

    pub fn submissions(&self) -> Vec<PrintRequest> {
        self.lock().submissions.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.lock().submissions.len()
    }
}

impl PrintBackend for MockPrintBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn submit(&self, request: &PrintRequest) -> Result<JobHandle, PrintBackendError> {
        let mut state = self.lock();
        state.submissions.push(request.clone());
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        state.next += 1;
        let handle = JobHandle::new(format!("mock-{}", state.next));
        let initial = if self.auto_complete {
            BackendJobState::Completed
        } else {
            BackendJobState::Queued
        };
        state
            .jobs
            .insert(handle.clone(), (request.title.clone(), initial));
        state.order.push(handle.clone());
        Ok(handle)
    }

    fn job_state(&self, handle: &JobHandle) -> Result<BackendJobState, PrintBackendError> {
        Ok(self
            .lock()
            .jobs
            .get(handle)
            .map(|(_, state)| state.clone())
            .unwrap_or(BackendJobState::Unknown))
    }

    fn active_jobs(&self) -> Result<Vec<ActiveJob>, PrintBackendError> {
        if !self.registry {
            return Err(PrintBackendError::Unsupported("job registry"));
        }
        let state = self.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|handle| {
                let (title, job_state) = state.jobs.get(handle)?;
                matches!(job_state, BackendJobState::Queued | BackendJobState::Printing).then(
                    || ActiveJob {
                        handle: handle.clone(),
                        title: Some(title.clone()),
                    },
                )
            })
            .collect())
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), PrintBackendError> {
        match self.lock().jobs.get_mut(handle) {
            Some(entry) => {
                entry.1 = BackendJobState::Failed("cancelled".to_string());
                Ok(())
            }
            None => Err(PrintBackendError::Unknown(format!("no such job {handle}"))),
        }
    }
}
