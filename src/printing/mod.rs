//! Print job submission and tracking.
//!
//! The [`PrintJobManager`] validates requests against the configured copy
//! limit, checks that the source photo is still on disk and hands the
//! framed image to a [`PrintBackend`]. Completion is observed later by
//! polling the backend or by push-style reports.

mod backend;
mod job;
mod lp;
mod manager;

pub use backend::{
    ActiveJob, BackendJobState, MockPrintBackend, PrintBackend, PrintBackendError, PrintRequest,
};
pub use job::{JobHandle, PrintJob, PrintJobId, PrintJobStatus};
pub use lp::LpBackend;
pub use manager::{PrintJobManager, PrintStats};

use crate::config::{PrintBackendKind, PrintingConfig};
use crate::error::ErrorKind;
use crate::storage::{PhotoId, StorageError};
use std::sync::Arc;
use thiserror::Error;

/// Prefix of the backend job title; the photo id follows it.
pub const JOB_TITLE_PREFIX: &str = "photobooth-";

/// Errors returned by the print manager.
#[derive(Debug, Error)]
pub enum PrintError {
    #[error("invalid copy count {copies} (allowed 1..={max})")]
    InvalidCopyCount { copies: u32, max: u32 },
    #[error("source photo {0} is no longer on disk")]
    SourceNotFound(PhotoId),
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
    #[error("print backend failed for {job:?}: {source}")]
    Backend {
        job: Option<PrintJobId>,
        #[source]
        source: PrintBackendError,
    },
    #[error("unknown print job {0}")]
    UnknownJob(PrintJobId),
    #[error("print job {0} has not failed and cannot be resubmitted")]
    NotRetryable(PrintJobId),
}

impl PrintError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrintError::InvalidCopyCount { .. }
            | PrintError::SourceNotFound(_)
            | PrintError::UnknownJob(_)
            | PrintError::NotRetryable(_) => ErrorKind::Validation,
            PrintError::Storage(e) => e.kind(),
            PrintError::Backend { .. } => ErrorKind::Transient,
        }
    }
}

impl From<StorageError> for PrintError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => PrintError::SourceNotFound(id),
            other => PrintError::Storage(other),
        }
    }
}

/// Builds the backend selected in the configuration.
pub fn backend_from_config(config: &PrintingConfig) -> Arc<dyn PrintBackend> {
    match config.backend {
        PrintBackendKind::Lp => Arc::new(LpBackend::new(config.printer_name.clone())),
        PrintBackendKind::None => Arc::new(MockPrintBackend::auto_completing()),
    }
}
