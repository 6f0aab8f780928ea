//! Print job records and their lifecycle.

use crate::storage::PhotoId;
use chrono::{DateTime, Local};
use std::fmt;

/// Local identifier of a print job. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrintJobId(u64);

impl PrintJobId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PrintJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Backend reference of a submitted job, e.g. `Canon_Printer-42` for CUPS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintJobStatus {
    Pending,
    Submitted,
    Completed,
    Failed(String),
}

impl PrintJobStatus {
    /// `Completed` and `Failed` are final; a failed job is retried by
    /// submitting a new one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PrintJobStatus::Completed | PrintJobStatus::Failed(_))
    }

    pub fn can_transition_to(&self, next: &PrintJobStatus) -> bool {
        use PrintJobStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted) | (Pending, Failed(_)) | (Submitted, Completed) | (Submitted, Failed(_))
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrintJobStatus::Pending => "pending",
            PrintJobStatus::Submitted => "submitted",
            PrintJobStatus::Completed => "completed",
            PrintJobStatus::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for PrintJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintJobStatus::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One print submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub id: PrintJobId,
    pub source_photo_id: PhotoId,
    pub copies: u32,
    pub status: PrintJobStatus,
    pub handle: Option<JobHandle>,
    pub created_at: DateTime<Local>,
}

impl PrintJob {
    pub(crate) fn new(id: PrintJobId, source_photo_id: PhotoId, copies: u32) -> Self {
        Self {
            id,
            source_photo_id,
            copies,
            status: PrintJobStatus::Pending,
            handle: None,
            created_at: Local::now(),
        }
    }

    /// Applies `next` if the lifecycle allows it.
    pub(crate) fn transition(&mut self, next: PrintJobStatus) -> bool {
        if !self.status.can_transition_to(&next) {
            tracing::debug!(
                job_id = %self.id,
                from = %self.status,
                to = %next,
                "Ignoring print job transition"
            );
            return false;
        }
        tracing::info!(job_id = %self.id, from = %self.status, to = %next, "Print job status changed");
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut job = PrintJob::new(PrintJobId::new(1), PhotoId::from("1_x"), 2);
        assert!(job.transition(PrintJobStatus::Submitted));
        assert!(job.transition(PrintJobStatus::Failed("paper jam".into())));
        assert!(job.status.is_terminal());

        // A failed job never goes back to pending.
        assert!(!job.transition(PrintJobStatus::Pending));
        assert!(!job.transition(PrintJobStatus::Submitted));
        assert_eq!(job.status, PrintJobStatus::Failed("paper jam".into()));
    }

    #[test]
    fn test_completed_is_final() {
        let status = PrintJobStatus::Completed;
        assert!(!status.can_transition_to(&PrintJobStatus::Failed("late".into())));
        assert!(!PrintJobStatus::Pending.can_transition_to(&PrintJobStatus::Completed));
        assert_eq!(PrintJobId::new(7).to_string(), "job-7");
    }
}
