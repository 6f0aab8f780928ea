//! Error classification shared by the booth components.

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Temporary condition (camera timeout, printer offline, sync failure).
    /// Surfaced as a retry-able notice.
    Transient,
    /// Rejected at the call boundary (bad copy count, busy booth, wrong state).
    Validation,
    /// Broken invariant (path collision, partial write). Aborts the session.
    Integrity,
    /// Disk full or permission denied. The commit may be retried or cancelled.
    Resource,
    /// Compositing failed; retry or fall back to the original image.
    Recoverable,
}

impl ErrorKind {
    /// Whether the operation may succeed if simply retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::Resource | ErrorKind::Recoverable
        )
    }
}
