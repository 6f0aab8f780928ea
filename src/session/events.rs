//! Events published by the session controller.

use super::SessionState;
use crate::storage::PhotoId;

/// Notification for the UI layer. Delivered over a broadcast channel; slow
/// subscribers may miss events but never block the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    CountdownTick {
        remaining: u32,
    },
    /// Compositing failed; the session waits in `Captured`.
    ComposeFailed {
        reason: String,
    },
    /// The still could not be taken; the session was discarded.
    CaptureFailed {
        reason: String,
    },
    Committed {
        photo_id: PhotoId,
    },
    /// Persisting failed; the session waits in `Committing`.
    CommitFailed {
        reason: String,
    },
    Cancelled,
}
