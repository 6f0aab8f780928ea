//! The booth's session state machine.
//!
//! A session moves `Idle → Countdown → Captured → Review` and then either
//! back to `Idle` on retake or through `Committing` to `Idle` on accept.
//! Only one session exists at a time and every transition is serialized by
//! the [`SessionController`].

mod controller;
mod events;
mod state;

pub use controller::{CancelHandle, SessionController, SessionStats};
pub use events::SessionEvent;
pub use state::{Session, SessionId, SessionSnapshot, SessionState};

use crate::capture::CameraError;
use crate::compose::ComposeError;
use crate::error::ErrorKind;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already in progress")]
    Busy,
    #[error("cannot {op} while {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("compositing failed: {0}")]
    Compose(#[from] ComposeError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("session cancelled")]
    Cancelled,
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Busy | SessionError::InvalidState { .. } | SessionError::Cancelled => {
                ErrorKind::Validation
            }
            SessionError::Camera(_) => ErrorKind::Transient,
            SessionError::Compose(_) => ErrorKind::Recoverable,
            SessionError::Storage(e) => e.kind(),
            SessionError::Encode(_) => ErrorKind::Resource,
            SessionError::Worker(_) => ErrorKind::Integrity,
        }
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(e: tokio::task::JoinError) -> Self {
        SessionError::Worker(e.to_string())
    }
}
