//! Session identity, states and the in-memory session value.

use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Monotonic session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// States of the booth. `Idle` means no session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Countdown,
    Captured,
    Review,
    Committing,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Countdown => "countdown",
            SessionState::Captured => "captured",
            SessionState::Review => "review",
            SessionState::Committing => "committing",
        }
    }

    /// Numeric code exported as a metrics gauge.
    pub fn code(self) -> i64 {
        match self {
            SessionState::Idle => 0,
            SessionState::Countdown => 1,
            SessionState::Captured => 2,
            SessionState::Review => 3,
            SessionState::Committing => 4,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PNG bytes handed to storage, kept so a failed commit can be retried
/// without encoding again.
#[derive(Debug, Clone)]
pub(crate) struct EncodedPhoto {
    pub original: Arc<Vec<u8>>,
    pub framed: Arc<Vec<u8>>,
}

/// The single active session.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) state: SessionState,
    pub(crate) captured: Option<Arc<RgbImage>>,
    pub(crate) composed: Option<Arc<RgbImage>>,
    pub(crate) countdown_remaining: u32,
    pub(crate) retake_count: u32,
    pub(crate) encoded: Option<EncodedPhoto>,
}

impl Session {
    pub(crate) fn new(id: SessionId, countdown: u32, retake_count: u32) -> Self {
        Self {
            id,
            state: SessionState::Countdown,
            captured: None,
            composed: None,
            countdown_remaining: countdown,
            retake_count,
            encoded: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn captured(&self) -> Option<&RgbImage> {
        self.captured.as_deref()
    }

    pub fn composed(&self) -> Option<&RgbImage> {
        self.composed.as_deref()
    }

    pub fn countdown_remaining(&self) -> u32 {
        self.countdown_remaining
    }

    pub fn retake_count(&self) -> u32 {
        self.retake_count
    }
}

/// Read-only view of the active session for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub countdown_remaining: u32,
    pub retake_count: u32,
    pub has_composed: bool,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            state: session.state,
            countdown_remaining: session.countdown_remaining,
            retake_count: session.retake_count,
            has_composed: session.composed.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_monotonic() {
        let first = SessionId::new(41);
        assert_eq!(first.next(), SessionId::new(42));
        assert!(first < first.next());
        assert_eq!(first.to_string(), "41");
    }

    #[test]
    fn test_new_session_starts_counting_down() {
        let session = Session::new(SessionId::new(1), 3, 2);
        assert_eq!(session.state(), SessionState::Countdown);
        assert_eq!(session.countdown_remaining(), 3);
        assert_eq!(session.retake_count(), 2);
        assert!(session.captured().is_none());
    }
}
