//! Session controller: serializes every transition of the single session.

use super::state::EncodedPhoto;
use super::{Session, SessionError, SessionEvent, SessionId, SessionSnapshot, SessionState};
use crate::capture::{encode_png, SharedCamera};
use crate::compose::FrameCompositor;
use crate::config::BoothConfig;
use crate::error::ErrorKind;
use crate::storage::{PhotoStore, StoredPhoto, SyncHandle};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};

const EVENT_CAPACITY: usize = 64;

/// Length of one countdown step.
const TICK: Duration = Duration::from_secs(1);

/// Cooperative cancellation flag.
///
/// A request is honoured at the next safe point of the running operation
/// (after a countdown tick, after capture, before and after persisting).
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Session counters exposed for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sessions_started: u64,
    pub retakes: u64,
    pub committed: u64,
    pub cancelled: u64,
    pub capture_failures: u64,
    pub compose_failures: u64,
}

#[derive(Default)]
struct Counters {
    sessions_started: AtomicU64,
    retakes: AtomicU64,
    committed: AtomicU64,
    cancelled: AtomicU64,
    capture_failures: AtomicU64,
    compose_failures: AtomicU64,
}

struct Inner {
    session: Option<Session>,
    next_id: SessionId,
    /// Retake count handed over to the session that follows a retake.
    parked_retakes: u32,
}

/// Drives capture, review and commit for one booth.
pub struct SessionController {
    camera: SharedCamera,
    compositor: Arc<FrameCompositor>,
    store: Arc<dyn PhotoStore>,
    sync: Option<SyncHandle>,
    countdown: u32,
    selected_frame: StdMutex<Option<String>>,
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancelHandle,
    counters: Counters,
}

impl SessionController {
    pub fn new(
        camera: SharedCamera,
        compositor: Arc<FrameCompositor>,
        store: Arc<dyn PhotoStore>,
        config: &BoothConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let default_frame = config.frames.default_frame.clone();
        if let Some(name) = &default_frame {
            if let Err(e) = compositor.library().get(name) {
                tracing::warn!(frame = %name, error = %e, "Default frame unavailable");
            }
        }

        Self {
            camera,
            compositor,
            store,
            sync: None,
            countdown: config.countdown(),
            selected_frame: StdMutex::new(default_frame),
            inner: Mutex::new(Inner {
                session: None,
                next_id: SessionId::new(1),
                parked_retakes: 0,
            }),
            state,
            events,
            cancel: CancelHandle::default(),
            counters: Counters::default(),
        }
    }

    /// Requests a sync sweep after every commit.
    pub fn with_sync(mut self, sync: SyncHandle) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Continues session numbering after `last`.
    pub fn resume_after(mut self, last: Option<SessionId>) -> Self {
        if let Some(last) = last {
            self.inner.get_mut().next_id = last.next();
        }
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that always holds the current state.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn countdown_time(&self) -> u32 {
        self.countdown
    }

    pub fn selected_frame(&self) -> Option<String> {
        self.selected_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Selects the frame for the next composite. `None` keeps photos unframed.
    pub fn select_frame(&self, name: Option<String>) -> Result<(), SessionError> {
        if let Some(name) = &name {
            self.compositor.library().get(name)?;
        }
        tracing::info!(frame = ?name, "Frame selected");
        *self
            .selected_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = name;
        Ok(())
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner.lock().await.session.as_ref().map(SessionSnapshot::from)
    }

    /// Image shown in review.
    pub async fn composed_image(&self) -> Option<Arc<RgbImage>> {
        self.inner
            .lock()
            .await
            .session
            .as_ref()
            .and_then(|s| s.composed.clone())
    }

    pub fn stats(&self) -> SessionStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SessionStats {
            sessions_started: load(&self.counters.sessions_started),
            retakes: load(&self.counters.retakes),
            committed: load(&self.counters.committed),
            cancelled: load(&self.counters.cancelled),
            capture_failures: load(&self.counters.capture_failures),
            compose_failures: load(&self.counters.compose_failures),
        }
    }

    /// Starts a new session. Rejected with `Busy` unless the booth is idle.
    ///
    /// A booth that is mid-session is rejected without waiting; an idle
    /// booth only waits for readers such as [`snapshot`](Self::snapshot).
    pub async fn start_session(&self) -> Result<SessionId, SessionError> {
        let current = self.state();
        if current != SessionState::Idle {
            tracing::debug!(state = %current, "Start rejected, booth busy");
            return Err(SessionError::Busy);
        }
        let mut inner = self.inner.lock().await;
        if let Some(session) = &inner.session {
            tracing::debug!(
                session_id = %session.id,
                state = %session.state,
                "Start rejected, booth busy"
            );
            return Err(SessionError::Busy);
        }

        // A request left over from a finished session must not cancel this one.
        self.cancel.take();

        let id = inner.next_id;
        inner.next_id = id.next();
        let retake_count = std::mem::take(&mut inner.parked_retakes);
        inner.session = Some(Session::new(id, self.countdown, retake_count));
        self.counters.sessions_started.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            session_id = %id,
            countdown = self.countdown,
            retake_count,
            "Session started"
        );
        self.publish_state(SessionState::Idle, SessionState::Countdown);
        Ok(id)
    }

    /// Advances the countdown by one step, capturing and compositing on zero.
    pub async fn tick(&self) -> Result<SessionState, SessionError> {
        let mut inner = self.inner.lock().await;
        self.tick_locked(&mut inner).await
    }

    /// Runs the countdown of the current session in real time.
    ///
    /// Returns the state reached after capture, or the current state if the
    /// session was cancelled or replaced meanwhile.
    pub async fn run_countdown(&self) -> Result<SessionState, SessionError> {
        let session_id = {
            let inner = self.inner.lock().await;
            active(&inner, "run countdown", SessionState::Countdown)?.id
        };

        loop {
            let remaining = {
                let inner = self.inner.lock().await;
                match &inner.session {
                    Some(s) if s.id == session_id && s.state == SessionState::Countdown => {
                        s.countdown_remaining
                    }
                    _ => return Ok(self.state()),
                }
            };
            if remaining > 0 {
                tokio::time::sleep(TICK).await;
            }

            let mut inner = self.inner.lock().await;
            let current = inner.session.as_ref().map(|s| (s.id, s.state));
            if current != Some((session_id, SessionState::Countdown)) {
                return Ok(self.state());
            }
            match self.tick_locked(&mut inner).await {
                Ok(SessionState::Countdown) => {}
                Ok(state) => return Ok(state),
                Err(SessionError::Cancelled) => return Ok(SessionState::Idle),
                Err(e) => return Err(e),
            }
        }
    }

    /// Composites again after a failure in `Captured`.
    pub async fn retry_compose(&self) -> Result<SessionState, SessionError> {
        let mut inner = self.inner.lock().await;
        if self.observe_cancel(&mut inner) {
            return Err(SessionError::Cancelled);
        }
        active_mut(&mut inner, "retry compose", SessionState::Captured)?;
        self.compose_locked(&mut inner).await
    }

    /// Falls back to the unframed capture and moves to review.
    pub async fn use_original(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if self.observe_cancel(&mut inner) {
            return Err(SessionError::Cancelled);
        }
        let session = active_mut(&mut inner, "use original", SessionState::Captured)?;
        session.composed = session.captured.clone();
        session.encoded = None;
        tracing::info!(session_id = %session.id, "Using original image without frame");
        self.set_state(session, SessionState::Review);
        Ok(())
    }

    /// Discards the reviewed photo and returns to `Idle`. Storage is untouched.
    pub async fn retake(&self) -> Result<u32, SessionError> {
        let mut inner = self.inner.lock().await;
        if self.observe_cancel(&mut inner) {
            return Err(SessionError::Cancelled);
        }
        let session = active_mut(&mut inner, "retake", SessionState::Review)?;
        session.retake_count += 1;
        let retake_count = session.retake_count;
        let session_id = session.id;

        inner.parked_retakes = retake_count;
        self.end_session(&mut inner);
        self.counters.retakes.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session_id = %session_id, retake_count, "Retake requested");
        Ok(retake_count)
    }

    /// Commits the reviewed photo.
    ///
    /// On a storage failure the session stays in `Committing` for
    /// [`retry_commit`](Self::retry_commit) or [`cancel`](Self::cancel).
    pub async fn accept(&self) -> Result<StoredPhoto, SessionError> {
        let mut inner = self.inner.lock().await;
        if self.observe_cancel(&mut inner) {
            return Err(SessionError::Cancelled);
        }
        let session = active_mut(&mut inner, "accept", SessionState::Review)?;
        self.set_state(session, SessionState::Committing);
        self.commit_locked(&mut inner).await
    }

    /// Retries a commit that failed.
    pub async fn retry_commit(&self) -> Result<StoredPhoto, SessionError> {
        let mut inner = self.inner.lock().await;
        if self.observe_cancel(&mut inner) {
            return Err(SessionError::Cancelled);
        }
        active_mut(&mut inner, "retry commit", SessionState::Committing)?;
        self.commit_locked(&mut inner).await
    }

    /// Cancels the active session.
    ///
    /// If an operation is in flight the request is honoured at its next safe
    /// point and this call returns once it has been.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.cancel.request();
        let mut inner = self.inner.lock().await;
        if !self.cancel.take() {
            // The in-flight operation already tore the session down.
            return Ok(());
        }
        if inner.session.is_none() {
            return Err(SessionError::InvalidState {
                op: "cancel",
                state: SessionState::Idle,
            });
        }
        self.finish_cancel(&mut inner);
        Ok(())
    }

    async fn tick_locked(&self, inner: &mut Inner) -> Result<SessionState, SessionError> {
        if self.observe_cancel(inner) {
            return Err(SessionError::Cancelled);
        }

        let session = active_mut(inner, "tick", SessionState::Countdown)?;
        let session_id = session.id;
        if session.countdown_remaining > 0 {
            session.countdown_remaining -= 1;
            let remaining = session.countdown_remaining;
            tracing::debug!(session_id = %session_id, remaining, "Countdown tick");
            self.emit(SessionEvent::CountdownTick { remaining });
            if remaining > 0 {
                return Ok(SessionState::Countdown);
            }
        }

        let camera = Arc::clone(&self.camera);
        let still = tokio::task::spawn_blocking(move || {
            camera
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .capture_still()
        })
        .await?;

        let still = match still {
            Ok(still) => still,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Capture failed, discarding session");
                self.counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                self.end_session(inner);
                self.emit(SessionEvent::CaptureFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if self.observe_cancel(inner) {
            return Err(SessionError::Cancelled);
        }

        let session = active_mut(inner, "capture", SessionState::Countdown)?;
        tracing::info!(
            session_id = %session_id,
            width = still.width(),
            height = still.height(),
            "Still captured"
        );
        session.captured = Some(Arc::new(still.into_image()));
        self.set_state(session, SessionState::Captured);
        self.compose_locked(inner).await
    }

    async fn compose_locked(&self, inner: &mut Inner) -> Result<SessionState, SessionError> {
        let session = active_mut(inner, "compose", SessionState::Captured)?;
        let session_id = session.id;
        let captured = session.captured.clone().ok_or(SessionError::InvalidState {
            op: "compose",
            state: SessionState::Captured,
        })?;

        let composed = match self.selected_frame() {
            None => Ok(captured),
            Some(frame) => {
                let compositor = Arc::clone(&self.compositor);
                tokio::task::spawn_blocking(move || {
                    compositor.compose(&captured, &frame).map(Arc::new)
                })
                .await?
            }
        };

        let session = active_mut(inner, "compose", SessionState::Captured)?;
        match composed {
            Ok(image) => {
                session.composed = Some(image);
                session.encoded = None;
                self.set_state(session, SessionState::Review);
                Ok(SessionState::Review)
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Compositing failed");
                self.counters.compose_failures.fetch_add(1, Ordering::Relaxed);
                self.emit(SessionEvent::ComposeFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    async fn commit_locked(&self, inner: &mut Inner) -> Result<StoredPhoto, SessionError> {
        let session = active_mut(inner, "commit", SessionState::Committing)?;
        let session_id = session.id;

        let encoded = match session.encoded.clone() {
            Some(encoded) => encoded,
            None => {
                let (Some(original), Some(framed)) =
                    (session.captured.clone(), session.composed.clone())
                else {
                    return Err(SessionError::InvalidState {
                        op: "commit",
                        state: SessionState::Committing,
                    });
                };

                let encoded = tokio::task::spawn_blocking(move || {
                    Ok::<_, image::ImageError>(EncodedPhoto {
                        original: Arc::new(encode_png(&original)?),
                        framed: Arc::new(encode_png(&framed)?),
                    })
                })
                .await?;

                match encoded {
                    Ok(encoded) => {
                        active_mut(inner, "commit", SessionState::Committing)?.encoded =
                            Some(encoded.clone());
                        encoded
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Failed to encode photo");
                        self.emit(SessionEvent::CommitFailed {
                            reason: e.to_string(),
                        });
                        return Err(e.into());
                    }
                }
            }
        };

        if self.observe_cancel(inner) {
            return Err(SessionError::Cancelled);
        }

        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || {
            store.persist(&encoded.original, &encoded.framed, session_id)
        })
        .await?;

        let cancelled = self.cancel.take();
        match result {
            Ok(photo) if cancelled => {
                let store = Arc::clone(&self.store);
                let id = photo.id.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || store.discard(&id)).await? {
                    tracing::error!(
                        photo_id = %photo.id,
                        error = %e,
                        "Failed to roll back cancelled commit"
                    );
                }
                self.finish_cancel(inner);
                Err(SessionError::Cancelled)
            }
            Ok(photo) => {
                self.counters.committed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(session_id = %session_id, photo_id = %photo.id, "Session committed");
                self.emit(SessionEvent::Committed {
                    photo_id: photo.id.clone(),
                });
                self.end_session(inner);
                if let Some(sync) = &self.sync {
                    sync.request();
                }
                Ok(photo)
            }
            Err(_) if cancelled => {
                self.finish_cancel(inner);
                Err(SessionError::Cancelled)
            }
            Err(e) if e.kind() == ErrorKind::Integrity => {
                tracing::error!(session_id = %session_id, error = %e, "Storage invariant violated, aborting session");
                self.emit(SessionEvent::CommitFailed {
                    reason: e.to_string(),
                });
                self.end_session(inner);
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Commit failed, awaiting retry or cancel");
                self.emit(SessionEvent::CommitFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Tears the session down if a cancel request is pending.
    fn observe_cancel(&self, inner: &mut Inner) -> bool {
        if inner.session.is_some() && self.cancel.take() {
            self.finish_cancel(inner);
            return true;
        }
        false
    }

    fn finish_cancel(&self, inner: &mut Inner) {
        inner.parked_retakes = 0;
        if let Some(session) = self.end_session(inner) {
            tracing::info!(session_id = %session.id, state = %session.state, "Session cancelled");
        }
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.emit(SessionEvent::Cancelled);
    }

    fn end_session(&self, inner: &mut Inner) -> Option<Session> {
        let session = inner.session.take()?;
        self.publish_state(session.state, SessionState::Idle);
        Some(session)
    }

    fn set_state(&self, session: &mut Session, to: SessionState) {
        let from = session.state;
        session.state = to;
        self.publish_state(from, to);
    }

    fn publish_state(&self, from: SessionState, to: SessionState) {
        tracing::debug!(from = %from, to = %to, "Session state changed");
        self.state.send_replace(to);
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn active<'a>(
    inner: &'a Inner,
    op: &'static str,
    expected: SessionState,
) -> Result<&'a Session, SessionError> {
    match &inner.session {
        Some(session) if session.state == expected => Ok(session),
        Some(session) => Err(SessionError::InvalidState {
            op,
            state: session.state,
        }),
        None => Err(SessionError::InvalidState {
            op,
            state: SessionState::Idle,
        }),
    }
}

fn active_mut<'a>(
    inner: &'a mut Inner,
    op: &'static str,
    expected: SessionState,
) -> Result<&'a mut Session, SessionError> {
    let state = inner.session.as_ref().map_or(SessionState::Idle, |s| s.state);
    match &mut inner.session {
        Some(session) if state == expected => Ok(session),
        _ => Err(SessionError::InvalidState { op, state }),
    }
}
