//! Live preview streaming on a dedicated thread.
//!
//! Preview frames are published through a `watch` channel so the UI always
//! sees the most recent frame, whatever the session is doing.

use super::{CapturedImage, SharedCamera};
use crate::config::CameraConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// Latest preview frame, shared with subscribers.
pub type PreviewFrame = Option<Arc<CapturedImage>>;

/// Background preview pump.
pub struct PreviewStream {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    frames: watch::Receiver<PreviewFrame>,
}

impl PreviewStream {
    /// Starts pulling preview frames from `camera` at `config.fps`.
    pub fn spawn(camera: SharedCamera, config: &CameraConfig) -> std::io::Result<Self> {
        let (tx, rx) = watch::channel(None);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_flag);
        let interval = config.frame_interval();

        let handle = std::thread::Builder::new()
            .name("preview".into())
            .spawn(move || preview_loop(camera, tx, stop, interval))?;

        tracing::info!(fps = config.fps, "Preview stream started");

        Ok(Self {
            stop_flag,
            handle: Some(handle),
            frames: rx,
        })
    }

    /// Most recent preview frame, if any has arrived yet.
    pub fn latest(&self) -> PreviewFrame {
        self.frames.borrow().clone()
    }

    /// Returns a receiver notified on every new frame.
    pub fn subscribe(&self) -> watch::Receiver<PreviewFrame> {
        self.frames.clone()
    }

    /// Stops the preview thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Preview thread panicked");
            }
            tracing::info!("Preview stream stopped");
        }
    }
}

impl Drop for PreviewStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn preview_loop(
    camera: SharedCamera,
    tx: watch::Sender<PreviewFrame>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        let frame = {
            let mut camera = camera.lock().unwrap_or_else(PoisonError::into_inner);
            camera.preview_frame(interval)
        };

        match frame {
            Ok(Some(frame)) => {
                tx.send_replace(Some(Arc::new(frame)));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Preview frame failed"),
        }

        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{shared, MockCamera};
    use std::time::Instant;

    #[test]
    fn test_preview_delivers_frames_until_stopped() {
        let mut config = CameraConfig::with_dimensions(16, 12);
        config.fps = 120;
        let camera = shared(MockCamera::opened(&config).unwrap());

        let preview = PreviewStream::spawn(camera, &config).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut frame = preview.latest();
        while frame.is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            frame = preview.latest();
        }

        let frame = frame.expect("no preview frame delivered");
        assert_eq!((frame.width(), frame.height()), (16, 12));

        preview.stop();
    }
}
