//! Camera abstraction for preview and still capture.
//!
//! The booth only ever talks to the camera through the [`Camera`] trait,
//! so real hardware and the synthetic [`MockCamera`] are interchangeable.

use super::CapturedImage;
use crate::config::CameraConfig;
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("camera timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to configure camera: {0}")]
    ConfigFailed(String),
    #[error("failed to capture image: {0}")]
    CaptureFailed(String),
    #[error("camera not initialized")]
    NotInitialized,
}

/// A camera shared between the preview thread and the session controller.
pub type SharedCamera = Arc<Mutex<Box<dyn Camera>>>;

/// Wraps a camera for sharing.
pub fn shared(camera: impl Camera + 'static) -> SharedCamera {
    let boxed: Box<dyn Camera> = Box::new(camera);
    Arc::new(Mutex::new(boxed))
}

/// Trait for camera implementations.
pub trait Camera: Send {
    /// Opens and initializes the camera with the given configuration.
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError>;

    /// Returns the next preview frame, or `None` if none arrived within `timeout`.
    fn preview_frame(&mut self, timeout: Duration) -> Result<Option<CapturedImage>, CameraError>;

    /// Captures a full resolution still.
    fn capture_still(&mut self) -> Result<CapturedImage, CameraError>;

    /// Checks if the camera is currently open.
    fn is_open(&self) -> bool;

    /// Closes the camera and releases resources.
    fn close(&mut self);
}

/// Mock camera that generates deterministic synthetic images.
#[derive(Debug, Default)]
pub struct MockCamera {
    config: Option<CameraConfig>,
    sequence: u64,
    stills: u64,
    failures: VecDeque<CameraError>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a camera that is already open with `config`.
    pub fn opened(config: &CameraConfig) -> Result<Self, CameraError> {
        let mut camera = Self::new();
        camera.open(config)?;
        Ok(camera)
    }

    /// Queues an error returned by the next still capture.
    pub fn fail_next_capture(&mut self, error: CameraError) {
        self.failures.push_back(error);
    }

    /// Number of stills taken so far.
    pub fn stills_taken(&self) -> u64 {
        self.stills
    }

    fn synthesize(&mut self, width: u32, height: u32, mirror: bool) -> CapturedImage {
        self.sequence += 1;
        let seq = self.sequence;
        // Gradient that shifts with the sequence so consecutive frames differ.
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                ((x * 255) / width.max(1)) as u8,
                ((y * 255) / height.max(1)) as u8,
                (seq % 256) as u8,
            ])
        });
        let captured = CapturedImage::new(image, seq);
        if mirror {
            captured.mirrored()
        } else {
            captured
        }
    }
}

impl Camera for MockCamera {
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        self.config = Some(config.clone());
        self.sequence = 0;
        tracing::info!(
            device_id = config.device_id,
            resolution = ?config.resolution,
            "MockCamera opened"
        );
        Ok(())
    }

    fn preview_frame(&mut self, _timeout: Duration) -> Result<Option<CapturedImage>, CameraError> {
        let config = self.config.clone().ok_or(CameraError::NotInitialized)?;
        let [width, height] = config.preview_resolution;
        Ok(Some(self.synthesize(width, height, config.mirror)))
    }

    fn capture_still(&mut self) -> Result<CapturedImage, CameraError> {
        let config = self.config.clone().ok_or(CameraError::NotInitialized)?;
        if let Some(error) = self.failures.pop_front() {
            return Err(error);
        }
        self.stills += 1;
        let [width, height] = config.resolution;
        Ok(self.synthesize(width, height, config.mirror))
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn close(&mut self) {
        self.config = None;
        tracing::info!("MockCamera closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_camera_lifecycle() {
        let mut camera = MockCamera::new();
        let config = CameraConfig::with_dimensions(32, 24);

        assert!(!camera.is_open());

        camera.open(&config).unwrap();
        assert!(camera.is_open());

        let still = camera.capture_still().unwrap();
        assert_eq!((still.width(), still.height()), (32, 24));
        assert_eq!(still.sequence(), 1);

        let preview = camera.preview_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(preview.unwrap().sequence(), 2);
        assert_eq!(camera.stills_taken(), 1);

        camera.close();
        assert!(!camera.is_open());
    }

    #[test]
    fn test_capture_without_open() {
        let mut camera = MockCamera::new();
        assert!(matches!(
            camera.capture_still(),
            Err(CameraError::NotInitialized)
        ));
    }

    #[test]
    fn test_queued_failure_is_returned_once() {
        let mut camera = MockCamera::opened(&CameraConfig::with_dimensions(8, 8)).unwrap();
        camera.fail_next_capture(CameraError::Timeout(Duration::from_secs(1)));

        assert!(matches!(
            camera.capture_still(),
            Err(CameraError::Timeout(_))
        ));
        assert!(camera.capture_still().is_ok());
        assert_eq!(camera.stills_taken(), 1);
    }
}
