//! Webcam support through `nokhwa`.
//!
//! The device handle is not `Send` on every platform, so it lives on a
//! dedicated thread and the [`Camera`] implementation talks to it over
//! channels.

use super::{Camera, CameraError, CapturedImage};
use crate::config::CameraConfig;
use image::imageops::{self, FilterType};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Raw RGB frame as returned by the device thread.
type RawFrame = (Vec<u8>, u32, u32);

enum Request {
    Frame(Sender<Result<RawFrame, CameraError>>),
    Stop,
}

struct Device {
    requests: Sender<Request>,
    handle: JoinHandle<()>,
}

/// Real webcam backed by `nokhwa`.
#[derive(Default)]
pub struct NokhwaCamera {
    config: Option<CameraConfig>,
    device: Option<Device>,
    sequence: u64,
}

impl NokhwaCamera {
    pub fn new() -> Self {
        Self::default()
    }

    fn grab(&mut self, timeout: Duration) -> Result<CapturedImage, CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::NotInitialized)?;
        let (tx, rx) = mpsc::channel();
        device
            .requests
            .send(Request::Frame(tx))
            .map_err(|_| CameraError::CameraUnavailable("device thread exited".into()))?;

        let (pixels, width, height) = rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => CameraError::Timeout(timeout),
            mpsc::RecvTimeoutError::Disconnected => {
                CameraError::CameraUnavailable("device thread exited".into())
            }
        })??;

        self.sequence += 1;
        CapturedImage::from_rgb(pixels, width, height, self.sequence)
            .ok_or_else(|| CameraError::CaptureFailed("frame size mismatch".into()))
    }
}

impl Camera for NokhwaCamera {
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        self.close();

        let (requests, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let device_config = config.clone();
        let handle = std::thread::Builder::new()
            .name("nokhwa-camera".into())
            .spawn(move || device_loop(device_config, inbox, ready_tx))
            .map_err(|e| CameraError::CameraUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(CameraError::CameraUnavailable("device thread exited".into()));
            }
        }

        self.device = Some(Device { requests, handle });
        self.config = Some(config.clone());
        self.sequence = 0;
        tracing::info!(device_id = config.device_id, "Webcam opened");
        Ok(())
    }

    fn preview_frame(&mut self, timeout: Duration) -> Result<Option<CapturedImage>, CameraError> {
        let config = self.config.clone().ok_or(CameraError::NotInitialized)?;
        let frame = match self.grab(timeout) {
            Ok(frame) => frame,
            Err(CameraError::Timeout(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let [width, height] = config.preview_resolution;
        let sequence = frame.sequence();
        let resized = if (frame.width(), frame.height()) == (width, height) {
            frame
        } else {
            let scaled = imageops::resize(frame.image(), width, height, FilterType::Triangle);
            CapturedImage::new(scaled, sequence)
        };
        Ok(Some(if config.mirror {
            resized.mirrored()
        } else {
            resized
        }))
    }

    fn capture_still(&mut self) -> Result<CapturedImage, CameraError> {
        let config = self.config.clone().ok_or(CameraError::NotInitialized)?;
        let frame = self.grab(config.capture_timeout())?;
        Ok(if config.mirror { frame.mirrored() } else { frame })
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn close(&mut self) {
        if let Some(device) = self.device.take() {
            let _ = device.requests.send(Request::Stop);
            if device.handle.join().is_err() {
                tracing::warn!("Webcam thread panicked");
            }
            tracing::info!("Webcam closed");
        }
        self.config = None;
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        self.close();
    }
}

fn device_loop(
    config: CameraConfig,
    inbox: Receiver<Request>,
    ready: Sender<Result<(), CameraError>>,
) {
    let [width, height] = config.resolution;
    let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, config.fps);
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

    let mut device = match nokhwa::Camera::new(CameraIndex::Index(config.device_id), requested) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready.send(Err(CameraError::CameraUnavailable(e.to_string())));
            return;
        }
    };
    if let Err(e) = device.open_stream() {
        let _ = ready.send(Err(CameraError::CameraUnavailable(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    while let Ok(request) = inbox.recv() {
        match request {
            Request::Frame(reply) => {
                let frame = device
                    .frame()
                    .and_then(|buffer| buffer.decode_image::<RgbFormat>())
                    .map(|decoded| {
                        let (w, h) = (decoded.width(), decoded.height());
                        (decoded.into_raw(), w, h)
                    })
                    .map_err(|e| CameraError::CaptureFailed(e.to_string()));
                let _ = reply.send(frame);
            }
            Request::Stop => break,
        }
    }

    if let Err(e) = device.stop_stream() {
        tracing::warn!(error = %e, "Failed to stop webcam stream");
    }
}
