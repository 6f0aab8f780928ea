//! Photo Booth Core Library
//!
//! Drives a kiosk-style photo booth: live camera preview, countdown
//! triggered capture, frame compositing, review and retake, local storage
//! with capacity eviction, background sync to a secondary folder and print
//! job submission.
//!
//! # Architecture
//!
//! ```text
//! capture → session → compose → review ─┬─ retake → idle
//!                                       └─ accept → storage → sync
//!                                                      └──→ printing
//! ```
//!
//! # Design Principles
//!
//! - **One booth, one session**: every transition is serialized by the
//!   [`SessionController`]; concurrent starts are rejected, never queued
//! - **Atomic commits**: images are written under temporary names and
//!   renamed into place, so a cancelled or failed commit leaves nothing behind
//! - **Bounded storage**: the oldest photos are evicted first and the photo
//!   just committed is never evicted
//! - **Best-effort side paths**: sync and eviction failures are logged and
//!   retried, never surfaced as commit failures
//!
//! # Example
//!
//! ```no_run
//! use photobooth::{
//!     capture::{shared, MockCamera},
//!     compose::{FrameCompositor, FrameLibrary},
//!     config::BoothConfig,
//!     session::SessionController,
//!     storage::StorageManager,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BoothConfig::default();
//! let camera = shared(MockCamera::opened(&config.camera)?);
//! let frames = Arc::new(FrameCompositor::new(FrameLibrary::new(&config.frames.frames_path)));
//! let storage = Arc::new(StorageManager::open(config.storage.clone())?);
//!
//! let booth = SessionController::new(camera, frames, storage, &config);
//! booth.start_session().await?;
//! booth.run_countdown().await?;
//! let photo = booth.accept().await?;
//! println!("saved {}", photo.framed_path.display());
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod compose;
pub mod config;
pub mod error;
pub mod metrics;
pub mod printing;
pub mod session;
pub mod storage;

// Re-export commonly used types at crate root
pub use capture::{Camera, CameraError, CapturedImage, MockCamera};
pub use compose::{ComposeError, FrameCompositor, FrameLibrary};
pub use config::{BoothConfig, ConfigError};
pub use error::ErrorKind;
pub use printing::{PrintError, PrintJob, PrintJobManager, PrintJobStatus};
pub use session::{SessionController, SessionError, SessionEvent, SessionId, SessionState};
pub use storage::{PhotoId, StorageError, StorageManager, StoredPhoto};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
