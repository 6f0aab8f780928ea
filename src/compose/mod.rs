//! Frame compositing.
//!
//! A frame is a PNG overlay with a transparent window. Compositing scales
//! the captured photo to fill that window (crop-to-fill, centered) and
//! alpha-blends the overlay on top.

mod compositor;
mod frame;

pub use compositor::{compose, FrameCompositor};
pub use frame::{Frame, FrameLibrary, Window};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading frames or compositing.
///
/// All of them are recoverable from the session's point of view.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("frame asset missing: {0}")]
    FrameAssetMissing(PathBuf),
    #[error("frame asset corrupt: {path}: {reason}")]
    FrameAssetCorrupt { path: PathBuf, reason: String },
    #[error("cannot composite an empty image")]
    EmptyImage,
}
