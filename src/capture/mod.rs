//! Camera input: preview frames and still capture.
//!
//! The camera is an external collaborator. Everything the booth needs from
//! it goes through the [`Camera`] trait; preview streaming runs on its own
//! thread so a countdown or a commit never stalls the live view.

mod camera;
mod frame;
#[cfg(feature = "camera")]
mod nokhwa_camera;
mod preview;

pub use camera::{shared, Camera, CameraError, MockCamera, SharedCamera};
pub use frame::{encode_png, CapturedImage};
#[cfg(feature = "camera")]
pub use nokhwa_camera::NokhwaCamera;
pub use preview::{PreviewFrame, PreviewStream};
