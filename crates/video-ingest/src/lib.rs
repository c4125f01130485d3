//! Camera sources for the rebar edge analyzer.
//!
//! A [`CameraSource`] is owned by exactly one thread and read one frame at a
//! time. The OpenCV-backed device camera is available with the `opencv`
//! feature; [`StillImageSource`] replays an image file and needs no hardware.

#[cfg(feature = "opencv")]
pub mod camera;
pub mod still;
pub mod types;

#[cfg(feature = "opencv")]
pub use camera::OpenCvCamera;
pub use still::StillImageSource;
pub use types::{CameraSource, CaptureError, Frame, FrameFormat};
