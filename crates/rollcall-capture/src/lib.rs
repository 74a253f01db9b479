//! rollcall-capture — Media capture adapter.
//!
//! Acquires a camera stream, samples the current video frame into a
//! raster and encodes it as a JPEG still for the recognition service.
//! Sources are pluggable: V4L2 hardware or a synthetic gradient.

pub mod camera;
pub mod frame;
pub mod overlay;
pub mod session;
pub mod synthetic;

pub use camera::{CameraSource, CaptureError, DeviceInfo, StreamRequest, V4lCamera, VideoStream};
pub use frame::{Frame, FrameImage, JpegQuality};
pub use overlay::DetectionBox;
pub use session::CaptureSession;
pub use synthetic::SyntheticCamera;
