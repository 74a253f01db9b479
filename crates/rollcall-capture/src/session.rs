//! Capture session — owns the one live stream of a widget.

use crate::camera::{CameraSource, CaptureError, StreamRequest, VideoStream};
use crate::frame::{self, FrameImage, JpegQuality};
use image::RgbImage;

/// A camera session: at most one live stream, released on `stop()` or drop.
///
/// Every successful `start()` opens a new session id. Stills carry the id
/// of the session that produced them, see [`CaptureSession::holds`].
pub struct CaptureSession {
    source: Box<dyn CameraSource>,
    request: StreamRequest,
    stream: Option<Box<dyn VideoStream>>,
    session_id: u64,
}

impl CaptureSession {
    pub fn new(source: Box<dyn CameraSource>) -> Self {
        Self {
            source,
            request: StreamRequest::default(),
            stream: None,
            session_id: 0,
        }
    }

    /// Override the default 640x480 request.
    pub fn with_request(mut self, request: StreamRequest) -> Self {
        self.request = request;
        self
    }

    /// Acquire the camera. A session that is already active is replaced.
    ///
    /// On failure the session stays inactive.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            tracing::debug!(session = self.session_id, "replacing active capture session");
            self.stop();
        }

        match self.source.open(&self.request) {
            Ok(stream) => {
                self.session_id += 1;
                tracing::info!(
                    session = self.session_id,
                    native = ?stream.native_size(),
                    "capture session started"
                );
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera access failed");
                Err(e)
            }
        }
    }

    /// Release every track of the active stream. No-op when inactive.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!(session = self.session_id, "capture session stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Id of the active session, if any.
    pub fn session_id(&self) -> Option<u64> {
        self.stream.as_ref().map(|_| self.session_id)
    }

    /// Native size reported by the active stream.
    pub fn native_size(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().and_then(|s| s.native_size())
    }

    /// Size of the raster a capture renders into.
    pub fn canvas_size(&self) -> (u32, u32) {
        frame::canvas_size(self.native_size())
    }

    /// Read the current frame scaled onto the capture canvas.
    pub fn read_raster(&mut self) -> Result<RgbImage, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::NoActiveStream)?;
        let canvas = frame::canvas_size(stream.native_size());
        let frame = stream.read_frame()?;
        Ok(frame::fit_to_canvas(frame.image, canvas))
    }

    /// Render the current frame and encode it as a lossy still.
    pub fn capture_frame(&mut self, quality: JpegQuality) -> Result<FrameImage, CaptureError> {
        let raster = self.read_raster()?;
        let still = FrameImage::encode(&raster, quality, self.session_id)?;
        tracing::debug!(
            session = self.session_id,
            width = still.width(),
            height = still.height(),
            bytes = still.bytes().len(),
            quality = quality.percent(),
            "captured still"
        );
        Ok(still)
    }

    /// Whether `still` was produced by the session that is active right now.
    pub fn holds(&self, still: &FrameImage) -> bool {
        self.session_id() == Some(still.session())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
