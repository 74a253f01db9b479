//! Synthetic camera: a hardware-free source producing a moving gradient.
//!
//! Used by the CLI's `--synthetic` mode and by tests. Clones share state,
//! so a clone kept aside can deny access or count live streams.

use crate::camera::{CameraSource, CaptureError, StreamRequest, VideoStream};
use crate::frame::Frame;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    report_size: bool,
    state: Arc<SyntheticState>,
}

#[derive(Debug, Default)]
struct SyntheticState {
    denied: AtomicBool,
    live_streams: AtomicUsize,
    opened: AtomicUsize,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            report_size: true,
            state: Arc::default(),
        }
    }

    /// Streams from this camera do not report a native size.
    pub fn without_native_size(mut self) -> Self {
        self.report_size = false;
        self
    }

    /// Make subsequent `open` calls fail as if permission was refused.
    pub fn set_denied(&self, denied: bool) {
        self.state.denied.store(denied, Ordering::SeqCst);
    }

    /// Streams opened and not yet stopped.
    pub fn live_streams(&self) -> usize {
        self.state.live_streams.load(Ordering::SeqCst)
    }

    /// Total successful opens.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl CameraSource for SyntheticCamera {
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn VideoStream>, CaptureError> {
        if self.state.denied.load(Ordering::SeqCst) {
            return Err(CaptureError::CameraAccess("permission denied".into()));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.live_streams.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(requested = ?(request.width, request.height), width = self.width, height = self.height, "synthetic stream opened");

        Ok(Box::new(SyntheticStream {
            width: self.width,
            height: self.height,
            report_size: self.report_size,
            sequence: 0,
            stopped: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    report_size: bool,
    sequence: u32,
    stopped: bool,
    state: Arc<SyntheticState>,
}

impl VideoStream for SyntheticStream {
    fn native_size(&self) -> Option<(u32, u32)> {
        self.report_size.then_some((self.width, self.height))
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.stopped {
            return Err(CaptureError::NoActiveStream);
        }
        let (w, h) = (self.width.max(1), self.height.max(1));
        let shift = (self.sequence.wrapping_mul(8) & 0xFF) as u8;
        let image = RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                (x * 255 / w) as u8,
                (y * 255 / h) as u8,
                shift,
            ])
        });
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.state.live_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}
