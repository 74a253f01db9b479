//! Camera sources — the acquisition seam and its V4L2 implementation.

use crate::frame::{self, Frame, FrameError};
use image::RgbImage;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Permission denied, device missing or busy. Callers offer a retry.
    #[error("camera access failed: {0}")]
    CameraAccess(String),
    #[error("no active camera stream")]
    NoActiveStream,
    #[error("frame read failed: {0}")]
    ReadFailed(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Constraints passed to a camera source when a session starts.
///
/// V4L2 has no notion of facing; the front camera is whichever device the
/// source was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub width: u32,
    pub height: u32,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            width: frame::DEFAULT_WIDTH,
            height: frame::DEFAULT_HEIGHT,
        }
    }
}

/// Something that can grant a live video stream.
pub trait CameraSource: Send {
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn VideoStream>, CaptureError>;
}

/// A granted, live video stream.
pub trait VideoStream: Send {
    /// Negotiated frame size, if the stream knows it.
    fn native_size(&self) -> Option<(u32, u32)>;

    /// Read the current frame.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release every underlying track. Must be idempotent.
    fn stop(&mut self);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 24-bit interleaved RGB.
    Rgb3,
    /// Motion JPEG, one JPEG per buffer.
    Mjpg,
}

/// V4L2 camera addressed by device node (e.g., "/dev/video0").
#[derive(Debug, Clone)]
pub struct V4lCamera {
    device_path: String,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraSource for V4lCamera {
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn VideoStream>, CaptureError> {
        let device_path = self.device_path.as_str();
        if !Path::new(device_path).exists() {
            return Err(CaptureError::CameraAccess(format!(
                "device not found: {device_path}"
            )));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CaptureError::CameraAccess(format!("{device_path}: device busy"))
            } else if e.kind() == std::io::ErrorKind::PermissionDenied {
                CaptureError::CameraAccess(format!("{device_path}: permission denied"))
            } else {
                CaptureError::CameraAccess(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::CameraAccess(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::CameraAccess(format!(
                "{device_path}: not a video capture device"
            )));
        }

        // Ask for YUYV at the preferred size; accept RGB3 or MJPG if the
        // driver negotiates those instead.
        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::CameraAccess(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = request.width;
        fmt.height = request.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::CameraAccess(format!("failed to set format: {e}")))?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpg
        } else {
            return Err(CaptureError::CameraAccess(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3, or MJPG)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let shared = Arc::new(LatestFrame::default());
        let worker = std::thread::Builder::new()
            .name("rollcall-camera".into())
            .spawn({
                let shared = Arc::clone(&shared);
                let device_path = device_path.to_string();
                move || capture_loop(device, &shared, &device_path)
            })
            .map_err(|e| CaptureError::CameraAccess(format!("failed to spawn capture thread: {e}")))?;

        Ok(Box::new(V4lStream {
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
            shared,
            worker: Some(worker),
        }))
    }
}

/// How long a read waits for the first frame, and the dequeue timeout of the
/// capture thread.
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);
const BUFFER_COUNT: u32 = 4;

#[derive(Clone)]
struct RawFrame {
    data: Vec<u8>,
    sequence: u32,
}

enum Slot {
    Empty,
    Frame(RawFrame),
    Failed(String),
}

/// Latest dequeued buffer, overwritten by the capture thread.
struct LatestFrame {
    running: AtomicBool,
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Default for LatestFrame {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }
}

impl LatestFrame {
    fn publish(&self, slot: Slot) {
        *lock(&self.slot) = slot;
        self.ready.notify_all();
    }

    /// The newest frame, waiting for the first one if none arrived yet.
    fn latest(&self, timeout: Duration) -> Result<RawFrame, CaptureError> {
        let guard = lock(&self.slot);
        let (guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |slot| matches!(slot, Slot::Empty))
            .unwrap_or_else(PoisonError::into_inner);
        match &*guard {
            Slot::Empty => Err(CaptureError::ReadFailed("timed out waiting for a frame".into())),
            Slot::Frame(raw) => Ok(raw.clone()),
            Slot::Failed(msg) => Err(CaptureError::ReadFailed(msg.clone())),
        }
    }
}

/// Owns the device and its mmap stream for the life of the session, keeping
/// only the newest buffer so reads never see a stale queue.
fn capture_loop(device: Device, shared: &LatestFrame, device_path: &str) {
    let mut stream = match MmapStream::with_buffers(&device, BufType::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            shared.publish(Slot::Failed(format!("failed to create mmap stream: {e}")));
            return;
        }
    };
    stream.set_timeout(FRAME_TIMEOUT);
    tracing::debug!(device = device_path, "capture thread started");

    while shared.running.load(Ordering::Acquire) {
        match stream.next() {
            Ok((buf, meta)) => {
                let used = match meta.bytesused as usize {
                    0 => buf.len(),
                    n => n.min(buf.len()),
                };
                shared.publish(Slot::Frame(RawFrame {
                    data: buf[..used].to_vec(),
                    sequence: meta.sequence,
                }));
            }
            // A timed-out dequeue leaves the stream's buffer bookkeeping
            // unusable, so any error ends the session.
            Err(e) => {
                let msg = if e.kind() == io::ErrorKind::TimedOut {
                    "camera stopped delivering frames".to_string()
                } else {
                    format!("failed to dequeue buffer: {e}")
                };
                tracing::warn!(device = device_path, error = %msg, "capture thread failed");
                shared.publish(Slot::Failed(msg));
                break;
            }
        }
    }

    drop(stream);
    tracing::info!(device = device_path, "released camera");
}

struct V4lStream {
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    shared: Arc<LatestFrame>,
    worker: Option<JoinHandle<()>>,
}

impl V4lStream {
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<RgbImage, FrameError> {
        match self.pixel_format {
            PixelFormat::Yuyv => {
                let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)?;
                frame::rgb_from_raw(&rgb, self.width, self.height)
            }
            PixelFormat::Rgb3 => frame::rgb_from_raw(buf, self.width, self.height),
            PixelFormat::Mjpg => frame::decode_mjpeg(buf),
        }
    }
}

impl VideoStream for V4lStream {
    fn native_size(&self) -> Option<(u32, u32)> {
        (self.width > 0 && self.height > 0).then_some((self.width, self.height))
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.worker.is_none() {
            return Err(CaptureError::NoActiveStream);
        }
        let raw = self.shared.latest(FRAME_TIMEOUT)?;
        let image = self.buf_to_rgb(&raw.data)?;

        Ok(Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence: raw.sequence,
        })
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.shared.running.store(false, Ordering::Release);
            if worker.join().is_err() {
                tracing::warn!(device = %self.device_path, "capture thread panicked");
            }
        }
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
