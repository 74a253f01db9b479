//! Frame types and encoding — raw buffer conversion, canvas fitting, JPEG stills.

use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};

/// Canvas width used when the stream does not report its native size.
pub const DEFAULT_WIDTH: u32 = 640;
/// Canvas height used when the stream does not report its native size.
pub const DEFAULT_HEIGHT: u32 = 480;

/// Lossy encoder quality for stills, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegQuality(u8);

impl JpegQuality {
    /// Stills sent for recognition or registration.
    pub const RECOGNITION: Self = Self(95);
    /// General-purpose snapshots.
    pub const SNAPSHOT: Self = Self(80);

    pub fn new(percent: u8) -> Self {
        Self(percent.clamp(1, 100))
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

/// A raw RGB frame read from a live stream.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

/// Convert packed YUYV (4:2:2) to interleaved RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair. Conversion uses full-range BT.601 coefficients.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Wrap an interleaved RGB buffer, truncating any driver padding.
pub fn rgb_from_raw(rgb: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if rgb.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: rgb.len(),
        });
    }
    RgbImage::from_raw(width, height, rgb[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: rgb.len(),
    })
}

/// Decode a motion-JPEG buffer into RGB.
pub fn decode_mjpeg(buf: &[u8]) -> Result<RgbImage, FrameError> {
    image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| FrameError::Decode(e.to_string()))
}

/// Raster size for a capture: the stream's native size, or 640x480 when
/// the size is unknown or degenerate.
pub fn canvas_size(native: Option<(u32, u32)>) -> (u32, u32) {
    match native {
        Some((w, h)) if w > 0 && h > 0 => (w, h),
        _ => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
    }
}

/// Scale a frame onto a canvas of the given size. No-op when sizes match.
pub fn fit_to_canvas(image: RgbImage, (width, height): (u32, u32)) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}

/// An encoded still derived from a single video frame.
///
/// Tagged with the id of the capture session that produced it so callers
/// can refuse stills that outlived their session.
#[derive(Clone)]
pub struct FrameImage {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
    session: u64,
    captured_at: DateTime<Utc>,
}

impl FrameImage {
    /// Encode an RGB raster as a JPEG still.
    pub fn encode(image: &RgbImage, quality: JpegQuality, session: u64) -> Result<Self, FrameError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.percent())
            .encode_image(image)
            .map_err(|e| FrameError::Encode(e.to_string()))?;

        Ok(Self {
            jpeg,
            width: image.width(),
            height: image.height(),
            session,
            captured_at: Utc::now(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Id of the capture session that produced this still.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// `data:image/jpeg;base64,...` form expected by the recognition service.
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.jpeg);
        format!("data:image/jpeg;base64,{encoded}")
    }
}

impl std::fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameImage")
            .field("bytes", &self.jpeg.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("session", &self.session)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("still encode failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // High V pushes red up and green down.
        let yuyv = vec![128, 128, 128, 255];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 250);
        assert!(rgb[1] < 60);
        assert_eq!(rgb[2], 128);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(matches!(
            yuyv_to_rgb(&yuyv, 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_rgb_from_raw_truncates_padding() {
        let raw = vec![7u8; 2 * 2 * 3 + 5];
        let img = rgb_from_raw(&raw, 2, 2).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 1).0, [7, 7, 7]);
    }

    #[test]
    fn test_decode_mjpeg_rejects_garbage() {
        assert!(matches!(decode_mjpeg(&[1, 2, 3]), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_canvas_size_fallback() {
        assert_eq!(canvas_size(Some((1280, 720))), (1280, 720));
        assert_eq!(canvas_size(None), (640, 480));
        assert_eq!(canvas_size(Some((0, 720))), (640, 480));
    }

    #[test]
    fn test_fit_to_canvas_scales() {
        let img = RgbImage::from_pixel(320, 240, image::Rgb([10, 20, 30]));
        let fitted = fit_to_canvas(img, (640, 480));
        assert_eq!(fitted.dimensions(), (640, 480));
        assert_eq!(fitted.get_pixel(300, 200).0, [10, 20, 30]);
    }

    #[test]
    fn test_encode_produces_jpeg_data_url() {
        let img = RgbImage::from_pixel(16, 16, image::Rgb([200, 120, 40]));
        let still = FrameImage::encode(&img, JpegQuality::RECOGNITION, 3).unwrap();

        assert_eq!(&still.bytes()[..2], &[0xFF, 0xD8]);
        assert_eq!(still.session(), 3);
        assert_eq!((still.width(), still.height()), (16, 16));

        let url = still.to_data_url();
        let payload = url.strip_prefix("data:image/jpeg;base64,").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(decoded, still.bytes());
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let img = RgbImage::from_fn(64, 64, |x, y| image::Rgb([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8]));
        let high = FrameImage::encode(&img, JpegQuality::RECOGNITION, 1).unwrap();
        let low = FrameImage::encode(&img, JpegQuality::SNAPSHOT, 1).unwrap();
        assert!(low.bytes().len() < high.bytes().len());
    }
}
