//! Scanning overlay: a fixed detection box, corner markers and a scan line.
//!
//! Purely visual. Nothing here feeds recognition.

use image::{Rgb, RgbImage};

const BOX_WIDTH: f32 = 180.0;
const BOX_HEIGHT: f32 = 220.0;
/// The box sits slightly above center, where faces usually are.
const BOX_LIFT: f32 = 20.0;
const CORNER_SIZE: i64 = 20;

const BOX_COLOR: Rgb<u8> = Rgb([14, 165, 233]);
const CORNER_COLOR: Rgb<u8> = Rgb([16, 185, 129]);
const SCAN_LINE_COLOR: Rgb<u8> = Rgb([125, 205, 240]);

/// Fixed-size box centered in the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DetectionBox {
    pub fn centered(frame_width: u32, frame_height: u32) -> Self {
        Self {
            x: (frame_width as f32 - BOX_WIDTH) / 2.0,
            y: (frame_height as f32 - BOX_HEIGHT) / 2.0 - BOX_LIFT,
            width: BOX_WIDTH,
            height: BOX_HEIGHT,
        }
    }

    /// Vertical position of the scan line for a 0–100 progress value.
    pub fn scan_line_y(&self, progress: u8) -> f32 {
        self.y + self.height * (progress.min(100) as f32 / 100.0)
    }
}

/// Draw the box outline, corner markers and scan line onto `image`.
///
/// Anything falling outside the image is clipped.
pub fn draw_overlay(image: &mut RgbImage, bbox: &DetectionBox, progress: u8) {
    let x0 = bbox.x.round() as i64;
    let y0 = bbox.y.round() as i64;
    let x1 = (bbox.x + bbox.width).round() as i64;
    let y1 = (bbox.y + bbox.height).round() as i64;

    stroke_rect(image, x0, y0, x1, y1, 3, BOX_COLOR);

    // Corner markers, 4px wide.
    let c = CORNER_SIZE;
    for (cx, cy, dx, dy) in [(x0, y0, 1, 1), (x1, y0, -1, 1), (x0, y1, 1, -1), (x1, y1, -1, -1)] {
        fill_span(image, cx, cy, cx + dx * c, cy + dy * 4, CORNER_COLOR);
        fill_span(image, cx, cy, cx + dx * 4, cy + dy * c, CORNER_COLOR);
    }

    let line_y = bbox.scan_line_y(progress).round() as i64;
    fill_span(image, x0, line_y, x1, line_y + 2, SCAN_LINE_COLOR);
}

fn stroke_rect(image: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, t: i64, color: Rgb<u8>) {
    fill_span(image, x0, y0, x1, y0 + t, color);
    fill_span(image, x0, y1 - t, x1, y1, color);
    fill_span(image, x0, y0, x0 + t, y1, color);
    fill_span(image, x1 - t, y0, x1, y1, color);
}

/// Fill the half-open rectangle spanned by two corners, in any order.
fn fill_span(image: &mut RgbImage, ax: i64, ay: i64, bx: i64, by: i64, color: Rgb<u8>) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (left, right) = (ax.min(bx).max(0), ax.max(bx).min(w));
    let (top, bottom) = (ay.min(by).max(0), ay.max(by).min(h));
    for y in top..bottom {
        for x in left..right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}
