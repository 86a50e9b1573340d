//! Frame annotation and JPEG encoding for the live feed.

use crate::common::Result;
use crate::core::detector::FaceBox;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

const RECOGNIZED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const DISMISSED_COLOR: Rgb<u8> = Rgb([128, 128, 128]);
const STRANGER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkKind {
    Recognized(String),
    Dismissed,
    Stranger,
}

/// A face as drawn on the feed, with its best match score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMark {
    pub bbox: FaceBox,
    pub kind: MarkKind,
    pub score: f32,
}

impl FaceMark {
    /// Caption shown next to the box, e.g. `Ada Lovelace (0.93)`.
    pub fn label(&self) -> String {
        let name = match &self.kind {
            MarkKind::Recognized(name) => name.as_str(),
            MarkKind::Dismissed => "Dismissed",
            MarkKind::Stranger => "Stranger",
        };
        format!("{} ({:.2})", name, self.score)
    }
}

/// One JPEG frame of the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub paused: bool,
    /// Marks drawn on the frame, in frame coordinates, so clients can
    /// label faces without decoding the JPEG.
    pub faces: Vec<FaceMark>,
    pub jpeg: Vec<u8>,
}

pub fn annotate(frame: &DynamicImage, marks: &[FaceMark]) -> RgbImage {
    let mut img = frame.to_rgb8();

    for mark in marks {
        let face = &mark.bbox;
        if face.width() <= 0.0 || face.height() <= 0.0 {
            continue;
        }
        let color = match mark.kind {
            MarkKind::Recognized(_) => RECOGNIZED_COLOR,
            MarkKind::Dismissed => DISMISSED_COLOR,
            MarkKind::Stranger => STRANGER_COLOR,
        };

        let x1 = face.x1.max(0.0) as i32;
        let y1 = face.y1.max(0.0) as i32;
        let x2 = face.x2.min(img.width() as f32) as i32;
        let y2 = face.y2.min(img.height() as f32) as i32;

        let rect_width = (x2 - x1).max(1) as u32;
        let rect_height = (y2 - y1).max(1) as u32;

        draw_hollow_rect_mut(&mut img, Rect::at(x1, y1).of_size(rect_width, rect_height), color);
        if rect_width > 2 && rect_height > 2 {
            let inner = Rect::at(x1 + 1, y1 + 1).of_size(rect_width - 2, rect_height - 2);
            draw_hollow_rect_mut(&mut img, inner, color);
        }
    }

    img
}

/// Dark frame with a pause symbol, shown instead of camera output while paused.
pub fn paused_frame(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([24, 24, 24]));

    let bar_width = (width / 16).max(1);
    let bar_height = (height / 3).max(1);
    let top = ((height - bar_height) / 2) as i32;
    let center = (width / 2) as i32;
    let gap = bar_width as i32 / 2;

    for left in [center - gap - bar_width as i32, center + gap] {
        draw_filled_rect_mut(&mut img, Rect::at(left, top).of_size(bar_width, bar_height), Rgb([255, 255, 255]));
    }

    img
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img.clone()).write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(quality))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, size: f32) -> FaceBox {
        FaceBox { x1: x, y1: y, x2: x + size, y2: y + size, confidence: 0.9 }
    }

    fn mark(bbox: FaceBox, kind: MarkKind) -> FaceMark {
        FaceMark { bbox, kind, score: 0.5 }
    }

    #[test]
    fn test_annotate_colors_by_kind() {
        let frame = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let marks = vec![
            mark(face(10.0, 10.0, 50.0), MarkKind::Recognized("Ada".into())),
            mark(face(80.0, 10.0, 50.0), MarkKind::Stranger),
            mark(face(140.0, 10.0, 50.0), MarkKind::Dismissed),
        ];

        let img = annotate(&frame, &marks);

        assert_eq!(*img.get_pixel(10, 10), RECOGNIZED_COLOR);
        assert_eq!(*img.get_pixel(80, 10), STRANGER_COLOR);
        assert_eq!(*img.get_pixel(140, 10), DISMISSED_COLOR);
        // interior untouched
        assert_eq!(*img.get_pixel(35, 35), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_carries_name_and_score() {
        let recognized = FaceMark { bbox: face(0.0, 0.0, 10.0), kind: MarkKind::Recognized("Ada Lovelace".into()), score: 0.934 };
        assert_eq!(recognized.label(), "Ada Lovelace (0.93)");

        let stranger = FaceMark { bbox: face(0.0, 0.0, 10.0), kind: MarkKind::Stranger, score: 0.204 };
        assert_eq!(stranger.label(), "Stranger (0.20)");
        assert_eq!(mark(face(0.0, 0.0, 10.0), MarkKind::Dismissed).label(), "Dismissed (0.50)");
    }

    #[test]
    fn test_paused_frame_has_pause_bars() {
        let img = paused_frame(640, 480);
        assert_eq!(img.dimensions(), (640, 480));
        assert_eq!(*img.get_pixel(0, 0), Rgb([24, 24, 24]));
        assert!(img.pixels().any(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let jpeg = encode_jpeg(&paused_frame(64, 48), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }
}
