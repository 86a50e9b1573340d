//! Raw capture buffers to images.

use crate::common::{FaceWardError, Result};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};

/// Converts one raw buffer in the negotiated pixel format.
pub fn decode_frame(fourcc: &[u8; 4], data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match fourcc {
        b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
        b"GREY" => {
            let len = (width * height) as usize;
            let pixels = data.get(..len)
                .ok_or_else(|| FaceWardError::Camera("Short grayscale frame".into()))?;
            let img = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| FaceWardError::Camera("Failed to create grayscale image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        b"YUYV" => yuyv_to_image(data, width, height),
        other => Err(FaceWardError::Camera(format!(
            "Unsupported pixel format {}", String::from_utf8_lossy(other)
        ))),
    }
}

fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(FaceWardError::Camera("Short YUYV frame".into()));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    let img = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .ok_or_else(|| FaceWardError::Camera("Failed to create RGB image buffer".into()))?;
    Ok(DynamicImage::ImageRgb8(img))
}
