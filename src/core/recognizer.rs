use crate::common::{Config, FaceWardError, Result};
use crate::core::detector::{optimization_level, FaceBox};
use crate::core::interfaces::FaceEmbedding;
use ort::{Environment, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

pub type Embedding = Vec<f32>;

/// Face embedding model running on ONNX Runtime.
pub struct OnnxFaceEmbedder {
    session: Session,
    _environment: Arc<Environment>,
    input_size: u32,
    channels: u32,
    normalization_value: f32,
}

impl OnnxFaceEmbedder {
    /// Relative model paths are resolved against `models_base`.
    pub fn new(config: &Config, models_base: &Path) -> Result<Self> {
        let mut model_path = config.models.recognizer_path.clone();
        if model_path.is_relative() {
            model_path = models_base.join(&model_path);
        }

        let environment = Arc::new(
            Environment::builder()
                .with_name("face_recognizer")
                .build()
                .map_err(|e| FaceWardError::Model(format!("Failed to create environment: {}", e)))?
        );

        if !model_path.exists() {
            return Err(FaceWardError::Model(
                format!("Recognition model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(config.models.optimization_level))?
            .with_model_from_file(&model_path)?;

        tracing::info!("Loaded face recognizer from {:?}", model_path);

        Ok(Self {
            session,
            _environment: environment,
            input_size: config.recognizer.input_size,
            channels: config.recognizer.channels,
            normalization_value: config.recognizer.normalization_value,
        })
    }
}

impl FaceEmbedding for OnnxFaceEmbedder {
    fn embed(&self, face: &DynamicImage) -> Result<Embedding> {
        let resized = face.resize_exact(self.input_size, self.input_size, FilterType::Triangle);
        let input_array = preprocess_face(&resized, self.input_size, self.channels, self.normalization_value);

        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let first = outputs.first()
            .ok_or_else(|| FaceWardError::Model("Recognizer produced no outputs".into()))?;
        let embedding = first.try_extract::<f32>()?.view().iter().copied().collect();
        Ok(embedding)
    }
}

/// Crops a detected face out of the frame.
pub fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = (face.x2 - face.x1).max(1.0) as u32;
    let height = (face.y2 - face.y1).max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

/// Crop plus resize to the square size faces are embedded and stored at.
pub fn prepare_face(image: &DynamicImage, face: &FaceBox, size: u32) -> DynamicImage {
    crop_face(image, face).resize_exact(size, size, FilterType::Triangle)
}

/// ArcFace-style normalization into an NCHW tensor with 1 or 3 channels.
pub fn preprocess_face(img: &DynamicImage, size: u32, channels: u32, norm_val: f32) -> Array4<f32> {
    let size = size as usize;
    let mut array = Array4::<f32>::zeros((1, channels as usize, size, size));

    if channels == 1 {
        let gray = img.to_luma8();
        for (x, y, pixel) in gray.enumerate_pixels() {
            if (x as usize) < size && (y as usize) < size {
                array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - norm_val) / norm_val;
            }
        }
    } else {
        let rgb = img.to_rgb8();
        for (x, y, pixel) in rgb.enumerate_pixels() {
            if (x as usize) < size && (y as usize) < size {
                for c in 0..3 {
                    array[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - norm_val) / norm_val;
                }
            }
        }
    }

    array
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_prepare_face_crops_and_resizes() {
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([10, 20, 30])));
        let face = FaceBox { x1: 100.0, y1: 50.0, x2: 200.0, y2: 180.0, confidence: 0.9 };

        let crop = crop_face(&frame, &face);
        assert_eq!((crop.width(), crop.height()), (100, 130));

        let prepared = prepare_face(&frame, &face, 112);
        assert_eq!((prepared.width(), prepared.height()), (112, 112));
    }

    #[test]
    fn test_preprocess_normalizes_pixels() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 127])));

        let rgb = preprocess_face(&img, 4, 3, 127.5);
        assert_eq!(rgb.shape(), &[1, 3, 4, 4]);
        assert!((rgb[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((rgb[[0, 1, 2, 3]] + 1.0).abs() < 1e-6);

        let gray = preprocess_face(&img, 4, 1, 127.5);
        assert_eq!(gray.shape(), &[1, 1, 4, 4]);
    }
}
