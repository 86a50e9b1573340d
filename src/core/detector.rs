use crate::common::{Config, FaceWardError, Result};
use crate::core::interfaces::FaceDetection;
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }
}

pub(crate) fn optimization_level(level: u32) -> GraphOptimizationLevel {
    match level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// YOLO-style face detector running on ONNX Runtime.
pub struct OnnxFaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    input_width: u32,
    input_height: u32,
    nms_iou_threshold: f32,
    max_faces: usize,
}

impl OnnxFaceDetector {
    /// Relative model paths are resolved against `models_base`.
    pub fn new(config: &Config, models_base: &Path) -> Result<Self> {
        let mut model_path = config.models.detector_path.clone();
        if model_path.is_relative() {
            model_path = models_base.join(&model_path);
        }

        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .build()
                .map_err(|e| FaceWardError::Model(format!("Failed to create environment: {}", e)))?
        );

        if !model_path.exists() {
            return Err(FaceWardError::Model(
                format!("Detector model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(config.models.optimization_level))?
            .with_model_from_file(&model_path)?;

        tracing::info!("Loaded face detector from {:?}", model_path);

        Ok(Self {
            session,
            _environment: environment,
            input_width: config.detector.input_width,
            input_height: config.detector.input_height,
            nms_iou_threshold: config.detector.nms_iou_threshold,
            max_faces: config.detector.max_faces,
        })
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = img.to_rgb8();
        let width = img.width() as usize;
        let height = img.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
            array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
            array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
        }

        array
    }
}

impl FaceDetection for OnnxFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.input_width && image.height() == self.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)
            .map_err(|e| FaceWardError::Detection(format!("Failed to build input tensor: {}", e)))?;
        let outputs = self.session.run(vec![input_tensor])
            .map_err(|e| FaceWardError::Detection(format!("Inference failed: {}", e)))?;

        let first = outputs.first()
            .ok_or_else(|| FaceWardError::Detection("Detector produced no outputs".into()))?;
        let tensor = first.try_extract::<f32>()
            .map_err(|e| FaceWardError::Detection(format!("Unexpected output tensor: {}", e)))?;
        let output = tensor.view().to_owned();
        let shape = output.shape().to_vec();
        let data: Vec<f32> = output.iter().copied().collect();

        let candidates = decode_predictions(&data, &shape, self.input_width as f32, self.input_height as f32);

        // NMS first on the low-confidence candidates, then keep the strongest
        let mut faces = apply_nms(candidates, self.nms_iou_threshold);
        faces.truncate(self.max_faces);

        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

/// Decodes YOLOv8 output: `[1, N, 5]`, or transposed `[1, 5, N]`, or `[N, 5]`.
/// Rows are `[x_center, y_center, width, height, confidence]`.
pub fn decode_predictions(output: &[f32], shape: &[usize], input_width: f32, input_height: f32) -> Vec<FaceBox> {
    let mut faces = Vec::new();

    let (num_predictions, prediction_length, is_transposed) = if shape.len() >= 3 {
        if shape[2] > shape[1] && shape[1] <= 10 {
            (shape[2], shape[1], true)
        } else {
            (shape[1], shape[2], false)
        }
    } else if shape.len() == 2 {
        (shape[0], shape[1], false)
    } else {
        tracing::warn!("Unexpected output shape: {:?}", shape);
        return faces;
    };

    if prediction_length < 4 || output.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too short for shape {:?}", shape);
        return faces;
    }

    for i in 0..num_predictions {
        let value = |field: usize| -> f32 {
            if field >= prediction_length {
                return 0.0;
            }
            if is_transposed {
                output[field * num_predictions + i]
            } else {
                output[i * prediction_length + field]
            }
        };

        let (x_center_raw, y_center_raw, width_raw, height_raw, confidence) =
            (value(0), value(1), value(2), value(3), value(4));

        // Normalized coordinates are scaled up to the model input
        let scale_factor = if x_center_raw > 1.0 || y_center_raw > 1.0 || width_raw > 1.0 || height_raw > 1.0 {
            1.0
        } else {
            input_width
        };

        let x_center = x_center_raw * scale_factor;
        let y_center = y_center_raw * scale_factor;
        let width = width_raw * scale_factor;
        let height = height_raw * scale_factor;

        if confidence > 0.001 {
            let x1 = (x_center - width / 2.0).max(0.0);
            let y1 = (y_center - height / 2.0).max(0.0);
            let x2 = (x_center + width / 2.0).min(input_width);
            let y2 = (y_center + height / 2.0).min(input_height);

            if x2 > x1 && y2 > y1 && (x2 - x1) > 10.0 && (y2 - y1) > 10.0 {
                faces.push(FaceBox { x1, y1, x2, y2, confidence });
            }
        }
    }

    faces
}

/// Greedy non-maximum suppression. Output is sorted by confidence, highest first.
pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn calculate_iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = box1.area() + box2.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
