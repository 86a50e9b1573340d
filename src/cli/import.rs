//! Offline enrollment from a photo.

use crate::common::config::RecognitionConfig;
use crate::common::{FaceWardError, Result};
use crate::core::detector::FaceBox;
use crate::core::dialog::normalize_name;
use crate::core::interfaces::{FaceDetection, FaceEmbedding};
use crate::core::recognizer::{prepare_face, Embedding};
use crate::storage::{FaceImageStore, IdentityStore};
use image::DynamicImage;

pub struct ImportedFace {
    pub name: String,
    pub bbox: FaceBox,
    pub embedding: Embedding,
}

/// Enrolls the largest usable face of `photo` under `name`.
pub fn import_photo(
    photo: &DynamicImage,
    name: &str,
    detector: &dyn FaceDetection,
    embedder: &dyn FaceEmbedding,
    recognition: &RecognitionConfig,
    store: &IdentityStore,
    images: &FaceImageStore,
) -> Result<ImportedFace> {
    let name = normalize_name(name)
        .ok_or_else(|| FaceWardError::Storage("Name must not be empty".into()))?;

    let min_size = recognition.min_face_size as f32;
    let bbox = detector
        .detect(photo)?
        .into_iter()
        .filter(|face| face.confidence >= recognition.detection_confidence)
        .filter(|face| face.width() >= min_size && face.height() >= min_size)
        .max_by(|a, b| a.area().total_cmp(&b.area()))
        .ok_or_else(|| FaceWardError::Detection("No usable face found in image".into()))?;

    let crop = prepare_face(photo, &bbox, recognition.face_crop_size);
    let embedding = embedder.embed(&crop)?;

    images.save_person(&name, &crop)?;
    store.append(&name, &embedding)?;
    tracing::info!("Imported {} from photo", name);

    Ok(ImportedFace { name, bbox, embedding })
}
