use crate::common::Result;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

const KNOWN_STRANGER_DIR: &str = "Known_Stranger";

/// Keeps the face crop behind every stored embedding:
/// `<dataset>/<Name>/<Name>_<millis>.jpg` and
/// `<dataset>/Known_Stranger/stranger_<millis>.jpg`.
#[derive(Debug, Clone)]
pub struct FaceImageStore {
    dataset_dir: PathBuf,
}

impl FaceImageStore {
    pub fn new(dataset_dir: impl Into<PathBuf>) -> Result<Self> {
        let dataset_dir = dataset_dir.into();
        fs::create_dir_all(dataset_dir.join(KNOWN_STRANGER_DIR))?;
        Ok(Self { dataset_dir })
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn save_person(&self, name: &str, face: &DynamicImage) -> Result<PathBuf> {
        let folder_name = sanitize(name);
        let folder = self.dataset_dir.join(&folder_name);
        fs::create_dir_all(&folder)?;
        let path = folder.join(format!("{}_{}.jpg", folder_name, timestamp()));
        face.to_rgb8().save(&path)?;
        tracing::debug!("Saved face image for {} to {:?}", name, path);
        Ok(path)
    }

    pub fn save_known_stranger(&self, face: &DynamicImage) -> Result<PathBuf> {
        let folder = self.dataset_dir.join(KNOWN_STRANGER_DIR);
        fs::create_dir_all(&folder)?;
        let path = folder.join(format!("stranger_{}.jpg", timestamp()));
        face.to_rgb8().save(&path)?;
        tracing::debug!("Saved known stranger image to {:?}", path);
        Ok(path)
    }
}

fn timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>()
        .trim()
        .to_string()
}
