pub mod face_images;
pub mod identity_store;
pub mod table;

pub use face_images::FaceImageStore;
pub use identity_store::{EmbeddingRow, Identity, IdentityStore, IdentitySummary, KNOWN_STRANGER};
pub use table::{EmbeddingTable, LogTable, MemoryTable};

use crate::common::{Config, DevMode, Result};
use std::path::PathBuf;
use std::sync::Arc;

pub const EMBEDDINGS_FILE: &str = "embeddings.log";
pub const DATASET_DIR: &str = "dataset";

/// `storage.data_dir` if set, otherwise the mode's default.
pub fn data_dir(config: &Config, dev_mode: &DevMode) -> Result<PathBuf> {
    match &config.storage.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => dev_mode.data_dir(),
    }
}

/// Opens the embedding log and the face image dataset under the data dir.
pub fn open(config: &Config, dev_mode: &DevMode) -> Result<(IdentityStore, FaceImageStore)> {
    let dir = data_dir(config, dev_mode)?;
    std::fs::create_dir_all(&dir)?;

    let table = LogTable::open(dir.join(EMBEDDINGS_FILE))?;
    let images = FaceImageStore::new(dir.join(DATASET_DIR))?;
    tracing::info!("Using data directory {}", dir.display());

    Ok((IdentityStore::new(Arc::new(table)), images))
}
