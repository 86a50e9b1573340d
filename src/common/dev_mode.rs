use crate::common::error::{FaceWardError, Result};
use crate::common::paths;
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/// Resolves where the service keeps its files.
///
/// In dev mode everything lives under `./dev_data` so a checkout can run the
/// service without touching system directories.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(&base_dir)?;
            fs::create_dir_all(base_dir.join("data"))?;
            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Data directory used when the config does not name one.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if self.enabled {
            return Ok(self.base_dir.join("data"));
        }

        let dirs = ProjectDirs::from("org", "faceward", "Faceward")
            .ok_or_else(|| FaceWardError::Storage("Failed to get project dirs".into()))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn config_file(&self) -> PathBuf {
        if self.enabled {
            PathBuf::from("configs/faceward.toml")
        } else {
            paths::system_config_file()
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        if self.enabled {
            PathBuf::from("./models")
        } else {
            paths::system_models_dir()
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        if self.enabled {
            PathBuf::from("/tmp/faceward.sock")
        } else {
            paths::system_socket_path()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("dev");
        let dev = DevMode::with_base_dir(true, base.clone()).unwrap();

        assert!(dev.is_enabled());
        assert!(base.join("data").is_dir());
        assert_eq!(dev.data_dir().unwrap(), base.join("data"));
        assert_eq!(dev.config_file(), PathBuf::from("configs/faceward.toml"));
    }

    #[test]
    fn test_disabled_dev_mode_uses_system_paths() {
        let dev = DevMode::with_base_dir(false, PathBuf::from("/nonexistent")).unwrap();
        assert!(!dev.is_enabled());
        assert_eq!(dev.config_file(), paths::system_config_file());
        assert_eq!(dev.socket_path(), paths::system_socket_path());
        assert_eq!(dev.models_dir(), paths::system_models_dir());
    }
}
