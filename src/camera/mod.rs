pub mod image_dir;
pub mod pixels;
#[cfg(feature = "v4l-camera")]
pub mod v4l2;

pub use image_dir::ImageDirSource;
#[cfg(feature = "v4l-camera")]
pub use v4l2::V4lCamera;

use crate::common::config::CameraSource;
use crate::common::{Config, FaceWardError, Result};
use crate::core::interfaces::{FrameSource, FrameSourceFactory};
use std::time::Duration;

/// Opens the configured frame source each time the pipeline starts.
pub struct CameraFactory {
    config: Config,
}

impl CameraFactory {
    pub fn new(config: &Config) -> Self {
        Self { config: config.clone() }
    }
}

impl FrameSourceFactory for CameraFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        open_source(&self.config)
    }
}

pub fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    let camera = &config.camera;
    match camera.source {
        CameraSource::Images => {
            let dir = camera.images_dir.as_ref()
                .ok_or_else(|| FaceWardError::Config("camera.images_dir is not set".into()))?;
            Ok(Box::new(ImageDirSource::open(
                dir,
                camera.loop_playback,
                Duration::from_millis(camera.frame_interval_ms),
            )?))
        }
        #[cfg(feature = "v4l-camera")]
        CameraSource::V4l => Ok(Box::new(V4lCamera::open(config)?)),
        #[cfg(not(feature = "v4l-camera"))]
        CameraSource::V4l => {
            Err(FaceWardError::Camera(
                "This build has no V4L support; rebuild with --features v4l-camera".into()
            ))
        }
    }
}
