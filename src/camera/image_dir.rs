use crate::common::{FaceWardError, Result};
use crate::core::interfaces::FrameSource;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Replays the images of a directory in file-name order as a video stream.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    position: usize,
    loop_playback: bool,
    interval: Duration,
    last_frame: Option<Instant>,
}

impl ImageDirSource {
    pub fn open(dir: &Path, loop_playback: bool, interval: Duration) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| FaceWardError::Camera(format!("Cannot read image directory {}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(FaceWardError::Camera(format!("No images found in {}", dir.display())));
        }
        tracing::info!("Replaying {} images from {}", files.len(), dir.display());

        Ok(Self {
            files,
            position: 0,
            loop_playback,
            interval,
            last_frame: None,
        })
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

impl FrameSource for ImageDirSource {
    fn read(&mut self) -> Result<Option<DynamicImage>> {
        if self.position >= self.files.len() {
            if !self.loop_playback {
                return Ok(None);
            }
            self.position = 0;
        }

        self.pace();
        let path = &self.files[self.position];
        self.position += 1;

        let frame = image::open(path)?;
        tracing::trace!("Replayed {}", path.display());
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_images(dir: &Path, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            RgbImage::from_pixel(8, 8, Rgb([i as u8 * 50, 0, 0])).save(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn test_plays_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), &["b.png", "a.png"]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageDirSource::open(dir.path(), false, Duration::ZERO).unwrap();
        let first = source.read().unwrap().unwrap();
        // a.png was written second, so it is the red one
        assert_eq!(first.to_rgb8().get_pixel(0, 0)[0], 50);
        assert!(source.read().unwrap().is_some());
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_loops_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), &["only.png"]);

        let mut source = ImageDirSource::open(dir.path(), true, Duration::ZERO).unwrap();
        for _ in 0..3 {
            assert!(source.read().unwrap().is_some());
        }
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageDirSource::open(dir.path(), false, Duration::ZERO),
            Err(FaceWardError::Camera(_))
        ));
    }
}
