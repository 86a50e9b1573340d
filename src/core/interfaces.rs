//! Seams between the coordination core and the components it drives.
//!
//! Everything behind these traits (camera, models, speech engines) blocks, so
//! the core only ever calls them from blocking tasks.

use crate::common::Result;
use crate::core::detector::FaceBox;
use crate::core::recognizer::Embedding;
use image::DynamicImage;
use std::time::Duration;

/// A stream of video frames. `Ok(None)` marks the end of the stream.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Option<DynamicImage>>;
}

/// Opens a fresh frame source each time the pipeline loop (re)starts.
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

impl<F> FrameSourceFactory for F
where
    F: Fn() -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        self()
    }
}

pub trait FaceDetection: Send + Sync {
    /// Boxes in frame coordinates. Confidence filtering is left to the caller.
    fn detect(&self, frame: &DynamicImage) -> Result<Vec<FaceBox>>;
}

pub trait FaceEmbedding: Send + Sync {
    /// Embeds an already cropped face image.
    fn embed(&self, face: &DynamicImage) -> Result<Embedding>;
}

pub trait SpeechOutput: Send + Sync {
    /// Blocks until the text has been spoken.
    fn say(&self, text: &str) -> Result<()>;
}

/// Result of one listening attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heard {
    Text(String),
    Timeout,
    Unrecognized,
}

pub trait SpeechInput: Send + Sync {
    /// Waits up to `timeout` for speech to start and records at most
    /// `phrase_limit` of it.
    fn listen(&self, timeout: Duration, phrase_limit: Duration) -> Result<Heard>;
}
