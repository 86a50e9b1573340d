//! In-crate fakes for the collaborator traits.

use crate::common::{FaceWardError, Result};
use crate::core::detector::FaceBox;
use crate::core::interfaces::{FaceDetection, FaceEmbedding, FrameSource, Heard, SpeechInput, SpeechOutput};
use crate::core::recognizer::Embedding;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

pub fn face_box(x: f32, y: f32, size: f32) -> FaceBox {
    FaceBox { x1: x, y1: y, x2: x + size, y2: y + size, confidence: 0.9 }
}

/// A black frame with each face box painted a solid colour.
pub fn frame_with_faces(faces: &[(FaceBox, [u8; 3])]) -> DynamicImage {
    let mut img = RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT);
    for (face, colour) in faces {
        for y in face.y1 as u32..(face.y2 as u32).min(FRAME_HEIGHT) {
            for x in face.x1 as u32..(face.x2 as u32).min(FRAME_WIDTH) {
                img.put_pixel(x, y, Rgb(*colour));
            }
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// The embedding `ColourEmbedder` produces for a face of this colour.
pub fn colour_embedding(colour: [u8; 3]) -> Embedding {
    colour.iter().map(|c| *c as f32 / 255.0).collect()
}

/// Returns whatever boxes were last configured.
#[derive(Default)]
pub struct FakeDetector {
    faces: Mutex<Vec<FaceBox>>,
    fail: AtomicBool,
}

impl FakeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_faces(&self, faces: Vec<FaceBox>) {
        *self.faces.lock().unwrap() = faces;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl FaceDetection for FakeDetector {
    fn detect(&self, _frame: &DynamicImage) -> Result<Vec<FaceBox>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FaceWardError::Detection("fake detector failure".into()));
        }
        Ok(self.faces.lock().unwrap().clone())
    }
}

/// Embeds a face as its mean colour scaled to 0..1.
#[derive(Default)]
pub struct ColourEmbedder {
    fail: AtomicBool,
}

impl ColourEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl FaceEmbedding for ColourEmbedder {
    fn embed(&self, face: &DynamicImage) -> Result<Embedding> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FaceWardError::Model("fake embedder failure".into()));
        }
        let (w, h) = face.dimensions();
        let pixels = (w * h).max(1) as f32;
        let mut sums = [0.0f32; 3];
        for pixel in face.to_rgb8().pixels() {
            for c in 0..3 {
                sums[c] += pixel[c] as f32;
            }
        }
        Ok(sums.iter().map(|s| s / pixels / 255.0).collect())
    }
}

/// Replays a fixed list of frames, then reports end of stream.
pub struct VecFrameSource {
    frames: VecDeque<DynamicImage>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<DynamicImage>) -> Self {
        Self { frames: frames.into() }
    }
}

impl FrameSource for VecFrameSource {
    fn read(&mut self) -> Result<Option<DynamicImage>> {
        Ok(self.frames.pop_front())
    }
}

/// Yields the same frame forever, sleeping a little between reads.
pub struct EndlessFrameSource {
    frame: DynamicImage,
    delay: Duration,
}

impl EndlessFrameSource {
    pub fn new(frame: DynamicImage) -> Self {
        Self::with_delay(frame, Duration::from_millis(5))
    }

    /// Each read blocks for `delay`, like a slow camera.
    pub fn with_delay(frame: DynamicImage, delay: Duration) -> Self {
        Self { frame, delay }
    }
}

impl FrameSource for EndlessFrameSource {
    fn read(&mut self) -> Result<Option<DynamicImage>> {
        std::thread::sleep(self.delay);
        Ok(Some(self.frame.clone()))
    }
}

/// Records everything said.
#[derive(Default)]
pub struct RecordingSpeech {
    spoken: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl SpeechOutput for RecordingSpeech {
    fn say(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(FaceWardError::Playback("fake speaker failure".into()));
        }
        Ok(())
    }
}

/// Answers from a script; silence once the script runs out.
pub struct ScriptedListener {
    script: Mutex<VecDeque<Result<Heard>>>,
}

impl ScriptedListener {
    pub fn new(script: Vec<Result<Heard>>) -> Self {
        Self { script: Mutex::new(script.into()) }
    }
}

impl SpeechInput for ScriptedListener {
    fn listen(&self, _timeout: Duration, _phrase_limit: Duration) -> Result<Heard> {
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(Heard::Timeout))
    }
}

/// Blocks each listen until the test sends a reply. A dropped sender
/// reads as silence.
pub struct GatedListener {
    replies: Mutex<mpsc::Receiver<Heard>>,
}

impl GatedListener {
    pub fn new() -> (Self, mpsc::Sender<Heard>) {
        let (tx, rx) = mpsc::channel();
        (Self { replies: Mutex::new(rx) }, tx)
    }
}

impl SpeechInput for GatedListener {
    fn listen(&self, _timeout: Duration, _phrase_limit: Duration) -> Result<Heard> {
        Ok(self.replies.lock().unwrap().recv().unwrap_or(Heard::Timeout))
    }
}

/// A recognizer that crashes.
pub struct PanickingListener;

impl SpeechInput for PanickingListener {
    fn listen(&self, _timeout: Duration, _phrase_limit: Duration) -> Result<Heard> {
        panic!("microphone driver crashed");
    }
}
