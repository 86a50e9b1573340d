use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{FaceWardError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub camera: CameraConfig,
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub strangers: StrangerConfig,
    #[serde(default)]
    pub dialog: DialogConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    V4l,
    Images,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    pub source: CameraSource,
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
    #[serde(default)]
    pub images_dir: Option<PathBuf>,
    #[serde(default)]
    pub loop_playback: bool,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

fn default_frame_width() -> u32 { 640 }
fn default_frame_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 5 }
fn default_warmup_delay() -> u64 { 50 }
fn default_frame_interval() -> u64 { 33 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou_threshold: f32,
    #[serde(default = "default_max_faces")]
    pub max_faces: usize,
}

fn default_nms_iou() -> f32 { 0.45 }
fn default_max_faces() -> usize { 5 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            nms_iou_threshold: default_nms_iou(),
            max_faces: default_max_faces(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    pub input_size: u32,
    pub normalization_value: f32,
    #[serde(default = "default_channels")]
    pub channels: u32,
}

fn default_channels() -> u32 { 3 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: 112,
            normalization_value: 127.5,
            channels: default_channels(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,
    #[serde(default = "default_face_crop_size")]
    pub face_crop_size: u32,
}

fn default_similarity_threshold() -> f32 { 0.88 }
fn default_detection_confidence() -> f32 { 0.6 }
fn default_min_face_size() -> u32 { 50 }
fn default_face_crop_size() -> u32 { 112 }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            detection_confidence: default_detection_confidence(),
            min_face_size: default_min_face_size(),
            face_crop_size: default_face_crop_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StrangerConfig {
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_sweep_every")]
    pub sweep_every_frames: u64,
}

fn default_cooldown() -> u64 { 45 }
fn default_sweep_every() -> u64 { 60 }

impl Default for StrangerConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            sweep_every_frames: default_sweep_every(),
        }
    }
}

impl StrangerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DialogConfig {
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout_secs: u64,
    #[serde(default = "default_phrase_limit")]
    pub phrase_limit_secs: u64,
    #[serde(default = "default_affirmative_words")]
    pub affirmative_words: Vec<String>,
}

fn default_listen_timeout() -> u64 { 10 }
fn default_phrase_limit() -> u64 { 5 }
fn default_affirmative_words() -> Vec<String> {
    vec!["yes".into(), "add".into(), "enroll".into()]
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            listen_timeout_secs: default_listen_timeout(),
            phrase_limit_secs: default_phrase_limit(),
            affirmative_words: default_affirmative_words(),
        }
    }
}

impl DialogConfig {
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    pub fn phrase_limit(&self) -> Duration {
        Duration::from_secs(self.phrase_limit_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechConfig {
    /// Program and leading arguments; the text to speak is appended.
    #[serde(default = "default_say_command")]
    pub say_command: Vec<String>,
    /// Program that records one utterance and prints the transcript on stdout.
    /// Receives `FACEWARD_LISTEN_TIMEOUT` and `FACEWARD_PHRASE_LIMIT` (seconds).
    #[serde(default)]
    pub listen_command: Vec<String>,
}

fn default_say_command() -> Vec<String> {
    vec!["espeak-ng".into(), "-s".into(), "180".into()]
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            say_command: default_say_command(),
            listen_command: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_paused_interval")]
    pub paused_frame_interval_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_paused_interval() -> u64 { 1000 }
fn default_jpeg_quality() -> u8 { 80 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            paused_frame_interval_ms: default_paused_interval(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

fn default_shutdown_grace() -> u64 { 15 }
fn default_subscriber_queue() -> usize { 32 }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            shutdown_grace_secs: default_shutdown_grace(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaceWardError::Config(format!(
                "Config file not found: {}. Please create it from configs/faceward.toml.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| FaceWardError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Camera dimensions
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(FaceWardError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(FaceWardError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.source == CameraSource::Images && self.camera.images_dir.is_none() {
            return Err(FaceWardError::Config(
                "camera.images_dir is required when camera.source = \"images\"".into()
            ));
        }

        // Thresholds
        let threshold = self.recognition.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(FaceWardError::Config(format!(
                "Similarity threshold must be between -1.0 and 1.0, got {}", threshold
            )));
        }
        let confidence = self.recognition.detection_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(FaceWardError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}", confidence
            )));
        }

        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(FaceWardError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}", self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(FaceWardError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}", self.detector.input_height
            )));
        }

        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(FaceWardError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}", self.recognizer.input_size
            )));
        }
        if self.recognizer.channels != 1 && self.recognizer.channels != 3 {
            return Err(FaceWardError::Config(format!(
                "Recognizer channels must be 1 or 3, got {}", self.recognizer.channels
            )));
        }

        if self.recognition.face_crop_size == 0 {
            return Err(FaceWardError::Config("Face crop size must be positive".into()));
        }
        if self.strangers.sweep_every_frames == 0 {
            return Err(FaceWardError::Config("strangers.sweep_every_frames must be positive".into()));
        }
        if self.dialog.listen_timeout_secs == 0 || self.dialog.listen_timeout_secs > 120 {
            return Err(FaceWardError::Config(format!(
                "Listen timeout must be between 1 and 120 seconds, got {}", self.dialog.listen_timeout_secs
            )));
        }
        if self.pipeline.jpeg_quality == 0 || self.pipeline.jpeg_quality > 100 {
            return Err(FaceWardError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}", self.pipeline.jpeg_quality
            )));
        }
        if self.service.subscriber_queue == 0 {
            return Err(FaceWardError::Config("service.subscriber_queue must be positive".into()));
        }

        Ok(())
    }
}
