//! The per-frame orchestrator.
//!
//! Frames are read, faces resolved against the identity snapshot, new
//! strangers handed to a single enrollment dialog, and the annotated frame
//! published to every attached consumer. The loop only runs while at least
//! one consumer is attached.

use crate::common::config::{PipelineConfig, RecognitionConfig, StrangerConfig};
use crate::common::{Config, FaceWardError, Result};
use crate::core::detector::FaceBox;
use crate::core::dialog::{DialogOutcome, DialogReport, EnrollmentDialog, StrangerFace};
use crate::core::guard::{InteractionGuard, InteractionPermit};
use crate::core::interfaces::{FaceDetection, FaceEmbedding, FrameSourceFactory};
use crate::core::ledger::{ContentHash, StrangerLedger};
use crate::core::matcher::best_match;
use crate::core::overlay::{annotate, encode_jpeg, paused_frame, EncodedFrame, FaceMark, MarkKind};
use crate::core::recognizer::{prepare_face, Embedding};
use crate::core::status_hub::{StatusEvent, StatusHub};
use crate::storage::{Identity, IdentityStore, KNOWN_STRANGER};
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Latest value of the frame feed.
#[derive(Debug, Clone)]
pub enum FrameFeed {
    Waiting,
    Frame(Arc<EncodedFrame>),
    Ended,
}

/// Transient per-face result for one frame.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bbox: FaceBox,
    pub embedding: Embedding,
    pub content_hash: ContentHash,
    pub crop: DynamicImage,
}

#[derive(Debug, Clone)]
pub struct FrameSummary {
    pub marks: Vec<FaceMark>,
    pub recognized: Vec<String>,
    pub frame: Arc<EncodedFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub interaction_active: bool,
    pub processed_strangers: usize,
    pub active_consumers: usize,
    pub active_subscribers: usize,
    pub similarity_threshold: f32,
    pub known_persons: Vec<String>,
    pub paused: bool,
    pub running: bool,
    pub detected_persons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum StopReason {
    NoConsumers,
    EndOfStream,
    ReadError(String),
    OpenFailed(String),
    Shutdown,
}

impl StopReason {
    fn ends_feed(&self) -> bool {
        !matches!(self, StopReason::NoConsumers)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NoConsumers => write!(f, "no consumers"),
            StopReason::EndOfStream => write!(f, "end of stream"),
            StopReason::ReadError(e) => write!(f, "frame read failed: {}", e),
            StopReason::OpenFailed(e) => write!(f, "frame source failed to open: {}", e),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Everything the pipeline drives.
pub struct Collaborators {
    pub frames: Arc<dyn FrameSourceFactory>,
    pub detector: Arc<dyn FaceDetection>,
    pub embedder: Arc<dyn FaceEmbedding>,
    pub store: IdentityStore,
    pub dialog: EnrollmentDialog,
}

struct Shared {
    recognition: RecognitionConfig,
    strangers: StrangerConfig,
    settings: PipelineConfig,
    frames: Arc<dyn FrameSourceFactory>,
    detector: Arc<dyn FaceDetection>,
    embedder: Arc<dyn FaceEmbedding>,
    store: IdentityStore,
    dialog: EnrollmentDialog,
    hub: Arc<StatusHub>,
    guard: InteractionGuard,
    ledger: Mutex<StrangerLedger>,
    identities: RwLock<Arc<Vec<Identity>>>,
    detected: Mutex<Vec<String>>,
    paused: AtomicBool,
    consumers: AtomicUsize,
    running: AtomicBool,
    shutting_down: AtomicBool,
    frame_count: AtomicU64,
    sequence: AtomicU64,
    feed: watch::Sender<FrameFeed>,
    outcomes_tx: mpsc::UnboundedSender<DialogReport>,
    outcomes_rx: Mutex<mpsc::UnboundedReceiver<DialogReport>>,
    dialog_task: Mutex<Option<JoinHandle<()>>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

/// Keeps the loop alive while held. Dropping it detaches the consumer.
pub struct ConsumerHandle {
    shared: Arc<Shared>,
    frames: watch::Receiver<FrameFeed>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Pipeline {
    /// Must be called from within a tokio runtime; the loop and dialogs run
    /// on its blocking pool.
    pub fn new(config: &Config, collaborators: Collaborators, hub: Arc<StatusHub>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| FaceWardError::Config(format!("Pipeline needs a tokio runtime: {}", e)))?;

        let identities = collaborators.store.load_all()?;
        tracing::info!("Loaded {} identities", identities.len());

        let (feed, _) = watch::channel(FrameFeed::Waiting);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let shared = Shared {
            recognition: config.recognition.clone(),
            strangers: config.strangers.clone(),
            settings: config.pipeline.clone(),
            frames: collaborators.frames,
            detector: collaborators.detector,
            embedder: collaborators.embedder,
            store: collaborators.store,
            dialog: collaborators.dialog,
            hub,
            guard: InteractionGuard::new(),
            ledger: Mutex::new(StrangerLedger::new(config.strangers.cooldown())),
            identities: RwLock::new(Arc::new(identities)),
            detected: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            consumers: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            feed,
            outcomes_tx,
            outcomes_rx: Mutex::new(outcomes_rx),
            dialog_task: Mutex::new(None),
            loop_task: Mutex::new(None),
            runtime,
        };

        Ok(Self { shared: Arc::new(shared) })
    }

    pub fn hub(&self) -> &Arc<StatusHub> {
        &self.shared.hub
    }

    /// Registers a frame consumer, starting the loop if it is not running.
    pub fn attach_consumer(&self) -> ConsumerHandle {
        let frames = self.shared.feed.subscribe();
        let count = self.shared.consumers.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Frame consumer attached. Total: {}", count);
        Shared::start_loop(&self.shared);
        ConsumerHandle { shared: self.shared.clone(), frames }
    }

    /// Returns true if the state changed.
    pub fn pause(&self) -> bool {
        self.shared.set_paused(true)
    }

    pub fn resume(&self) -> bool {
        self.shared.set_paused(false)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn detected_persons(&self) -> Vec<String> {
        lock(&self.shared.detected).clone()
    }

    /// Names of every stored identity except the Known Stranger placeholder.
    pub fn known_persons(&self) -> Vec<String> {
        self.shared
            .identities()
            .iter()
            .filter(|identity| !identity.is_known_stranger())
            .map(|identity| identity.name.clone())
            .collect()
    }

    pub fn status(&self) -> StatusReport {
        let shared = &self.shared;
        StatusReport {
            interaction_active: shared.guard.is_busy(),
            processed_strangers: lock(&shared.ledger).len(),
            active_consumers: shared.consumers.load(Ordering::SeqCst),
            active_subscribers: shared.hub.subscriber_count(),
            similarity_threshold: shared.recognition.similarity_threshold,
            known_persons: self.known_persons(),
            paused: self.is_paused(),
            running: shared.running.load(Ordering::SeqCst),
            detected_persons: self.detected_persons(),
        }
    }

    /// Runs one frame through detection, matching and stranger handling,
    /// then publishes it. The loop calls this for every unpaused frame.
    pub fn process_frame(&self, frame: &DynamicImage) -> Result<FrameSummary> {
        self.shared.process_frame(frame)
    }

    /// Applies finished dialog outcomes to the identity snapshot and ledger.
    pub fn apply_dialog_outcomes(&self) {
        self.shared.drain_outcomes();
    }

    /// Waits for the running dialog, if any.
    pub async fn join_dialog(&self) {
        let task = lock(&self.shared.dialog_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Stops the loop, then gives a running dialog until `grace` has
    /// elapsed overall before releasing the guard regardless.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!("Shutting down pipeline");
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + grace;

        let loop_task = lock(&self.shared.loop_task).take();
        if let Some(task) = loop_task {
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                tracing::warn!("Pipeline loop did not stop within {:?}", grace);
            }
        }

        let dialog_task = lock(&self.shared.dialog_task).take();
        if let Some(task) = dialog_task {
            tracing::info!("Waiting for the active dialog until the {:?} grace period ends", grace);
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                tracing::warn!("Dialog still running after {:?}; releasing interaction guard", grace);
                self.shared.guard.force_release();
            }
        }

        self.shared.drain_outcomes();
    }
}

impl ConsumerHandle {
    /// Next frame not yet seen by this consumer. `None` once the feed has
    /// ended or the pipeline is gone.
    pub async fn next_frame(&mut self) -> Option<Arc<EncodedFrame>> {
        loop {
            self.frames.changed().await.ok()?;
            let latest = self.frames.borrow_and_update().clone();
            match latest {
                FrameFeed::Frame(frame) => return Some(frame),
                FrameFeed::Ended => return None,
                FrameFeed::Waiting => continue,
            }
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        let remaining = self.shared.consumers.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        tracing::info!("Frame consumer detached. Remaining: {}", remaining);
    }
}

impl Shared {
    fn identities(&self) -> Arc<Vec<Identity>> {
        self.identities.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn set_paused(&self, paused: bool) -> bool {
        let changed = self.paused.swap(paused, Ordering::SeqCst) != paused;
        if changed {
            tracing::info!("Pipeline {}", if paused { "paused" } else { "resumed" });
            self.hub.publish(StatusEvent::PauseChanged { paused });
        }
        changed
    }

    fn start_loop(this: &Arc<Self>) {
        if this.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if this.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        let shared = this.clone();
        let task = this.runtime.spawn_blocking(move || shared.run_loop());
        *lock(&this.loop_task) = Some(task);
    }

    fn run_loop(&self) {
        loop {
            let reason = self.run_frames();
            self.running.store(false, Ordering::SeqCst);
            tracing::info!("Pipeline loop stopped: {}", reason);
            self.hub.publish(StatusEvent::PipelineStopped { reason: reason.to_string() });

            if reason.ends_feed() {
                self.feed.send_replace(FrameFeed::Ended);
                return;
            }

            // A consumer may have attached between the last check and clearing `running`
            let restart = self.consumers.load(Ordering::SeqCst) > 0
                && !self.shutting_down.load(Ordering::SeqCst)
                && self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok();
            if !restart {
                return;
            }
            tracing::debug!("Consumer attached while stopping; restarting loop");
        }
    }

    fn run_frames(&self) -> StopReason {
        let mut source = match self.frames.open() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Failed to open frame source: {}", e);
                return StopReason::OpenFailed(e.to_string());
            }
        };
        tracing::info!("Pipeline loop started");
        self.hub.publish(StatusEvent::PipelineStarted);

        while self.consumers.load(Ordering::SeqCst) > 0 {
            if self.shutting_down.load(Ordering::SeqCst) {
                return StopReason::Shutdown;
            }

            if self.paused.load(Ordering::SeqCst) {
                self.drain_outcomes();
                if let Err(e) = self.publish_paused_frame() {
                    tracing::warn!("Failed to encode paused frame: {}", e);
                }
                std::thread::sleep(Duration::from_millis(self.settings.paused_frame_interval_ms));
                continue;
            }

            match source.read() {
                Ok(Some(frame)) => {
                    if let Err(e) = self.process_frame(&frame) {
                        tracing::warn!("Frame processing failed: {}", e);
                    }
                }
                Ok(None) => return StopReason::EndOfStream,
                Err(e) => {
                    tracing::error!("Failed to read frame: {}", e);
                    return StopReason::ReadError(e.to_string());
                }
            }
        }

        StopReason::NoConsumers
    }

    fn process_frame(&self, frame: &DynamicImage) -> Result<FrameSummary> {
        self.drain_outcomes();

        let (width, height) = (self.settings.frame_width, self.settings.frame_height);
        let frame = if frame.width() != width || frame.height() != height {
            frame.resize_exact(width, height, FilterType::Triangle)
        } else {
            frame.clone()
        };

        let identities = self.identities();
        let threshold = self.recognition.similarity_threshold;
        let mut marks = Vec::new();
        let mut recognized: Vec<String> = Vec::new();

        for observation in self.observe(&frame) {
            let result = best_match(&observation.embedding, &identities);
            let kind = match result.accepted(threshold) {
                Some(name) if name != KNOWN_STRANGER => {
                    if !recognized.iter().any(|known| known == name) {
                        recognized.push(name.to_string());
                    }
                    MarkKind::Recognized(name.to_string())
                }
                Some(_) => MarkKind::Dismissed,
                None => self.handle_stranger(&observation),
            };

            marks.push(FaceMark { bbox: observation.bbox.clone(), kind, score: result.score });
        }

        recognized.sort();
        self.update_detected(&recognized);

        let count = self.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.strangers.sweep_every_frames > 0 && count % self.strangers.sweep_every_frames == 0 {
            let removed = lock(&self.ledger).sweep(Instant::now());
            if removed > 0 {
                tracing::debug!("Swept {} expired strangers", removed);
            }
        }

        let annotated = annotate(&frame, &marks);
        let encoded = Arc::new(EncodedFrame {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            width,
            height,
            paused: false,
            faces: marks.clone(),
            jpeg: encode_jpeg(&annotated, self.settings.jpeg_quality)?,
        });
        self.feed.send_replace(FrameFeed::Frame(encoded.clone()));

        Ok(FrameSummary { marks, recognized, frame: encoded })
    }

    /// Detects, filters and embeds faces. Failures drop the frame's faces
    /// or the single face, never the frame.
    fn observe(&self, frame: &DynamicImage) -> Vec<FaceObservation> {
        let boxes = match self.detector.detect(frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!("Face detection failed: {}", e);
                return Vec::new();
            }
        };

        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let min_size = self.recognition.min_face_size as f32;

        boxes
            .into_iter()
            .filter(|face| face.confidence >= self.recognition.detection_confidence)
            .filter(|face| face.x1 >= 0.0 && face.y1 >= 0.0 && face.x2 <= width && face.y2 <= height)
            .filter(|face| face.width() >= min_size && face.height() >= min_size)
            .filter_map(|face| {
                let crop = prepare_face(frame, &face, self.recognition.face_crop_size);
                match self.embedder.embed(&crop) {
                    Ok(embedding) => Some(FaceObservation {
                        content_hash: ContentHash::of(&embedding),
                        bbox: face,
                        embedding,
                        crop,
                    }),
                    Err(e) => {
                        tracing::warn!("Face embedding failed: {}", e);
                        None
                    }
                }
            })
            .collect()
    }

    fn handle_stranger(&self, observation: &FaceObservation) -> MarkKind {
        let hash = &observation.content_hash;
        let mut ledger = lock(&self.ledger);
        if ledger.is_known(hash) {
            return MarkKind::Dismissed;
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return MarkKind::Stranger;
        }

        if let Some(permit) = self.guard.try_acquire() {
            ledger.mark_seen(hash.clone(), Instant::now());
            drop(ledger);

            tracing::info!("New stranger {} detected, starting dialog", hash);
            self.hub.publish(StatusEvent::StrangerDetected { hash: hash.to_string() });
            self.spawn_dialog(permit, StrangerFace {
                hash: hash.clone(),
                embedding: observation.embedding.clone(),
                image: observation.crop.clone(),
            });
        }

        MarkKind::Stranger
    }

    fn spawn_dialog(&self, permit: InteractionPermit, face: StrangerFace) {
        let dialog = self.dialog.clone();
        let hash = face.hash.clone();
        let outcomes = self.outcomes_tx.clone();
        let blocking = self.runtime.spawn_blocking(move || {
            let _permit = permit;
            dialog.run(face)
        });

        let hub = self.hub.clone();
        let supervisor = self.runtime.spawn(async move {
            let report = match blocking.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("Dialog task failed: {}", e);
                    hub.publish(StatusEvent::DialogFailed { hash: hash.to_string(), message: e.to_string() });
                    DialogReport {
                        hash,
                        outcome: DialogOutcome::Abandoned { error: e.to_string() },
                        trail: Vec::new(),
                    }
                }
            };
            if outcomes.send(report).is_err() {
                tracing::debug!("Pipeline gone before dialog outcome was delivered");
            }
        });
        *lock(&self.dialog_task) = Some(supervisor);
    }

    fn drain_outcomes(&self) {
        let reports: Vec<DialogReport> = {
            let mut rx = lock(&self.outcomes_rx);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };

        for report in reports {
            let reload = matches!(report.outcome, DialogOutcome::Enrolled { .. } | DialogOutcome::KnownStranger { .. });
            let permanent = matches!(report.outcome, DialogOutcome::KnownStranger { .. } | DialogOutcome::Abandoned { .. });

            if permanent {
                lock(&self.ledger).mark_permanent(report.hash.clone(), Instant::now());
            }
            if reload {
                self.reload_identities();
            }
        }
    }

    fn reload_identities(&self) {
        match self.store.load_all() {
            Ok(identities) => {
                tracing::info!("Reloaded {} identities", identities.len());
                *self.identities.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(identities);
            }
            Err(e) => {
                tracing::error!("Failed to reload identities: {}", e);
                self.hub.publish(StatusEvent::StorageFailed { message: e.to_string() });
            }
        }
    }

    fn update_detected(&self, recognized: &[String]) {
        let mut detected = lock(&self.detected);
        if detected.as_slice() != recognized {
            *detected = recognized.to_vec();
            drop(detected);
            tracing::debug!("Detected persons changed: {:?}", recognized);
            self.hub.publish(StatusEvent::detected_persons(recognized.to_vec()));
        }
    }

    fn publish_paused_frame(&self) -> Result<()> {
        let (width, height) = (self.settings.frame_width, self.settings.frame_height);
        let jpeg = encode_jpeg(&paused_frame(width, height), self.settings.jpeg_quality)?;
        let frame = EncodedFrame {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            width,
            height,
            paused: true,
            faces: Vec::new(),
            jpeg,
        };
        self.feed.send_replace(FrameFeed::Frame(Arc::new(frame)));
        Ok(())
    }
}
