pub mod detector;
pub mod dialog;
pub mod guard;
pub mod interfaces;
pub mod ledger;
pub mod matcher;
pub mod overlay;
pub mod pipeline;
pub mod recognizer;
pub mod status_hub;

#[cfg(test)]
pub(crate) mod testing;

pub use detector::{FaceBox, OnnxFaceDetector};
pub use dialog::{DialogOutcome, DialogReport, DialogState, DismissReason, EnrollmentDialog, StrangerFace};
pub use guard::{InteractionGuard, InteractionPermit};
pub use interfaces::{FaceDetection, FaceEmbedding, FrameSource, FrameSourceFactory, Heard, SpeechInput, SpeechOutput};
pub use ledger::{ContentHash, StrangerLedger};
pub use matcher::{best_match, MatchResult};
pub use overlay::{EncodedFrame, FaceMark, MarkKind};
pub use pipeline::{Collaborators, ConsumerHandle, FrameFeed, Pipeline, StatusReport};
pub use recognizer::{cosine_similarity, Embedding, OnnxFaceEmbedder};
pub use status_hub::{StatusEvent, StatusHub, SubscriberId, Subscription};
