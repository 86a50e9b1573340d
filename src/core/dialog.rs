//! Voice-driven enrollment of an unrecognized face.
//!
//! Flow:
//! - Announcing -> AwaitingConsent
//! - AwaitingConsent -> AwaitingName | Declined | NoResponse
//! - AwaitingName -> Enrolled | SavedAsKnownStranger
//! - Declined | NoResponse -> SavedAsKnownStranger
//! - Enrolled | SavedAsKnownStranger -> Done
//!
//! Any failure falls back to SavedAsKnownStranger so the face does not keep
//! re-triggering.

use crate::common::config::DialogConfig;
use crate::common::FaceWardError;
use crate::core::interfaces::{Heard, SpeechInput, SpeechOutput};
use crate::core::ledger::ContentHash;
use crate::core::recognizer::Embedding;
use crate::core::status_hub::{StatusEvent, StatusHub};
use crate::storage::{FaceImageStore, IdentityStore, KNOWN_STRANGER};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

const ANNOUNCEMENT: &str = "Stranger detected! Say yes to add them or no to skip.";
const ASK_NAME: &str = "Say the person's name.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    Announcing,
    AwaitingConsent,
    Declined,
    NoResponse,
    AwaitingName,
    Enrolled,
    SavedAsKnownStranger,
    Done,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogState::Announcing => "Announcing",
            DialogState::AwaitingConsent => "AwaitingConsent",
            DialogState::Declined => "Declined",
            DialogState::NoResponse => "NoResponse",
            DialogState::AwaitingName => "AwaitingName",
            DialogState::Enrolled => "Enrolled",
            DialogState::SavedAsKnownStranger => "SavedAsKnownStranger",
            DialogState::Done => "Done",
        };
        f.write_str(name)
    }
}

impl DialogState {
    pub fn can_transition_to(&self, target: &DialogState) -> bool {
        use DialogState::*;
        matches!(
            (self, target),
            (Announcing, AwaitingConsent)
                | (AwaitingConsent, Declined)
                | (AwaitingConsent, AwaitingName)
                | (AwaitingConsent, NoResponse)
                | (AwaitingName, Enrolled)
                | (Declined, SavedAsKnownStranger)
                | (NoResponse, SavedAsKnownStranger)
                | (Enrolled, Done)
                | (SavedAsKnownStranger, Done)
                // Fail-safe: an error anywhere before the end dismisses the face
                | (Announcing, SavedAsKnownStranger)
                | (AwaitingConsent, SavedAsKnownStranger)
                | (AwaitingName, SavedAsKnownStranger)
                | (Enrolled, SavedAsKnownStranger)
        )
    }
}

/// Why a face was saved as a known stranger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DismissReason {
    NoResponse,
    Declined,
    InvalidName,
    Error,
}

impl DismissReason {
    fn message(&self) -> &'static str {
        match self {
            DismissReason::NoResponse => "No response. Auto-saved as known stranger.",
            DismissReason::Declined => "Saved as known stranger.",
            DismissReason::InvalidName => "Invalid name. Saved as known stranger.",
            DismissReason::Error => "Error occurred. Saved as known stranger.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DialogOutcome {
    Enrolled { name: String },
    KnownStranger { reason: DismissReason },
    /// Nothing could be persisted.
    Abandoned { error: String },
}

/// The face a dialog is about.
#[derive(Debug, Clone)]
pub struct StrangerFace {
    pub hash: ContentHash,
    pub embedding: Embedding,
    pub image: DynamicImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogReport {
    pub hash: ContentHash,
    pub outcome: DialogOutcome,
    pub trail: Vec<DialogState>,
}

/// Collaborators shared by every dialog run. Cheap to clone.
#[derive(Clone)]
pub struct EnrollmentDialog {
    speech_out: Arc<dyn SpeechOutput>,
    speech_in: Arc<dyn SpeechInput>,
    store: IdentityStore,
    images: FaceImageStore,
    hub: Arc<StatusHub>,
    config: DialogConfig,
}

struct DialogRun<'a> {
    hash: ContentHash,
    state: DialogState,
    trail: Vec<DialogState>,
    hub: &'a StatusHub,
}

impl<'a> DialogRun<'a> {
    fn start(hash: ContentHash, hub: &'a StatusHub) -> Self {
        let run = Self {
            hash,
            state: DialogState::Announcing,
            trail: vec![DialogState::Announcing],
            hub,
        };
        run.publish_progress();
        run
    }

    fn advance(&mut self, next: DialogState) {
        if !self.state.can_transition_to(&next) {
            tracing::error!("Invalid dialog transition {} -> {}", self.state, next);
            debug_assert!(false, "invalid dialog transition {} -> {}", self.state, next);
        }
        tracing::debug!("Dialog {}: {} -> {}", self.hash, self.state, next);
        self.state = next;
        self.trail.push(next);
        self.publish_progress();
    }

    fn publish_progress(&self) {
        self.hub.publish(StatusEvent::DialogProgress {
            hash: self.hash.to_string(),
            state: self.state,
        });
    }
}

impl EnrollmentDialog {
    pub fn new(
        speech_out: Arc<dyn SpeechOutput>,
        speech_in: Arc<dyn SpeechInput>,
        store: IdentityStore,
        images: FaceImageStore,
        hub: Arc<StatusHub>,
        config: DialogConfig,
    ) -> Self {
        Self { speech_out, speech_in, store, images, hub, config }
    }

    /// Runs the whole conversation. Never fails: every error, including a
    /// panic in a collaborator, ends in a dismissal or, if even that cannot
    /// be stored, `Abandoned`.
    pub fn run(&self, face: StrangerFace) -> DialogReport {
        tracing::info!("Starting enrollment dialog for stranger {}", face.hash);
        self.hub.publish(StatusEvent::DialogStarted { hash: face.hash.to_string() });

        let mut run = DialogRun::start(face.hash.clone(), &self.hub);
        let conversation = panic::catch_unwind(AssertUnwindSafe(|| self.converse(&mut run, &face)));
        let outcome = match conversation {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!("Stranger interaction error: {}", e);
                self.report_failure(&face.hash, e.to_string());
                self.report_storage_error(&e);
                self.fail_safe(&mut run, &face)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Stranger interaction panicked: {}", message);
                self.report_failure(&face.hash, message);
                self.fail_safe(&mut run, &face)
            }
        };
        run.advance(DialogState::Done);

        tracing::info!("Dialog for stranger {} finished: {:?}", face.hash, outcome);
        self.hub.publish(StatusEvent::DialogFinished {
            hash: face.hash.to_string(),
            outcome: outcome.clone(),
        });

        DialogReport {
            hash: face.hash,
            outcome,
            trail: run.trail,
        }
    }

    fn converse(&self, run: &mut DialogRun<'_>, face: &StrangerFace) -> crate::common::Result<DialogOutcome> {
        self.say(ANNOUNCEMENT);
        run.advance(DialogState::AwaitingConsent);

        let response = match self.listen() {
            Some(response) => response,
            None => {
                run.advance(DialogState::NoResponse);
                return Ok(self.dismiss(run, face, DismissReason::NoResponse));
            }
        };

        if !is_affirmative(&response, &self.config.affirmative_words) {
            tracing::info!("Stranger enrollment declined ({:?})", response);
            run.advance(DialogState::Declined);
            return Ok(self.dismiss(run, face, DismissReason::Declined));
        }

        run.advance(DialogState::AwaitingName);
        self.say(ASK_NAME);

        let name = match self.listen().and_then(|heard| normalize_name(&heard)) {
            Some(name) => name,
            None => return Ok(self.dismiss(run, face, DismissReason::InvalidName)),
        };

        run.advance(DialogState::Enrolled);
        self.images.save_person(&name, &face.image)?;
        self.store.append(&name, &face.embedding)?;
        tracing::info!("{} successfully enrolled", name);
        self.say(&format!("{} enrolled successfully", name));

        Ok(DialogOutcome::Enrolled { name })
    }

    /// Dismissal after a failure. A panic while dismissing ends in `Abandoned`.
    fn fail_safe(&self, run: &mut DialogRun<'_>, face: &StrangerFace) -> DialogOutcome {
        let dismissal = panic::catch_unwind(AssertUnwindSafe(|| self.dismiss(run, face, DismissReason::Error)));
        dismissal.unwrap_or_else(|payload| {
            let error = panic_message(payload.as_ref());
            tracing::error!("Saving stranger {} panicked: {}", face.hash, error);
            DialogOutcome::Abandoned { error }
        })
    }

    fn dismiss(&self, run: &mut DialogRun<'_>, face: &StrangerFace, reason: DismissReason) -> DialogOutcome {
        // Already there when an earlier dismissal failed part way
        if run.state != DialogState::SavedAsKnownStranger {
            run.advance(DialogState::SavedAsKnownStranger);
        }

        if let Err(e) = self.images.save_known_stranger(&face.image) {
            tracing::warn!("Failed to save known stranger image: {}", e);
            self.report_storage_error(&e);
        }

        match self.store.append(KNOWN_STRANGER, &face.embedding) {
            Ok(()) => {
                tracing::info!("Stranger {} saved as known stranger ({:?})", face.hash, reason);
                self.say(reason.message());
                DialogOutcome::KnownStranger { reason }
            }
            Err(e) => {
                tracing::error!("Error saving stranger {}: {}", face.hash, e);
                self.report_storage_error(&e);
                DialogOutcome::Abandoned { error: e.to_string() }
            }
        }
    }

    /// Playback failures never stop the dialog, panics included.
    fn say(&self, text: &str) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.speech_out.say(text))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("TTS error: {}", e),
            Err(payload) => tracing::warn!("TTS panicked: {}", panic_message(payload.as_ref())),
        }
    }

    /// `None` for silence, unrecognized speech, or a capture failure.
    fn listen(&self) -> Option<String> {
        match self.speech_in.listen(self.config.listen_timeout(), self.config.phrase_limit()) {
            Ok(Heard::Text(text)) => {
                let text = text.trim().to_lowercase();
                if text.is_empty() { None } else { Some(text) }
            }
            Ok(Heard::Timeout) | Ok(Heard::Unrecognized) => None,
            Err(e) => {
                tracing::warn!("Voice recognition error: {}", e);
                None
            }
        }
    }

    fn report_failure(&self, hash: &ContentHash, message: String) {
        self.hub.publish(StatusEvent::DialogFailed { hash: hash.to_string(), message });
    }

    fn report_storage_error(&self, error: &FaceWardError) {
        if matches!(error, FaceWardError::Storage(_) | FaceWardError::Io(_) | FaceWardError::Image(_)) {
            self.hub.publish(StatusEvent::StorageFailed { message: error.to_string() });
        }
    }
}

/// True when any word of `response` is one of `affirmative_words`.
pub fn is_affirmative(response: &str, affirmative_words: &[String]) -> bool {
    response
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .any(|token| affirmative_words.iter().any(|word| word.eq_ignore_ascii_case(token)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Title-cases every word. `None` if nothing is left after trimming or the
/// result is the reserved Known Stranger name.
pub fn normalize_name(raw: &str) -> Option<String> {
    let words: Vec<String> = raw
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect();

    let name = words.join(" ");
    if name.is_empty() || name == KNOWN_STRANGER {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{PanickingListener, RecordingSpeech, ScriptedListener};
    use crate::storage::{IdentityStore, MemoryTable};
    use image::{Rgb, RgbImage};

    struct Fixture {
        dialog: EnrollmentDialog,
        table: Arc<MemoryTable>,
        speech: Arc<RecordingSpeech>,
        hub: Arc<StatusHub>,
        _dir: tempfile::TempDir,
    }

    fn fixture(script: Vec<crate::common::Result<Heard>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(MemoryTable::new());
        let speech = Arc::new(RecordingSpeech::new());
        let hub = Arc::new(StatusHub::new(256));
        let dialog = EnrollmentDialog::new(
            speech.clone(),
            Arc::new(ScriptedListener::new(script)),
            IdentityStore::new(table.clone()),
            FaceImageStore::new(dir.path()).unwrap(),
            hub.clone(),
            DialogConfig::default(),
        );
        Fixture { dialog, table, speech, hub, _dir: dir }
    }

    fn stranger() -> StrangerFace {
        let embedding = vec![0.12, -0.4, 0.33];
        StrangerFace {
            hash: ContentHash::of(&embedding),
            embedding,
            image: DynamicImage::ImageRgb8(RgbImage::from_pixel(112, 112, Rgb([1, 2, 3]))),
        }
    }

    fn stored_names(table: &MemoryTable) -> Vec<String> {
        use crate::storage::EmbeddingTable;
        table.rows().unwrap().into_iter().map(|row| row.name).collect()
    }

    #[test]
    fn test_consent_timeout_saves_known_stranger() {
        let f = fixture(vec![Ok(Heard::Timeout)]);
        let report = f.dialog.run(stranger());

        assert_eq!(report.outcome, DialogOutcome::KnownStranger { reason: DismissReason::NoResponse });
        assert_eq!(report.trail, vec![
            DialogState::Announcing,
            DialogState::AwaitingConsent,
            DialogState::NoResponse,
            DialogState::SavedAsKnownStranger,
            DialogState::Done,
        ]);
        assert_eq!(stored_names(&f.table), vec![KNOWN_STRANGER]);
        assert_eq!(f.speech.spoken()[0], ANNOUNCEMENT);
    }

    #[test]
    fn test_yes_then_name_enrolls() {
        let f = fixture(vec![
            Ok(Heard::Text("Yes please".into())),
            Ok(Heard::Text("  ada   LOVELACE ".into())),
        ]);
        let report = f.dialog.run(stranger());

        assert_eq!(report.outcome, DialogOutcome::Enrolled { name: "Ada Lovelace".into() });
        assert_eq!(report.trail, vec![
            DialogState::Announcing,
            DialogState::AwaitingConsent,
            DialogState::AwaitingName,
            DialogState::Enrolled,
            DialogState::Done,
        ]);
        assert_eq!(stored_names(&f.table), vec!["Ada Lovelace"]);
        assert_eq!(f.speech.spoken().last().unwrap(), "Ada Lovelace enrolled successfully");
    }

    #[test]
    fn test_refusal_is_declined() {
        let f = fixture(vec![Ok(Heard::Text("no skip".into()))]);
        let report = f.dialog.run(stranger());

        assert_eq!(report.outcome, DialogOutcome::KnownStranger { reason: DismissReason::Declined });
        assert!(report.trail.contains(&DialogState::Declined));
        assert_eq!(stored_names(&f.table), vec![KNOWN_STRANGER]);
    }

    #[test]
    fn test_empty_name_saves_known_stranger() {
        let f = fixture(vec![Ok(Heard::Text("add".into())), Ok(Heard::Text("   ".into()))]);
        let report = f.dialog.run(stranger());

        assert_eq!(report.outcome, DialogOutcome::KnownStranger { reason: DismissReason::InvalidName });
        assert_eq!(report.trail[2], DialogState::AwaitingName);
        assert_eq!(report.trail[3], DialogState::SavedAsKnownStranger);
    }

    #[test]
    fn test_capture_error_counts_as_no_response() {
        let f = fixture(vec![Err(FaceWardError::Capture("microphone unplugged".into()))]);
        let report = f.dialog.run(stranger());
        assert_eq!(report.outcome, DialogOutcome::KnownStranger { reason: DismissReason::NoResponse });
    }

    #[test]
    fn test_playback_errors_do_not_stop_enrollment() {
        let f = fixture(vec![Ok(Heard::Text("enroll".into())), Ok(Heard::Text("grace hopper".into()))]);
        f.speech.fail_all(true);
        let report = f.dialog.run(stranger());
        assert_eq!(report.outcome, DialogOutcome::Enrolled { name: "Grace Hopper".into() });
    }

    #[tokio::test]
    async fn test_storage_failure_never_claims_success() {
        let f = fixture(vec![Ok(Heard::Text("yes".into())), Ok(Heard::Text("ada".into()))]);
        f.table.set_fail_inserts(true);
        let mut events = f.hub.subscribe();

        let report = f.dialog.run(stranger());

        assert!(matches!(report.outcome, DialogOutcome::Abandoned { .. }));
        assert_eq!(*report.trail.last().unwrap(), DialogState::Done);
        assert!(report.trail.contains(&DialogState::SavedAsKnownStranger));

        let mut saw_storage_failure = false;
        while let Ok(event) = events.events.try_recv() {
            if matches!(event, StatusEvent::StorageFailed { .. }) {
                saw_storage_failure = true;
            }
        }
        assert!(saw_storage_failure);
    }

    #[tokio::test]
    async fn test_listener_panic_saves_known_stranger() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(MemoryTable::new());
        let hub = Arc::new(StatusHub::new(256));
        let mut events = hub.subscribe();
        let dialog = EnrollmentDialog::new(
            Arc::new(RecordingSpeech::new()),
            Arc::new(PanickingListener),
            IdentityStore::new(table.clone()),
            FaceImageStore::new(dir.path()).unwrap(),
            hub.clone(),
            DialogConfig::default(),
        );

        let report = dialog.run(stranger());

        assert_eq!(report.outcome, DialogOutcome::KnownStranger { reason: DismissReason::Error });
        assert_eq!(report.trail, vec![
            DialogState::Announcing,
            DialogState::AwaitingConsent,
            DialogState::SavedAsKnownStranger,
            DialogState::Done,
        ]);
        assert_eq!(stored_names(&table), vec![KNOWN_STRANGER]);

        let mut failure = None;
        let mut finished = None;
        while let Ok(event) = events.events.try_recv() {
            match event {
                StatusEvent::DialogFailed { message, .. } => failure = Some(message),
                StatusEvent::DialogFinished { outcome, .. } => finished = Some(outcome),
                _ => {}
            }
        }
        assert_eq!(failure.as_deref(), Some("microphone driver crashed"));
        assert_eq!(finished, Some(report.outcome));
    }

    #[test]
    fn test_spoken_known_stranger_is_not_enrolled() {
        let f = fixture(vec![Ok(Heard::Text("yes".into())), Ok(Heard::Text("known stranger".into()))]);
        let report = f.dialog.run(stranger());

        assert_eq!(report.outcome, DialogOutcome::KnownStranger { reason: DismissReason::InvalidName });
        assert!(!report.trail.contains(&DialogState::Enrolled));
        assert_eq!(stored_names(&f.table), vec![KNOWN_STRANGER]);
    }

    #[tokio::test]
    async fn test_progress_events_follow_trail() {
        let f = fixture(vec![Ok(Heard::Unrecognized)]);
        let mut events = f.hub.subscribe();
        let report = f.dialog.run(stranger());

        let mut states = Vec::new();
        let mut finished = None;
        while let Ok(event) = events.events.try_recv() {
            match event {
                StatusEvent::DialogProgress { state, .. } => states.push(state),
                StatusEvent::DialogFinished { outcome, .. } => finished = Some(outcome),
                _ => {}
            }
        }
        assert_eq!(states, report.trail);
        assert_eq!(finished, Some(report.outcome));
    }

    #[test]
    fn test_affirmative_matches_whole_words() {
        let words = DialogConfig::default().affirmative_words;
        assert!(is_affirmative("yes", &words));
        assert!(is_affirmative("please add them", &words));
        assert!(is_affirmative("Enroll!", &words));
        assert!(!is_affirmative("yesterday", &words));
        assert!(!is_affirmative("no", &words));
        assert!(!is_affirmative("", &words));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("ada lovelace").as_deref(), Some("Ada Lovelace"));
        assert_eq!(normalize_name("  mcDONALD  ").as_deref(), Some("Mcdonald"));
        assert_eq!(normalize_name("   "), None);
        assert_eq!(normalize_name("KNOWN stranger"), None);
        assert_eq!(normalize_name("known strangers").as_deref(), Some("Known Strangers"));
    }

    #[test]
    fn test_transition_table() {
        assert!(DialogState::Announcing.can_transition_to(&DialogState::AwaitingConsent));
        assert!(DialogState::NoResponse.can_transition_to(&DialogState::SavedAsKnownStranger));
        assert!(!DialogState::Done.can_transition_to(&DialogState::Announcing));
        assert!(!DialogState::Declined.can_transition_to(&DialogState::Enrolled));
    }
}
