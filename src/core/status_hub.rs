//! Best-effort fan-out of status events to any number of subscribers.

use crate::core::dialog::{DialogOutcome, DialogState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatusEvent {
    DetectedPersonsChanged { persons: Vec<String>, timestamp: String },
    StrangerDetected { hash: String },
    DialogStarted { hash: String },
    DialogProgress { hash: String, state: DialogState },
    DialogFinished { hash: String, outcome: DialogOutcome },
    DialogFailed { hash: String, message: String },
    StorageFailed { message: String },
    PauseChanged { paused: bool },
    PipelineStarted,
    PipelineStopped { reason: String },
}

impl StatusEvent {
    pub fn detected_persons(persons: Vec<String>) -> Self {
        StatusEvent::DetectedPersonsChanged {
            persons,
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            StatusEvent::DetectedPersonsChanged { .. } => "detected_persons_changed",
            StatusEvent::StrangerDetected { .. } => "stranger_detected",
            StatusEvent::DialogStarted { .. } => "dialog_started",
            StatusEvent::DialogProgress { .. } => "dialog_progress",
            StatusEvent::DialogFinished { .. } => "dialog_finished",
            StatusEvent::DialogFailed { .. } => "dialog_failed",
            StatusEvent::StorageFailed { .. } => "storage_failed",
            StatusEvent::PauseChanged { .. } => "pause_changed",
            StatusEvent::PipelineStarted => "pipeline_started",
            StatusEvent::PipelineStopped { .. } => "pipeline_stopped",
        }
    }
}

pub type SubscriberId = u64;

/// Receiving end handed to a subscriber. The stream ends when the hub drops
/// the subscriber (unsubscribed, queue overflowed, or hub gone).
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<StatusEvent>,
}

#[derive(Debug)]
pub struct StatusHub {
    queue_capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<StatusEvent>>>,
}

impl StatusHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let count = {
            let mut subscribers = self.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        tracing::info!("Status subscriber {} connected. Total: {}", id, count);
        Subscription { id, events: rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.lock();
        if subscribers.remove(&id).is_some() {
            tracing::info!("Status subscriber {} disconnected. Total: {}", id, subscribers.len());
        }
    }

    /// Never blocks. A subscriber whose queue is full or closed is dropped.
    pub fn publish(&self, event: StatusEvent) {
        tracing::debug!(event = event.event_name(), "Publishing status event");
        let mut subscribers = self.lock();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Dropping slow status subscriber {}", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Dropping closed status subscriber {}", id);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<StatusEvent>>> {
        // A panic while holding this lock cannot leave the map half-updated
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
