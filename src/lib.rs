// Core modules
pub mod core;
pub mod camera;
pub mod speech;
pub mod storage;
pub mod service;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, FaceWardError, Result};
pub use core::{
    cosine_similarity, Embedding, EnrollmentDialog, FaceBox, OnnxFaceDetector, OnnxFaceEmbedder, Pipeline,
    StatusEvent, StatusHub, StatusReport,
};
pub use service::{protocol, ServiceClient};
pub use storage::{Identity, IdentityStore};

/// Installs the tracing subscriber. Dev mode logs at debug level with source
/// locations and thread ids.
pub fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .init();
    }
}
