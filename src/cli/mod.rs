pub mod ascii_preview;
pub mod import;

pub use ascii_preview::{check_for_escape, AsciiRenderer, PreviewPainter};
pub use import::{import_photo, ImportedFace};
