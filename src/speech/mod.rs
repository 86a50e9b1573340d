pub mod command;

pub use command::{CommandSpeechInput, CommandSpeechOutput};
