//! Speech through external programs (a TTS engine, a recognizer script).

use crate::common::config::SpeechConfig;
use crate::common::{FaceWardError, Result};
use crate::core::interfaces::{Heard, SpeechInput, SpeechOutput};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const SAY_TIMEOUT: Duration = Duration::from_secs(30);
const LISTEN_GRACE: Duration = Duration::from_secs(2);

/// Waits for the child, killing it once `deadline` passes. `None` means it
/// was killed.
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Speaks by running `say_command` with the text appended as the last argument.
pub struct CommandSpeechOutput {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandSpeechOutput {
    pub fn new(config: &SpeechConfig) -> Self {
        Self { command: config.say_command.clone(), timeout: SAY_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SpeechOutput for CommandSpeechOutput {
    fn say(&self, text: &str) -> Result<()> {
        let (program, args) = self.command.split_first()
            .ok_or_else(|| FaceWardError::Playback("No speech output command configured".into()))?;

        tracing::debug!("Saying: {}", text);
        let mut child = Command::new(program)
            .args(args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FaceWardError::Playback(format!("Failed to start {}: {}", program, e)))?;

        match wait_until(&mut child, Instant::now() + self.timeout) {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => Err(FaceWardError::Playback(format!("{} exited with {}", program, status))),
            Ok(None) => Err(FaceWardError::Playback(format!("{} timed out after {:?}", program, self.timeout))),
            Err(e) => Err(FaceWardError::Playback(e.to_string())),
        }
    }
}

/// Listens by running `listen_command`, which records one utterance and
/// prints its transcript.
///
/// Exit code 0 with text on stdout is a transcript, 0 with nothing printed
/// is silence, 1 is speech that could not be recognized; anything else is a
/// capture failure. The program is killed once the listen window plus the
/// phrase limit has passed.
pub struct CommandSpeechInput {
    command: Vec<String>,
    grace: Duration,
}

impl CommandSpeechInput {
    pub fn new(config: &SpeechConfig) -> Self {
        Self { command: config.listen_command.clone(), grace: LISTEN_GRACE }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl SpeechInput for CommandSpeechInput {
    fn listen(&self, timeout: Duration, phrase_limit: Duration) -> Result<Heard> {
        let (program, args) = self.command.split_first()
            .ok_or_else(|| FaceWardError::Capture("No speech input command configured".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .env("FACEWARD_LISTEN_TIMEOUT", timeout.as_secs().to_string())
            .env("FACEWARD_PHRASE_LIMIT", phrase_limit.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FaceWardError::Capture(format!("Failed to start {}: {}", program, e)))?;

        let deadline = Instant::now() + timeout + phrase_limit + self.grace;
        let status = wait_until(&mut child, deadline)
            .map_err(|e| FaceWardError::Capture(e.to_string()))?;

        let status = match status {
            Some(status) => status,
            None => {
                tracing::debug!("Listening timed out");
                return Ok(Heard::Timeout);
            }
        };

        match status.code() {
            Some(0) => {
                let mut transcript = String::new();
                if let Some(mut stdout) = child.stdout.take() {
                    stdout.read_to_string(&mut transcript)?;
                }
                let transcript = transcript.trim();
                if transcript.is_empty() {
                    Ok(Heard::Timeout)
                } else {
                    tracing::info!("Heard: {}", transcript);
                    Ok(Heard::Text(transcript.to_string()))
                }
            }
            Some(1) => Ok(Heard::Unrecognized),
            _ => Err(FaceWardError::Capture(format!("{} exited with {}", program, status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn input(script: &str) -> CommandSpeechInput {
        let config = SpeechConfig { listen_command: sh(script), ..SpeechConfig::default() };
        CommandSpeechInput::new(&config).with_grace(Duration::from_millis(200))
    }

    fn output(command: Vec<String>) -> CommandSpeechOutput {
        let config = SpeechConfig { say_command: command, ..SpeechConfig::default() };
        CommandSpeechOutput::new(&config).with_timeout(Duration::from_millis(500))
    }

    #[test]
    fn test_transcript_is_returned() {
        let heard = input("echo '  Yes please '").listen(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        assert_eq!(heard, Heard::Text("Yes please".into()));
    }

    #[test]
    fn test_limits_are_passed_in_environment() {
        let heard = input("echo $FACEWARD_LISTEN_TIMEOUT $FACEWARD_PHRASE_LIMIT")
            .listen(Duration::from_secs(10), Duration::from_secs(5))
            .unwrap();
        assert_eq!(heard, Heard::Text("10 5".into()));
    }

    #[test]
    fn test_exit_codes_map_to_outcomes() {
        let window = Duration::from_secs(1);
        assert_eq!(input("true").listen(window, window).unwrap(), Heard::Timeout);
        assert_eq!(input("exit 1").listen(window, window).unwrap(), Heard::Unrecognized);
        assert!(matches!(input("exit 7").listen(window, window), Err(FaceWardError::Capture(_))));
    }

    #[test]
    fn test_slow_recognizer_is_killed() {
        let started = Instant::now();
        let heard = input("sleep 10").listen(Duration::ZERO, Duration::ZERO).unwrap();
        assert_eq!(heard, Heard::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_listen_command_is_capture_error() {
        let config = SpeechConfig::default();
        assert!(matches!(
            CommandSpeechInput::new(&config).listen(Duration::ZERO, Duration::ZERO),
            Err(FaceWardError::Capture(_))
        ));
    }

    #[test]
    fn test_say_reports_failures_as_playback_errors() {
        assert!(output(vec!["true".into()]).say("hello").is_ok());
        assert!(matches!(output(vec!["false".into()]).say("hello"), Err(FaceWardError::Playback(_))));
        assert!(matches!(
            output(vec!["/nonexistent/faceward-tts".into()]).say("hello"),
            Err(FaceWardError::Playback(_))
        ));
        assert!(matches!(output(sh("sleep 10")).say("hello"), Err(FaceWardError::Playback(_))));
    }
}
