use crate::common::{FaceWardError, Result};
use crate::core::overlay::EncodedFrame;
use crate::core::pipeline::StatusReport;
use crate::core::status_hub::StatusEvent;
use crate::service::protocol::{encode_request, read_message, Incoming, Request, Response, StreamMessage};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Blocking client for the service socket.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    socket_path: PathBuf,
    dev_mode: bool,
}

impl ServiceClient {
    pub fn new(socket_path: impl Into<PathBuf>, dev_mode: bool) -> Self {
        Self { socket_path: socket_path.into(), dev_mode }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn status(&self) -> Result<StatusReport> {
        match self.request(&Request::Status)? {
            Response::Status(report) => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    pub fn detected_persons(&self) -> Result<Vec<String>> {
        self.persons(&Request::DetectedPersons)
    }

    pub fn known_persons(&self) -> Result<Vec<String>> {
        self.persons(&Request::KnownPersons)
    }

    /// Returns whether the call changed the state.
    pub fn pause(&self) -> Result<bool> {
        self.pause_state(&Request::Pause)
    }

    pub fn resume(&self) -> Result<bool> {
        self.pause_state(&Request::Resume)
    }

    /// Calls `on_event` for each event until it returns false or the
    /// service ends the stream.
    pub fn subscribe(&self, mut on_event: impl FnMut(StatusEvent) -> bool) -> Result<()> {
        let mut stream = self.open(&Request::Subscribe)?;
        stream.set_read_timeout(None)?;

        loop {
            match read_message(&mut stream)? {
                Incoming::Stream(StreamMessage::Event(event)) => {
                    if !on_event(event) {
                        return Ok(());
                    }
                }
                Incoming::Stream(StreamMessage::Frame(_)) => {
                    tracing::debug!("Ignoring frame on event stream");
                }
                Incoming::Response(Response::StreamEnded { reason }) => {
                    tracing::info!("Event stream ended: {}", reason);
                    return Ok(());
                }
                Incoming::Response(other) => return Err(unexpected(other)),
            }
        }
    }

    /// Calls `on_frame` for each frame until it returns false, `max_frames`
    /// have arrived, or the video stream ends.
    pub fn watch(&self, max_frames: Option<u32>, mut on_frame: impl FnMut(EncodedFrame) -> bool) -> Result<()> {
        let mut stream = self.open(&Request::Watch { max_frames })?;

        loop {
            match read_message(&mut stream)? {
                Incoming::Stream(StreamMessage::Frame(frame)) => {
                    if !on_frame(frame) {
                        return Ok(());
                    }
                }
                Incoming::Stream(StreamMessage::Event(_)) => {}
                Incoming::Response(Response::StreamEnded { reason }) => {
                    tracing::info!("Frame stream ended: {}", reason);
                    return Ok(());
                }
                Incoming::Response(other) => return Err(unexpected(other)),
            }
        }
    }

    /// In dev mode a missing service is started from the binary next to
    /// this one.
    pub fn ensure_service_running(&self) -> Result<()> {
        if self.socket_path.exists() && UnixStream::connect(&self.socket_path).is_ok() {
            return Ok(());
        }

        if !self.dev_mode {
            return Err(FaceWardError::Other(anyhow::anyhow!(
                "Service is not running. Please start it with: sudo systemctl start faceward"
            )));
        }

        println!("Starting service in development mode...");

        let service_binary = std::env::current_exe()?
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Failed to get binary directory"))?
            .join("faceward-service");

        if !service_binary.exists() {
            return Err(FaceWardError::Other(anyhow::anyhow!(
                "Service binary not found at {:?}. Please build the project first.", service_binary
            )));
        }

        Command::new(&service_binary)
            .arg("--dev")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FaceWardError::Other(anyhow::anyhow!("Failed to start service: {}", e)))?;

        // Model loading takes a moment
        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(500));
            if UnixStream::connect(&self.socket_path).is_ok() {
                println!("Service started successfully");
                return Ok(());
            }
        }

        Err(FaceWardError::Other(anyhow::anyhow!("Service failed to start within timeout")))
    }

    fn persons(&self, request: &Request) -> Result<Vec<String>> {
        match self.request(request)? {
            Response::Persons(persons) => Ok(persons),
            other => Err(unexpected(other)),
        }
    }

    fn pause_state(&self, request: &Request) -> Result<bool> {
        match self.request(request)? {
            Response::PauseState { changed, .. } => Ok(changed),
            other => Err(unexpected(other)),
        }
    }

    fn request(&self, request: &Request) -> Result<Response> {
        let mut stream = self.open(request)?;
        match read_message(&mut stream)? {
            Incoming::Response(Response::Error(message)) => {
                Err(FaceWardError::Other(anyhow::anyhow!("Service error: {}", message)))
            }
            Incoming::Response(response) => Ok(response),
            Incoming::Stream(_) => Err(FaceWardError::Protocol("Unexpected stream message".into())),
        }
    }

    fn open(&self, request: &Request) -> Result<UnixStream> {
        let mut stream = self.connect_with_retry(3)?;
        self.send_request(&mut stream, request)?;
        Ok(stream)
    }

    fn connect_with_retry(&self, max_retries: u32) -> Result<UnixStream> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
                    stream.set_write_timeout(Some(Duration::from_secs(10)))?;
                    return Ok(stream);
                }
                Err(e) if attempt < max_retries => {
                    tracing::debug!("Failed to connect (attempt {}): {}", attempt, e);
                    std::thread::sleep(Duration::from_millis(500));
                }
                Err(e) => {
                    return Err(FaceWardError::Other(anyhow::anyhow!(
                        "Failed to connect to service at {}: {}", self.socket_path.display(), e
                    )));
                }
            }
        }
    }

    fn send_request(&self, stream: &mut UnixStream, request: &Request) -> Result<()> {
        stream.write_all(&encode_request(request)?)?;
        stream.flush()?;
        Ok(())
    }
}

fn unexpected(response: Response) -> FaceWardError {
    FaceWardError::Protocol(format!("Unexpected response: {:?}", response))
}
