//! Wire protocol of the service socket.
//!
//! Requests are `[len: u32 LE][bincode]`. Everything the service sends is
//! `[type: u8][len: u32 LE][bincode]` where the type tells a final
//! `Response` from a `StreamMessage`.

use crate::common::{FaceWardError, Result};
use crate::core::overlay::EncodedFrame;
use crate::core::pipeline::StatusReport;
use crate::core::status_hub::StatusEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MSG_TYPE_RESPONSE: u8 = 0;
pub const MSG_TYPE_STREAM: u8 = 1;

pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Request {
    Status,
    DetectedPersons,
    KnownPersons,
    Pause,
    Resume,
    /// Streams status events until the client disconnects.
    Subscribe,
    /// Streams annotated frames; `None` streams until the client disconnects.
    Watch { max_frames: Option<u32> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Status(StatusReport),
    Persons(Vec<String>),
    PauseState { paused: bool, changed: bool },
    /// Sent after the last stream message of `Subscribe` or `Watch`.
    StreamEnded { reason: String },
    Error(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Event(StatusEvent),
    Frame(EncodedFrame),
}

/// A decoded message from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response(Response),
    Stream(StreamMessage),
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_MESSAGE_SIZE {
        return Err(FaceWardError::Protocol(format!(
            "Message of {} bytes exceeds limit of {}", len, MAX_MESSAGE_SIZE
        )));
    }
    Ok(())
}

fn serialize<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let data = bincode::serialize(message)
        .map_err(|e| FaceWardError::Protocol(format!("Failed to serialize message: {}", e)))?;
    check_len(data.len())?;
    Ok(data)
}

fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data)
        .map_err(|e| FaceWardError::Protocol(format!("Failed to deserialize message: {}", e)))
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    let data = serialize(request)?;
    let mut frame = Vec::with_capacity(4 + data.len());
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

pub fn encode_message<T: Serialize>(msg_type: u8, message: &T) -> Result<Vec<u8>> {
    let data = serialize(message)?;
    let mut frame = Vec::with_capacity(5 + data.len());
    frame.push(msg_type);
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    check_len(len)?;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    deserialize(&data)
}

pub async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    write_frame(writer, &encode_message(MSG_TYPE_RESPONSE, response)?).await
}

pub async fn write_stream<W: AsyncWrite + Unpin>(writer: &mut W, message: &StreamMessage) -> Result<()> {
    write_frame(writer, &encode_message(MSG_TYPE_STREAM, message)?).await
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking read of one service message.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Incoming> {
    let mut type_buf = [0u8; 1];
    reader.read_exact(&mut type_buf)?;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    check_len(len)?;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    match type_buf[0] {
        MSG_TYPE_RESPONSE => Ok(Incoming::Response(deserialize(&data)?)),
        MSG_TYPE_STREAM => Ok(Incoming::Stream(deserialize(&data)?)),
        other => Err(FaceWardError::Protocol(format!("Unknown message type {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_request_framing() {
        let frame = encode_request(&Request::Watch { max_frames: Some(3) }).unwrap();
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        let mut reader = frame.as_slice();
        assert_eq!(read_request(&mut reader).await.unwrap(), Request::Watch { max_frames: Some(3) });
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let mut frame = ((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(&[0; 16]);
        let mut reader = frame.as_slice();
        assert!(matches!(read_request(&mut reader).await, Err(FaceWardError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_stream_then_response() {
        let mut wire = Vec::new();
        write_stream(&mut wire, &StreamMessage::Event(StatusEvent::PauseChanged { paused: true })).await.unwrap();
        write_response(&mut wire, &Response::StreamEnded { reason: "done".into() }).await.unwrap();

        assert_eq!(wire[0], MSG_TYPE_STREAM);
        let mut cursor = Cursor::new(wire);
        assert_eq!(
            read_message(&mut cursor).unwrap(),
            Incoming::Stream(StreamMessage::Event(StatusEvent::PauseChanged { paused: true }))
        );
        assert_eq!(
            read_message(&mut cursor).unwrap(),
            Incoming::Response(Response::StreamEnded { reason: "done".into() })
        );
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let mut frame = encode_message(MSG_TYPE_RESPONSE, &Response::Persons(vec![])).unwrap();
        frame[0] = 9;
        assert!(matches!(read_message(&mut Cursor::new(frame)), Err(FaceWardError::Protocol(_))));
    }

    #[test]
    fn test_truncated_message_is_an_io_error() {
        let frame = encode_message(MSG_TYPE_RESPONSE, &Response::Persons(vec!["Ada".into()])).unwrap();
        let truncated = frame[..frame.len() - 2].to_vec();
        assert!(matches!(read_message(&mut Cursor::new(truncated)), Err(FaceWardError::Io(_))));
    }
}
