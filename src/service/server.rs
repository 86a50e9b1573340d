//! Unix socket front end of the pipeline.

use crate::common::Result;
use crate::core::pipeline::Pipeline;
use crate::core::status_hub::Subscription;
use crate::service::protocol::{read_request, write_response, write_stream, Request, Response, StreamMessage};
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

/// Binds the service socket, replacing a stale one, readable by all users.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o666))?;
    tracing::info!("Listening on {}", socket_path.display());
    Ok(listener)
}

/// Accepts connections until `shutdown` completes. Each connection gets its
/// own task.
pub async fn serve(listener: UnixListener, pipeline: Pipeline, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Service stopped accepting connections");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, pipeline).await {
                            tracing::warn!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => tracing::error!("Connection error: {}", e),
            }
        }
    }
}

async fn handle_client(stream: UnixStream, pipeline: Pipeline) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let request = read_request(&mut reader).await?;
    tracing::debug!("Request: {:?}", request);

    match request {
        Request::Status => write_response(&mut writer, &Response::Status(pipeline.status())).await,
        Request::DetectedPersons => write_response(&mut writer, &Response::Persons(pipeline.detected_persons())).await,
        Request::KnownPersons => write_response(&mut writer, &Response::Persons(pipeline.known_persons())).await,
        Request::Pause => {
            let changed = pipeline.pause();
            write_response(&mut writer, &Response::PauseState { paused: true, changed }).await
        }
        Request::Resume => {
            let changed = pipeline.resume();
            write_response(&mut writer, &Response::PauseState { paused: false, changed }).await
        }
        Request::Subscribe => stream_events(reader, writer, pipeline).await,
        Request::Watch { max_frames } => stream_frames(reader, writer, pipeline, max_frames).await,
    }
}

/// Resolves once the client closes its end.
async fn client_closed(reader: &mut OwnedReadHalf) {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

async fn stream_events(mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf, pipeline: Pipeline) -> Result<()> {
    let hub = pipeline.hub().clone();
    let mut subscription = hub.subscribe();
    let result = forward_events(&mut reader, &mut writer, &mut subscription).await;
    hub.unsubscribe(subscription.id);

    match result? {
        Some(reason) => write_response(&mut writer, &Response::StreamEnded { reason: reason.into() }).await,
        None => Ok(()),
    }
}

/// `Ok(None)` when the client went away, otherwise why the stream ended.
async fn forward_events(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    subscription: &mut Subscription,
) -> Result<Option<&'static str>> {
    loop {
        tokio::select! {
            _ = client_closed(reader) => return Ok(None),
            event = subscription.events.recv() => match event {
                Some(event) => write_stream(writer, &StreamMessage::Event(event)).await?,
                None => return Ok(Some("subscriber queue overflowed")),
            }
        }
    }
}

async fn stream_frames(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    pipeline: Pipeline,
    max_frames: Option<u32>,
) -> Result<()> {
    let mut consumer = pipeline.attach_consumer();
    let mut sent = 0u32;

    let reason = loop {
        if max_frames.map_or(false, |max| sent >= max) {
            break "frame limit reached";
        }
        tokio::select! {
            _ = client_closed(&mut reader) => return Ok(()),
            frame = consumer.next_frame() => match frame {
                Some(frame) => {
                    write_stream(&mut writer, &StreamMessage::Frame(frame.as_ref().clone())).await?;
                    sent += 1;
                }
                None => break "video stream ended",
            }
        }
    };

    drop(consumer);
    write_response(&mut writer, &Response::StreamEnded { reason: reason.into() }).await
}
