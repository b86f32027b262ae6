//! Local transport and message framing between launcher and daemon.
//!
//! Each message is one JSON document terminated by `\n`. A connection
//! carries exactly one request and one response.

use crate::error::{ProfileQueryError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Upper bound for a single framed message.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Bind a listening socket at `path`. The caller owns any cleanup of a previous file.
pub fn bind(path: &Path) -> Result<UnixListener> {
    UnixListener::bind(path).map_err(|e| {
        ProfileQueryError::ConnectionError(format!(
            "Failed to bind socket {}: {e}",
            path.display()
        ))
    })
}

pub async fn connect(path: &Path) -> Result<UnixStream> {
    UnixStream::connect(path).await.map_err(|e| {
        ProfileQueryError::ConnectionError(format!(
            "Failed to connect to {}: {e}",
            path.display()
        ))
    })
}

/// Read one framed message. `Ok(None)` means the peer closed the connection
/// cleanly before sending anything.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let bytes_read = (&mut *reader)
        .take(MAX_MESSAGE_BYTES as u64 + 1)
        .read_line(&mut line)
        .await
        .map_err(|e| ProfileQueryError::ConnectionError(format!("Failed to read message: {e}")))?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if bytes_read > MAX_MESSAGE_BYTES {
        return Err(ProfileQueryError::ProtocolError(format!(
            "Message exceeds {MAX_MESSAGE_BYTES} bytes"
        )));
    }

    if !line.ends_with('\n') {
        return Err(ProfileQueryError::ConnectionError(
            "Connection closed in the middle of a message".to_string(),
        ));
    }

    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| ProfileQueryError::ProtocolError(format!("Invalid message: {e}")))
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut payload = serde_json::to_vec(message)?;
    payload.push(b'\n');

    writer
        .write_all(&payload)
        .await
        .map_err(|e| ProfileQueryError::ConnectionError(format!("Failed to send message: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ProfileQueryError::ConnectionError(format!("Failed to send message: {e}")))?;

    Ok(())
}
