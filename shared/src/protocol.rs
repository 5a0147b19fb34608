//! Length-prefixed JSON frame codec
//!
//! Every frame is a 4-byte big-endian unsigned length followed by that many
//! UTF-8 bytes of JSON. The writer emits header and body in a single socket
//! write so a frame is never interleaved with another producer's output; the
//! reader distinguishes a clean close (before any header byte) from a peer
//! vanishing mid-frame.
//!
//! Framing failures ([`FrameError::ShortRead`], [`FrameError::Malformed`])
//! terminate the session that produced them. A frame that parses as JSON but
//! does not match its declared type's schema is a [`FrameError::BadMessage`]:
//! the message is dropped and the session continues.

use crate::messages::Message;
use crate::unix_timestamp;
use serde_json::Value;
use std::io::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length prefix size in bytes.
pub const HEADER_LEN: usize = 4;

/// Upper bound on a single frame body; anything larger is treated as a
/// framing violation rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the connection cleanly between frames.
    #[error("peer closed the connection")]
    PeerGone,

    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed mid-frame")]
    ShortRead,

    /// Framing-level violation: invalid length, non-UTF-8 body, invalid
    /// JSON, or a body that is not a JSON object. Fatal for the session.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame was a well-formed JSON object but its fields do not match
    /// the schema of its declared type. The message is dropped; the session
    /// survives.
    #[error("bad message: {0}")]
    BadMessage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the session that produced this error must be closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::BadMessage(_))
    }
}

/// Reads one frame and decodes it into a [`Message`].
///
/// Unknown `"type"` tags decode to [`Message::Unknown`] rather than failing,
/// so forward-compatible peers are merely ignored, not disconnected.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(FrameError::PeerGone),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(FrameError::Malformed(format!("invalid frame length {}", len)));
    }

    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(FrameError::ShortRead),
        Err(e) => return Err(e.into()),
    }

    let text = std::str::from_utf8(&body)
        .map_err(|_| FrameError::Malformed("frame body is not valid UTF-8".to_string()))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| FrameError::Malformed(format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(FrameError::Malformed("frame body is not a JSON object".to_string()));
    }

    serde_json::from_value(value).map_err(|e| FrameError::BadMessage(e.to_string()))
}

/// Encodes a [`Message`], stamps the informational `timestamp` field, and
/// writes header plus body as one buffer.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let mut value =
        serde_json::to_value(msg).map_err(|e| FrameError::BadMessage(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert("timestamp".to_string(), unix_timestamp().into());
    }

    let body = serde_json::to_vec(&value).map_err(|e| FrameError::BadMessage(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Malformed(format!("frame too large: {} bytes", body.len())));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
