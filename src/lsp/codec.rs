//! Content-Length frame codec.
//!
//! One frame is a header block terminated by `\r\n\r\n` followed by exactly
//! `Content-Length` bytes of UTF-8 JSON. Reading a frame runs in two
//! sub-steps over the same stream: header-line mode until the empty line,
//! then a raw read of the announced byte count.

use std::collections::HashMap;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::lsp::error::ProbeError;
use crate::lsp::types::Message;

/// Frame a pre-serialized JSON payload and write it out.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), ProbeError>
where
    W: AsyncWrite + Unpin + Send,
{
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize a message and write it as one frame.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProbeError>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string(message)?;
    write_frame(writer, &payload).await
}

/// Read one frame and return its payload bytes.
///
/// `Content-Length: 0` is a frame with no message: the caller gets `None`
/// and should simply read again. End-of-stream anywhere inside a frame is
/// `TransportClosed`, never a framing error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProbeError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut header_block = Vec::new();

    loop {
        let mut byte = [0u8; 1];
        if let Err(e) = reader.read_exact(&mut byte).await {
            return Err(eof_as_closed(e));
        }
        header_block.push(byte[0]);
        if header_block.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let length = content_length(&parse_headers(&header_block)?)?;
    if length == 0 {
        return Ok(None);
    }

    let mut payload = vec![0u8; length];
    if let Err(e) = reader.read_exact(&mut payload).await {
        return Err(eof_as_closed(e));
    }
    Ok(Some(payload))
}

/// Read one frame and classify its payload. `None` for zero-length frames.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, ProbeError>
where
    R: AsyncRead + Unpin + Send,
{
    match read_frame(reader).await? {
        Some(payload) => Ok(Some(decode_message(&payload)?)),
        None => Ok(None),
    }
}

/// Classify a JSON payload into a notification, reply, or error reply.
///
/// A server-to-client request carries `method` and lands in the
/// notification arm with the rest of the unsolicited traffic.
pub fn decode_message(payload: &[u8]) -> Result<Message, ProbeError> {
    let json: serde_json::Value = serde_json::from_slice(payload)?;
    if json.get("method").is_some() {
        return Ok(Message::Notification(serde_json::from_value(json)?));
    }
    if json.get("error").is_some() {
        return Ok(Message::Error(serde_json::from_value(json)?));
    }
    if json.get("id").is_some() {
        return Ok(Message::Response(serde_json::from_value(json)?));
    }
    Err(ProbeError::Protocol(format!(
        "message is neither a reply nor a notification: {json}"
    )))
}

fn eof_as_closed(e: std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProbeError::TransportClosed
    } else {
        ProbeError::Io(e)
    }
}

/// Header field names are case-insensitive; the last occurrence of a
/// duplicate key wins.
fn parse_headers(block: &[u8]) -> Result<HashMap<String, String>, ProbeError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| ProbeError::Framing("header block is not valid UTF-8".to_string()))?;

    let mut headers = HashMap::new();
    for line in text.split("\r\n").filter(|line| !line.is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            return Err(ProbeError::Framing(format!(
                "header line without a colon: {line:?}"
            )));
        };
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(headers)
}

fn content_length(headers: &HashMap<String, String>) -> Result<usize, ProbeError> {
    let raw = headers
        .get("content-length")
        .ok_or_else(|| ProbeError::Framing("Content-Length header not found".to_string()))?;
    let length: i64 = raw
        .parse()
        .map_err(|_| ProbeError::Framing(format!("Content-Length is not a number: {raw:?}")))?;
    if length < 0 {
        return Err(ProbeError::Framing(format!(
            "Content-Length is negative: {length}"
        )));
    }
    Ok(length as usize)
}
