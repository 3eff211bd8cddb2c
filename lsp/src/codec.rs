//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for async
//! reading and writing of framed [`Message`]s.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::message::Message;

/// Maximum frame size (64 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Longest header line accepted, terminator included.
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

/// Framing and decode failures.
///
/// [`CodecError::ConnectionClosed`] is the normal end of a session; every
/// other variant means the stream is desynchronized or unusable.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("Content-Length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("stream ended before {expected} body bytes were read")]
    TruncatedBody { expected: usize },
    #[error("invalid message envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

/// Reads JSON-RPC frames from an async reader.
///
/// Parses `Content-Length` headers and reads exactly that many bytes,
/// then deserializes the body as a [`Message`].
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns [`CodecError::ConnectionClosed`] on EOF at a frame boundary.
    pub async fn read_message(&mut self) -> Result<Message, CodecError> {
        let content_length = self.read_headers().await?;

        if content_length > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge {
                len: content_length,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut body = vec![0u8; content_length];
        if let Err(e) = self.reader.read_exact(&mut body).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::TruncatedBody {
                    expected: content_length,
                }
            } else {
                CodecError::Io(e)
            });
        }

        tracing::trace!(body = %String::from_utf8_lossy(&body), "<- frame");

        serde_json::from_slice(&body).map_err(CodecError::InvalidEnvelope)
    }

    /// Parse headers until the empty line separator and return `Content-Length`.
    async fn read_headers(&mut self) -> Result<usize, CodecError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let limit = MAX_HEADER_LINE_BYTES as u64;
            let bytes_read = (&mut self.reader).take(limit).read_line(&mut line).await?;
            if bytes_read == MAX_HEADER_LINE_BYTES && !line.ends_with('\n') {
                return Err(CodecError::MalformedHeader(format!(
                    "header line exceeds {MAX_HEADER_LINE_BYTES} bytes"
                )));
            }

            if bytes_read == 0 {
                // EOF is clean only at a frame boundary. EOF after a partial
                // header block (even one without Content-Length) is corruption.
                if !saw_any_header_bytes {
                    return Err(CodecError::ConnectionClosed);
                }
                return Err(CodecError::MalformedHeader(
                    "unexpected EOF while reading headers".to_string(),
                ));
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are case-insensitive.
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    CodecError::MalformedHeader(format!(
                        "invalid Content-Length value {:?}: {e}",
                        value.trim()
                    ))
                })?;
                content_length = Some(len);
            }
            // Ignore other headers (e.g. Content-Type)
        }

        content_length
            .ok_or_else(|| CodecError::MalformedHeader("missing Content-Length header".to_string()))
    }
}

/// Writes JSON-RPC frames to an async writer.
///
/// Serializes the envelope and prepends the `Content-Length` header.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and flush it.
    pub async fn write_message(&mut self, msg: &Message) -> Result<(), CodecError> {
        let body = serde_json::to_vec(msg).map_err(CodecError::InvalidEnvelope)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        tracing::trace!(body = %String::from_utf8_lossy(&body), "-> frame");

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Flush and close the underlying stream.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
