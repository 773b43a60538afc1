//! Length-prefixed JSON-RPC framing for the engine's stdio streams.
//!
//! The engine frames every message as `Content-Length: N\r\n\r\n` followed
//! by exactly N payload bytes. [`FrameReader`] tolerates payloads split
//! across any number of underlying reads; [`FrameWriter`] serializes and
//! prefixes outgoing messages. Decoded frames are classified into the three
//! JSON-RPC shapes by [`Incoming::classify`].

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ProtocolError;

/// Frame payload cap. Full-workspace diagnostic bursts can be large, but
/// anything past this is a corrupt length header, not a real message.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Reads framed JSON-RPC messages from the engine's stdout.
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
    /// `Ok(None)` means the stream ended cleanly between frames. Any
    /// malformed header, truncated payload, or unparsable payload is a
    /// [`ProtocolError`]; the caller must not continue reading the stream
    /// after one.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, ProtocolError> {
        let Some(payload_len) = self.read_headers().await? else {
            return Ok(None);
        };

        if payload_len > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                len: payload_len,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut payload = vec![0u8; payload_len];
        self.reader.read_exact(&mut payload).await?;

        Ok(Some(serde_json::from_slice(&payload)?))
    }

    /// Consume header lines up to the blank separator and return the
    /// declared payload length, or `None` on EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, ProtocolError> {
        let mut payload_len: Option<usize> = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                // EOF between frames is a clean shutdown; EOF after a
                // header line started is truncation.
                if started {
                    return Err(ProtocolError::TruncatedHeaders);
                }
                return Ok(None);
            }
            started = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.eq_ignore_ascii_case("Content-Length")
            {
                payload_len = Some(value.trim().parse().map_err(|_| {
                    ProtocolError::InvalidContentLength {
                        value: value.trim().to_string(),
                    }
                })?);
            }
            // Other headers (Content-Type) carry no information we need.
        }

        payload_len
            .map(Some)
            .ok_or(ProtocolError::MissingContentLength)
    }
}

/// Writes framed JSON-RPC messages to the engine's stdin.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, message: &Value) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// A decoded frame, classified by JSON-RPC shape.
#[derive(Debug)]
pub enum Incoming {
    /// Reply to a request we issued; carries our id.
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<Value>,
    },
    /// Request initiated by the engine; must be answered or the engine may
    /// stall.
    ServerRequest { id: Value, method: String },
    /// Fire-and-forget notification from the engine.
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Incoming {
    /// Classify a decoded frame.
    ///
    /// Returns `None` for JSON that is none of the three shapes (for
    /// example a response whose id is not an integer); such frames are
    /// dropped by the dispatcher rather than treated as stream corruption.
    #[must_use]
    pub fn classify(frame: &Value) -> Option<Self> {
        let id = frame.get("id");
        let method = frame.get("method").and_then(Value::as_str);
        let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

        match (id, method, is_reply) {
            (Some(id), None, true) => Some(Self::Response {
                id: id.as_u64()?,
                result: frame.get("result").cloned(),
                error: frame.get("error").cloned(),
            }),
            (Some(id), Some(method), _) => Some(Self::ServerRequest {
                id: id.clone(),
                method: method.to_string(),
            }),
            (None, Some(method), _) => Some(Self::Notification {
                method: method.to_string(),
                params: frame.get("params").cloned(),
            }),
            _ => None,
        }
    }
}
