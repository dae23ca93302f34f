//! SSE (Server-Sent Events) decoding for streaming completions.
//!
//! The Messages API streams lines like:
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}
//!
//! event: message_stop
//! data: {"type":"message_stop"}
//! ```
//!
//! Every `data:` payload carries its own `type`, so `event:` lines are
//! skipped. A payload of type `error` ends the stream with an error.

use std::collections::VecDeque;
use std::fmt::Display;
use std::io::BufRead;

use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::{GatewayError, Result};
use crate::provider::EventStream;
use crate::types::StreamEvent;

/// Parse a single SSE line into at most one [`StreamEvent`].
///
/// Returns `Ok(None)` for blank lines, comments, non-`data:` fields and
/// empty payloads.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidResponse`] for undecodable JSON, and the
/// matching error variant for a provider `error` payload.
pub fn parse_sse_line(line: &str) -> Result<Option<StreamEvent>> {
    let line = line.trim_end();

    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix("data:") else {
        // event:, id:, retry: lines
        return Ok(None);
    };
    let payload = rest.trim_start();
    if payload.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| GatewayError::InvalidResponse(format!("failed to parse SSE data: {e}")))?;

    if value.get("type").and_then(|t| t.as_str()) == Some("error") {
        let envelope: ErrorEnvelope = serde_json::from_value(value).unwrap_or_default();
        return Err(envelope.error.into_gateway_error());
    }

    let event = serde_json::from_value(value)
        .map_err(|e| GatewayError::InvalidResponse(format!("failed to parse SSE event: {e}")))?;
    Ok(Some(event))
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: StreamErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct StreamErrorBody {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

impl StreamErrorBody {
    fn into_gateway_error(self) -> GatewayError {
        match self.kind.as_str() {
            "overloaded_error" => GatewayError::Overloaded(self.message),
            "rate_limit_error" => GatewayError::RateLimited {
                retry_after_ms: 1000,
            },
            "authentication_error" | "permission_error" => GatewayError::AuthFailed(self.message),
            "invalid_request_error" => GatewayError::InvalidRequest(self.message),
            _ => GatewayError::Stream(format!("{}: {}", self.kind, self.message)),
        }
    }
}

/// Blocking iterator of events read from a line-oriented byte source.
///
/// Yields at most one error, then ends.
pub struct SseEventIter<R> {
    reader: R,
    line: String,
    done: bool,
}

impl<R: BufRead> SseEventIter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseEventIter<R> {
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => match parse_sse_line(&self.line) {
                    Ok(Some(event)) => return Some(Ok(event)),
                    Ok(None) => {}
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(GatewayError::Stream(format!("stream read error: {e}"))));
                }
            }
        }
        None
    }
}

/// Decoder state for [`decode_event_stream`].
struct Decoder<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<StreamEvent>>,
    finished: bool,
}

impl<S> Decoder<S> {
    /// Parse every complete line in the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                self.pending
                    .push_back(Err(GatewayError::Stream(format!("stream read error: {e}"))));
                return;
            }
        };
        match parse_sse_line(line) {
            Ok(Some(event)) => self.pending.push_back(Ok(event)),
            Ok(None) => {}
            Err(e) => self.pending.push_back(Err(e)),
        }
    }
}

/// Decode a stream of raw byte chunks into an [`EventStream`].
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across chunks is decoded intact. The stream yields at
/// most one error, then ends.
pub fn decode_event_stream<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let decoder = Decoder {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(item) = decoder.pending.pop_front() {
                if item.is_err() {
                    decoder.pending.clear();
                    decoder.buffer.clear();
                    decoder.finished = true;
                }
                return Some((item, decoder));
            }
            if decoder.finished {
                return None;
            }
            match decoder.inner.next().await {
                Some(Ok(chunk)) => {
                    decoder.buffer.extend_from_slice(chunk.as_ref());
                    decoder.drain_lines();
                }
                Some(Err(e)) => {
                    decoder.finished = true;
                    return Some((
                        Err(GatewayError::Stream(format!("stream read error: {e}"))),
                        decoder,
                    ));
                }
                None => {
                    decoder.finished = true;
                    decoder.flush();
                }
            }
        }
    })
    .boxed()
}
