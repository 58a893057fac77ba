//! Shared server-sent-events plumbing for streamed completions.
//!
//! All three families deliver JSON payloads on `data:` lines. Splitting the
//! byte stream into payloads happens here; turning a payload into text or
//! usage is each protocol module's `decode_frame`.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::WireProtocol;
use crate::registry::ProviderDescriptor;
use crate::transport::ByteStream;
use crate::types::{DispatchFailure, FailureKind, StreamEvent};

/// What one `data:` payload means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Text(String),
    /// Bookkeeping only (usage, role deltas, pings).
    Ignore,
    /// The vendor signalled the end of the stream.
    End,
    /// The vendor reported an error mid-stream.
    Error(String),
}

/// Usage counters accumulated across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StreamUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Set by vendors that report a single total.
    pub total_tokens: Option<u64>,
}

impl StreamUsage {
    pub fn tokens_consumed(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.input_tokens.saturating_add(self.output_tokens))
    }
}

/// Longest unterminated line the buffer will hold.
pub(crate) const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream line exceeds {} bytes without a newline", MAX_LINE_BYTES)]
pub(crate) struct LineTooLong;

/// Accumulates raw bytes and hands out complete `data:` payloads.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), LineTooLong> {
        self.pending.extend_from_slice(bytes);
        let line_start = self
            .pending
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        if self.pending.len() - line_start > MAX_LINE_BYTES {
            self.pending.clear();
            return Err(LineTooLong);
        }
        Ok(())
    }

    /// Next complete `data:` payload, skipping comments and other fields.
    pub fn next_data(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                return Some(data.trim_start().to_string());
            }
        }
        None
    }

    /// A trailing payload that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.push(b'\n');
        self.next_data()
    }
}

fn failure(descriptor: &ProviderDescriptor, kind: FailureKind, message: String) -> DispatchFailure {
    DispatchFailure::new(kind, message, descriptor.id.clone(), descriptor.name.clone())
}

async fn send_failure(
    tx: &mpsc::Sender<StreamEvent>,
    descriptor: &ProviderDescriptor,
    kind: FailureKind,
    message: String,
) {
    let _ = tx
        .send(StreamEvent::Failed(failure(descriptor, kind, message)))
        .await;
}

/// Consume an SSE body and forward it as [`StreamEvent`]s.
///
/// Always ends with `Finished` or `Failed` unless the receiver was dropped.
/// A body with no decodable frame is malformed; an OpenAI or Anthropic body
/// that closes before its terminal frame is a truncated transfer.
/// Meant to be spawned via `tokio::spawn`.
pub(crate) async fn drive_stream(
    protocol: WireProtocol,
    descriptor: ProviderDescriptor,
    mut body: ByteStream,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut buffer = SseBuffer::default();
    let mut usage = StreamUsage::default();
    let mut decoded = 0usize;
    let mut ended = false;

    loop {
        let data = match buffer.next_data() {
            Some(data) => data,
            None => match body.next().await {
                Some(Ok(bytes)) => {
                    if let Err(e) = buffer.push(&bytes) {
                        warn!(provider = %descriptor.id, "{e}");
                        send_failure(&tx, &descriptor, FailureKind::MalformedResponse, e.to_string())
                            .await;
                        return;
                    }
                    continue;
                }
                Some(Err(e)) => {
                    warn!(provider = %descriptor.id, "stream read error: {e}");
                    send_failure(&tx, &descriptor, FailureKind::TransportError, e.to_string())
                        .await;
                    return;
                }
                None => match buffer.finish() {
                    Some(data) => data,
                    None => break,
                },
            },
        };

        let frame = protocol.decode_frame(&data, &mut usage);
        if frame.is_ok() {
            decoded += 1;
        }
        match frame {
            Ok(Frame::Text(text)) => {
                if text.is_empty() {
                    continue;
                }
                if tx.send(StreamEvent::Delta(text)).await.is_err() {
                    debug!(provider = %descriptor.id, "stream receiver dropped");
                    return;
                }
            }
            Ok(Frame::Ignore) => {}
            Ok(Frame::End) => {
                ended = true;
                break;
            }
            Ok(Frame::Error(message)) => {
                warn!(provider = %descriptor.id, "vendor error mid-stream: {message}");
                send_failure(&tx, &descriptor, FailureKind::ProviderRejected, message).await;
                return;
            }
            Err(e) => {
                debug!(provider = %descriptor.id, "skipping malformed frame: {e}");
            }
        }
    }

    if decoded == 0 {
        warn!(provider = %descriptor.id, "stream carried no decodable frame");
        send_failure(
            &tx,
            &descriptor,
            FailureKind::MalformedResponse,
            format!("{} returned a stream with no readable events", descriptor.name),
        )
        .await;
        return;
    }
    if !ended && protocol.has_end_marker() {
        warn!(provider = %descriptor.id, "stream closed before its terminal frame");
        send_failure(
            &tx,
            &descriptor,
            FailureKind::TransportError,
            format!("{} closed the stream before the response was complete", descriptor.name),
        )
        .await;
        return;
    }

    let _ = tx
        .send(StreamEvent::Finished {
            tokens_consumed: usage.tokens_consumed(),
        })
        .await;
}
