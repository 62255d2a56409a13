//! Streaming event types and the incremental frame normalizer
//!
//! The answer provider streams `data:`-prefixed lines. Lines up to a blank
//! line form one frame, whose payload is a JSON object discriminated by its
//! `type` field. A literal `[DONE]` payload ends the stream.

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::Stream;

use crate::types::{ChatResponse, Source};

/// Sentinel payload that terminates a stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Events produced by normalizing a provider stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Continuity token for the conversation
    Metadata { thread_id: Option<String> },
    /// Intermediate reasoning note
    Thinking { text: String },
    /// Piece of the answer
    Chunk { text: String },
    /// Answer completed; a present `final_answer` is authoritative
    Done {
        final_answer: Option<String>,
        sources: Vec<Source>,
    },
    /// Stream failed; always the last event
    Error { cause: String },
    /// Frame with a discriminator this client doesn't know
    Unknown { kind: String },
}

impl StreamEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// A stream of normalized events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Wire shape of a frame payload
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, alias = "threadId")]
    thread_id: Option<String>,
    #[serde(default, alias = "text")]
    content: Option<String>,
    #[serde(default, alias = "finalAnswer", alias = "answer")]
    final_answer: Option<String>,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

impl From<WireFrame> for StreamEvent {
    fn from(frame: WireFrame) -> Self {
        match frame.kind.as_str() {
            "metadata" => StreamEvent::Metadata {
                thread_id: frame.thread_id,
            },
            "thinking" => StreamEvent::Thinking {
                text: frame.content.unwrap_or_default(),
            },
            "chunk" => StreamEvent::Chunk {
                text: frame.content.unwrap_or_default(),
            },
            "done" => StreamEvent::Done {
                final_answer: frame.final_answer,
                sources: frame.sources,
            },
            "error" => StreamEvent::Error {
                cause: frame
                    .message
                    .or(frame.content)
                    .unwrap_or_else(|| "Provider reported an error".to_string()),
            },
            _ => StreamEvent::Unknown { kind: frame.kind },
        }
    }
}

/// Decode one frame payload. Malformed JSON yields `None`.
pub fn decode_payload(payload: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<WireFrame>(payload) {
        Ok(frame) => Some(frame.into()),
        Err(e) => {
            tracing::warn!("Skipping malformed stream frame: {} ({} bytes)", e, payload.len());
            None
        }
    }
}

/// A complete frame cut out of the byte feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload(String),
    Done,
}

/// Incremental line/frame splitter.
///
/// Holds only the current partial line and the data lines of the frame being
/// assembled. Bytes are split on `\n` before UTF-8 decoding, so a multi-byte
/// character straddling two fragments is reassembled intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    line_buf: Vec<u8>,
    /// Prefix of `line_buf` already known to hold no newline
    scanned: usize,
    data_lines: Vec<String>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment, returning every frame it completed
    pub fn push(&mut self, fragment: &[u8]) -> Vec<Frame> {
        self.line_buf.extend_from_slice(fragment);

        let mut frames = Vec::new();
        while let Some(offset) = self.line_buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let mut line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.scanned = self.line_buf.len();
        frames
    }

    /// Flush whatever is buffered when the feed closes without a trailing blank line
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.line_buf.is_empty() {
            let line = String::from_utf8_lossy(&self.line_buf).trim_end_matches('\r').to_string();
            self.line_buf.clear();
            self.scanned = 0;
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.flush_frame()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.flush_frame();
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_lines.push(value.to_string());
        } else if !line.starts_with(':') {
            tracing::debug!("Ignoring non-data stream line: {}", line);
        }
        None
    }

    fn flush_frame(&mut self) -> Option<Frame> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        if payload.trim() == DONE_SENTINEL {
            Some(Frame::Done)
        } else {
            Some(Frame::Payload(payload))
        }
    }
}

/// Turn raw fragments into a lazy, ordered, finite sequence of events.
///
/// A transport failure yields one terminal `Error` event. An in-band
/// `error` frame also ends the sequence.
pub fn normalize<S, B, E>(fragments: S) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream! {
        let mut fragments = Box::pin(fragments);
        let mut decoder = FrameDecoder::new();

        while let Some(fragment) = fragments.next().await {
            let bytes = match fragment {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield StreamEvent::Error { cause: e.to_string() };
                    return;
                }
            };

            for frame in decoder.push(bytes.as_ref()) {
                match frame {
                    Frame::Done => return,
                    Frame::Payload(payload) => {
                        if let Some(event) = decode_payload(&payload) {
                            let stop = matches!(event, StreamEvent::Error { .. });
                            yield event;
                            if stop {
                                return;
                            }
                        }
                    }
                }
            }
        }

        if let Some(Frame::Payload(payload)) = decoder.finish() {
            if let Some(event) = decode_payload(&payload) {
                yield event;
            }
        }
    }
}

/// Accumulates an answer from streaming events
#[derive(Debug, Default, Clone)]
pub struct AnswerBuilder {
    content: String,
    thread_id: Option<String>,
    thinking: Option<String>,
    sources: Vec<Source>,
    done: bool,
}

impl AnswerBuilder {
    /// Create a new answer builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the answer state
    pub fn process_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Metadata { thread_id } => {
                if thread_id.is_some() {
                    self.thread_id = thread_id.clone();
                }
            }
            StreamEvent::Thinking { text } => {
                self.thinking = Some(text.clone());
            }
            StreamEvent::Chunk { text } => {
                self.content.push_str(text);
            }
            StreamEvent::Done {
                final_answer,
                sources,
            } => {
                // The server's final answer wins over the local concatenation,
                // an empty string included.
                if let Some(answer) = final_answer {
                    self.content = answer.clone();
                }
                if !sources.is_empty() {
                    self.sources = sources.clone();
                }
                self.thinking = None;
                self.done = true;
            }
            StreamEvent::Error { .. } | StreamEvent::Unknown { .. } => {}
        }
    }

    /// Current assembled content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Latest thread id seen in a metadata event
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Latest thinking note, cleared on completion
    pub fn thinking(&self) -> Option<&str> {
        self.thinking.as_deref()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Whether a `Done` event was processed
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Build the final response
    pub fn build(self) -> ChatResponse {
        ChatResponse {
            answer: self.content,
            thread_id: self.thread_id,
            sources: self.sources,
        }
    }
}
