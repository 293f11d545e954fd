//! Node event stream reader.
//!
//! The node pushes one JSON object per line on `GET /events`. The reader
//! decodes lines as they arrive and hands every message to an
//! [`EventSink`]. Reading stops when the node closes the stream, on a read
//! error, or when [`NodeEventReader::close`] is called.

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Response;
use sandnode_common::{ClientError, EventSink, NodeMsg};
use tokio::sync::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::NodeApiClient;

/// Longest event line accepted before the line is dropped.
pub const MAX_EVENT_LINE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum LineError {
    #[error("malformed event line: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("event line of {0} bytes exceeds the line limit")]
    Oversized(usize),
}

/// Splits a byte stream into newline-terminated JSON messages.
///
/// A line longer than the limit is dropped as it streams in and reported
/// once its newline arrives, so a node that never sends one cannot grow
/// the buffer past the limit.
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    max_line: usize,
    discarded: Option<usize>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_EVENT_LINE)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarded: None,
        }
    }

    /// Feed a chunk and return every complete line decoded so far. Blank
    /// lines (keep-alives) are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<NodeMsg, LineError>> {
        let mut decoded = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.append(&rest[..pos]);
            rest = &rest[pos + 1..];
            if let Some(line) = self.end_line() {
                decoded.push(line);
            }
        }
        self.append(rest);
        decoded
    }

    /// Bytes received after the last newline.
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }

    fn append(&mut self, bytes: &[u8]) {
        if let Some(discarded) = self.discarded.as_mut() {
            *discarded += bytes.len();
            return;
        }
        if self.pending.len() + bytes.len() > self.max_line {
            self.discarded = Some(self.pending.len() + bytes.len());
            self.pending = Vec::new();
            return;
        }
        self.pending.extend_from_slice(bytes);
    }

    fn end_line(&mut self) -> Option<Result<NodeMsg, LineError>> {
        if let Some(discarded) = self.discarded.take() {
            return Some(Err(LineError::Oversized(discarded)));
        }
        let line = std::mem::take(&mut self.pending);
        let trimmed = trim_ascii(&line);
        if trimmed.is_empty() {
            return None;
        }
        Some(serde_json::from_slice::<NodeMsg>(trimmed).map_err(LineError::from))
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

pub struct NodeEventReader {
    client: NodeApiClient,
    sink: Arc<dyn EventSink>,
    response: Mutex<Option<Response>>,
    closed: CancellationToken,
}

impl NodeEventReader {
    pub fn new(client: NodeApiClient, sink: Arc<dyn EventSink>) -> Self {
        Self {
            client,
            sink,
            response: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Connect to the node event stream.
    pub async fn open(&self) -> Result<(), ClientError> {
        match self.client.open_events().await {
            Ok(response) => {
                *self.response.lock().await = Some(response);
                info!(node = %self.client.name(), "Event stream opened");
                self.sink.connected();
                Ok(())
            }
            Err(err) => {
                self.sink.connect_error(&err);
                Err(err)
            }
        }
    }

    /// Read until the stream ends or the reader is closed.
    pub async fn read_stream(&self) {
        let response = self.response.lock().await.take();
        let Some(response) = response else {
            warn!(node = %self.client.name(), "Event stream read without an open connection");
            self.sink.read_end();
            return;
        };

        let mut stream = response.bytes_stream();
        let mut decoder = LineDecoder::new();
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => {
                    debug!(node = %self.client.name(), "Event reader closed");
                    break;
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            for decoded in decoder.push(&bytes) {
                                match decoded {
                                    Ok(msg) => self.sink.message(msg).await,
                                    Err(err) => warn!(
                                        node = %self.client.name(),
                                        error = %err,
                                        "Skipping event line"
                                    ),
                                }
                            }
                        }
                        Some(Err(err)) => {
                            warn!(node = %self.client.name(), error = %err, "Event stream read failed");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !decoder.remainder().is_empty() {
            debug!(
                node = %self.client.name(),
                bytes = decoder.remainder().len(),
                "Dropping incomplete trailing event"
            );
        }
        self.sink.read_end();
    }

    /// Stop an in-progress read. A read started afterwards returns at once.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.closed.cancel();
        self.response.lock().await.take();
        Ok(())
    }
}
