//! Detection events and their sources
//!
//! A detection event is one plate read from the vision pipeline. Events are
//! pulled one at a time from a `DetectionSource` by the single ingest worker.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use placa_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Color label used when the classifier has no answer
pub const UNKNOWN_COLOR: &str = "unknown";

/// Plate bounding box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

/// One plate read, as delivered by the vision pipeline
///
/// The plate stays raw text here; normalization (and rejection of plates
/// without digits) belongs to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub plate: String,
    #[serde(default = "unknown_color")]
    pub color: String,
    pub timestamp: NaiveDateTime,
    pub source: String,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    /// Evidence photo captured by the pipeline, if any
    #[serde(default)]
    pub photo_ref: Option<String>,
}

fn unknown_color() -> String {
    UNKNOWN_COLOR.to_string()
}

/// Pull-based stream of detection events
///
/// `None` means the source is exhausted. `Some(Err(_))` is a bad item; the
/// ingest loop logs it and keeps pulling.
#[async_trait]
pub trait DetectionSource: Send {
    async fn next_event(&mut self) -> Option<Result<DetectionEvent>>;
}

/// Newline-delimited JSON events (file or stdin)
///
/// Lines are read as raw bytes; a line that is not UTF-8 or not a valid
/// event is reported as `InvalidInput` and reading continues. Only an I/O
/// error ends the stream.
pub struct JsonLinesSource<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
            finished: false,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> DetectionSource for JsonLinesSource<R> {
    async fn next_event(&mut self) -> Option<Result<DetectionEvent>> {
        if self.finished {
            return None;
        }

        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    // Reader is unusable after an I/O error
                    self.finished = true;
                    return Some(Err(Error::Io(e)));
                }
            }
            self.line_no += 1;

            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Some(serde_json::from_slice(&self.buf).map_err(|e| {
                Error::InvalidInput(format!("line {}: {}", self.line_no, e))
            }));
        }
    }
}

/// In-memory source, mostly for tests and replays
pub struct VecSource {
    events: std::vec::IntoIter<DetectionEvent>,
}

impl VecSource {
    pub fn new(events: Vec<DetectionEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

#[async_trait]
impl DetectionSource for VecSource {
    async fn next_event(&mut self) -> Option<Result<DetectionEvent>> {
        self.events.next().map(Ok)
    }
}
