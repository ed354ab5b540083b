//! Seam to the external vision pipeline
//!
//! Plate OCR and color classification run outside this crate. For each
//! candidate vehicle crop the pipeline is asked for the plate text and the
//! vehicle color; crops without a confident plate read produce no event.

use crate::detection::{BoundingBox, DetectionEvent, DetectionSource, UNKNOWN_COLOR};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use placa_common::Result;

/// Plate length accepted from OCR (Colombian format, e.g. ABC123)
pub const PLATE_TEXT_LEN: usize = 6;

/// One candidate vehicle crop from a frame
#[derive(Debug, Clone)]
pub struct CandidateCrop {
    pub source: String,
    pub bbox: BoundingBox,
    pub captured_at: NaiveDateTime,
    pub photo_ref: Option<String>,
    /// Encoded image bytes, opaque to this crate
    pub image: Vec<u8>,
}

/// OCR and color classification provided by the vision pipeline
pub trait VisionPipeline: Send + Sync {
    /// Normalized alphanumeric plate text, or `None` without a confident read
    fn recognize_plate_text(&self, crop: &CandidateCrop) -> Option<String>;

    /// Color label, or `"unknown"`
    fn classify_vehicle_color(&self, crop: &CandidateCrop) -> String;
}

/// Turn a crop into a detection event
///
/// Reads that do not look like a full plate are dropped before they reach
/// the ledger.
pub fn detection_from_crop(vision: &dyn VisionPipeline, crop: CandidateCrop) -> Option<DetectionEvent> {
    let text = vision.recognize_plate_text(&crop)?;
    let alnum = text.chars().filter(char::is_ascii_alphanumeric).count();
    if alnum != PLATE_TEXT_LEN {
        tracing::trace!(text = %text, source = %crop.source, "Discarding partial plate read");
        return None;
    }

    let color = vision.classify_vehicle_color(&crop);
    let color = if color.trim().is_empty() {
        UNKNOWN_COLOR.to_string()
    } else {
        color
    };

    Some(DetectionEvent {
        plate: text,
        color,
        timestamp: crop.captured_at,
        source: crop.source,
        bbox: Some(crop.bbox),
        photo_ref: crop.photo_ref,
    })
}

/// Detection source backed by a crop iterator and a vision pipeline
pub struct VisionSource<V, I> {
    vision: V,
    crops: I,
}

impl<V, I> VisionSource<V, I>
where
    V: VisionPipeline,
    I: Iterator<Item = CandidateCrop> + Send,
{
    pub fn new(vision: V, crops: I) -> Self {
        Self { vision, crops }
    }
}

#[async_trait]
impl<V, I> DetectionSource for VisionSource<V, I>
where
    V: VisionPipeline,
    I: Iterator<Item = CandidateCrop> + Send,
{
    async fn next_event(&mut self) -> Option<Result<DetectionEvent>> {
        for crop in self.crops.by_ref() {
            if let Some(event) = detection_from_crop(&self.vision, crop) {
                return Some(Ok(event));
            }
        }
        None
    }
}
