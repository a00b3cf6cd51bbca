//! Event model shared by the connection manager and the dashboard stores

mod envelope;

pub use envelope::decode_message;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned box in frame pixel space, `x1 < x2` and `y1 < y2`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Build a box, rejecting degenerate or inverted geometry
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
        if finite && x1 < x2 && y1 < y2 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// A detected container in the most recent frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Backend-assigned tracking id
    pub entity_id: String,
    pub bbox: BBox,
    /// Whether the backend has captured an image of this container
    pub captured: bool,
    /// Detection confidence in [0, 1]
    pub confidence: f32,
}

/// Boxes of one frame, keyed by entity id
pub type BoxMap = BTreeMap<String, BoundingBox>;

/// A recognized container row. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub captured_at: DateTime<Utc>,
    pub container_owner: String,
    pub container_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_video: Option<String>,
}

impl LogRecord {
    /// Owner code and serial joined the way it is printed on the container
    pub fn container_code(&self) -> String {
        format!("{}{}", self.container_owner, self.container_number)
    }
}

/// Accepts RFC 3339, or a naive ISO timestamp which is read as UTC
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {:?}: {}", raw, e)))
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
    /// Full overlay refresh: decoded JPEG bytes plus every box still tracked
    VideoFrame { image: Vec<u8>, boxes: BoxMap },
    /// Backend started working through a video
    ProcessingStarted,
    ContainerDetect {
        entity_id: Option<String>,
        bbox: Option<BBox>,
        confidence: Option<f32>,
    },
    ContainerCapture { entity_id: String },
    NewLog(LogRecord),
    /// Snapshot sent by the logs channel right after it opens
    InitialLogs(Vec<LogRecord>),
    Error { message: String },
}

impl DetectionEvent {
    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            DetectionEvent::VideoFrame { .. } => "video_frame",
            DetectionEvent::ProcessingStarted => "processing_started",
            DetectionEvent::ContainerDetect { .. } => "container_detect",
            DetectionEvent::ContainerCapture { .. } => "container_capture",
            DetectionEvent::NewLog(_) => "new_log",
            DetectionEvent::InitialLogs(_) => "initial_logs",
            DetectionEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_rejects_inverted_geometry() {
        assert!(BBox::new(10.0, 10.0, 20.0, 30.0).is_some());
        assert!(BBox::new(20.0, 10.0, 10.0, 30.0).is_none());
        assert!(BBox::new(10.0, 10.0, 20.0, 10.0).is_none());
        assert!(BBox::new(f32::NAN, 10.0, 20.0, 30.0).is_none());
    }

    #[test]
    fn test_log_record_accepts_naive_timestamp() {
        let json = r#"{
            "id": "7",
            "captured_at": "2024-05-01T08:30:00.250",
            "container_owner": "MSCU",
            "container_number": "1234567"
        }"#;
        let record: LogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.captured_at.to_rfc3339(), "2024-05-01T08:30:00.250+00:00");
        assert_eq!(record.source_video, None);
        assert_eq!(record.container_code(), "MSCU1234567");
    }

    #[test]
    fn test_log_record_converts_offset_to_utc() {
        let json = r#"{
            "id": "8",
            "captured_at": "2024-05-01T17:30:00+09:00",
            "container_owner": "HDMU",
            "container_number": "7654321",
            "source_video": "yard_cam_1700000000000.mp4"
        }"#;
        let record: LogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.captured_at.to_rfc3339(), "2024-05-01T08:30:00+00:00");
        assert_eq!(record.source_video.as_deref(), Some("yard_cam_1700000000000.mp4"));
    }
}
