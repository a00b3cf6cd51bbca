//! Wire envelope decoding
//!
//! Every channel message is a single JSON object tagged by `type`. The video
//! channel wraps pipeline signals in `{"type":"event","event_type":..,"data":..}`
//! while the logs channel sends `initial_logs` and `new_log` at top level.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::{BBox, BoundingBox, BoxMap, DetectionEvent, LogRecord};

/// Reason a single message was dropped
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("frame is not valid base64: {0}")]
    Frame(#[from] base64::DecodeError),

    #[error("unknown event type {0:?}")]
    UnknownEventType(String),

    #[error("invalid data for {event_type}: {source}")]
    EventData {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    VideoFrame {
        frame: String,
        #[serde(default)]
        containers: HashMap<String, WireBox>,
    },
    Event {
        event_type: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    InitialLogs {
        data: Vec<LogRecord>,
    },
    NewLog {
        data: LogRecord,
    },
}

#[derive(Debug, Deserialize)]
struct WireBox {
    bbox: [f32; 4],
    #[serde(default)]
    captured: bool,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Default, Deserialize)]
struct DetectData {
    #[serde(default, alias = "container_id", deserialize_with = "opt_id")]
    entity_id: Option<String>,
    #[serde(default)]
    bbox: Option<[f32; 4]>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CaptureData {
    #[serde(alias = "container_id", deserialize_with = "id")]
    entity_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
}

/// Tracker ids come from the backend as either strings or integers
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

/// Decode one raw channel message into a [`DetectionEvent`]
pub fn decode_message(raw: &[u8]) -> Result<DetectionEvent, DecodeError> {
    let message: WireMessage = serde_json::from_slice(raw)?;

    match message {
        WireMessage::VideoFrame { frame, containers } => {
            let image = base64::engine::general_purpose::STANDARD.decode(frame.trim())?;
            Ok(DetectionEvent::VideoFrame {
                image,
                boxes: collect_boxes(containers),
            })
        }
        WireMessage::Event { event_type, data } => decode_event(event_type, data),
        WireMessage::InitialLogs { data } => Ok(DetectionEvent::InitialLogs(data)),
        WireMessage::NewLog { data } => Ok(DetectionEvent::NewLog(data)),
    }
}

fn decode_event(event_type: String, data: serde_json::Value) -> Result<DetectionEvent, DecodeError> {
    match event_type.as_str() {
        "processing_started" => Ok(DetectionEvent::ProcessingStarted),
        "container_detect" => {
            let detect: DetectData = event_data(&event_type, data)?;
            Ok(DetectionEvent::ContainerDetect {
                entity_id: detect.entity_id,
                bbox: detect.bbox.and_then(|[x1, y1, x2, y2]| BBox::new(x1, y1, x2, y2)),
                confidence: detect.confidence.map(clamp_confidence),
            })
        }
        "container_capture" => {
            let capture: CaptureData = serde_json::from_value(data).map_err(|source| {
                DecodeError::EventData {
                    event_type: event_type.clone(),
                    source,
                }
            })?;
            Ok(DetectionEvent::ContainerCapture {
                entity_id: capture.entity_id,
            })
        }
        "new_log" => {
            let record: LogRecord = serde_json::from_value(data).map_err(|source| {
                DecodeError::EventData {
                    event_type: event_type.clone(),
                    source,
                }
            })?;
            Ok(DetectionEvent::NewLog(record))
        }
        "error" => {
            let error: ErrorData = event_data(&event_type, data)?;
            let message = error
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Unknown error".to_string());
            Ok(DetectionEvent::Error { message })
        }
        _ => Err(DecodeError::UnknownEventType(event_type)),
    }
}

/// Optional payloads tolerate a missing or null `data` field
fn event_data<T>(event_type: &str, data: serde_json::Value) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Default,
{
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(|source| DecodeError::EventData {
        event_type: event_type.to_string(),
        source,
    })
}

fn collect_boxes(containers: HashMap<String, WireBox>) -> BoxMap {
    containers
        .into_iter()
        .filter_map(|(entity_id, wire)| {
            let [x1, y1, x2, y2] = wire.bbox;
            match BBox::new(x1, y1, x2, y2) {
                Some(bbox) => Some((
                    entity_id.clone(),
                    BoundingBox {
                        entity_id,
                        bbox,
                        captured: wire.captured,
                        confidence: clamp_confidence(wire.confidence),
                    },
                )),
                None => {
                    debug!("Dropping box {} with invalid geometry {:?}", entity_id, wire.bbox);
                    None
                }
            }
        })
        .collect()
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Result<DetectionEvent, DecodeError> {
        decode_message(json.as_bytes())
    }

    #[test]
    fn test_video_frame_decodes_boxes_and_image() {
        let frame = base64::engine::general_purpose::STANDARD.encode([0xFF, 0xD8, 0xFF]);
        let json = format!(
            r#"{{"type":"video_frame","frame":"{}","containers":{{
                "3":{{"bbox":[10,20,110,220],"captured":true,"confidence":0.91}},
                "4":{{"bbox":[50,20,40,220],"captured":false,"confidence":0.5}},
                "5":{{"bbox":[0,0,5,5],"confidence":1.7}}
            }}}}"#,
            frame
        );

        let DetectionEvent::VideoFrame { image, boxes } = decode(&json).unwrap() else {
            panic!("expected video frame");
        };
        assert_eq!(image, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(boxes.len(), 2, "inverted box is dropped");
        assert!(boxes["3"].captured);
        assert_eq!(boxes["3"].bbox, BBox::new(10.0, 20.0, 110.0, 220.0).unwrap());
        assert_eq!(boxes["5"].confidence, 1.0);
        assert!(!boxes["5"].captured);
    }

    #[test]
    fn test_bad_base64_fails_whole_message() {
        let err = decode(r#"{"type":"video_frame","frame":"@@@","containers":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Frame(_)));
    }

    #[test]
    fn test_pipeline_events() {
        assert_eq!(
            decode(r#"{"type":"event","event_type":"processing_started","data":{}}"#).unwrap(),
            DetectionEvent::ProcessingStarted
        );
        assert_eq!(
            decode(r#"{"type":"event","event_type":"container_capture","data":{"container_id":12}}"#)
                .unwrap(),
            DetectionEvent::ContainerCapture {
                entity_id: "12".to_string()
            }
        );

        let detect = decode(
            r#"{"type":"event","event_type":"container_detect","data":{"entity_id":"a","bbox":[1,2,3,4],"confidence":0.8}}"#,
        )
        .unwrap();
        assert_eq!(
            detect,
            DetectionEvent::ContainerDetect {
                entity_id: Some("a".to_string()),
                bbox: BBox::new(1.0, 2.0, 3.0, 4.0),
                confidence: Some(0.8),
            }
        );

        let bare = decode(r#"{"type":"event","event_type":"container_detect"}"#).unwrap();
        assert!(matches!(bare, DetectionEvent::ContainerDetect { entity_id: None, .. }));
    }

    #[test]
    fn test_error_event_message() {
        assert_eq!(
            decode(r#"{"type":"event","event_type":"error","data":{"message":"camera offline"}}"#)
                .unwrap(),
            DetectionEvent::Error {
                message: "camera offline".to_string()
            }
        );
        assert_eq!(
            decode(r#"{"type":"event","event_type":"error","data":{}}"#).unwrap(),
            DetectionEvent::Error {
                message: "Unknown error".to_string()
            }
        );
    }

    #[test]
    fn test_log_messages_in_both_forms() {
        let record = r#"{"id":"1","captured_at":"2024-05-01T08:30:00Z","container_owner":"ABCD","container_number":"123456"}"#;

        let top_level = decode(&format!(r#"{{"type":"new_log","data":{}}}"#, record)).unwrap();
        let wrapped =
            decode(&format!(r#"{{"type":"event","event_type":"new_log","data":{}}}"#, record)).unwrap();
        assert_eq!(top_level, wrapped);

        let initial = decode(&format!(r#"{{"type":"initial_logs","data":[{},{}]}}"#, record, record)).unwrap();
        let DetectionEvent::InitialLogs(records) = initial else {
            panic!("expected initial logs");
        };
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_malformed_messages_are_errors() {
        assert!(matches!(decode("not json"), Err(DecodeError::Envelope(_))));
        assert!(matches!(decode(r#"{"type":"heartbeat"}"#), Err(DecodeError::Envelope(_))));
        assert!(matches!(
            decode(r#"{"type":"event","event_type":"zoom","data":{}}"#),
            Err(DecodeError::UnknownEventType(t)) if t == "zoom"
        ));
        assert!(matches!(
            decode(r#"{"type":"event","event_type":"container_capture","data":{}}"#),
            Err(DecodeError::EventData { .. })
        ));
    }
}
