//! Best-effort link between accepted uploads and the log records they produce
//!
//! The backend never echoes an upload id in its log events. The only hint is
//! `source_video`, a file name that usually matches the stored name the upload
//! endpoint handed back. A miss is normal and never an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;

use crate::data::LogRecord;

const MAX_TRACKED_UPLOADS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedUpload {
    pub video_id: String,
    pub original_name: String,
    pub accepted_at: DateTime<Utc>,
    pub logs_observed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationMatch {
    pub video_id: String,
    pub original_name: String,
    pub log_id: String,
    /// First log record seen for this upload, i.e. processing has visibly started
    pub first_observation: bool,
}

#[derive(Debug, Default)]
pub struct UploadCorrelator {
    recent: VecDeque<AcceptedUpload>,
}

impl UploadCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&mut self, video_id: String, original_name: String, accepted_at: DateTime<Utc>) {
        self.recent.retain(|u| u.video_id != video_id);
        self.recent.push_front(AcceptedUpload {
            video_id,
            original_name,
            accepted_at,
            logs_observed: 0,
        });
        self.recent.truncate(MAX_TRACKED_UPLOADS);
    }

    /// Most recent upload whose names match the record's `source_video`
    pub fn match_record(&mut self, record: &LogRecord) -> Option<CorrelationMatch> {
        let source = record.source_video.as_deref().map(base_name)?;
        if source.is_empty() {
            return None;
        }

        let upload = self.recent.iter_mut().find(|upload| names_match(upload, source))?;
        upload.logs_observed += 1;

        Some(CorrelationMatch {
            video_id: upload.video_id.clone(),
            original_name: upload.original_name.clone(),
            log_id: record.id.clone(),
            first_observation: upload.logs_observed == 1,
        })
    }
}

fn names_match(upload: &AcceptedUpload, source: &str) -> bool {
    let source_stem = stem(source);
    [upload.video_id.as_str(), upload.original_name.as_str()]
        .into_iter()
        .map(base_name)
        .any(|candidate| candidate == source || stem(candidate) == source || stem(candidate) == source_stem)
}

/// Last path component, accepting both separators since the backend may run on either platform
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn log(id: &str, source: Option<&str>) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            container_owner: "ABCD".to_string(),
            container_number: "123456".to_string(),
            source_video: source.map(str::to_string),
        }
    }

    fn accepted_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_matches_stored_name_and_full_path() {
        let mut correlator = UploadCorrelator::new();
        correlator.record_accepted("yard_1714550400000.mp4".into(), "yard.mp4".into(), accepted_at());

        let first = correlator
            .match_record(&log("1", Some("/srv/uploads/videos/yard_1714550400000.mp4")))
            .unwrap();
        assert_eq!(first.video_id, "yard_1714550400000.mp4");
        assert!(first.first_observation);

        let second = correlator.match_record(&log("2", Some("yard_1714550400000"))).unwrap();
        assert!(!second.first_observation);
    }

    #[test]
    fn test_matches_original_name() {
        let mut correlator = UploadCorrelator::new();
        correlator.record_accepted("stored-id".into(), "gate_cam.mov".into(), accepted_at());
        assert!(correlator.match_record(&log("1", Some("gate_cam.mp4"))).is_some());
    }

    #[test]
    fn test_no_correlation_is_tolerated() {
        let mut correlator = UploadCorrelator::new();
        correlator.record_accepted("yard_1.mp4".into(), "yard.mp4".into(), accepted_at());
        assert!(correlator.match_record(&log("1", Some("camera1"))).is_none());
        assert!(correlator.match_record(&log("2", None)).is_none());
        assert!(correlator.match_record(&log("3", Some(""))).is_none());
    }

    #[test]
    fn test_most_recent_upload_wins_ambiguous_names() {
        let mut correlator = UploadCorrelator::new();
        correlator.record_accepted("a.mp4".into(), "clip.mp4".into(), accepted_at());
        correlator.record_accepted("b.mp4".into(), "clip.mp4".into(), accepted_at());
        let matched = correlator.match_record(&log("1", Some("clip.mp4"))).unwrap();
        assert_eq!(matched.video_id, "b.mp4");
    }

    #[test]
    fn test_tracking_is_bounded() {
        let mut correlator = UploadCorrelator::new();
        for i in 0..40 {
            correlator.record_accepted(format!("{}.mp4", i), format!("{}.mp4", i), accepted_at());
        }
        assert_eq!(correlator.recent.len(), MAX_TRACKED_UPLOADS);
        assert!(correlator.match_record(&log("x", Some("0.mp4"))).is_none());
        assert!(correlator.match_record(&log("y", Some("39.mp4"))).is_some());
    }
}
