//! Line-oriented console presenter
//!
//! Consumes dashboard snapshots and prints only what changed between two of them.

use chrono::Local;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::data::LogRecord;
use crate::sync::DashboardSnapshot;
use crate::upload::UploadState;

/// Print snapshot changes until the engine drops its sender
pub async fn run_console(snapshot_rx: watch::Receiver<DashboardSnapshot>) {
    let mut snapshots = WatchStream::new(snapshot_rx);
    let mut previous = DashboardSnapshot::default();

    while let Some(snapshot) = snapshots.next().await {
        for line in describe_changes(&previous, &snapshot) {
            println!("{}", line);
        }
        previous = snapshot;
    }
}

pub fn format_record(record: &LogRecord) -> String {
    format!(
        "{}  {}",
        record.captured_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        record.container_code()
    )
}

/// Human-readable lines for everything that differs between two snapshots
pub fn describe_changes(prev: &DashboardSnapshot, next: &DashboardSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.video_channel != next.video_channel {
        lines.push(format!("[video] {:?}", next.video_channel));
    }
    if prev.logs_channel != next.logs_channel {
        lines.push(format!("[logs] {:?}", next.logs_channel));
    }

    if prev.status != next.status || prev.status_message != next.status_message {
        lines.push(format!("[status] {}", next.status_message));
    }

    for row in next.feed.rows.iter().filter(|row| row.highlighted) {
        let seen = prev
            .feed
            .rows
            .iter()
            .any(|old| old.highlighted && old.record.id == row.record.id);
        if !seen {
            lines.push(format!("[log] {}", format_record(&row.record)));
        }
    }

    if prev.feed.page != next.feed.page || prev.feed.total_pages != next.feed.total_pages {
        lines.push(format!(
            "[log] page {}/{} ({} records)",
            next.feed.page, next.feed.total_pages, next.feed.total_records
        ));
    }

    lines.extend(describe_upload(prev, next));

    if next.last_correlation != prev.last_correlation {
        if let Some(matched) = &next.last_correlation {
            let prefix = if matched.first_observation {
                "processing started for"
            } else {
                "more results for"
            };
            lines.push(format!(
                "[upload] {} {} (log {})",
                prefix, matched.original_name, matched.log_id
            ));
        }
    }

    if prev.uploaded_videos != next.uploaded_videos {
        lines.push(format!("[uploads] {} on server", next.uploaded_videos.len()));
        for video in &next.uploaded_videos {
            lines.push(format!(
                "  {}  {}  {:.1} MB",
                video.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                video.name,
                video.size as f64 / (1024.0 * 1024.0)
            ));
        }
    }

    lines
}

fn describe_upload(prev: &DashboardSnapshot, next: &DashboardSnapshot) -> Vec<String> {
    let (old, new) = (&prev.upload, &next.upload);
    let name = new
        .file
        .as_ref()
        .map(|f| f.name.as_str())
        .unwrap_or("file");
    let mut lines = Vec::new();

    match new.state {
        UploadState::Validated if old.state != UploadState::Validated => {
            lines.push(format!("[upload] {} ready", name));
        }
        UploadState::Uploading => {
            if old.state != UploadState::Uploading {
                lines.push(format!("[upload] sending {}", name));
            } else if new.progress / 10 > old.progress / 10 {
                lines.push(format!("[upload] {}%", new.progress / 10 * 10));
            }
        }
        UploadState::Succeeded if old.state != UploadState::Succeeded => {
            lines.push(format!(
                "[upload] {} accepted as {}",
                name,
                new.server_assigned_id.as_deref().unwrap_or("?")
            ));
        }
        UploadState::Failed if old.state != UploadState::Failed => {
            lines.push(format!(
                "[upload] failed: {}",
                new.error.as_deref().unwrap_or("unknown error")
            ));
        }
        UploadState::Idle => {
            if let Some(error) = new.error.as_deref().filter(|_| new.error != old.error) {
                lines.push(format!("[upload] {}", error));
            } else if old.state == UploadState::Uploading {
                lines.push("[upload] aborted".to_string());
            }
        }
        _ => {}
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::feed::FeedRow;
    use crate::store::SystemStatus;
    use crate::upload::FileInfo;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn record(id: &str) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            container_owner: "MSCU".to_string(),
            container_number: "1234567".to_string(),
            source_video: None,
        }
    }

    fn uploading(progress: u8) -> DashboardSnapshot {
        let mut snapshot = DashboardSnapshot::default();
        snapshot.upload.state = UploadState::Uploading;
        snapshot.upload.progress = progress;
        snapshot.upload.file = Some(FileInfo {
            path: PathBuf::from("yard.mp4"),
            name: "yard.mp4".to_string(),
            size: 100,
            mime: "video/mp4".to_string(),
        });
        snapshot
    }

    #[test]
    fn test_identical_snapshots_print_nothing() {
        let snapshot = DashboardSnapshot::default();
        assert!(describe_changes(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_status_and_new_rows() {
        let prev = DashboardSnapshot::default();
        let mut next = prev.clone();
        next.status = SystemStatus::Logged;
        next.status_message = "Log recorded".to_string();
        next.feed.total_records = 1;
        next.feed.rows = vec![FeedRow {
            record: record("1"),
            highlighted: true,
        }];

        let lines = describe_changes(&prev, &next);
        assert_eq!(lines[0], "[status] Log recorded");
        assert!(lines[1].starts_with("[log] "));
        assert!(lines[1].ends_with("MSCU1234567"));

        // the same highlighted row is not printed twice
        assert!(describe_changes(&next, &next.clone()).is_empty());
    }

    #[test]
    fn test_progress_in_ten_percent_steps() {
        assert_eq!(describe_changes(&uploading(12), &uploading(19)), Vec::<String>::new());
        assert_eq!(describe_changes(&uploading(19), &uploading(31)), vec!["[upload] 30%"]);
        assert_eq!(
            describe_changes(&DashboardSnapshot::default(), &uploading(0)),
            vec!["[upload] sending yard.mp4"]
        );
    }

    #[test]
    fn test_upload_outcomes() {
        let mut failed = uploading(40);
        failed.upload.state = UploadState::Failed;
        failed.upload.error = Some("A network error occurred.".to_string());
        assert_eq!(
            describe_changes(&uploading(40), &failed),
            vec!["[upload] failed: A network error occurred."]
        );

        let mut done = uploading(100);
        done.upload.state = UploadState::Succeeded;
        done.upload.server_assigned_id = Some("yard_1.mp4".to_string());
        assert_eq!(
            describe_changes(&uploading(90), &done),
            vec!["[upload] yard.mp4 accepted as yard_1.mp4"]
        );

        assert_eq!(
            describe_changes(&uploading(50), &DashboardSnapshot::default()),
            vec!["[upload] aborted"]
        );
    }
}
