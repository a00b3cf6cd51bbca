//! Upload endpoint client
//!
//! Streams the video from disk as one multipart request so large files never
//! sit in RAM, reporting progress as bytes are handed to the transport.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::job::FileInfo;
use crate::config::Config;

const GENERIC_UPLOAD_ERROR: &str = "An error occurred while uploading.";

/// The backend took the file and queued it for processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadAccepted {
    pub video_id: String,
    pub file_path: Option<String>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// Non-2xx, or a 2xx without a job id. Message comes from the body when it has one.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("A network error occurred.")]
    Network(#[source] reqwest::Error),

    #[error("Failed to read {name}: {source}")]
    File {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A previously accepted upload, as listed by the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedVideo {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedResponse {
    #[serde(default = "default_true")]
    success: bool,
    video_id: Option<String>,
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    videos: Vec<UploadedVideo>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct UploadClient {
    client: Client,
    endpoint: String,
}

impl UploadClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder();
        if config.upload.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.upload.request_timeout_secs));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.upload.endpoint.clone(),
        })
    }

    /// Send `file` as the multipart field `file`. `on_progress` sees strictly increasing percentages.
    pub async fn upload<F>(&self, file: &FileInfo, mut on_progress: F) -> Result<UploadAccepted, UploadError>
    where
        F: FnMut(u8) + Send + Sync + 'static,
    {
        info!(
            "Uploading {} ({:.2} MB) to {}",
            file.name,
            file.size as f64 / (1024.0 * 1024.0),
            self.endpoint
        );

        let handle = File::open(&file.path).await.map_err(|source| UploadError::File {
            name: file.name.clone(),
            source,
        })?;

        let total = file.size.max(1);
        let mut sent: u64 = 0;
        let mut last_percent: u8 = 0;
        let stream = ReaderStream::new(handle).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                let percent = ((sent as f64 / total as f64) * 100.0).round().min(100.0) as u8;
                if percent > last_percent {
                    last_percent = percent;
                    on_progress(percent);
                }
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), file.size)
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(UploadError::Network)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(UploadError::Network)?;
        debug!("Upload response {}: {}", status, body);

        parse_upload_response(status, &body)
    }

    /// Previously accepted uploads, most recent first
    pub async fn list_videos(&self) -> Result<Vec<UploadedVideo>> {
        let response: VideoListResponse = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .context("Failed to request upload listing")?
            .error_for_status()
            .context("Upload listing returned error status")?
            .json()
            .await
            .context("Failed to parse upload listing")?;

        let mut videos = response.videos;
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(videos)
    }
}

fn parse_upload_response(status: StatusCode, body: &str) -> Result<UploadAccepted, UploadError> {
    if status.is_success() {
        if let Ok(AcceptedResponse {
            success: true,
            video_id: Some(video_id),
            file_path,
        }) = serde_json::from_str::<AcceptedResponse>(body)
        {
            return Ok(UploadAccepted { video_id, file_path });
        }
    }

    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| GENERIC_UPLOAD_ERROR.to_string());

    Err(UploadError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{DefaultBodyLimit, Multipart};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_accepted_response() {
        let body = r#"{"success":true,"message":"ok","videoId":"yard_1700000000000.mp4","filePath":"/srv/uploads/videos/yard_1700000000000.mp4"}"#;
        let accepted = parse_upload_response(StatusCode::OK, body).unwrap();
        assert_eq!(accepted.video_id, "yard_1700000000000.mp4");
        assert_eq!(
            accepted.file_path.as_deref(),
            Some("/srv/uploads/videos/yard_1700000000000.mp4")
        );
    }

    #[test]
    fn test_parse_failures() {
        let err = parse_upload_response(StatusCode::BAD_REQUEST, r#"{"error":"Unsupported file type."}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type.");

        let err = parse_upload_response(StatusCode::INTERNAL_SERVER_ERROR, "<html>boom</html>").unwrap_err();
        assert_eq!(err.to_string(), GENERIC_UPLOAD_ERROR);

        // accepted status but no job id is still a failure
        let err = parse_upload_response(StatusCode::OK, r#"{"success":true}"#).unwrap_err();
        assert!(matches!(err, UploadError::Rejected { status: 200, .. }));

        let err = parse_upload_response(StatusCode::OK, r#"{"success":false,"videoId":"x"}"#).unwrap_err();
        assert!(matches!(err, UploadError::Rejected { .. }));
    }

    async fn accept_upload(mut multipart: Multipart) -> (HttpStatus, Json<serde_json::Value>) {
        while let Ok(Some(field)) = multipart.next_field().await {
            if field.name() == Some("file") {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.unwrap();
                return (
                    HttpStatus::OK,
                    Json(serde_json::json!({
                        "success": true,
                        "videoId": format!("{}:{}", name, bytes.len()),
                        "filePath": "/tmp/uploads"
                    })),
                );
            }
        }
        (
            HttpStatus::BAD_REQUEST,
            Json(serde_json::json!({ "error": "No file was provided." })),
        )
    }

    async fn list_uploads() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "videos": [
                {"id": "old.mp4", "name": "old.mp4", "size": 10, "createdAt": "2024-01-01T00:00:00Z"},
                {"id": "new.mp4", "name": "new.mp4", "size": 20, "createdAt": "2024-06-01T00:00:00Z"}
            ]
        }))
    }

    async fn spawn_endpoint() -> String {
        let app = Router::new()
            .route("/api/video", post(accept_upload).get(list_uploads))
            .layer(DefaultBodyLimit::disable());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/video", addr)
    }

    fn client_for(endpoint: String) -> UploadClient {
        let mut config = Config::default();
        config.upload.endpoint = endpoint;
        UploadClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_upload_reports_increasing_progress() {
        let client = client_for(spawn_endpoint().await);

        let mut video = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        video.write_all(&vec![7u8; 10 * 1024 * 1024]).unwrap();
        video.flush().unwrap();
        let file = FileInfo::from_path(video.path()).await.unwrap();
        assert_eq!(file.mime, "video/mp4");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let accepted = client
            .upload(&file, move |percent| sink.lock().unwrap().push(percent))
            .await
            .unwrap();

        assert_eq!(accepted.video_id, format!("{}:{}", file.name, 10 * 1024 * 1024));
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "progress must strictly increase");
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_network_failure_is_reported() {
        let client = client_for("http://127.0.0.1:1/api/video".to_string());
        let mut video = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        video.write_all(b"tiny").unwrap();
        let file = FileInfo::from_path(video.path()).await.unwrap();

        let err = client.upload(&file, |_| {}).await.unwrap_err();
        assert!(matches!(err, UploadError::Network(_)));
        assert_eq!(err.to_string(), "A network error occurred.");
    }

    #[tokio::test]
    async fn test_listing_is_sorted_most_recent_first() {
        let client = client_for(spawn_endpoint().await);
        let videos = client.list_videos().await.unwrap();
        let ids: Vec<_> = videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["new.mp4", "old.mp4"]);
    }
}
