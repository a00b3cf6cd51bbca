//! Dashboard engine - routes channel events into the stores and drives uploads

mod engine;

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::oneshot;

use crate::data::BoundingBox;
use crate::store::{FeedPage, RenderedFrame, SystemStatus};
use crate::transport::ConnectionState;
use crate::upload::{CorrelationMatch, UploadJob, UploadView, UploadedVideo};

pub use engine::{create_engine_channels, DashboardEngine};

/// Commands that can be sent to the dashboard engine
#[derive(Debug)]
pub enum EngineCommand {
    /// Pick a file for upload and validate it
    SelectFile(PathBuf),
    /// Start transferring the validated file
    StartUpload,
    /// Discard the current upload job, cancelling any transfer in flight
    AbortUpload,
    /// Clear a finished or failed job
    AcknowledgeUpload,
    /// Show the given 1-based feed page
    ShowPage(usize),
    /// Fetch the list of previously accepted uploads
    RefreshUploads,
    /// Render the current frame with its overlay
    RenderFrame(oneshot::Sender<Result<RenderedFrame>>),
    /// Shutdown the engine
    Shutdown,
}

/// Everything a presenter needs, published after every state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub status: SystemStatus,
    pub status_message: String,
    pub video_channel: ConnectionState,
    pub logs_channel: ConnectionState,
    pub boxes: Vec<BoundingBox>,
    pub frames_seen: u64,
    pub feed: FeedPage,
    pub upload: UploadView,
    pub uploaded_videos: Vec<UploadedVideo>,
    pub last_correlation: Option<CorrelationMatch>,
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self {
            status: SystemStatus::Connecting,
            status_message: "Connecting to server...".to_string(),
            video_channel: ConnectionState::Connecting,
            logs_channel: ConnectionState::Connecting,
            boxes: Vec::new(),
            frames_seen: 0,
            feed: FeedPage {
                page: 1,
                total_pages: 1,
                total_records: 0,
                rows: Vec::new(),
            },
            upload: UploadJob::new().view(),
            uploaded_videos: Vec::new(),
            last_correlation: None,
        }
    }
}
