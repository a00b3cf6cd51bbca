//! Single file transfer state machine
//!
//! `Succeeded` means the backend accepted the file for background processing.
//! Whether processing finished is only observable later, through the log feed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::client::{UploadAccepted, UploadError};

/// Largest file the endpoint accepts
pub const MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: [&str; 5] = [
    "video/mp4",
    "video/avi",
    "video/x-msvideo",
    "video/quicktime",
    "video/x-matroska",
];

/// A file picked for upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime: String,
}

impl FileInfo {
    /// Read name and size from disk; MIME comes from the extension
    pub async fn from_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to read file metadata: {:?}", path))?;
        if !metadata.is_file() {
            anyhow::bail!("{:?} is not a regular file", path);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            mime: mime_for_path(path).unwrap_or("application/octet-stream").to_string(),
        })
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" => Some("video/mp4"),
        "avi" => Some("video/x-msvideo"),
        "mov" => Some("video/quicktime"),
        "mkv" => Some("video/x-matroska"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsupported file type. Only MP4, AVI, MOV and MKV files can be uploaded.")]
    UnsupportedType(String),

    #[error("File is too large. The maximum upload size is 500 MB.")]
    TooLarge(u64),

    #[error("An upload is already in progress.")]
    Busy,
}

pub fn validate(file: &FileInfo) -> Result<(), ValidationError> {
    if !ALLOWED_MIME_TYPES.contains(&file.mime.as_str()) {
        return Err(ValidationError::UnsupportedType(file.mime.clone()));
    }
    if file.size > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge(file.size));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    Validated,
    Uploading,
    Succeeded,
    Failed,
}

/// Read-only copy of the job for the dashboard snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadView {
    pub state: UploadState,
    pub file: Option<FileInfo>,
    pub progress: u8,
    pub server_assigned_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct UploadJob {
    state: UploadState,
    file: Option<FileInfo>,
    progress: u8,
    server_assigned_id: Option<String>,
    error: Option<String>,
    /// Bumped whenever a transfer is started or discarded; stale reports carry an old value
    generation: u64,
}

impl Default for UploadJob {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadJob {
    pub fn new() -> Self {
        Self {
            state: UploadState::Idle,
            file: None,
            progress: 0,
            server_assigned_id: None,
            error: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn file(&self) -> Option<&FileInfo> {
        self.file.as_ref()
    }

    /// Pick a new file. Rejected while a transfer runs; a failed check leaves the job idle with the reason.
    pub fn select(&mut self, file: FileInfo) -> Result<(), ValidationError> {
        if self.state == UploadState::Uploading {
            return Err(ValidationError::Busy);
        }

        self.reset();
        match validate(&file) {
            Ok(()) => {
                self.file = Some(file);
                self.state = UploadState::Validated;
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Record a selection that could not even be inspected (missing file, unreadable metadata)
    pub fn reject_selection(&mut self, reason: String) -> bool {
        if self.state == UploadState::Uploading {
            return false;
        }
        self.reset();
        self.error = Some(reason);
        true
    }

    /// Move a validated job to `Uploading`. Returns the generation the transfer must report with.
    pub fn start(&mut self) -> Option<(u64, FileInfo)> {
        if self.state != UploadState::Validated {
            return None;
        }
        let file = self.file.clone()?;
        self.generation += 1;
        self.state = UploadState::Uploading;
        self.progress = 0;
        Some((self.generation, file))
    }

    /// Apply a transport progress report. Progress never goes backwards.
    pub fn record_progress(&mut self, generation: u64, percent: u8) -> bool {
        if generation != self.generation || self.state != UploadState::Uploading {
            return false;
        }
        let percent = percent.min(100);
        if percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    /// Apply the transfer outcome. Results of a discarded transfer are ignored.
    pub fn finish(&mut self, generation: u64, outcome: &Result<UploadAccepted, UploadError>) -> bool {
        if generation != self.generation || self.state != UploadState::Uploading {
            return false;
        }
        match outcome {
            Ok(accepted) => {
                self.state = UploadState::Succeeded;
                self.progress = 100;
                self.server_assigned_id = Some(accepted.video_id.clone());
            }
            Err(e) => {
                self.state = UploadState::Failed;
                self.error = Some(e.to_string());
            }
        }
        true
    }

    /// Discard the current job, whatever its state. Late reports of the old transfer are ignored.
    pub fn abort(&mut self) -> bool {
        let was_uploading = self.state == UploadState::Uploading;
        self.generation += 1;
        self.reset();
        was_uploading
    }

    /// Caller has seen the terminal state; drop the job
    pub fn acknowledge(&mut self) {
        if matches!(self.state, UploadState::Succeeded | UploadState::Failed) {
            self.reset();
        }
    }

    pub fn view(&self) -> UploadView {
        UploadView {
            state: self.state,
            file: self.file.clone(),
            progress: self.progress,
            server_assigned_id: self.server_assigned_id.clone(),
            error: self.error.clone(),
        }
    }

    fn reset(&mut self) {
        self.state = UploadState::Idle;
        self.file = None;
        self.progress = 0;
        self.server_assigned_id = None;
        self.error = None;
    }
}
