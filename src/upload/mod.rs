//! Video upload: transfer state machine, endpoint client, and log correlation

mod client;
mod correlate;
mod job;

pub use client::{UploadAccepted, UploadClient, UploadError, UploadedVideo};
pub use correlate::{CorrelationMatch, UploadCorrelator};
pub use job::{FileInfo, UploadJob, UploadState, UploadView, ValidationError};
