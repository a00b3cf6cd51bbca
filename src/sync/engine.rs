//! Dashboard engine
//!
//! Owns every store and is the only place they are mutated. Both event
//! channels feed one sink, so messages are applied strictly in arrival order.
//! Timers (status revert, highlight expiry) are deadlines kept by the stores;
//! the loop sleeps until the earliest one instead of spawning timer tasks.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::data::DetectionEvent;
use crate::store::{LogFeed, OverlayStore, StatusMachine, StatusTrigger};
use crate::transport::{
    Backoff, ChannelEvent, ChannelHandle, ChannelKind, ChannelMessage, ConnectionState,
};
use crate::upload::{
    CorrelationMatch, FileInfo, UploadAccepted, UploadClient, UploadCorrelator, UploadError,
    UploadJob, UploadedVideo, ValidationError,
};

use super::{DashboardSnapshot, EngineCommand};

/// Reports from background upload tasks
#[derive(Debug)]
enum UploadUpdate {
    Progress {
        generation: u64,
        percent: u8,
    },
    Finished {
        generation: u64,
        result: Result<UploadAccepted, UploadError>,
    },
    Listing(Result<Vec<UploadedVideo>, String>),
}

/// The dashboard engine applies channel events and commands to the stores
pub struct DashboardEngine {
    /// Configuration
    config: Config,
    /// Command receiver
    cmd_rx: mpsc::Receiver<EngineCommand>,
    /// Snapshot publisher
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    overlay: OverlayStore,
    status: StatusMachine,
    feed: LogFeed,
    /// Requested feed page (1-based, clamped when rendered)
    page: usize,
    job: UploadJob,
    correlator: UploadCorrelator,
    last_correlation: Option<CorrelationMatch>,
    uploaded_videos: Vec<UploadedVideo>,
    upload_client: UploadClient,
    /// Transfer in flight, aborted when the job is discarded
    upload_task: Option<JoinHandle<()>>,
    video: Option<ChannelHandle>,
    logs: Option<ChannelHandle>,
    /// Shared sink for both channels
    channel_tx: mpsc::UnboundedSender<ChannelMessage>,
    channel_rx: Option<mpsc::UnboundedReceiver<ChannelMessage>>,
    upload_tx: mpsc::UnboundedSender<UploadUpdate>,
    upload_rx: Option<mpsc::UnboundedReceiver<UploadUpdate>>,
}

impl DashboardEngine {
    /// Create a new dashboard engine
    pub fn new(
        config: Config,
        cmd_rx: mpsc::Receiver<EngineCommand>,
        snapshot_tx: watch::Sender<DashboardSnapshot>,
    ) -> Result<Self> {
        let upload_client = UploadClient::new(&config)?;
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            cmd_rx,
            snapshot_tx,
            overlay: OverlayStore::new(),
            status: StatusMachine::new(),
            feed: LogFeed::new(),
            page: 1,
            job: UploadJob::new(),
            correlator: UploadCorrelator::new(),
            last_correlation: None,
            uploaded_videos: Vec::new(),
            upload_client,
            upload_task: None,
            video: None,
            logs: None,
            channel_tx,
            channel_rx: Some(channel_rx),
            upload_tx,
            upload_rx: Some(upload_rx),
        })
    }

    /// Run the engine main loop
    pub async fn run(&mut self) -> Result<()> {
        let (Some(mut channel_rx), Some(mut upload_rx)) = (self.channel_rx.take(), self.upload_rx.take())
        else {
            anyhow::bail!("Dashboard engine can only run once");
        };

        info!(
            "Dashboard engine starting (video: {}, logs: {})",
            self.config.connection.video_url, self.config.connection.logs_url
        );

        let backoff = Backoff::new(
            self.config.connection.reconnect_base(),
            self.config.connection.reconnect_max(),
        );
        self.video = Some(ChannelHandle::open(
            ChannelKind::Video,
            self.config.connection.video_url.clone(),
            backoff,
            self.channel_tx.clone(),
        ));
        self.logs = Some(ChannelHandle::open(
            ChannelKind::Logs,
            self.config.connection.logs_url.clone(),
            backoff,
            self.channel_tx.clone(),
        ));
        self.publish();

        loop {
            let next_deadline = self.next_deadline();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Shutdown) | None => {
                            info!("Shutdown command received");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }

                Some(message) = channel_rx.recv() => {
                    self.handle_channel_message(message, Instant::now());
                }

                Some(update) = upload_rx.recv() => {
                    self.handle_upload_update(update);
                }

                _ = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.handle_timers(Instant::now());
                }
            }

            self.publish();
        }

        if let Some(task) = self.upload_task.take() {
            task.abort();
        }
        if let Some(video) = self.video.take() {
            video.close().await;
        }
        if let Some(logs) = self.logs.take() {
            logs.close().await;
        }
        self.publish();

        info!("Dashboard engine stopped");
        Ok(())
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::SelectFile(path) => self.select_file(path).await,
            EngineCommand::StartUpload => self.start_upload(),
            EngineCommand::AbortUpload => {
                if let Some(task) = self.upload_task.take() {
                    task.abort();
                }
                if self.job.abort() {
                    info!("Upload aborted");
                }
            }
            EngineCommand::AcknowledgeUpload => self.job.acknowledge(),
            EngineCommand::ShowPage(page) => {
                self.page = page.max(1);
            }
            EngineCommand::RefreshUploads => self.spawn_listing(),
            EngineCommand::RenderFrame(reply) => {
                let _ = reply.send(self.overlay.render());
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn handle_channel_message(&mut self, message: ChannelMessage, now: Instant) {
        let channel = message.channel;
        match message.event {
            ChannelEvent::Opened { session_id } => {
                debug!("{} channel session {} started", channel, session_id);
                if channel == ChannelKind::Video {
                    self.status.apply(StatusTrigger::ChannelOpened, now);
                }
            }
            ChannelEvent::Closed { reason } => {
                debug!("{} channel closed: {}", channel, reason);
                if channel == ChannelKind::Video {
                    self.status.apply(StatusTrigger::ChannelClosed, now);
                }
            }
            ChannelEvent::Message(event) => self.apply_event(channel, event, now),
        }
    }

    fn apply_event(&mut self, channel: ChannelKind, event: DetectionEvent, now: Instant) {
        let pipeline = channel == ChannelKind::Video;
        trace!("{} event on {} channel", event.kind(), channel);

        match event {
            DetectionEvent::VideoFrame { image, boxes } => {
                self.overlay.apply_frame(image, boxes);
            }
            DetectionEvent::ProcessingStarted => {
                if pipeline {
                    self.status.apply(StatusTrigger::ProcessingStarted, now);
                }
            }
            DetectionEvent::ContainerDetect {
                entity_id,
                bbox,
                confidence,
            } => {
                debug!(
                    "Container detected: {:?} size {:?} confidence {:?}",
                    entity_id,
                    bbox.map(|b| (b.width(), b.height())),
                    confidence
                );
                if pipeline {
                    self.status.apply(StatusTrigger::ContainerDetect, now);
                }
            }
            DetectionEvent::ContainerCapture { entity_id } => {
                if !self.overlay.mark_captured(&entity_id) {
                    debug!("Capture for untracked container {}", entity_id);
                }
                if pipeline {
                    self.status.apply(StatusTrigger::ContainerCapture, now);
                }
            }
            DetectionEvent::NewLog(record) => {
                if pipeline {
                    self.status.apply(StatusTrigger::NewLog, now);
                }
                if !self.feed.append(record.clone(), now) {
                    debug!("Log {} already in feed", record.id);
                    return;
                }
                info!("Container {} logged ({})", record.container_code(), record.id);
                // only records new to the feed count towards an upload
                if let Some(matched) = self.correlator.match_record(&record) {
                    info!(
                        "Log {} comes from upload {} ({})",
                        matched.log_id, matched.video_id, matched.original_name
                    );
                    self.last_correlation = Some(matched);
                }
            }
            DetectionEvent::InitialLogs(records) => {
                self.feed.seed_initial(records);
                if self.feed.is_empty() {
                    info!("No logs recorded yet");
                } else {
                    info!("Loaded {} logs from {} channel", self.feed.len(), channel);
                }
            }
            DetectionEvent::Error { message } => {
                error!("Backend reported error on {} channel: {}", channel, message);
                self.status.apply(StatusTrigger::Error(message), now);
            }
        }
    }

    fn handle_upload_update(&mut self, update: UploadUpdate) {
        match update {
            UploadUpdate::Progress { generation, percent } => {
                self.job.record_progress(generation, percent);
            }
            UploadUpdate::Finished { generation, result } => {
                if !self.job.finish(generation, &result) {
                    debug!("Ignoring result of discarded upload {}", generation);
                    return;
                }
                self.upload_task = None;
                match result {
                    Ok(accepted) => {
                        let name = self.job.file().map(|f| f.name.clone()).unwrap_or_default();
                        info!("Upload of {} accepted as {}", name, accepted.video_id);
                        self.correlator
                            .record_accepted(accepted.video_id, name, Utc::now());
                        self.spawn_listing();
                    }
                    Err(UploadError::Rejected { status, message }) => {
                        error!("Upload rejected with status {}: {}", status, message)
                    }
                    Err(e) => error!("Upload failed: {}", e),
                }
            }
            UploadUpdate::Listing(Ok(videos)) => {
                debug!("Upload listing has {} videos", videos.len());
                self.uploaded_videos = videos;
            }
            UploadUpdate::Listing(Err(e)) => {
                warn!("Failed to list uploads: {}", e);
            }
        }
    }

    fn handle_timers(&mut self, now: Instant) {
        if self.status.tick(now) {
            debug!("Status reverted to {}", self.status.status());
        }
        let expired = self.feed.expire_highlights(now);
        if !expired.is_empty() {
            debug!("Highlight expired for {:?}", expired);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.status.next_deadline(), self.feed.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    async fn select_file(&mut self, path: PathBuf) {
        let file = match FileInfo::from_path(&path).await {
            Ok(file) => file,
            Err(e) => {
                if self.job.reject_selection(format!("{:#}", e)) {
                    warn!("Cannot use {:?}: {:#}", path, e);
                } else {
                    warn!("Ignoring selection of {:?} while an upload is running", path);
                }
                return;
            }
        };

        match self.job.select(file) {
            Ok(()) => info!("Selected {:?} for upload", path),
            Err(ValidationError::UnsupportedType(mime)) => {
                warn!("Rejected {:?}: unsupported type {}", path, mime)
            }
            Err(ValidationError::TooLarge(size)) => {
                warn!("Rejected {:?}: {} bytes is over the limit", path, size)
            }
            Err(ValidationError::Busy) => {
                warn!("Ignoring selection of {:?} while an upload is running", path)
            }
        }
    }

    fn start_upload(&mut self) {
        let Some((generation, file)) = self.job.start() else {
            warn!("No validated file to upload (upload is {:?})", self.job.state());
            return;
        };

        let client = self.upload_client.clone();
        let upload_tx = self.upload_tx.clone();
        self.upload_task = Some(tokio::spawn(async move {
            let progress_tx = upload_tx.clone();
            let result = client
                .upload(&file, move |percent| {
                    let _ = progress_tx.send(UploadUpdate::Progress { generation, percent });
                })
                .await;
            let _ = upload_tx.send(UploadUpdate::Finished { generation, result });
        }));
    }

    fn spawn_listing(&self) {
        let client = self.upload_client.clone();
        let upload_tx = self.upload_tx.clone();
        tokio::spawn(async move {
            let listing = client.list_videos().await.map_err(|e| format!("{:#}", e));
            let _ = upload_tx.send(UploadUpdate::Listing(listing));
        });
    }

    fn snapshot(&self) -> DashboardSnapshot {
        let state_of = |handle: &Option<ChannelHandle>| {
            handle
                .as_ref()
                .map(ChannelHandle::state)
                .unwrap_or(ConnectionState::Closed)
        };

        DashboardSnapshot {
            status: self.status.status(),
            status_message: self.status.message().to_string(),
            video_channel: state_of(&self.video),
            logs_channel: state_of(&self.logs),
            boxes: self.overlay.boxes().values().cloned().collect(),
            frames_seen: self.overlay.frames_seen(),
            feed: self.feed.page(self.config.feed.page_size, self.page),
            upload: self.job.view(),
            uploaded_videos: self.uploaded_videos.clone(),
            last_correlation: self.last_correlation.clone(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Create command and snapshot channels for the engine
pub fn create_engine_channels() -> (
    mpsc::Sender<EngineCommand>,
    mpsc::Receiver<EngineCommand>,
    watch::Sender<DashboardSnapshot>,
    watch::Receiver<DashboardSnapshot>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (snapshot_tx, snapshot_rx) = watch::channel(DashboardSnapshot::default());
    (cmd_tx, cmd_rx, snapshot_tx, snapshot_rx)
}
