//! System-wide status indicator
//!
//! Mirrors the backend's per-container pipeline (detect, capture, recognize,
//! log) as one global value. Transitions are a pure table; the only timer is
//! the auto-revert out of `Logged`, kept as a deadline the engine sleeps on.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// How long `Logged` stays up before dropping back to `Processing`
pub const LOGGED_REVERT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Connecting,
    Idle,
    Processing,
    ContainerDetected,
    Recognizing,
    Logged,
    Error,
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemStatus::Connecting => "connecting",
            SystemStatus::Idle => "idle",
            SystemStatus::Processing => "processing",
            SystemStatus::ContainerDetected => "container_detected",
            SystemStatus::Recognizing => "recognizing",
            SystemStatus::Logged => "logged",
            SystemStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Inputs to the status machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTrigger {
    ChannelOpened,
    ChannelClosed,
    ProcessingStarted,
    ContainerDetect,
    ContainerCapture,
    NewLog,
    Error(String),
    /// The `Logged` revert deadline passed
    RevertElapsed,
}

/// Pure transition table. `None` means the pair is not listed and the state holds.
pub fn transition(current: SystemStatus, trigger: &StatusTrigger) -> Option<SystemStatus> {
    use StatusTrigger as T;
    use SystemStatus as S;

    match (current, trigger) {
        (_, T::Error(_)) => Some(S::Error),
        (_, T::ChannelClosed) => Some(S::Connecting),
        (S::Connecting | S::Error, T::ChannelOpened) => Some(S::Idle),
        (S::Idle, T::ProcessingStarted | T::ContainerDetect) => Some(S::Processing),
        (S::Processing, T::ContainerDetect) => Some(S::ContainerDetected),
        (S::ContainerDetected, T::ContainerCapture) => Some(S::Recognizing),
        (S::Recognizing, T::NewLog) => Some(S::Logged),
        (S::Logged, T::RevertElapsed) => Some(S::Processing),
        _ => None,
    }
}

fn message_for(status: SystemStatus, trigger: &StatusTrigger) -> String {
    match (status, trigger) {
        (SystemStatus::Error, StatusTrigger::Error(message)) => format!("Error: {}", message),
        (SystemStatus::Connecting, StatusTrigger::ChannelClosed) => {
            "Connection lost. Reconnecting...".to_string()
        }
        (SystemStatus::Connecting, _) => "Connecting to server...".to_string(),
        (SystemStatus::Idle, _) => "Waiting".to_string(),
        (SystemStatus::Processing, _) => "Processing video".to_string(),
        (SystemStatus::ContainerDetected, _) => "Container detected".to_string(),
        (SystemStatus::Recognizing, _) => "Recognizing container number".to_string(),
        (SystemStatus::Logged, _) => "Log recorded".to_string(),
        (SystemStatus::Error, _) => "Error: Unknown error".to_string(),
    }
}

#[derive(Debug)]
pub struct StatusMachine {
    status: SystemStatus,
    message: String,
    revert_at: Option<Instant>,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            status: SystemStatus::Connecting,
            message: "Connecting to server...".to_string(),
            revert_at: None,
        }
    }

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Feed one trigger. Returns true when the status or its message changed.
    pub fn apply(&mut self, trigger: StatusTrigger, now: Instant) -> bool {
        let Some(next) = transition(self.status, &trigger) else {
            return false;
        };

        let message = message_for(next, &trigger);
        let changed = next != self.status || message != self.message;

        // re-entering Logged is impossible by the table, so any transition cancels the revert
        self.revert_at = (next == SystemStatus::Logged).then(|| now + LOGGED_REVERT_DELAY);
        self.status = next;
        self.message = message;
        changed
    }

    /// Fire the revert timer if its deadline passed
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.revert_at {
            Some(deadline) if deadline <= now => self.apply(StatusTrigger::RevertElapsed, now),
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.revert_at
    }
}
