//! Dashboard state stores
//!
//! One store per concern. Each is mutated only by the engine loop and exposes
//! its timers as deadlines, so nothing here touches I/O or spawns tasks.

pub mod feed;
pub mod overlay;
pub mod status;

pub use feed::{FeedPage, LogFeed};
pub use overlay::{OverlayStore, RenderedFrame};
pub use status::{StatusMachine, StatusTrigger, SystemStatus};
