//! Event channel transport: websocket connection manager and reconnect policy

mod backoff;
mod connection;

pub use backoff::Backoff;
pub use connection::{ChannelEvent, ChannelHandle, ChannelKind, ChannelMessage, ConnectionState};
