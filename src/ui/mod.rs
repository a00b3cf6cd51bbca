//! Presenters for dashboard snapshots and the stdin command line

mod console;
mod prompt;

pub use console::run_console;
pub use prompt::{spawn_command_reader, COMMAND_HELP};
