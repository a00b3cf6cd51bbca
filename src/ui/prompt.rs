//! Line commands typed on stdin while the dashboard runs

use anyhow::{bail, Context, Result};
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sync::EngineCommand;

pub const COMMAND_HELP: &str =
    "page <n> | upload <file> | select <file> | start | abort | ack | uploads | quit";

#[derive(Debug)]
pub enum ConsoleInput {
    Engine(Vec<EngineCommand>),
    Quit,
}

/// Read commands from stdin on a dedicated thread and forward them to the engine
pub fn spawn_command_reader(
    cmd_tx: mpsc::Sender<EngineCommand>,
    stop_tx: mpsc::UnboundedSender<()>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("yardview-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleInput::Quit)) => {
                        let _ = stop_tx.send(());
                        break;
                    }
                    Ok(Some(ConsoleInput::Engine(commands))) => {
                        for command in commands {
                            if cmd_tx.blocking_send(command).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => println!("{:#}\n  commands: {}", e, COMMAND_HELP),
                }
            }
            debug!("Command reader stopped");
        })?;
    Ok(())
}

/// Parse one typed line. Blank lines yield nothing.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((line, ""));

    let commands = match word {
        "" => return Ok(None),
        "quit" | "q" | "exit" => return Ok(Some(ConsoleInput::Quit)),
        "page" | "p" => {
            let page = rest
                .parse::<usize>()
                .with_context(|| format!("Invalid page number {:?}", rest))?;
            vec![EngineCommand::ShowPage(page)]
        }
        "upload" => vec![
            EngineCommand::SelectFile(path_arg(word, rest)?),
            EngineCommand::StartUpload,
        ],
        "select" => vec![EngineCommand::SelectFile(path_arg(word, rest)?)],
        "start" => vec![EngineCommand::StartUpload],
        "abort" => vec![EngineCommand::AbortUpload],
        "ack" => vec![EngineCommand::AcknowledgeUpload],
        "uploads" => vec![EngineCommand::RefreshUploads],
        other => bail!("Unknown command {:?}", other),
    };

    Ok(Some(ConsoleInput::Engine(commands)))
}

fn path_arg(word: &str, rest: &str) -> Result<PathBuf> {
    if rest.is_empty() {
        bail!("{} requires a file path", word);
    }
    Ok(PathBuf::from(rest))
}
