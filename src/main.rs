//! yardview dashboard
//!
//! Mirrors the container detection backend's event channels into live
//! dashboard state and uploads videos for processing.

mod config;
mod data;
mod logging;
mod store;
mod sync;
mod transport;
mod ui;
mod upload;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use config::Config;
use sync::{create_engine_channels, DashboardEngine, EngineCommand};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    upload: Option<PathBuf>,
    list_uploads: bool,
    dump_frame: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let args = parse_args(&args)?;

    let _log_guard = logging::init_logging()?;
    info!("yardview starting...");

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Configuration loaded from {:?}", config.config_path());

    let runtime = Arc::new(tokio::runtime::Runtime::new()?);

    let (cmd_tx, cmd_rx, snapshot_tx, snapshot_rx) = create_engine_channels();
    let engine = DashboardEngine::new(config, cmd_rx, snapshot_tx)?;

    // Ctrl+C and engine exit both wake the main thread
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<()>();

    let engine_runtime = runtime.clone();
    let engine_stop_tx = stop_tx.clone();
    let engine_handle = std::thread::spawn(move || {
        engine_runtime.block_on(async move {
            let mut engine = engine;
            if let Err(e) = engine.run().await {
                error!("Dashboard engine error: {}", e);
            }
        });
        let _ = engine_stop_tx.send(());
    });

    runtime.spawn(ui::run_console(snapshot_rx));

    ui::spawn_command_reader(cmd_tx.clone(), stop_tx.clone())
        .context("Failed to start command reader")?;

    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let _ = stop_tx.send(());
    })?;

    runtime.block_on(async {
        if let Some(path) = &args.upload {
            let _ = cmd_tx.send(EngineCommand::SelectFile(path.clone())).await;
            let _ = cmd_tx.send(EngineCommand::StartUpload).await;
        }
        if args.list_uploads {
            let _ = cmd_tx.send(EngineCommand::RefreshUploads).await;
        }

        stop_rx.recv().await;

        if let Some(path) = &args.dump_frame {
            if let Err(e) = dump_frame(&cmd_tx, path).await {
                warn!("Failed to dump frame: {:#}", e);
            }
        }

        let _ = cmd_tx.send(EngineCommand::Shutdown).await;
    });

    // Wait for engine thread to finish
    let _ = engine_handle.join();

    info!("Shutdown complete");
    Ok(())
}

/// Ask the engine for the composited frame and write it as PNG
async fn dump_frame(cmd_tx: &mpsc::Sender<EngineCommand>, path: &Path) -> Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(EngineCommand::RenderFrame(reply_tx))
        .await
        .context("Engine is no longer running")?;
    let frame = reply_rx.await.context("Engine dropped the render request")??;

    frame
        .image
        .save(path)
        .with_context(|| format!("Failed to write {:?}", path))?;

    info!("Wrote frame to {:?} ({} boxes)", path, frame.labels.len());
    for label in &frame.labels {
        info!("  {} {} at ({:.0}, {:.0})", label.entity_id, label.text, label.x, label.y);
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .map(PathBuf::from)
                .with_context(|| format!("{} requires a path", flag))
        };

        match arg.as_str() {
            "--config" | "-c" => parsed.config = Some(value(arg)?),
            "--upload" | "-u" => parsed.upload = Some(value(arg)?),
            "--dump-frame" => parsed.dump_frame = Some(value(arg)?),
            "--list-uploads" => parsed.list_uploads = true,
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(parsed)
}

fn print_help() {
    println!("yardview - Live container detection dashboard");
    println!();
    println!("USAGE:");
    println!("    yardview [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help              Print this help message");
    println!("    -c, --config <PATH>     Load configuration from PATH");
    println!("    -u, --upload <FILE>     Upload a video for processing");
    println!("        --list-uploads      List videos already on the server");
    println!("        --dump-frame <PNG>  Save the last frame with its overlay on exit");
    println!();
    println!("COMMANDS (typed while running):");
    println!("    {}", ui::COMMAND_HELP);
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                    Set log level (e.g., debug, info, warn)");
    println!("    YARDVIEW_LOG_PATH           Override the log directory");
    println!("    YARDVIEW_VIDEO_SOCKET_URL   Override the video event channel URL");
    println!("    YARDVIEW_LOGS_SOCKET_URL    Override the log event channel URL");
    println!("    YARDVIEW_UPLOAD_ENDPOINT    Override the upload endpoint");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(&args(&[
            "--config",
            "yard.toml",
            "--upload",
            "clip.mp4",
            "--list-uploads",
        ]))
        .unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("yard.toml")));
        assert_eq!(parsed.upload, Some(PathBuf::from("clip.mp4")));
        assert!(parsed.list_uploads);
        assert_eq!(parsed.dump_frame, None);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["--upload"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
