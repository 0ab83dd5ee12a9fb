mod actuator;
mod board;
mod calibrate;
mod capture;
mod classifier;
mod command;
mod config;
mod error;
mod grid;
mod lifecycle;
mod listener;
mod pipeline;
mod queue;
mod recognition;
mod rules;
mod text_buffer;

use crate::actuator::RdevMouse;
use crate::board::Color;
use crate::calibrate::FixedGridLocator;
use crate::capture::XcapFrameSource;
use crate::classifier::{PieceClassifier, ReferenceCatalog};
use crate::config::Config;
use crate::grid::{CheckerPatternLocator, GridLocator};
use crate::listener::{ConsoleListener, Listener, ListenerFactory};
use crate::pipeline::{ControlHandle, Pipeline, StatusSink};
use crate::recognition::Recognizer;
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use crossbeam_channel::{Sender, unbounded};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Status lines for the user; logs go to stderr.
struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn notify(&mut self, message: &str) {
        println!("{message}");
    }
}

/// Reads stdin: `/pause`, `/resume` and `/stop` control the pipeline, any
/// other line is treated as speech. End of input stops the pipeline.
fn spawn_console(lines: Sender<String>, control: ControlHandle) -> Result<()> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "/pause" => control.pause(),
                    "/resume" => control.resume(),
                    "/stop" => control.stop(),
                    _ => {
                        if lines.send(line).is_err() {
                            break;
                        }
                    }
                }
            }
            control.stop();
        })
        .context("Failed to spawn console thread")?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse CLI arguments
    let matches = Command::new("handsfree-chess")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Play on-screen chess by voice")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Settings file, created with defaults if missing")
                .default_value("handsfree.json"),
        )
        .arg(
            Arg::new("color")
                .long("color")
                .value_name("COLOR")
                .help("Your piece color; asked for by voice when omitted")
                .value_parser(["white", "black"]),
        )
        .arg(
            Arg::new("monitor")
                .long("monitor")
                .value_name("INDEX")
                .help("Monitor showing the board")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            Arg::new("calibrate")
                .long("calibrate")
                .help("Detect the board once and save its position to the settings file")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("handsfree.json"));
    let monitor = matches.get_one::<usize>("monitor").copied().unwrap_or(0);
    let color = matches.get_one::<String>("color").map(|c| if c == "black" { Color::Black } else { Color::White });

    let mut config = Config::load_or_create(&config_path)?;
    let source = Arc::new(XcapFrameSource::new(monitor, config.scaled_height));

    if matches.get_flag("calibrate") {
        let bounds = calibrate::run_calibration(
            source.as_ref(),
            &CheckerPatternLocator::new(config.grid),
            &mut config,
            &config_path,
        )?;
        println!(
            "Board found at ({:.0}, {:.0}), {:.0}px wide. Saved to {}",
            bounds.x,
            bounds.y,
            bounds.size,
            config_path.display()
        );
        return Ok(());
    }

    let catalog = ReferenceCatalog::load(&config.assets_dir, config.reference_dim)
        .context("Failed to load reference piece images")?;
    info!(dir = %config.assets_dir.display(), "reference images loaded");

    let locator: Arc<dyn GridLocator> = match config.fixed_board {
        Some(bounds) => {
            info!(?bounds, "using calibrated board position");
            Arc::new(FixedGridLocator::new(bounds))
        }
        None => Arc::new(CheckerPatternLocator::new(config.grid)),
    };
    let recognizer = Recognizer::new(
        source,
        locator,
        Arc::new(PieceClassifier::new(Arc::new(catalog), config.classifier)),
        config.recognition_interval(),
        config.board_retry_delay(),
    );

    let (line_tx, line_rx) = unbounded::<String>();
    let listener_factory: ListenerFactory =
        Box::new(move || Ok(Box::new(ConsoleListener::new(line_rx.clone())) as Box<dyn Listener>));

    let mut pipeline = Pipeline::new(
        &config,
        color,
        recognizer,
        listener_factory,
        Box::new(RdevMouse::new(config.drag_pause())),
        Box::new(ConsoleStatus),
    );
    spawn_console(line_tx, pipeline.control_handle())?;

    println!("Hands-free chess starting. Type what you would say, e.g. \"knight to e4\".");
    println!("Console controls: /pause, /resume, /stop.");
    pipeline.run()
}
