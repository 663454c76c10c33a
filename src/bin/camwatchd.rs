//! camwatchd - camera capture daemon
//!
//! This daemon:
//! 1. Opens the configured capture source (device index, file, or stub)
//! 2. Runs detection over captured frames when enabled
//! 3. Writes frames to rotating recording segments on request
//! 4. Logs pipeline health every few seconds
//! 5. Stops the pipeline cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camwatch::config;
use camwatch::pipeline::{PipelineController, PipelineState};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a TOML or JSON config file. CAMWATCH_* environment
    /// variables override values from the file.
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Start recording as soon as frames flow.
    #[arg(long)]
    record: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = config::load_with_file(args.config.as_deref())?;
    log::info!(
        "camwatchd {} starting: source={} {}x{} @ {} fps, detection={}",
        env!("CARGO_PKG_VERSION"),
        config.source,
        config.width,
        config.height,
        config.fps,
        if config.detection.enabled { "on" } else { "off" },
    );

    let controller = PipelineController::start(config)?;
    if args.record {
        controller.start_recording();
    }

    let running = Arc::new(AtomicBool::new(true));
    let stop_signal = running.clone();
    ctrlc::set_handler(move || {
        stop_signal.store(false, Ordering::SeqCst);
    })?;

    let mut last_health_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));

        let status = controller.status();
        if status.state == PipelineState::Error {
            if let Some(report) = &status.last_error {
                log::error!("pipeline died: {report}");
            }
            break;
        }
        if last_health_log.elapsed() >= Duration::from_secs(5) {
            match &status.recording {
                Some(recording) => log::info!(
                    "health state={} frames={} segment={} ({} frames written, {} closed)",
                    status.state,
                    status.frames_published,
                    recording.path.display(),
                    recording.frames_written,
                    recording.segments_closed,
                ),
                None => log::info!(
                    "health state={} frames={}",
                    status.state,
                    status.frames_published
                ),
            }
            last_health_log = Instant::now();
        }
    }

    let final_status = controller.stop()?;
    log::info!(
        "camwatchd stopped after {} frames (state={})",
        final_status.frames_published,
        final_status.state
    );
    Ok(())
}
