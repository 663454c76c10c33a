//! playback - play a recording through the pipeline
//!
//! Decodes a local media file at its native rate, optionally running
//! detection over the frames and re-recording the annotated result, and
//! exits when the clip ends.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camwatch::config;
use camwatch::pipeline::{
    DetectionSettings, PipelineConfig, PipelineController, PipelineState, RecordingSettings,
};
use camwatch::record::OutputFormat;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Media file to play (.cwr natively; mp4/avi with decode-ffmpeg).
    file: String,
    /// Run detection over the played frames.
    #[arg(long)]
    detect: bool,
    /// Detection model selector.
    #[arg(long, default_value = "stub://detector")]
    model: String,
    /// Minimum confidence for a detection to be kept.
    #[arg(long, default_value_t = 0.25)]
    confidence: f32,
    /// Comma-separated class filter (e.g. "person,vehicle").
    #[arg(long)]
    classes: Option<String>,
    /// Run the detector on every n-th frame.
    #[arg(long, default_value_t = 1)]
    detect_every: u32,
    /// Jump to this frame index before playing.
    #[arg(long)]
    seek: Option<u64>,
    /// Re-record the played frames.
    #[arg(long)]
    record: bool,
    /// Directory for re-recorded segments.
    #[arg(long, default_value = "recordings")]
    output_dir: PathBuf,
    /// Segment format for re-recording (mp4|avi|cwr).
    #[arg(long, default_value = "mp4")]
    format: String,
    /// Wall seconds per re-recorded segment.
    #[arg(long, default_value_t = 600)]
    segment_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let class_filter = args
        .classes
        .as_deref()
        .map(config::parse_class_list)
        .transpose()?;
    let format = OutputFormat::parse(&args.format).map_err(|msg| anyhow!(msg))?;

    let pipeline_config = PipelineConfig {
        source: args.file.clone(),
        detection: DetectionSettings {
            enabled: args.detect,
            model: args.model,
            confidence_threshold: args.confidence,
            class_filter,
            detect_every: args.detect_every,
        },
        recording: RecordingSettings {
            output_dir: args.output_dir,
            format,
            segment_duration: Duration::from_secs(args.segment_secs),
        },
        ..PipelineConfig::default()
    };

    let controller = PipelineController::start(pipeline_config)?;
    if let Some(frame_index) = args.seek {
        controller.seek(frame_index);
    }
    if args.record {
        controller.start_recording();
    }

    let running = Arc::new(AtomicBool::new(true));
    let stop_signal = running.clone();
    ctrlc::set_handler(move || {
        stop_signal.store(false, Ordering::SeqCst);
    })?;

    let mut last_progress_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));

        let status = controller.status();
        if status.finished || status.state == PipelineState::Error {
            break;
        }
        if last_progress_log.elapsed() >= Duration::from_secs(2) {
            if let Some(position) = status.position {
                match position.total_frames {
                    Some(total) => log::info!(
                        "playing frame {}/{} ({} ms)",
                        position.frame_index,
                        total,
                        position.timestamp_ms
                    ),
                    None => log::info!(
                        "playing frame {} ({} ms)",
                        position.frame_index,
                        position.timestamp_ms
                    ),
                }
            }
            last_progress_log = Instant::now();
        }
    }

    let final_status = controller.stop()?;
    if let Some(report) = &final_status.last_error {
        log::warn!("playback ended with an error: {report}");
    }
    println!(
        "played {} frames from {}",
        final_status.frames_published, args.file
    );
    Ok(())
}
