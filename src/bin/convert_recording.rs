//! convert_recording - re-encode a recording into another container
//!
//! Reads every frame of a local recording and writes it back out in the
//! requested format as a single segment. Useful for turning native .cwr
//! captures into mp4/avi once the encode-ffmpeg feature is available, or
//! the other way around for tooling that wants raw frames.

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use camwatch::record::{OutputFormat, RecordingConfig, SegmentWriter};
use camwatch::source::{FrameSource, SourceSelector};

/// Long enough that a conversion never rotates mid-file.
const NO_ROTATION: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Recording to convert (.cwr natively; mp4/avi with decode-ffmpeg).
    input: String,
    /// Directory for the converted output.
    #[arg(long, default_value = "recordings")]
    output_dir: PathBuf,
    /// Output format (mp4|avi|cwr).
    #[arg(long, default_value = "mp4")]
    format: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let format = OutputFormat::parse(&args.format).map_err(|msg| anyhow!(msg))?;
    let selector = SourceSelector::parse(&args.input)?;
    if selector.is_live() {
        bail!("input must be a recording, not a capture device: {}", args.input);
    }

    let mut source = FrameSource::from_selector(&selector, 640, 480, 30)?;
    source.open()?;

    let first = match source.next_frame() {
        Ok(frame) => frame,
        Err(err) if err.is_end_of_stream() => {
            source.close();
            bail!("{} contains no frames", args.input);
        }
        Err(err) => {
            source.close();
            return Err(err.into());
        }
    };

    let mut writer = SegmentWriter::open(RecordingConfig {
        output_dir: args.output_dir,
        format,
        width: first.width,
        height: first.height,
        fps: source.fps(),
        segment_duration: NO_ROTATION,
    })?;
    log::info!(
        "converting {} ({}x{} @ {} fps) to {}",
        args.input,
        first.width,
        first.height,
        source.fps(),
        writer.handle().path.display()
    );

    writer.write(&first)?;
    loop {
        match source.next_frame() {
            Ok(frame) => writer.write(&frame)?,
            Err(err) if err.is_end_of_stream() => break,
            Err(err) => {
                source.close();
                return Err(err.into());
            }
        }
        let stats = source.stats();
        if stats.frames_captured % 100 == 0 {
            log::info!("converted {} frames from {}", stats.frames_captured, stats.describe);
        }
    }
    source.close();

    let handle = writer.close()?;
    println!(
        "wrote {} ({} frames, {} bytes)",
        handle.path.display(),
        handle.frames_written,
        handle.bytes_written
    );
    Ok(())
}
