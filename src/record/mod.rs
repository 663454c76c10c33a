//! Segment recording.
//!
//! `SegmentWriter` owns the currently open output file and rotates to a new
//! one when the configured wall time has elapsed. Responsibilities:
//! - Deterministic naming: `record_YYYYMMDD_HHMMSS.<ext>` from the moment
//!   recording started, rotated parts appending `_part2`, `_part3`, ...
//! - Rotation that loses nothing: the frame whose write triggered the
//!   rotation lands in the new segment, and no frame lands in two files
//! - `close()` finalizes the container before returning, so a closed
//!   segment plays on its own no matter what happens to the process next
//!
//! The writer MUST NOT:
//! - Drop or reorder frames (writes happen in call order, unbuffered at
//!   frame granularity)
//! - Touch an old segment after a newer one has been opened
//!
//! Formats: the native cwr container always works; mp4 and avi go through
//! FFmpeg behind the `encode-ffmpeg` feature.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

pub(crate) mod container;
#[cfg(feature = "encode-ffmpeg")]
pub(crate) mod ffmpeg;

use crate::error::PipelineError;
use crate::frame::Frame;

// ----------------------------------------------------------------------------
// OutputFormat
// ----------------------------------------------------------------------------

/// Container/codec for recorded segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Mp4,
    Avi,
    /// Native frame container; no codec stack needed, any build can write
    /// and play it.
    Cwr,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "avi" => Ok(OutputFormat::Avi),
            "cwr" => Ok(OutputFormat::Cwr),
            other => Err(format!(
                "unknown output format '{other}' (expected mp4, avi or cwr)"
            )),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Avi => "avi",
            OutputFormat::Cwr => "cwr",
        }
    }
}

// ----------------------------------------------------------------------------
// RecordingConfig / SegmentHandle
// ----------------------------------------------------------------------------

/// Everything the writer needs to open segments.
#[derive(Clone, Debug)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Wall time per segment before rotation.
    pub segment_duration: Duration,
}

/// Snapshot of one output segment. Exactly one is live per writer; rotation
/// retires it and starts the next.
#[derive(Clone, Debug)]
pub struct SegmentHandle {
    pub path: PathBuf,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub opened_at: SystemTime,
}

// ----------------------------------------------------------------------------
// SegmentWriter
// ----------------------------------------------------------------------------

enum WriterBackend {
    Container(container::ContainerWriter),
    #[cfg(feature = "encode-ffmpeg")]
    Ffmpeg(ffmpeg::FfmpegWriter),
}

pub struct SegmentWriter {
    config: RecordingConfig,
    /// Base name shared by every part of this recording session.
    stem: String,
    /// 1-based part counter; part 1 carries no suffix.
    part: u32,
    /// None once closed or after a failed rotation; the writer is then dead.
    backend: Option<WriterBackend>,
    handle: SegmentHandle,
    segment_started: Instant,
    /// Segments closed since open(), for logs and the rotation tests.
    segments_closed: u64,
}

// The encoder backend carries no Debug bound; print segment metadata only.
impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("config", &self.config)
            .field("stem", &self.stem)
            .field("part", &self.part)
            .field("handle", &self.handle)
            .field("segments_closed", &self.segments_closed)
            .finish_non_exhaustive()
    }
}

impl SegmentWriter {
    /// Open the first segment. Creates the output directory if needed.
    /// Fails with `WriteUnavailable` when the directory cannot be used or
    /// the format needs a backend this build lacks.
    pub fn open(config: RecordingConfig) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&config.output_dir).map_err(|err| {
            PipelineError::WriteUnavailable(format!(
                "create output directory {}: {err}",
                config.output_dir.display()
            ))
        })?;

        let stem = unique_stem(&config.output_dir, config.format);
        let path = segment_path(&config.output_dir, &stem, 1, config.format);
        let backend = open_backend(&path, &config)?;
        let handle = SegmentHandle {
            path,
            frames_written: 0,
            bytes_written: 0,
            opened_at: SystemTime::now(),
        };
        log::info!("SegmentWriter: recording to {}", handle.path.display());
        Ok(Self {
            config,
            stem,
            part: 1,
            backend: Some(backend),
            handle,
            segment_started: Instant::now(),
            segments_closed: 0,
        })
    }

    /// Append a frame to the active segment, rotating first if the segment
    /// has run its configured duration. The triggering frame goes to the
    /// segment opened by that rotation.
    pub fn write(&mut self, frame: &Frame) -> Result<(), PipelineError> {
        if self.segment_started.elapsed() >= self.config.segment_duration {
            self.rotate()?;
        }
        let backend = self.backend.as_mut().ok_or_else(|| {
            PipelineError::WriteError("segment writer is closed".to_string())
        })?;
        match backend {
            WriterBackend::Container(writer) => writer
                .write_frame(frame)
                .map_err(|err| PipelineError::WriteError(format!("{err:#}")))?,
            #[cfg(feature = "encode-ffmpeg")]
            WriterBackend::Ffmpeg(writer) => writer
                .write_frame(frame)
                .map_err(|err| PipelineError::WriteError(format!("{err:#}")))?,
        }
        self.refresh_handle();
        Ok(())
    }

    /// Finalize the active segment, then open the next part, returning its
    /// handle. The old segment is fully closed before the new file exists,
    /// so it is never touched again afterwards. If finalizing or opening
    /// fails the writer is dead and the caller gets `WriteError`; whatever
    /// was already written to the old segment stays recoverable.
    pub fn rotate(&mut self) -> Result<SegmentHandle, PipelineError> {
        let closed_path = self.handle.path.clone();
        let closed_frames = self.handle.frames_written;

        let old = self.backend.take().ok_or_else(|| {
            PipelineError::WriteError("segment writer is closed".to_string())
        })?;
        finalize_backend(old)?;
        self.segments_closed += 1;

        let next_part = self.part + 1;
        let next_path =
            segment_path(&self.config.output_dir, &self.stem, next_part, self.config.format);
        let next_backend = open_backend(&next_path, &self.config)
            .map_err(|err| PipelineError::WriteError(err.to_string()))?;
        self.backend = Some(next_backend);

        log::info!(
            "SegmentWriter: closed {} ({} frames), rotated to {}",
            closed_path.display(),
            closed_frames,
            next_path.display()
        );

        self.part = next_part;
        self.segment_started = Instant::now();
        self.handle = SegmentHandle {
            path: next_path,
            frames_written: 0,
            bytes_written: 0,
            opened_at: SystemTime::now(),
        };
        Ok(self.handle.clone())
    }

    /// Finalize the active segment. The file is fully flushed and playable
    /// when this returns.
    pub fn close(mut self) -> Result<SegmentHandle, PipelineError> {
        self.refresh_handle();
        let handle = self.handle.clone();
        if let Some(backend) = self.backend.take() {
            finalize_backend(backend)?;
        }
        log::info!(
            "SegmentWriter: closed {} ({} frames)",
            handle.path.display(),
            handle.frames_written
        );
        Ok(handle)
    }

    pub fn handle(&self) -> &SegmentHandle {
        &self.handle
    }

    pub fn segments_closed(&self) -> u64 {
        self.segments_closed
    }

    fn refresh_handle(&mut self) {
        let (frames, bytes) = match &self.backend {
            Some(WriterBackend::Container(writer)) => {
                (writer.frames_written(), writer.bytes_written())
            }
            #[cfg(feature = "encode-ffmpeg")]
            Some(WriterBackend::Ffmpeg(writer)) => {
                (writer.frames_written(), writer.bytes_written())
            }
            None => return,
        };
        self.handle.frames_written = frames;
        self.handle.bytes_written = bytes;
    }
}

fn open_backend(path: &Path, config: &RecordingConfig) -> Result<WriterBackend, PipelineError> {
    match config.format {
        OutputFormat::Cwr => {
            let writer =
                container::ContainerWriter::create(path, config.width, config.height, config.fps)
                    .map_err(|err| PipelineError::WriteUnavailable(format!("{err:#}")))?;
            Ok(WriterBackend::Container(writer))
        }
        OutputFormat::Mp4 | OutputFormat::Avi => {
            #[cfg(feature = "encode-ffmpeg")]
            {
                let writer =
                    ffmpeg::FfmpegWriter::create(path, config.width, config.height, config.fps)
                        .map_err(|err| PipelineError::WriteUnavailable(format!("{err:#}")))?;
                Ok(WriterBackend::Ffmpeg(writer))
            }
            #[cfg(not(feature = "encode-ffmpeg"))]
            {
                Err(PipelineError::WriteUnavailable(format!(
                    "writing {} requires the encode-ffmpeg feature",
                    config.format.extension()
                )))
            }
        }
    }
}

fn finalize_backend(backend: WriterBackend) -> Result<(), PipelineError> {
    match backend {
        WriterBackend::Container(writer) => writer
            .finalize()
            .map(|_| ())
            .map_err(|err| PipelineError::WriteError(format!("{err:#}"))),
        #[cfg(feature = "encode-ffmpeg")]
        WriterBackend::Ffmpeg(writer) => writer
            .finalize()
            .map_err(|err| PipelineError::WriteError(format!("{err:#}"))),
    }
}

/// Base name from the recording start time. When two recordings start in
/// the same second in the same directory, a numeric tiebreaker keeps them
/// apart.
fn unique_stem(dir: &Path, format: OutputFormat) -> String {
    let base = chrono::Local::now()
        .format("record_%Y%m%d_%H%M%S")
        .to_string();
    let mut stem = base.clone();
    let mut tiebreak = 2u32;
    while segment_path(dir, &stem, 1, format).exists() {
        stem = format!("{base}.{tiebreak}");
        tiebreak += 1;
    }
    stem
}

fn segment_path(dir: &Path, stem: &str, part: u32, format: OutputFormat) -> PathBuf {
    let name = if part <= 1 {
        format!("{stem}.{}", format.extension())
    } else {
        format!("{stem}_part{part}.{}", format.extension())
    };
    dir.join(name)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::container::ContainerReader;
    use super::*;
    use crate::frame::{rgb24_len, PixelFormat};

    fn make_frame(seq: u64) -> Frame {
        let len = rgb24_len(8, 6).unwrap();
        let data: Vec<u8> = (0..len).map(|i| ((i as u64 + seq) % 256) as u8).collect();
        Frame::new(data, 8, 6, PixelFormat::Rgb24, seq, seq * 100)
    }

    fn recording_config(dir: &Path, segment_duration: Duration) -> RecordingConfig {
        RecordingConfig {
            output_dir: dir.to_path_buf(),
            format: OutputFormat::Cwr,
            width: 8,
            height: 6,
            fps: 10,
            segment_duration,
        }
    }

    #[test]
    fn close_produces_a_playable_segment() -> Result<(), PipelineError> {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::open(recording_config(dir.path(), Duration::from_secs(60)))?;
        for seq in 0..3 {
            writer.write(&make_frame(seq))?;
        }
        let handle = writer.close()?;
        assert_eq!(handle.frames_written, 3);
        assert!(handle.path.file_name().unwrap().to_str().unwrap().starts_with("record_"));

        let mut reader = ContainerReader::open(&handle.path).unwrap();
        assert_eq!(reader.total_frames(), 3);
        assert_eq!(reader.next_frame().unwrap().unwrap().seq, 0);
        Ok(())
    }

    #[test]
    fn elapsed_time_rotates_and_triggering_frame_lands_in_new_segment(
    ) -> Result<(), PipelineError> {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            SegmentWriter::open(recording_config(dir.path(), Duration::from_millis(40)))?;
        let first_path = writer.handle().path.clone();

        writer.write(&make_frame(0))?;
        std::thread::sleep(Duration::from_millis(60));
        writer.write(&make_frame(1))?;

        assert_eq!(writer.segments_closed(), 1);
        let second_path = writer.handle().path.clone();
        assert_ne!(first_path, second_path);
        assert!(second_path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("_part2"));

        let final_handle = writer.close()?;
        assert_eq!(final_handle.path, second_path);

        // The closed first segment holds only frame 0 and stands on its own.
        let mut first = ContainerReader::open(&first_path).unwrap();
        assert_eq!(first.total_frames(), 1);
        assert_eq!(first.next_frame().unwrap().unwrap().seq, 0);

        // The frame that triggered rotation is the new segment's first.
        let mut second = ContainerReader::open(&second_path).unwrap();
        assert_eq!(second.total_frames(), 1);
        assert_eq!(second.next_frame().unwrap().unwrap().seq, 1);
        Ok(())
    }

    #[test]
    fn concurrent_sessions_get_distinct_stems() -> Result<(), PipelineError> {
        let dir = tempfile::tempdir().unwrap();
        let a = SegmentWriter::open(recording_config(dir.path(), Duration::from_secs(60)))?;
        let b = SegmentWriter::open(recording_config(dir.path(), Duration::from_secs(60)))?;
        assert_ne!(a.handle().path, b.handle().path);
        a.close()?;
        b.close()?;
        Ok(())
    }

    #[test]
    fn unusable_output_directory_is_write_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file in the way").unwrap();
        let err =
            SegmentWriter::open(recording_config(&blocker, Duration::from_secs(60))).unwrap_err();
        assert_eq!(err.code(), "WRITE_UNAVAILABLE");
    }

    #[cfg(not(feature = "encode-ffmpeg"))]
    #[test]
    fn mp4_needs_the_encoder_feature() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = recording_config(dir.path(), Duration::from_secs(60));
        config.format = OutputFormat::Mp4;
        let err = SegmentWriter::open(config).unwrap_err();
        assert_eq!(err.code(), "WRITE_UNAVAILABLE");
        assert!(err.to_string().contains("encode-ffmpeg"));
    }

    #[test]
    fn output_format_parses_known_names() {
        assert_eq!(OutputFormat::parse("mp4").unwrap(), OutputFormat::Mp4);
        assert_eq!(OutputFormat::parse(" AVI ").unwrap(), OutputFormat::Avi);
        assert_eq!(OutputFormat::parse("cwr").unwrap(), OutputFormat::Cwr);
        assert!(OutputFormat::parse("mkv").is_err());
    }
}
