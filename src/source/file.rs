//! Local media file source.
//!
//! `FileSource` decodes frames from a local file for playback. Backends:
//! - Synthetic (`stub://clip?frames=N&fps=F&width=W&height=H`), a finite
//!   deterministic clip for tests
//! - Native cwr container (always available, exact per-frame seek)
//! - FFmpeg (mp4/avi/...) behind the `decode-ffmpeg` feature
//!
//! File reads never block on a device, so the acquisition loop owns pacing.
//! End of media is reported as `EndOfStream` and stays that way until a
//! `seek` moves the cursor back; the controller consumes the signal exactly
//! once. Remote URLs are rejected outright.

use std::path::Path;

use crate::error::PipelineError;
use crate::frame::{rgb24_len, Frame, PixelFormat};
use crate::record::container::ContainerReader;

use super::{stub_query_params, SourceInterrupter, SourceStats};

#[cfg(feature = "decode-ffmpeg")]
use super::file_ffmpeg::FfmpegClip;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path, or `stub://clip` with optional query parameters.
    pub path: String,
}

/// Local media file source.
pub struct FileSource {
    config: FileConfig,
    backend: FileBackend,
    interrupt: SourceInterrupter,
}

// The decode backend carries no Debug bound; print configuration only.
impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum FileBackend {
    Synthetic(SyntheticClip),
    Container(ContainerClip),
    #[cfg(feature = "decode-ffmpeg")]
    Ffmpeg(FfmpegClip),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self, PipelineError> {
        if !is_local_media_path(&config.path) {
            return Err(PipelineError::SourceUnavailable(format!(
                "file playback only supports local paths, got '{}'",
                config.path
            )));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticClip::new(&config.path))
        } else if has_extension(&config.path, "cwr") {
            FileBackend::Container(ContainerClip::new(&config.path))
        } else {
            #[cfg(feature = "decode-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegClip::new(&config.path))
            }
            #[cfg(not(feature = "decode-ffmpeg"))]
            {
                return Err(PipelineError::SourceUnavailable(format!(
                    "decoding '{}' requires the decode-ffmpeg feature",
                    config.path
                )));
            }
        };
        Ok(Self {
            config,
            backend,
            interrupt: SourceInterrupter::new(),
        })
    }

    /// Open the file. Nonexistent, truncated, or corrupt media fails here
    /// with `SourceUnavailable`.
    pub fn open(&mut self) -> Result<(), PipelineError> {
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.open(),
            FileBackend::Container(clip) => clip.open(),
            #[cfg(feature = "decode-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.open(),
        }?;
        log::info!("FileSource: opened {}", self.config.path);
        Ok(())
    }

    /// Decode the next frame in order. `EndOfStream` once the media is
    /// exhausted, and again on every call after that until a seek.
    pub fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        if self.interrupt.is_tripped() {
            return Err(PipelineError::ReadError(
                "read interrupted by stop".to_string(),
            ));
        }
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.next_frame(),
            FileBackend::Container(clip) => clip.next_frame(),
            #[cfg(feature = "decode-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.next_frame(),
        }
    }

    pub fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.close(),
            FileBackend::Container(clip) => clip.close(),
            #[cfg(feature = "decode-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.close(),
        }
        log::info!("FileSource: closed {}", self.config.path);
    }

    /// Move the cursor so the next read decodes from `frame_index`, or from
    /// the nearest preceding decodable frame for compressed media. Returns
    /// the index actually reached. Clamps past-the-end requests to the end.
    pub fn seek(&mut self, frame_index: u64) -> Result<u64, PipelineError> {
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.seek(frame_index),
            FileBackend::Container(clip) => clip.seek(frame_index),
            #[cfg(feature = "decode-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.seek(frame_index),
        }
    }

    pub fn interrupter(&self) -> SourceInterrupter {
        self.interrupt.clone()
    }

    pub fn total_frames(&self) -> Option<u64> {
        match &self.backend {
            FileBackend::Synthetic(clip) => Some(clip.total_frames),
            FileBackend::Container(clip) => clip.total_frames(),
            #[cfg(feature = "decode-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.total_frames(),
        }
    }

    /// Native frame rate of the media; the acquisition loop paces to this.
    pub fn fps(&self) -> u32 {
        match &self.backend {
            FileBackend::Synthetic(clip) => clip.fps,
            FileBackend::Container(clip) => clip.fps(),
            #[cfg(feature = "decode-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.fps(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        let frames_captured = match &self.backend {
            FileBackend::Synthetic(clip) => clip.frames_decoded,
            FileBackend::Container(clip) => clip.frames_decoded,
            #[cfg(feature = "decode-ffmpeg")]
            FileBackend::Ffmpeg(clip) => clip.frames_decoded(),
        };
        SourceStats {
            frames_captured,
            describe: self.config.path.clone(),
        }
    }
}

fn is_local_media_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

fn has_extension(path: &str, ext: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://clip) for tests
// ----------------------------------------------------------------------------

/// Finite deterministic clip. The cursor is the only state, so seeking is
/// exact and re-decoding a frame after a seek reproduces it bit for bit.
struct SyntheticClip {
    total_frames: u64,
    fps: u32,
    width: u32,
    height: u32,
    cursor: u64,
    frames_decoded: u64,
}

impl SyntheticClip {
    fn new(path: &str) -> Self {
        let mut total_frames = 100u64;
        let mut fps = 30u32;
        let mut width = 640u32;
        let mut height = 480u32;
        for (key, value) in stub_query_params(path) {
            match key.as_str() {
                "frames" => total_frames = value.parse().unwrap_or(total_frames),
                "fps" => fps = value.parse().unwrap_or(fps),
                "width" => width = value.parse().unwrap_or(width),
                "height" => height = value.parse().unwrap_or(height),
                _ => {}
            }
        }
        Self {
            total_frames,
            fps: fps.max(1),
            width,
            height,
            cursor: 0,
            frames_decoded: 0,
        }
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) {}

    fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        if self.cursor >= self.total_frames {
            return Err(PipelineError::EndOfStream);
        }
        let seq = self.cursor;
        let pts_ms = seq * 1000 / self.fps as u64;
        let pixels = self.generate_pixels(seq);
        self.cursor += 1;
        self.frames_decoded += 1;
        Ok(Frame::new(
            pixels,
            self.width,
            self.height,
            PixelFormat::Rgb24,
            seq,
            pts_ms,
        ))
    }

    fn seek(&mut self, frame_index: u64) -> Result<u64, PipelineError> {
        self.cursor = frame_index.min(self.total_frames);
        Ok(self.cursor)
    }

    /// Pixels are a pure function of the frame index so seek-then-decode
    /// returns exactly what linear decoding would have.
    fn generate_pixels(&self, seq: u64) -> Vec<u8> {
        let pixel_count = rgb24_len(self.width, self.height).unwrap_or(0);
        let scene = seq / 50;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + seq + scene) % 256) as u8;
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// Native container clip (.cwr)
// ----------------------------------------------------------------------------

struct ContainerClip {
    path: String,
    reader: Option<ContainerReader>,
    frames_decoded: u64,
}

impl ContainerClip {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            reader: None,
            frames_decoded: 0,
        }
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        let reader = ContainerReader::open(Path::new(&self.path)).map_err(|err| {
            PipelineError::SourceUnavailable(format!("open {}: {err:#}", self.path))
        })?;
        self.reader = Some(reader);
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
    }

    fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            PipelineError::ReadError("container is not open".to_string())
        })?;
        match reader.next_frame() {
            Ok(Some(stored)) => {
                self.frames_decoded += 1;
                Ok(Frame::new(
                    stored.pixels,
                    reader.width(),
                    reader.height(),
                    PixelFormat::Rgb24,
                    stored.seq,
                    stored.pts_ms,
                ))
            }
            Ok(None) => Err(PipelineError::EndOfStream),
            Err(err) => Err(PipelineError::ReadError(format!(
                "decode {}: {err:#}",
                self.path
            ))),
        }
    }

    fn seek(&mut self, frame_index: u64) -> Result<u64, PipelineError> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            PipelineError::ReadError("container is not open".to_string())
        })?;
        reader
            .seek(frame_index)
            .map_err(|err| PipelineError::ReadError(format!("seek {}: {err:#}", self.path)))
    }

    fn total_frames(&self) -> Option<u64> {
        self.reader.as_ref().map(|r| r.total_frames())
    }

    fn fps(&self) -> u32 {
        self.reader.as_ref().map(|r| r.fps()).unwrap_or(30)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
