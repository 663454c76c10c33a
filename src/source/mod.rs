//! Frame sources.
//!
//! This module produces the frames everything else consumes:
//! - Live capture devices (synthetic `stub://camera` backend, plus V4L2
//!   behind the `source-v4l2` feature)
//! - Local media files (synthetic `stub://clip` backend, the native cwr
//!   container, plus mp4/avi behind the `decode-ffmpeg` feature)
//!
//! A source is responsible for:
//! - Opening its device or file (opening a live device reserves it
//!   exclusively until close)
//! - Decoding into packed RGB24 and stamping sequence number + timestamp
//! - Bounding how long a single read can block, retrying transient device
//!   failures, and escalating when retries run out
//! - Honoring the interrupter so a blocked read returns promptly on stop
//!
//! A source MUST NOT:
//! - Fetch remote URLs (local device nodes and local paths only)
//! - Pace playback (the acquisition loop owns timing for file sources)
//! - Drop or reorder frames between open and end of stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod device;
pub mod file;
#[cfg(feature = "decode-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "source-v4l2")]
mod normalize;
#[cfg(feature = "source-v4l2")]
pub(crate) mod v4l2;

pub use device::{enumerate_devices, DeviceConfig, DeviceInfo, DeviceSource};
pub use file::{FileConfig, FileSource};

use crate::error::PipelineError;
use crate::frame::Frame;

// ----------------------------------------------------------------------------
// SourceInterrupter
// ----------------------------------------------------------------------------

/// Cheap clonable handle that makes a blocked `next_frame()` return promptly.
///
/// The controller trips it on `stop` before joining the worker, so shutdown
/// latency does not depend on the source's read timeout. Tripping is one-way;
/// a tripped source is only good for closing.
#[derive(Clone, Debug, Default)]
pub struct SourceInterrupter {
    flag: Arc<AtomicBool>,
}

impl SourceInterrupter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Selector
// ----------------------------------------------------------------------------

/// Parsed form of the `source` configuration string.
///
/// Accepted spellings:
/// - `"0"`, `"1"`, ... or `/dev/videoN` - capture device by index
/// - `stub://camera` - synthetic live device (tests, demos)
/// - `stub://clip?frames=N&fps=F` - synthetic finite clip
/// - any other local path - media file, picked by extension
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSelector {
    Device { device: String },
    File { path: String },
}

impl SourceSelector {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PipelineError::SourceUnavailable(
                "source is empty".to_string(),
            ));
        }
        if let Some(rest) = raw.strip_prefix("stub://") {
            if rest.starts_with("camera") {
                return Ok(SourceSelector::Device {
                    device: raw.to_string(),
                });
            }
            if rest.starts_with("clip") {
                return Ok(SourceSelector::File {
                    path: raw.to_string(),
                });
            }
            return Err(PipelineError::SourceUnavailable(format!(
                "unknown stub source '{raw}' (expected stub://camera or stub://clip)"
            )));
        }
        if raw.contains("://") {
            return Err(PipelineError::SourceUnavailable(format!(
                "remote sources are not supported: '{raw}'"
            )));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return Ok(SourceSelector::Device {
                device: format!("/dev/video{raw}"),
            });
        }
        if raw.starts_with("/dev/video") {
            return Ok(SourceSelector::Device {
                device: raw.to_string(),
            });
        }
        Ok(SourceSelector::File {
            path: raw.to_string(),
        })
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SourceSelector::Device { .. })
    }
}

// ----------------------------------------------------------------------------
// FrameSource
// ----------------------------------------------------------------------------

/// Closed variant set over the two source families. Selected once at
/// construction; the pipeline never swaps variants mid-run.
pub enum FrameSource {
    Device(DeviceSource),
    File(FileSource),
}

impl FrameSource {
    /// Build a source from a selector string plus capture parameters.
    /// Classification errors (bad scheme, feature not compiled in) surface
    /// as `SourceUnavailable`; no I/O happens until [`FrameSource::open`].
    pub fn from_selector(
        selector: &SourceSelector,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, PipelineError> {
        match selector {
            SourceSelector::Device { device } => Ok(FrameSource::Device(DeviceSource::new(
                DeviceConfig {
                    device: device.clone(),
                    width,
                    height,
                    fps,
                },
            )?)),
            SourceSelector::File { path } => {
                Ok(FrameSource::File(FileSource::new(FileConfig {
                    path: path.clone(),
                })?))
            }
        }
    }

    /// Open the device or file. For live devices this reserves exclusive
    /// access until `close()`.
    pub fn open(&mut self) -> Result<(), PipelineError> {
        match self {
            FrameSource::Device(source) => source.open(),
            FrameSource::File(source) => source.open(),
        }
    }

    /// Pull the next frame. Blocks up to the source's bounded read timeout
    /// for live devices; returns immediately for files. `EndOfStream` is
    /// sticky for files: once reported it is reported again until `seek`.
    pub fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        match self {
            FrameSource::Device(source) => source.next_frame(),
            FrameSource::File(source) => source.next_frame(),
        }
    }

    /// Release the device or file. Idempotent.
    pub fn close(&mut self) {
        match self {
            FrameSource::Device(source) => source.close(),
            FrameSource::File(source) => source.close(),
        }
    }

    /// Reposition file playback to the given frame index, invalidating any
    /// in-flight read. Returns the index actually reached (the nearest
    /// preceding decodable frame). Live devices cannot seek.
    pub fn seek(&mut self, frame_index: u64) -> Result<u64, PipelineError> {
        match self {
            FrameSource::Device(_) => Err(PipelineError::ReadError(
                "seek is only supported for file playback".to_string(),
            )),
            FrameSource::File(source) => source.seek(frame_index),
        }
    }

    pub fn interrupter(&self) -> SourceInterrupter {
        match self {
            FrameSource::Device(source) => source.interrupter(),
            FrameSource::File(source) => source.interrupter(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, FrameSource::Device(_))
    }

    /// Total frame count when the media knows it (file sources only).
    pub fn total_frames(&self) -> Option<u64> {
        match self {
            FrameSource::Device(_) => None,
            FrameSource::File(source) => source.total_frames(),
        }
    }

    /// Native frame rate. Used by the acquisition loop to pace playback.
    pub fn fps(&self) -> u32 {
        match self {
            FrameSource::Device(source) => source.fps(),
            FrameSource::File(source) => source.fps(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match self {
            FrameSource::Device(source) => source.stats(),
            FrameSource::File(source) => source.stats(),
        }
    }
}

/// Frame counters for periodic health logging.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub describe: String,
}

/// Key/value pairs from a `stub://name?k=v&k=v` selector. Unknown keys are
/// ignored by the callers so stubs stay forward-compatible in tests.
pub(crate) fn stub_query_params(raw: &str) -> Vec<(String, String)> {
    let Some((_, query)) = raw.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_classifies_devices_and_files() -> Result<(), PipelineError> {
        assert_eq!(
            SourceSelector::parse("0")?,
            SourceSelector::Device {
                device: "/dev/video0".to_string()
            }
        );
        assert_eq!(
            SourceSelector::parse("/dev/video2")?,
            SourceSelector::Device {
                device: "/dev/video2".to_string()
            }
        );
        assert_eq!(
            SourceSelector::parse("stub://camera")?,
            SourceSelector::Device {
                device: "stub://camera".to_string()
            }
        );
        assert_eq!(
            SourceSelector::parse("recordings/clip.cwr")?,
            SourceSelector::File {
                path: "recordings/clip.cwr".to_string()
            }
        );
        assert!(!SourceSelector::parse("stub://clip?frames=5")?.is_live());
        Ok(())
    }

    #[test]
    fn selector_rejects_remote_and_empty_sources() {
        for bad in ["", "   ", "rtsp://cam.local/stream", "http://x/video.mp4"] {
            let err = SourceSelector::parse(bad).unwrap_err();
            assert_eq!(err.code(), "SOURCE_UNAVAILABLE");
        }
    }

    #[test]
    fn interrupter_is_shared_across_clones() {
        let interrupter = SourceInterrupter::new();
        let clone = interrupter.clone();
        assert!(!clone.is_tripped());
        interrupter.trip();
        assert!(clone.is_tripped());
    }

    #[test]
    fn device_sources_cannot_seek() {
        let selector = SourceSelector::parse("stub://camera").unwrap();
        let mut source = FrameSource::from_selector(&selector, 64, 48, 30).unwrap();
        let err = source.seek(10).unwrap_err();
        assert_eq!(err.code(), "READ_ERROR");
    }
}
