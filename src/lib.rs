//! camwatch
//!
//! This crate implements the capture, detection and recording pipeline behind
//! a desktop camera application.
//!
//! # Architecture
//!
//! A dedicated worker thread owns every pipeline stage and is the only writer
//! of pipeline state:
//!
//! 1. **Capture**: pull frames from a live device or play back a recorded clip.
//! 2. **Detect**: run the configured detector over captured frames.
//! 3. **Annotate**: draw detection boxes and labels onto a copy of each frame.
//! 4. **Record**: append frames to on-disk segments rotated on wall time.
//!
//! Frontends talk to the worker through [`PipelineController`]: commands go in
//! over a channel and observations come back as snapshots. A frame and the
//! detections drawn on it are published together as one unit, so a reader can
//! never pair boxes from one frame with the pixels of another. A stage failure
//! degrades only that stage: a detector error yields a frame without boxes, a
//! write error ends the recording, and capture continues either way.
//!
//! # Module Structure
//!
//! - `source`: frame acquisition (capture devices, clip playback, stubs)
//! - `detect`: detector construction and per-frame inference
//! - `annotate`: box and label overlay rendering
//! - `record`: segment files and wall-clock rotation
//! - `pipeline`: the worker thread and its controller handle
//! - `config`: defaults, config files and environment overrides
//! - `error`: the pipeline error taxonomy with stable codes

pub mod annotate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod record;
pub mod source;

pub use annotate::{annotate, AnnotationStyle};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use detect::{
    Detection, Detections, Detector, DetectorBackend, DetectorConfig, ObjectClass, StubBackend,
};
pub use error::{ErrorReport, PipelineError};
pub use frame::{Frame, PixelFormat};
pub use pipeline::{
    DetectionSettings, PipelineConfig, PipelineController, PipelineState, PipelineStatus,
    PlaybackPosition, Published, RecordingSettings, RecordingStatus,
};
pub use record::{OutputFormat, RecordingConfig, SegmentHandle, SegmentWriter};
pub use source::{
    enumerate_devices, DeviceInfo, FrameSource, SourceInterrupter, SourceSelector, SourceStats,
};
