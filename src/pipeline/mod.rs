//! Pipeline orchestration.
//!
//! `PipelineController` owns one capture/detect/record run. All pipeline
//! state lives on a dedicated worker thread; the controller is a thin
//! handle that:
//! - Starts the run (opening the source synchronously, so a missing device
//!   or corrupt file fails `start` and nothing is left running)
//! - Forwards control commands over a channel
//! - Exposes read-only snapshots: the latest published frame with its
//!   detections, the pipeline state, and recording/playback status
//! - Stops the run, interrupting a blocked read and joining the worker
//!
//! The controller MUST NOT:
//! - Mutate pipeline state from the caller's thread (the worker is the
//!   sole writer once it is running)
//! - Block a caller for longer than a channel send or a lock on a
//!   snapshot takes
//!
//! Commands that make no sense for the current state (pausing a live
//! camera, seeking a device) are logged and ignored rather than failing
//! the run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

mod worker;

use crate::detect::{Detections, Detector, DetectorConfig, ObjectClass};
use crate::error::{ErrorReport, PipelineError};
use crate::frame::Frame;
use crate::record::OutputFormat;
use crate::source::{FrameSource, SourceInterrupter, SourceSelector};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Full configuration for one pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Source selector: device index, `/dev/videoN`, a media file path, or
    /// a `stub://` test source.
    pub source: String,
    /// Requested capture width (live devices; files keep their own size).
    pub width: u32,
    /// Requested capture height.
    pub height: u32,
    /// Requested capture rate.
    pub fps: u32,
    pub detection: DetectionSettings,
    pub recording: RecordingSettings,
}

#[derive(Clone, Debug)]
pub struct DetectionSettings {
    /// Run detection from the first frame. When false the detector is
    /// built lazily on the first enable command.
    pub enabled: bool,
    /// Model selector, see [`crate::detect::DetectorConfig`].
    pub model: String,
    pub confidence_threshold: f32,
    pub class_filter: Option<Vec<ObjectClass>>,
    /// Run the detector on every n-th frame. Frames in between publish
    /// without detections.
    pub detect_every: u32,
}

#[derive(Clone, Debug)]
pub struct RecordingSettings {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    /// Wall time per segment before rotation.
    pub segment_duration: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: "stub://camera".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            detection: DetectionSettings::default(),
            recording: RecordingSettings::default(),
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "stub://detector".to_string(),
            confidence_threshold: 0.25,
            class_filter: None,
            detect_every: 1,
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            format: OutputFormat::Mp4,
            segment_duration: Duration::from_secs(600),
        }
    }
}

// ----------------------------------------------------------------------------
// Observable state
// ----------------------------------------------------------------------------

/// Pipeline lifecycle state, written only by the worker thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// No run active (also the state after a clean stop).
    Idle,
    /// Frames flowing, not recording.
    Capturing,
    /// Frames flowing and being written to segments.
    Recording,
    /// File playback halted; the position is held.
    Paused,
    /// File playback ran off the end of the media.
    Stopped,
    /// The run died; see `PipelineStatus::last_error`. Terminal.
    Error,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Capturing => "capturing",
            PipelineState::Recording => "recording",
            PipelineState::Paused => "paused",
            PipelineState::Stopped => "stopped",
            PipelineState::Error => "error",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where file playback currently is. Absent for live sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackPosition {
    /// Sequence id of the most recently published frame.
    pub frame_index: u64,
    /// Total frames in the media, when the container knows.
    pub total_frames: Option<u64>,
    /// Presentation timestamp of the most recently published frame.
    pub timestamp_ms: u64,
}

/// The active recording, as of the last write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingStatus {
    /// Path of the segment currently being written.
    pub path: PathBuf,
    /// Frames written to the current segment.
    pub frames_written: u64,
    /// Segments finalized since recording started.
    pub segments_closed: u64,
}

/// Snapshot of everything observable about the run.
#[derive(Clone, Debug)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub recording: Option<RecordingStatus>,
    pub position: Option<PlaybackPosition>,
    /// Frames published since the run started.
    pub frames_published: u64,
    /// Latched true when file playback reaches end of stream. Never reset.
    pub finished: bool,
    /// Most recent pipeline error, with its stable reason code.
    pub last_error: Option<ErrorReport>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            state: PipelineState::Idle,
            recording: None,
            position: None,
            frames_published: 0,
            finished: false,
            last_error: None,
        }
    }
}

/// A frame and the detections computed from it, published together so an
/// observer can never pair a frame with another frame's boxes. `detections`
/// is `None` on frames the detector skipped or when detection is off.
#[derive(Clone, Debug)]
pub struct Published {
    pub frame: Frame,
    pub detections: Option<Detections>,
}

/// Shared slots between the worker (writer) and controller (readers).
/// Readers always see the newest complete value; there is no queue.
#[derive(Debug)]
pub(crate) struct SharedState {
    latest: RwLock<Option<Arc<Published>>>,
    status: RwLock<PipelineStatus>,
}

impl SharedState {
    fn new(initial: PipelineStatus) -> Self {
        Self {
            latest: RwLock::new(None),
            status: RwLock::new(initial),
        }
    }

    pub(crate) fn publish(&self, published: Published) {
        let mut slot = self
            .latest
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(published));
    }

    pub(crate) fn update_status(&self, apply: impl FnOnce(&mut PipelineStatus)) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        apply(&mut status);
    }

    pub(crate) fn latest(&self) -> Option<Arc<Published>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn snapshot(&self) -> PipelineStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub(crate) enum Command {
    StartRecording,
    StopRecording,
    EnableDetection,
    DisableDetection,
    SetConfidenceThreshold(f32),
    SetClassFilter(Option<Vec<ObjectClass>>),
    Pause,
    Resume,
    Seek(u64),
}

// ----------------------------------------------------------------------------
// PipelineController
// ----------------------------------------------------------------------------

/// Handle to a running pipeline.
///
/// Dropping the controller stops the run; prefer [`PipelineController::stop`]
/// to get the final status back.
#[derive(Debug)]
pub struct PipelineController {
    commands: Sender<Command>,
    shared: Arc<SharedState>,
    interrupter: SourceInterrupter,
    stop_flag: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PipelineController {
    /// Start capturing.
    ///
    /// The source is opened on the calling thread: an unreadable file, a
    /// missing device or (with detection enabled) an unloadable model fail
    /// here and no worker is left behind. On success the worker owns the
    /// source until `stop`.
    pub fn start(config: PipelineConfig) -> Result<Self, PipelineError> {
        let selector = SourceSelector::parse(&config.source)?;
        let mut source =
            FrameSource::from_selector(&selector, config.width, config.height, config.fps)?;
        source.open()?;

        let detector = if config.detection.enabled {
            match Detector::new(&detector_config(&config)) {
                Ok(detector) => Some(detector),
                Err(err) => {
                    source.close();
                    return Err(err);
                }
            }
        } else {
            None
        };

        let interrupter = source.interrupter();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(SharedState::new(PipelineStatus {
            state: PipelineState::Capturing,
            ..PipelineStatus::default()
        }));
        let (commands, command_rx) = mpsc::channel();

        let ctx = worker::WorkerContext {
            config,
            source,
            detector,
            commands: command_rx,
            shared: shared.clone(),
            stop: stop_flag.clone(),
        };
        let join = std::thread::spawn(move || worker::run(ctx));

        Ok(Self {
            commands,
            shared,
            interrupter,
            stop_flag,
            join: Some(join),
        })
    }

    /// Stop the run: interrupt any blocked read, wait for the worker to
    /// finalize recordings and release the source, and return the final
    /// status.
    pub fn stop(mut self) -> anyhow::Result<PipelineStatus> {
        self.shutdown()?;
        Ok(self.shared.snapshot())
    }

    pub fn start_recording(&self) {
        self.send(Command::StartRecording);
    }

    pub fn stop_recording(&self) {
        self.send(Command::StopRecording);
    }

    pub fn enable_detection(&self) {
        self.send(Command::EnableDetection);
    }

    pub fn disable_detection(&self) {
        self.send(Command::DisableDetection);
    }

    /// Values outside 0.0..=1.0 are clamped by the detector.
    pub fn set_confidence_threshold(&self, threshold: f32) {
        self.send(Command::SetConfidenceThreshold(threshold));
    }

    /// `None` clears the filter.
    pub fn set_class_filter(&self, filter: Option<Vec<ObjectClass>>) {
        self.send(Command::SetClassFilter(filter));
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Reposition file playback to the given frame index. The worker
    /// publishes the frame at the reached position even while paused.
    pub fn seek(&self, frame_index: u64) {
        self.send(Command::Seek(frame_index));
    }

    /// Latest published frame plus the detections computed from exactly
    /// that frame. `None` until the first frame arrives.
    pub fn latest(&self) -> Option<Arc<Published>> {
        self.shared.latest()
    }

    pub fn state(&self) -> PipelineState {
        self.shared.snapshot().state
    }

    pub fn status(&self) -> PipelineStatus {
        self.shared.snapshot()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("PipelineController: command dropped, worker already exited");
        }
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.interrupter.trip();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow::anyhow!("pipeline worker thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("PipelineController: {err:#}");
        }
    }
}

fn detector_config(config: &PipelineConfig) -> DetectorConfig {
    DetectorConfig {
        model: config.detection.model.clone(),
        width: config.width,
        height: config.height,
        confidence_threshold: config.detection.confidence_threshold,
        class_filter: config.detection.class_filter.clone(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_have_stable_names() {
        let names: Vec<&str> = [
            PipelineState::Idle,
            PipelineState::Capturing,
            PipelineState::Recording,
            PipelineState::Paused,
            PipelineState::Stopped,
            PipelineState::Error,
        ]
        .iter()
        .map(|state| state.as_str())
        .collect();
        assert_eq!(
            names,
            vec!["idle", "capturing", "recording", "paused", "stopped", "error"]
        );
    }

    #[test]
    fn default_status_is_idle_and_clean() {
        let status = PipelineStatus::default();
        assert_eq!(status.state, PipelineState::Idle);
        assert!(status.recording.is_none());
        assert!(status.position.is_none());
        assert_eq!(status.frames_published, 0);
        assert!(!status.finished);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn start_rejects_bad_sources_without_leaking_a_worker() {
        let config = PipelineConfig {
            source: "rtsp://cam/stream".to_string(),
            ..PipelineConfig::default()
        };
        let err = PipelineController::start(config).unwrap_err();
        assert_eq!(err.code(), "SOURCE_UNAVAILABLE");
    }

    #[test]
    fn start_rejects_unloadable_models() {
        let config = PipelineConfig {
            source: "stub://camera".to_string(),
            detection: DetectionSettings {
                enabled: true,
                model: "stub://nonsense".to_string(),
                ..DetectionSettings::default()
            },
            ..PipelineConfig::default()
        };
        let err = PipelineController::start(config).unwrap_err();
        assert_eq!(err.code(), "MODEL_UNAVAILABLE");
    }
}
