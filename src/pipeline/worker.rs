//! The pipeline worker thread.
//!
//! Owns the source, detector and segment writer for one run. Every state
//! transition and every publish happens here; the controller only reads.
//! Stage failures stay contained: a detector error publishes the frame
//! without boxes, a write error ends the recording, and only source death
//! takes the run down.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::{annotate, AnnotationStyle};
use crate::detect::Detector;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::record::{RecordingConfig, SegmentWriter};
use crate::source::FrameSource;

use super::{
    detector_config, Command, PipelineConfig, PipelineState, PlaybackPosition, Published,
    RecordingStatus, SharedState,
};

/// How long the worker naps while paused or waiting out the playback
/// interval. Bounds the latency of command handling.
const IDLE_POLL: Duration = Duration::from_millis(10);

pub(crate) struct WorkerContext {
    pub(crate) config: PipelineConfig,
    pub(crate) source: FrameSource,
    pub(crate) detector: Option<Detector>,
    pub(crate) commands: Receiver<Command>,
    pub(crate) shared: Arc<SharedState>,
    pub(crate) stop: Arc<std::sync::atomic::AtomicBool>,
}

pub(crate) fn run(ctx: WorkerContext) {
    let mode = if ctx.source.is_live() {
        "live capture"
    } else {
        "file playback"
    };
    log::info!("pipeline worker started ({mode})");
    Worker::new(ctx).run();
}

enum Exit {
    /// Stop was requested; the run ends in `Idle`.
    Stop,
    /// File playback consumed the last frame; the run ends in `Stopped`.
    EndOfStream,
    /// The source died; the run ends in `Error`.
    Fatal(PipelineError),
}

struct Worker {
    config: PipelineConfig,
    source: FrameSource,
    detector: Option<Detector>,
    detection_enabled: bool,
    commands: Receiver<Command>,
    shared: Arc<SharedState>,
    stop: Arc<std::sync::atomic::AtomicBool>,
    writer: Option<SegmentWriter>,
    paused: bool,
    frames_published: u64,
    /// Dimensions of the last frame seen; recordings open with these.
    last_dims: Option<(u32, u32)>,
    style: AnnotationStyle,
    /// Playback pacing for file sources.
    interval: Duration,
    next_due: Instant,
}

impl Worker {
    fn new(ctx: WorkerContext) -> Self {
        let interval = Duration::from_millis(1000 / u64::from(ctx.source.fps().max(1)));
        let detection_enabled = ctx.detector.is_some();
        Self {
            config: ctx.config,
            source: ctx.source,
            detector: ctx.detector,
            detection_enabled,
            commands: ctx.commands,
            shared: ctx.shared,
            stop: ctx.stop,
            writer: None,
            paused: false,
            frames_published: 0,
            last_dims: None,
            style: AnnotationStyle::default(),
            interval,
            next_due: Instant::now(),
        }
    }

    fn run(mut self) {
        match self.capture_loop() {
            Exit::Stop => {
                self.release_resources();
                self.shared.update_status(|status| {
                    status.state = PipelineState::Idle;
                    status.recording = None;
                });
                log::info!(
                    "pipeline worker stopped after {} frames",
                    self.frames_published
                );
            }
            Exit::EndOfStream => {
                self.release_resources();
                self.shared.update_status(|status| {
                    status.state = PipelineState::Stopped;
                    status.finished = true;
                    status.recording = None;
                });
                log::info!("playback finished after {} frames", self.frames_published);
            }
            Exit::Fatal(err) => {
                self.release_resources();
                let report = err.report();
                log::error!("pipeline worker failed: {err}");
                self.shared.update_status(|status| {
                    status.state = PipelineState::Error;
                    status.last_error = Some(report);
                    status.recording = None;
                });
            }
        }
    }

    fn capture_loop(&mut self) -> Exit {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Exit::Stop;
            }
            self.drain_commands();

            if self.paused {
                std::thread::sleep(IDLE_POLL);
                continue;
            }

            // Files are paced to their native rate; live devices block at
            // the hardware's own cadence inside next_frame.
            if !self.source.is_live() {
                let now = Instant::now();
                if now < self.next_due {
                    std::thread::sleep((self.next_due - now).min(IDLE_POLL));
                    continue;
                }
                self.next_due += self.interval;
            }

            match self.source.next_frame() {
                Ok(frame) => self.process_frame(frame),
                Err(PipelineError::EndOfStream) => return Exit::EndOfStream,
                Err(err) => {
                    if self.stop.load(Ordering::SeqCst) {
                        // The read was interrupted by stop, not by a fault.
                        return Exit::Stop;
                    }
                    return Exit::Fatal(err);
                }
            }
        }
    }

    fn process_frame(&mut self, frame: Frame) {
        self.last_dims = Some((frame.width, frame.height));

        let every = u64::from(self.config.detection.detect_every.max(1));
        let detection_due = self.frames_published % every == 0;
        let detections = match self.detector.as_mut() {
            Some(detector) if self.detection_enabled && detection_due => {
                Some(detector.detect(&frame))
            }
            _ => None,
        };

        let published_frame = match &detections {
            Some(detections) => annotate(&frame, detections, &self.style),
            None => frame,
        };
        let published = Published {
            frame: published_frame,
            detections,
        };

        let mut writer_failed = false;
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.write(&published.frame) {
                log::error!("recording write failed, recording ends: {err}");
                let report = err.report();
                self.shared.update_status(|status| status.last_error = Some(report));
                writer_failed = true;
            }
        }
        if writer_failed {
            self.writer = None;
        }

        let position = if self.source.is_live() {
            None
        } else {
            Some(PlaybackPosition {
                frame_index: published.frame.seq,
                total_frames: self.source.total_frames(),
                timestamp_ms: published.frame.pts_ms,
            })
        };

        self.shared.publish(published);
        self.frames_published += 1;

        let state = self.current_state();
        let recording = self.recording_status();
        let frames_published = self.frames_published;
        self.shared.update_status(|status| {
            status.state = state;
            status.recording = recording;
            status.frames_published = frames_published;
            if position.is_some() {
                status.position = position;
            }
        });
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => self.stop_recording(),
            Command::EnableDetection => self.enable_detection(),
            Command::DisableDetection => {
                if self.detection_enabled {
                    self.detection_enabled = false;
                    log::info!("detection disabled");
                }
            }
            Command::SetConfidenceThreshold(threshold) => {
                self.config.detection.confidence_threshold = threshold;
                if let Some(detector) = self.detector.as_mut() {
                    detector.set_confidence_threshold(threshold);
                }
            }
            Command::SetClassFilter(filter) => {
                self.config.detection.class_filter = filter.clone();
                if let Some(detector) = self.detector.as_mut() {
                    detector.set_class_filter(filter);
                }
            }
            Command::Pause => {
                if self.source.is_live() {
                    log::debug!("ignoring pause: live sources cannot pause");
                } else if !self.paused {
                    self.paused = true;
                    self.push_state();
                    log::info!("playback paused");
                }
            }
            Command::Resume => {
                if self.paused {
                    self.paused = false;
                    self.next_due = Instant::now();
                    self.push_state();
                    log::info!("playback resumed");
                }
            }
            Command::Seek(frame_index) => self.seek(frame_index),
        }
    }

    fn start_recording(&mut self) {
        if self.writer.is_some() {
            log::debug!("ignoring start-recording: already recording");
            return;
        }
        let (width, height) = self
            .last_dims
            .unwrap_or((self.config.width, self.config.height));
        let recording = RecordingConfig {
            output_dir: self.config.recording.output_dir.clone(),
            format: self.config.recording.format,
            width,
            height,
            fps: self.source.fps(),
            segment_duration: self.config.recording.segment_duration,
        };
        match SegmentWriter::open(recording) {
            Ok(writer) => {
                self.writer = Some(writer);
            }
            Err(err) => {
                log::error!("cannot start recording: {err}");
                let report = err.report();
                self.shared
                    .update_status(|status| status.last_error = Some(report));
            }
        }
        self.push_recording_and_state();
    }

    fn stop_recording(&mut self) {
        match self.writer.take() {
            Some(writer) => match writer.close() {
                Ok(handle) => log::info!(
                    "recording stopped at {} ({} frames)",
                    handle.path.display(),
                    handle.frames_written
                ),
                Err(err) => {
                    log::error!("failed to finalize recording: {err}");
                    let report = err.report();
                    self.shared
                        .update_status(|status| status.last_error = Some(report));
                }
            },
            None => log::debug!("ignoring stop-recording: not recording"),
        }
        self.push_recording_and_state();
    }

    fn enable_detection(&mut self) {
        if self.detector.is_none() {
            match Detector::new(&detector_config(&self.config)) {
                Ok(detector) => self.detector = Some(detector),
                Err(err) => {
                    log::error!("cannot enable detection: {err}");
                    let report = err.report();
                    self.shared
                        .update_status(|status| status.last_error = Some(report));
                    return;
                }
            }
        }
        if !self.detection_enabled {
            self.detection_enabled = true;
            log::info!("detection enabled");
        }
    }

    fn seek(&mut self, frame_index: u64) {
        if self.source.is_live() {
            log::debug!("ignoring seek: live sources cannot seek");
            return;
        }
        match self.source.seek(frame_index) {
            Ok(reached) => {
                log::info!("seek to frame {frame_index}, positioned at {reached}");
                self.next_due = Instant::now() + self.interval;
                // Show the frame at the new position right away, even while
                // paused.
                match self.source.next_frame() {
                    Ok(frame) => self.process_frame(frame),
                    Err(PipelineError::EndOfStream) => {
                        log::debug!("no frame at seek position {reached}");
                    }
                    Err(err) => {
                        log::error!("read after seek failed: {err}");
                        let report = err.report();
                        self.shared
                            .update_status(|status| status.last_error = Some(report));
                    }
                }
            }
            Err(err) => {
                log::error!("seek to frame {frame_index} failed: {err}");
                let report = err.report();
                self.shared
                    .update_status(|status| status.last_error = Some(report));
            }
        }
    }

    fn release_resources(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.close() {
                Ok(handle) => log::info!("recording finalized at {}", handle.path.display()),
                Err(err) => {
                    log::error!("failed to finalize recording: {err}");
                    let report = err.report();
                    self.shared
                        .update_status(|status| status.last_error = Some(report));
                }
            }
        }
        self.source.close();
    }

    fn current_state(&self) -> PipelineState {
        if self.paused {
            PipelineState::Paused
        } else if self.writer.is_some() {
            PipelineState::Recording
        } else {
            PipelineState::Capturing
        }
    }

    fn recording_status(&self) -> Option<RecordingStatus> {
        self.writer.as_ref().map(|writer| RecordingStatus {
            path: writer.handle().path.clone(),
            frames_written: writer.handle().frames_written,
            segments_closed: writer.segments_closed(),
        })
    }

    fn push_state(&self) {
        let state = self.current_state();
        self.shared.update_status(|status| status.state = state);
    }

    fn push_recording_and_state(&self) {
        let state = self.current_state();
        let recording = self.recording_status();
        self.shared.update_status(|status| {
            status.state = state;
            status.recording = recording;
        });
    }
}
