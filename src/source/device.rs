//! Live capture device source.
//!
//! `DeviceSource` pulls frames from a local capture device. Backends:
//! - Synthetic (`stub://camera`), self-paced at the configured fps, used by
//!   every test and by demo setups without hardware
//! - V4L2 (`/dev/videoN`) behind the `source-v4l2` feature
//!
//! Reads block at most [`DeviceSource::frame_timeout`]; transient failures
//! are retried up to [`READ_RETRY_LIMIT`] times before the source escalates
//! to `SourceUnavailable` (device unplugged, driver wedged). Opening a real
//! device reserves it exclusively until `close()`.

use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::frame::{rgb24_len, Frame, PixelFormat};

use super::{stub_query_params, SourceInterrupter, SourceStats};

#[cfg(feature = "source-v4l2")]
use super::v4l2::V4l2Camera;

/// Consecutive failed reads tolerated before the device is declared gone.
pub const READ_RETRY_LIMIT: u32 = 3;

/// Configuration for a live capture device.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Device node (e.g., "/dev/video0") or `stub://camera[?fail-after=N]`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Live capture source.
pub struct DeviceSource {
    config: DeviceConfig,
    backend: DeviceBackend,
    interrupt: SourceInterrupter,
    opened: bool,
}

// The capture backend carries no Debug bound; print configuration only.
impl std::fmt::Debug for DeviceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSource")
            .field("config", &self.config)
            .field("opened", &self.opened)
            .finish_non_exhaustive()
    }
}

enum DeviceBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "source-v4l2")]
    V4l2(V4l2Camera),
}

impl DeviceSource {
    pub fn new(config: DeviceConfig) -> Result<Self, PipelineError> {
        let interrupt = SourceInterrupter::new();
        let backend = if config.device.starts_with("stub://") {
            DeviceBackend::Synthetic(SyntheticCamera::new(&config, interrupt.clone()))
        } else {
            #[cfg(feature = "source-v4l2")]
            {
                DeviceBackend::V4l2(V4l2Camera::new(&config)?)
            }
            #[cfg(not(feature = "source-v4l2"))]
            {
                return Err(PipelineError::SourceUnavailable(format!(
                    "live capture from {} requires the source-v4l2 feature",
                    config.device
                )));
            }
        };
        Ok(Self {
            config,
            backend,
            interrupt,
            opened: false,
        })
    }

    /// Open the device. Real devices are reserved exclusively from here
    /// until `close()`; a device already held by another process fails with
    /// `SourceUnavailable`.
    pub fn open(&mut self) -> Result<(), PipelineError> {
        match &mut self.backend {
            DeviceBackend::Synthetic(camera) => camera.open(),
            #[cfg(feature = "source-v4l2")]
            DeviceBackend::V4l2(camera) => camera.open(),
        }?;
        self.opened = true;
        log::info!(
            "DeviceSource: opened {} ({}x{} @ {} fps)",
            self.config.device,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    /// Capture the next frame. Blocks up to `frame_timeout()` per attempt,
    /// retries transient failures, and escalates after `READ_RETRY_LIMIT`
    /// consecutive failures. Returns `READ_ERROR` immediately when the
    /// interrupter is tripped, however many retries remain.
    pub fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        if !self.opened {
            return Err(PipelineError::ReadError(
                "device is not open".to_string(),
            ));
        }
        let mut last_failure = String::new();
        for attempt in 1..=READ_RETRY_LIMIT {
            if self.interrupt.is_tripped() {
                return Err(PipelineError::ReadError(
                    "read interrupted by stop".to_string(),
                ));
            }
            let result = match &mut self.backend {
                DeviceBackend::Synthetic(camera) => camera.read_frame(),
                #[cfg(feature = "source-v4l2")]
                DeviceBackend::V4l2(camera) => camera.read_frame(),
            };
            match result {
                Ok(frame) => return Ok(frame),
                Err(err) => {
                    if self.interrupt.is_tripped() {
                        return Err(PipelineError::ReadError(
                            "read interrupted by stop".to_string(),
                        ));
                    }
                    log::warn!(
                        "DeviceSource: read from {} failed (attempt {attempt}/{READ_RETRY_LIMIT}): {err}",
                        self.config.device
                    );
                    last_failure = err.to_string();
                }
            }
        }
        Err(PipelineError::SourceUnavailable(format!(
            "device {} stopped producing frames after {READ_RETRY_LIMIT} read attempts: {last_failure}",
            self.config.device
        )))
    }

    /// Release the device. Idempotent.
    pub fn close(&mut self) {
        if !self.opened {
            return;
        }
        match &mut self.backend {
            DeviceBackend::Synthetic(camera) => camera.close(),
            #[cfg(feature = "source-v4l2")]
            DeviceBackend::V4l2(camera) => camera.close(),
        }
        self.opened = false;
        log::info!("DeviceSource: closed {}", self.config.device);
    }

    pub fn interrupter(&self) -> SourceInterrupter {
        self.interrupt.clone()
    }

    pub fn fps(&self) -> u32 {
        self.config.fps
    }

    pub fn stats(&self) -> SourceStats {
        let frames_captured = match &self.backend {
            DeviceBackend::Synthetic(camera) => camera.frame_count,
            #[cfg(feature = "source-v4l2")]
            DeviceBackend::V4l2(camera) => camera.frames_captured(),
        };
        SourceStats {
            frames_captured,
            describe: self.config.device.clone(),
        }
    }

    /// Upper bound on a single blocking read: four frame intervals, floored
    /// at 500 ms so low frame rates aren't declared stalled prematurely.
    pub fn frame_timeout(&self) -> Duration {
        frame_timeout(self.config.fps)
    }
}

pub(crate) fn frame_timeout(fps: u32) -> Duration {
    let base_ms = if fps == 0 {
        500
    } else {
        (1000 / fps).saturating_mul(4)
    };
    Duration::from_millis(base_ms.max(500) as u64)
}

// ----------------------------------------------------------------------------
// Device enumeration
// ----------------------------------------------------------------------------

/// One usable capture device found by probing.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub description: String,
}

/// Probe device indices `0..max_probe` and report the ones that open.
/// Without the `source-v4l2` feature there is nothing to probe.
pub fn enumerate_devices(max_probe: u32) -> Vec<DeviceInfo> {
    #[cfg(feature = "source-v4l2")]
    {
        let mut found = Vec::new();
        for index in 0..max_probe {
            match v4l::Device::new(index as usize) {
                Ok(device) => {
                    let description = device
                        .query_caps()
                        .map(|caps| caps.card)
                        .unwrap_or_else(|_| "unknown".to_string());
                    found.push(DeviceInfo {
                        index,
                        path: format!("/dev/video{index}"),
                        description,
                    });
                }
                Err(err) => {
                    log::debug!("enumerate: /dev/video{index} not usable: {err}");
                }
            }
        }
        found
    }
    #[cfg(not(feature = "source-v4l2"))]
    {
        let _ = max_probe;
        log::debug!("enumerate: device probing requires the source-v4l2 feature");
        Vec::new()
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://camera) for tests and hardware-free runs
// ----------------------------------------------------------------------------

/// Self-paced synthetic camera. Produces a deterministic moving pattern at
/// the configured rate; `stub://camera?fail-after=N` makes every read fail
/// once N frames have been produced, which is how the disconnect/escalation
/// paths get exercised without hardware.
struct SyntheticCamera {
    width: u32,
    height: u32,
    fps: u32,
    fail_after: Option<u64>,
    interrupt: SourceInterrupter,
    frame_count: u64,
    scene_state: u8,
    next_due: Option<Instant>,
}

impl SyntheticCamera {
    fn new(config: &DeviceConfig, interrupt: SourceInterrupter) -> Self {
        let mut fail_after = None;
        for (key, value) in stub_query_params(&config.device) {
            if key == "fail-after" {
                fail_after = value.parse::<u64>().ok();
            }
        }
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps.max(1),
            fail_after,
            interrupt,
            frame_count: 0,
            scene_state: 0,
            next_due: None,
        }
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        self.next_due = Some(Instant::now());
        log::info!("DeviceSource: synthetic camera ready");
        Ok(())
    }

    fn close(&mut self) {
        self.next_due = None;
    }

    fn read_frame(&mut self) -> Result<Frame, PipelineError> {
        if let Some(limit) = self.fail_after {
            if self.frame_count >= limit {
                return Err(PipelineError::ReadError(
                    "synthetic device failure".to_string(),
                ));
            }
        }

        // Pace to the configured rate, sleeping in short slices so a
        // tripped interrupter is noticed well inside one frame interval.
        let interval = Duration::from_millis(1000 / self.fps as u64);
        let due = self.next_due.unwrap_or_else(Instant::now);
        loop {
            if self.interrupt.is_tripped() {
                return Err(PipelineError::ReadError(
                    "read interrupted by stop".to_string(),
                ));
            }
            let now = Instant::now();
            if now >= due {
                break;
            }
            std::thread::sleep((due - now).min(Duration::from_millis(20)));
        }
        self.next_due = Some(due + interval);

        let pts_ms = self.frame_count * 1000 / self.fps as u64;
        let pixels = self.generate_synthetic_pixels();
        let frame = Frame::new(
            pixels,
            self.width,
            self.height,
            PixelFormat::Rgb24,
            self.frame_count,
            pts_ms,
        );
        self.frame_count += 1;
        Ok(frame)
    }

    /// Deterministic moving pattern: position + frame count + a scene state
    /// that bumps every 50 frames, so consecutive frames differ and the
    /// synthetic detector has edges to find.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = rgb24_len(self.width, self.height).unwrap_or(0);
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
