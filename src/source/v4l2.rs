//! V4L2 capture backend (feature: source-v4l2).
//!
//! Opens a local device node, negotiates RGB3 (falling back to NV12 with
//! in-memory conversion), and reads frames through a memory-mapped buffer
//! stream. Building the stream reserves the device; dropping the state
//! releases it.

use std::time::Instant;

use ouroboros::self_referencing;

use crate::error::PipelineError;
use crate::frame::{Frame, PixelFormat};

use super::device::DeviceConfig;
use super::normalize::{normalize_to_rgb, CaptureFormat};

pub(crate) struct V4l2Camera {
    device_path: String,
    requested_width: u32,
    requested_height: u32,
    fps: u32,
    state: Option<CameraState>,
    active_width: u32,
    active_height: u32,
    active_format: CaptureFormat,
    frame_count: u64,
    opened_at: Option<Instant>,
}

#[self_referencing]
struct CameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub(crate) fn new(config: &DeviceConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            device_path: config.device.clone(),
            requested_width: config.width,
            requested_height: config.height,
            fps: config.fps,
            state: None,
            active_width: config.width,
            active_height: config.height,
            active_format: CaptureFormat::Rgb24,
            frame_count: 0,
            opened_at: None,
        })
    }

    pub(crate) fn open(&mut self) -> Result<(), PipelineError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path).map_err(|err| {
            PipelineError::SourceUnavailable(format!(
                "open v4l2 device {}: {err}",
                self.device_path
            ))
        })?;

        let mut format = device.format().map_err(|err| {
            PipelineError::SourceUnavailable(format!(
                "read v4l2 format on {}: {err}",
                self.device_path
            ))
        })?;
        format.width = self.requested_width;
        format.height = self.requested_height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {err}",
                    self.device_path
                );
                device.format().map_err(|err| {
                    PipelineError::SourceUnavailable(format!(
                        "read v4l2 format after set failure on {}: {err}",
                        self.device_path
                    ))
                })?
            }
        };

        self.active_format = match &format.fourcc.repr {
            b"RGB3" => CaptureFormat::Rgb24,
            b"NV12" => CaptureFormat::Nv12,
            other => {
                return Err(PipelineError::SourceUnavailable(format!(
                    "device {} produces unsupported pixel format {:?}",
                    self.device_path,
                    std::str::from_utf8(other).unwrap_or("????")
                )));
            }
        };
        self.active_width = format.width;
        self.active_height = format.height;

        if self.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {err}", self.device_path);
            }
        }

        // Mapping the buffer stream is what actually reserves the device.
        let state = CameraStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| {
            PipelineError::SourceUnavailable(format!(
                "create v4l2 buffer stream on {}: {err}",
                self.device_path
            ))
        })?;
        self.state = Some(state);
        self.opened_at = Some(Instant::now());
        log::info!(
            "V4l2Camera: opened {} ({}x{}, {:?})",
            self.device_path,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    pub(crate) fn read_frame(&mut self) -> Result<Frame, PipelineError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            PipelineError::ReadError("v4l2 device is not open".to_string())
        })?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| PipelineError::ReadError(format!("capture v4l2 frame: {err}")))?;

        let pixels = normalize_to_rgb(
            self.active_format,
            buf,
            self.active_width,
            self.active_height,
        )
        .map_err(|err| PipelineError::ReadError(format!("normalize v4l2 frame: {err}")))?;

        let pts_ms = self
            .opened_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let frame = Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            PixelFormat::Rgb24,
            self.frame_count,
            pts_ms,
        );
        self.frame_count += 1;
        Ok(frame)
    }

    pub(crate) fn close(&mut self) {
        // Dropping the stream and device releases the reservation.
        self.state = None;
        self.opened_at = None;
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
