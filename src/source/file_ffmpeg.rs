//! FFmpeg-backed media decoding (feature: decode-ffmpeg).
//!
//! Decodes mp4/avi/anything-ffmpeg-reads into RGB24 frames, in memory.
//! Seeking goes through the container's keyframe index, so a seek lands on
//! the nearest preceding decodable frame; the frames decoded afterwards
//! carry timestamps from the media, and sequence numbers are re-derived
//! from those after a seek.

use ffmpeg_next as ffmpeg;

use crate::error::PipelineError;
use crate::frame::{Frame, PixelFormat};

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    time_base: ffmpeg::Rational,
    fps: u32,
    total_frames: Option<u64>,
    eof_sent: bool,
    reseq_from_pts: bool,
}

pub(crate) struct FfmpegClip {
    path: String,
    state: Option<DecodeState>,
    next_seq: u64,
    frames_decoded: u64,
}

impl FfmpegClip {
    pub(crate) fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            state: None,
            next_seq: 0,
            frames_decoded: 0,
        }
    }

    pub(crate) fn open(&mut self) -> Result<(), PipelineError> {
        ffmpeg::init().map_err(|err| {
            PipelineError::SourceUnavailable(format!("initialize ffmpeg: {err}"))
        })?;
        let input = ffmpeg::format::input(&self.path).map_err(|err| {
            PipelineError::SourceUnavailable(format!("open '{}' with ffmpeg: {err}", self.path))
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| {
                PipelineError::SourceUnavailable(format!("'{}' has no video track", self.path))
            })?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();

        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() > 0 {
            ((rate.numerator() as f64 / rate.denominator() as f64).round() as u32).max(1)
        } else {
            30
        };

        let total_frames = if input_stream.frames() > 0 {
            Some(input_stream.frames() as u64)
        } else if input_stream.duration() > 0 && time_base.denominator() > 0 {
            let secs = input_stream.duration() as f64 * time_base.numerator() as f64
                / time_base.denominator() as f64;
            Some((secs * fps as f64).round() as u64)
        } else {
            None
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|err| {
                PipelineError::SourceUnavailable(format!(
                    "load decoder parameters for '{}': {err}",
                    self.path
                ))
            })?;
        let decoder = context.decoder().video().map_err(|err| {
            PipelineError::SourceUnavailable(format!(
                "open video decoder for '{}': {err}",
                self.path
            ))
        })?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|err| {
            PipelineError::SourceUnavailable(format!("create scaler for '{}': {err}", self.path))
        })?;

        self.state = Some(DecodeState {
            input,
            stream_index,
            decoder,
            scaler,
            time_base,
            fps,
            total_frames,
            eof_sent: false,
            reseq_from_pts: false,
        });
        self.next_seq = 0;
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.state = None;
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        let state = self.state.as_mut().ok_or_else(|| {
            PipelineError::ReadError("media file is not open".to_string())
        })?;

        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();

        loop {
            if state.decoder.receive_frame(&mut decoded).is_ok() {
                state
                    .scaler
                    .run(&decoded, &mut rgb_frame)
                    .map_err(|err| PipelineError::ReadError(format!("scale frame: {err}")))?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

                let pts_ms = pts_to_ms(decoded.pts(), state.time_base);
                if state.reseq_from_pts {
                    self.next_seq = pts_ms * state.fps as u64 / 1000;
                    state.reseq_from_pts = false;
                }
                let seq = self.next_seq;
                self.next_seq += 1;
                self.frames_decoded += 1;

                return Ok(Frame::new(
                    pixels,
                    width,
                    height,
                    PixelFormat::Rgb24,
                    seq,
                    pts_ms,
                ));
            }

            if state.eof_sent {
                return Err(PipelineError::EndOfStream);
            }

            let mut fed = false;
            if let Some((stream, packet)) = state.input.packets().next() {
                if stream.index() == state.stream_index {
                    state.decoder.send_packet(&packet).map_err(|err| {
                        PipelineError::ReadError(format!("send packet to decoder: {err}"))
                    })?;
                }
                fed = true;
            }
            if !fed {
                let _ = state.decoder.send_eof();
                state.eof_sent = true;
            }
        }
    }

    /// Seek via the container index. Compressed media lands on the nearest
    /// preceding keyframe; the returned index is the clamped request, and
    /// sequence numbers resynchronize from media timestamps on the next
    /// decoded frame.
    pub(crate) fn seek(&mut self, frame_index: u64) -> Result<u64, PipelineError> {
        let state = self.state.as_mut().ok_or_else(|| {
            PipelineError::ReadError("media file is not open".to_string())
        })?;

        let clamped = match state.total_frames {
            Some(total) => frame_index.min(total),
            None => frame_index,
        };
        let target_us = clamped as i64 * 1_000_000 / state.fps.max(1) as i64;
        state
            .input
            .seek(target_us, ..target_us)
            .map_err(|err| PipelineError::ReadError(format!("seek in media: {err}")))?;
        state.decoder.flush();
        state.eof_sent = false;
        state.reseq_from_pts = true;
        Ok(clamped)
    }

    pub(crate) fn total_frames(&self) -> Option<u64> {
        self.state.as_ref().and_then(|s| s.total_frames)
    }

    pub(crate) fn fps(&self) -> u32 {
        self.state.as_ref().map(|s| s.fps).unwrap_or(30)
    }

    pub(crate) fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

fn pts_to_ms(pts: Option<i64>, time_base: ffmpeg::Rational) -> u64 {
    let Some(pts) = pts else { return 0 };
    if pts <= 0 || time_base.denominator() == 0 {
        return 0;
    }
    (pts as i128 * 1000 * time_base.numerator() as i128 / time_base.denominator() as i128).max(0)
        as u64
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), PipelineError> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or_else(|| {
            PipelineError::ReadError("ffmpeg frame row is out of bounds".to_string())
        })?);
    }

    Ok((pixels, width, height))
}
