//! FFmpeg segment encoding (feature: encode-ffmpeg).
//!
//! Encodes RGB24 frames to mp4/avi through an MPEG-4 encoder; the muxer is
//! picked from the file extension. `finalize()` drains the encoder and
//! writes the container trailer, so a finalized file plays anywhere.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use crate::frame::Frame;

pub(crate) struct FfmpegWriter {
    octx: ffmpeg::format::context::Output,
    encoder: ffmpeg::codec::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    in_time_base: ffmpeg::Rational,
    out_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    frame_index: i64,
    frames_written: u64,
    bytes_written: u64,
}

impl FfmpegWriter {
    pub(crate) fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut octx = ffmpeg::format::output(&path)
            .with_context(|| format!("open output {}", path.display()))?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("mpeg4 encoder is not available in this ffmpeg build"))?;
        let mut ost = octx.add_stream(codec).context("add video stream")?;
        let stream_index = ost.index();

        let in_time_base = ffmpeg::Rational::new(1, fps.max(1) as i32);
        let mut video = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(ffmpeg::util::format::pixel::Pixel::YUV420P);
        video.set_time_base(in_time_base);
        video.set_frame_rate(Some(ffmpeg::Rational::new(fps.max(1) as i32, 1)));
        if global_header {
            video.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = video
            .open_with(ffmpeg::Dictionary::new())
            .context("open mpeg4 encoder")?;
        ost.set_parameters(&encoder);
        drop(ost);

        octx.write_header()
            .with_context(|| format!("write container header to {}", path.display()))?;
        let out_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(in_time_base);

        let scaler = ffmpeg::software::scaling::context::Context::get(
            ffmpeg::util::format::pixel::Pixel::RGB24,
            width,
            height,
            ffmpeg::util::format::pixel::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create encoder scaler")?;

        Ok(Self {
            octx,
            encoder,
            scaler,
            stream_index,
            in_time_base,
            out_time_base,
            width,
            height,
            frame_index: 0,
            frames_written: 0,
            bytes_written: 0,
        })
    }

    pub(crate) fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame is {}x{} but encoder is {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        let mut src = ffmpeg::frame::Video::new(
            ffmpeg::util::format::pixel::Pixel::RGB24,
            self.width,
            self.height,
        );
        let row_bytes = (self.width as usize) * 3;
        let stride = src.stride(0);
        let data = src.data_mut(0);
        for row in 0..self.height as usize {
            let dst_start = row * stride;
            let src_start = row * row_bytes;
            data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&frame.data()[src_start..src_start + row_bytes]);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&src, &mut yuv)
            .context("convert frame to YUV420P")?;
        yuv.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.encoder
            .send_frame(&yuv)
            .context("send frame to encoder")?;
        self.frames_written += 1;
        self.drain_packets()
    }

    /// Flush the encoder and write the container trailer.
    pub(crate) fn finalize(mut self) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain_packets()?;
        self.octx.write_trailer().context("write container trailer")
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.in_time_base, self.out_time_base);
            self.bytes_written += packet.size() as u64;
            packet
                .write_interleaved(&mut self.octx)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}
