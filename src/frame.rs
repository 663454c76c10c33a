//! Frame type shared by every pipeline stage.
//!
//! - `Frame`: one decoded image plus capture metadata. Pixel bytes are
//!   private; stages read them through [`Frame::data`] and nothing outside
//!   this crate can construct one or mutate one in place. Annotation makes
//!   a new frame rather than editing the published one.
//! - `PixelFormat`: the format of a frame's bytes. Sources normalize to
//!   `Rgb24` before frames enter the pipeline.
//!
//! Sequence numbers increase monotonically per source and survive a round
//! trip through the native recording container, which is how the recording
//! tests prove ordering.

use std::fmt;

// ----------------------------------------------------------------------------
// PixelFormat
// ----------------------------------------------------------------------------

/// Byte layout of a frame's pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, row-major, no padding. `width * height * 3` bytes.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Checked buffer length for an RGB24 frame of the given dimensions.
pub(crate) fn rgb24_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(3)
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable decoded frame. Produced by a source, consumed read-only by
/// the detector, annotator, writer, and UI.
#[derive(Clone)]
pub struct Frame {
    /// Private pixel data. Read via `data()`; never publicly mutable.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Monotonically increasing per-source sequence number, starting at 0.
    pub seq: u64,

    /// Presentation timestamp in milliseconds, relative to source open
    /// (live) or to the start of the media (file).
    pub pts_ms: u64,
}

impl Frame {
    /// Called only by sources and the annotator. `data` must already match
    /// `format` for the given dimensions.
    pub(crate) fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        seq: u64,
        pts_ms: u64,
    ) -> Self {
        debug_assert_eq!(
            Some(data.len()),
            rgb24_len(width, height),
            "pixel buffer does not match dimensions"
        );
        Self {
            data,
            width,
            height,
            format,
            seq,
            pts_ms,
        }
    }

    /// Read-only pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Same metadata, replacement pixels. Used by annotation to produce the
    /// drawn-over copy; the buffer length must not change.
    pub(crate) fn with_pixels(&self, data: Vec<u8>) -> Frame {
        debug_assert_eq!(data.len(), self.data.len());
        Frame {
            data,
            width: self.width,
            height: self.height,
            format: self.format,
            seq: self.seq,
            pts_ms: self.pts_ms,
        }
    }
}

// Pixel content never goes to logs; Debug prints metadata only.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("seq", &self.seq)
            .field("pts_ms", &self.pts_ms)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Deterministic frame for tests in this crate.
#[cfg(test)]
pub(crate) fn make_test_frame(width: u32, height: u32, seq: u64) -> Frame {
    let len = rgb24_len(width, height).unwrap();
    let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
    Frame::new(data, width, height, PixelFormat::Rgb24, seq, seq * 33)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_exposes_metadata_and_read_only_pixels() {
        let frame = make_test_frame(4, 2, 7);
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.data().len(), 4 * 2 * 3);
        assert_eq!(frame.byte_len(), frame.data().len());
    }

    #[test]
    fn with_pixels_keeps_metadata() {
        let frame = make_test_frame(4, 2, 3);
        let replaced = frame.with_pixels(vec![0xAB; frame.byte_len()]);
        assert_eq!(replaced.seq, frame.seq);
        assert_eq!(replaced.pts_ms, frame.pts_ms);
        assert_eq!(replaced.width, frame.width);
        assert!(replaced.data().iter().all(|&b| b == 0xAB));
        // the original is untouched
        assert_ne!(frame.data(), replaced.data());
    }

    #[test]
    fn rgb24_len_rejects_overflowing_dimensions() {
        assert_eq!(rgb24_len(4, 2), Some(24));
        assert!(rgb24_len(u32::MAX, u32::MAX).is_none());
    }

    #[test]
    fn debug_output_omits_pixel_content() {
        let frame = make_test_frame(4, 2, 1);
        let printed = format!("{frame:?}");
        assert!(printed.contains("seq"));
        assert!(!printed.contains("[0,"));
    }
}
