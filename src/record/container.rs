//! Native recording container (cwr).
//!
//! A deliberately simple frame container so recording and playback work on
//! any build, with no codec stack: fixed header, fixed-size frame records,
//! finalizing footer. All integers little-endian.
//!
//! - Header: magic `CWR1`, version, width, height, fps, pixel format
//! - Frame record: seq u64, pts_ms u64, payload length u32, RGB24 payload
//! - Footer: magic `CWRE`, frame count u64, duration_ms u64
//!
//! Records are the same size throughout one file, so seeking to a frame is
//! arithmetic, and the stored sequence numbers round-trip for the ordering
//! checks in the recording tests. A file whose process died before
//! `finalize()` has no footer; the reader then derives the frame count by
//! scanning and ignores a partial tail record. Decoding validates the
//! magic, version, dimensions, and every record bound before trusting them.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::frame::{rgb24_len, Frame, PixelFormat};

const MAGIC: &[u8; 4] = b"CWR1";
const FOOTER_MAGIC: &[u8; 4] = b"CWRE";
const VERSION: u8 = 1;

/// magic + version + width + height + fps + pixel format
const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 4 + 1;
/// seq + pts_ms + payload length
const RECORD_HEADER_LEN: usize = 8 + 8 + 4;
/// magic + frame count + duration_ms
const FOOTER_LEN: usize = 4 + 8 + 8;

/// Dimension cap; rejects absurd headers before any allocation happens.
const MAX_DIMENSION: u32 = 8192;
const MAX_FPS: u32 = 240;

const FORMAT_RGB24: u8 = 0;

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

pub(crate) struct ContainerWriter {
    file: BufWriter<File>,
    path: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    frame_len: usize,
    frames_written: u64,
    bytes_written: u64,
}

impl ContainerWriter {
    pub(crate) fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        validate_shape(width, height, fps)?;
        let frame_len = rgb24_len(width, height)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let file = File::create(path)
            .with_context(|| format!("create recording file {}", path.display()))?;
        let mut writer = Self {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            width,
            height,
            fps,
            frame_len,
            frames_written: 0,
            bytes_written: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(VERSION);
        header.extend_from_slice(&self.width.to_le_bytes());
        header.extend_from_slice(&self.height.to_le_bytes());
        header.extend_from_slice(&self.fps.to_le_bytes());
        header.push(FORMAT_RGB24);
        self.file
            .write_all(&header)
            .with_context(|| format!("write header to {}", self.path.display()))?;
        self.bytes_written += header.len() as u64;
        Ok(())
    }

    pub(crate) fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame is {}x{} but recording is {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        if frame.byte_len() != self.frame_len {
            return Err(anyhow!("frame payload does not match recording format"));
        }
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN);
        record.extend_from_slice(&frame.seq.to_le_bytes());
        record.extend_from_slice(&frame.pts_ms.to_le_bytes());
        record.extend_from_slice(&(self.frame_len as u32).to_le_bytes());
        self.file
            .write_all(&record)
            .and_then(|_| self.file.write_all(frame.data()))
            .with_context(|| format!("write frame to {}", self.path.display()))?;
        self.frames_written += 1;
        self.bytes_written += (RECORD_HEADER_LEN + self.frame_len) as u64;
        Ok(())
    }

    /// Write the footer and force everything to disk. After this returns,
    /// the file decodes on its own even if the process dies immediately.
    pub(crate) fn finalize(mut self) -> Result<u64> {
        let duration_ms = self.frames_written * 1000 / self.fps.max(1) as u64;
        let mut footer = Vec::with_capacity(FOOTER_LEN);
        footer.extend_from_slice(FOOTER_MAGIC);
        footer.extend_from_slice(&self.frames_written.to_le_bytes());
        footer.extend_from_slice(&duration_ms.to_le_bytes());
        self.file
            .write_all(&footer)
            .with_context(|| format!("write footer to {}", self.path.display()))?;
        self.file
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))?;
        self.file
            .get_ref()
            .sync_all()
            .with_context(|| format!("sync {}", self.path.display()))?;
        Ok(self.frames_written)
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// One frame as stored: sequence number, timestamp, raw RGB24 payload.
pub(crate) struct StoredFrame {
    pub seq: u64,
    pub pts_ms: u64,
    pub pixels: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct ContainerReader {
    file: BufReader<File>,
    path: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    frame_len: usize,
    total_frames: u64,
    duration_ms: u64,
    cursor: u64,
}

impl ContainerReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("open recording {}", path.display()))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("stat recording {}", path.display()))?
            .len();
        let mut file = BufReader::new(file);

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| anyhow!("recording is truncated before the header"))?;
        let mut cursor = 0usize;
        let magic = read_slice(&header, &mut cursor, 4)?;
        if magic != MAGIC {
            return Err(anyhow!("not a cwr recording (bad magic)"));
        }
        let version = read_u8(&header, &mut cursor)?;
        if version != VERSION {
            return Err(anyhow!("unsupported cwr version {version}"));
        }
        let width = read_u32(&header, &mut cursor)?;
        let height = read_u32(&header, &mut cursor)?;
        let fps = read_u32(&header, &mut cursor)?;
        validate_shape(width, height, fps)?;
        let format = read_u8(&header, &mut cursor)?;
        if format != FORMAT_RGB24 {
            return Err(anyhow!("unsupported cwr pixel format {format}"));
        }
        let frame_len = rgb24_len(width, height)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let record_len = (RECORD_HEADER_LEN + frame_len) as u64;

        // Finalized files end with a footer; a crash leaves records only,
        // in which case the frame count comes from the file size and any
        // partial tail record is ignored.
        let body_len = file_len - HEADER_LEN as u64;
        let (total_frames, duration_ms) = match try_read_footer(&mut file, file_len)? {
            Some((frames, duration_ms)) => {
                let records = body_len - FOOTER_LEN as u64;
                if records != frames * record_len {
                    return Err(anyhow!(
                        "recording footer claims {frames} frames but the file holds {} record bytes",
                        records
                    ));
                }
                (frames, duration_ms)
            }
            None => {
                let frames = body_len / record_len;
                log::warn!(
                    "ContainerReader: {} has no footer (unclean shutdown), scanned {} frames",
                    path.display(),
                    frames
                );
                (frames, frames * 1000 / fps.max(1) as u64)
            }
        };

        file.seek(SeekFrom::Start(HEADER_LEN as u64))
            .context("seek to first frame record")?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            width,
            height,
            fps,
            frame_len,
            total_frames,
            duration_ms,
            cursor: 0,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<StoredFrame>> {
        if self.cursor >= self.total_frames {
            return Ok(None);
        }
        let mut record_header = [0u8; RECORD_HEADER_LEN];
        self.file
            .read_exact(&mut record_header)
            .with_context(|| format!("read frame record in {}", self.path.display()))?;
        let mut cursor = 0usize;
        let seq = read_u64(&record_header, &mut cursor)?;
        let pts_ms = read_u64(&record_header, &mut cursor)?;
        let payload_len = read_u32(&record_header, &mut cursor)? as usize;
        if payload_len != self.frame_len {
            return Err(anyhow!(
                "frame record payload length {} does not match recording format ({})",
                payload_len,
                self.frame_len
            ));
        }
        let mut pixels = vec![0u8; self.frame_len];
        self.file
            .read_exact(&mut pixels)
            .with_context(|| format!("read frame payload in {}", self.path.display()))?;
        self.cursor += 1;
        Ok(Some(StoredFrame {
            seq,
            pts_ms,
            pixels,
        }))
    }

    /// O(1) seek: records are fixed-size, so the byte offset of frame N is
    /// arithmetic. Past-the-end requests clamp to the end.
    pub(crate) fn seek(&mut self, frame_index: u64) -> Result<u64> {
        let clamped = frame_index.min(self.total_frames);
        let record_len = (RECORD_HEADER_LEN + self.frame_len) as u64;
        let offset = HEADER_LEN as u64 + clamped * record_len;
        self.file
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("seek in {}", self.path.display()))?;
        self.cursor = clamped;
        Ok(clamped)
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn fps(&self) -> u32 {
        self.fps
    }

    pub(crate) fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub(crate) fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

fn validate_shape(width: u32, height: u32, fps: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(anyhow!(
            "dimensions {width}x{height} are outside 1..={MAX_DIMENSION}"
        ));
    }
    if fps == 0 || fps > MAX_FPS {
        return Err(anyhow!("fps {fps} is outside 1..={MAX_FPS}"));
    }
    Ok(())
}

fn try_read_footer(file: &mut BufReader<File>, file_len: u64) -> Result<Option<(u64, u64)>> {
    if file_len < (HEADER_LEN + FOOTER_LEN) as u64 {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(file_len - FOOTER_LEN as u64))
        .context("seek to footer")?;
    let mut footer = [0u8; FOOTER_LEN];
    file.read_exact(&mut footer).context("read footer")?;
    if &footer[..4] != FOOTER_MAGIC {
        return Ok(None);
    }
    let mut cursor = 4usize;
    let frames = read_u64(&footer, &mut cursor)?;
    let duration_ms = read_u64(&footer, &mut cursor)?;
    Ok(Some((frames, duration_ms)))
}

// ----------------------------------------------------------------------------
// Bounded in-memory parsing helpers
// ----------------------------------------------------------------------------

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor + 1 > bytes.len() {
        return Err(anyhow!("invalid cwr encoding"));
    }
    let out = bytes[*cursor];
    *cursor += 1;
    Ok(out)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let slice = read_slice(bytes, cursor, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(u64::from_le_bytes(buf))
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *cursor + len > bytes.len() {
        return Err(anyhow!("invalid cwr encoding"));
    }
    let out = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(out)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(width: u32, height: u32, seq: u64) -> Frame {
        let len = rgb24_len(width, height).unwrap();
        let data: Vec<u8> = (0..len).map(|i| ((i as u64 + seq) % 256) as u8).collect();
        Frame::new(data, width, height, PixelFormat::Rgb24, seq, seq * 100)
    }

    fn write_recording(path: &Path, frames: u64) -> Result<()> {
        let mut writer = ContainerWriter::create(path, 8, 6, 10)?;
        for seq in 0..frames {
            writer.write_frame(&make_frame(8, 6, seq))?;
        }
        writer.finalize()?;
        Ok(())
    }

    #[test]
    fn recording_round_trips_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.cwr");
        write_recording(&path, 5)?;

        let mut reader = ContainerReader::open(&path)?;
        assert_eq!(reader.width(), 8);
        assert_eq!(reader.height(), 6);
        assert_eq!(reader.fps(), 10);
        assert_eq!(reader.total_frames(), 5);
        assert_eq!(reader.duration_ms(), 500);

        for expected_seq in 0..5u64 {
            let stored = reader.next_frame()?.expect("frame present");
            assert_eq!(stored.seq, expected_seq);
            assert_eq!(stored.pts_ms, expected_seq * 100);
            assert_eq!(stored.pixels, make_frame(8, 6, expected_seq).data());
        }
        assert!(reader.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn seek_is_exact_and_clamps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.cwr");
        write_recording(&path, 10)?;

        let mut reader = ContainerReader::open(&path)?;
        assert_eq!(reader.seek(7)?, 7);
        assert_eq!(reader.next_frame()?.unwrap().seq, 7);
        assert_eq!(reader.seek(500)?, 10);
        assert!(reader.next_frame()?.is_none());
        assert_eq!(reader.seek(0)?, 0);
        assert_eq!(reader.next_frame()?.unwrap().seq, 0);
        Ok(())
    }

    #[test]
    fn footerless_recording_is_scanned() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.cwr");
        write_recording(&path, 4)?;

        // Chop off the footer and add a partial tail record, as an unclean
        // shutdown would leave it.
        let mut bytes = std::fs::read(&path)?;
        bytes.truncate(bytes.len() - FOOTER_LEN);
        bytes.extend_from_slice(&[0u8; 11]);
        let crashed = dir.path().join("crashed.cwr");
        std::fs::write(&crashed, &bytes)?;

        let mut reader = ContainerReader::open(&crashed)?;
        assert_eq!(reader.total_frames(), 4);
        let mut seen = 0;
        while reader.next_frame()?.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 4);
        Ok(())
    }

    #[test]
    fn decode_rejects_bad_magic_and_truncation() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let garbage = dir.path().join("garbage.cwr");
        std::fs::write(&garbage, b"not a recording at all")?;
        assert!(ContainerReader::open(&garbage).is_err());

        let short = dir.path().join("short.cwr");
        std::fs::write(&short, b"CWR1")?;
        assert!(ContainerReader::open(&short).is_err());
        Ok(())
    }

    #[test]
    fn decode_rejects_hostile_header_dimensions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("hostile.cwr");

        let mut hostile = Vec::new();
        hostile.extend_from_slice(MAGIC);
        hostile.push(VERSION);
        hostile.extend_from_slice(&u32::MAX.to_le_bytes());
        hostile.extend_from_slice(&u32::MAX.to_le_bytes());
        hostile.extend_from_slice(&10u32.to_le_bytes());
        hostile.push(FORMAT_RGB24);
        std::fs::write(&path, &hostile)?;

        let result = ContainerReader::open(&path);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("outside 1..="));
        Ok(())
    }

    #[test]
    fn decode_rejects_mismatched_record_length() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.cwr");
        write_recording(&path, 2)?;

        // Corrupt the first record's payload length field.
        let mut bytes = std::fs::read(&path)?;
        let len_offset = HEADER_LEN + 8 + 8;
        bytes[len_offset..len_offset + 4].copy_from_slice(&9999u32.to_le_bytes());
        let corrupt = dir.path().join("corrupt.cwr");
        std::fs::write(&corrupt, &bytes)?;

        // The footer still matches, so the file opens; the bad record is
        // caught when it is read.
        let mut reader = ContainerReader::open(&corrupt)?;
        assert!(reader.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn writer_rejects_mismatched_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.cwr");
        let mut writer = ContainerWriter::create(&path, 8, 6, 10)?;
        assert!(writer.write_frame(&make_frame(4, 4, 0)).is_err());
        Ok(())
    }
}
