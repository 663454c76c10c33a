use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};

/// Stub backend for testing. Derives bounding boxes from a hash of the
/// pixel content, so results are a pure function of the frame: the same
/// frame always produces the same boxes, different frames usually differ.
///
/// `fail_every = Some(n)` makes every n-th `detect` call return an error,
/// which exercises the degraded-detection path without a broken model.
pub struct StubBackend {
    fail_every: Option<u64>,
    calls: u64,
}

impl StubBackend {
    pub fn new(fail_every: Option<u64>) -> Self {
        Self {
            fail_every,
            calls: 0,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        self.calls += 1;
        if let Some(n) = self.fail_every {
            if n > 0 && self.calls % n == 0 {
                return Err(anyhow!("injected detector failure on call {}", self.calls));
            }
        }

        let digest: [u8; 32] = Sha256::digest(pixels).into();
        let count = (digest[0] % 3) as usize;
        let frame_w = width as f32;
        let frame_h = height as f32;

        let mut detections = Vec::with_capacity(count);
        for i in 0..count {
            let b = &digest[1 + i * 8..9 + i * 8];
            let box_w = (8.0 + (b[2] as f32 / 255.0) * (frame_w / 3.0)).min(frame_w);
            let box_h = (8.0 + (b[3] as f32 / 255.0) * (frame_h / 3.0)).min(frame_h);
            let x = (b[0] as f32 / 255.0) * (frame_w - box_w).max(0.0);
            let y = (b[1] as f32 / 255.0) * (frame_h - box_h).max(0.0);
            let confidence = b[4] as f32 / 255.0;
            let class = match b[5] % 4 {
                0 => ObjectClass::Person,
                1 => ObjectClass::Vehicle,
                2 => ObjectClass::Animal,
                _ => ObjectClass::Package,
            };
            detections.push(Detection {
                x,
                y,
                width: box_w,
                height: box_h,
                confidence,
                class,
            });
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pixels_same_boxes() {
        let pixels = vec![42u8; 64 * 48 * 3];
        let mut a = StubBackend::default();
        let mut b = StubBackend::default();

        let first = a.detect(&pixels, 64, 48).unwrap();
        let second = b.detect(&pixels, 64, 48).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn boxes_stay_inside_the_frame() {
        let mut backend = StubBackend::default();
        for seed in 0..16u8 {
            let pixels = vec![seed; 64 * 48 * 3];
            for det in backend.detect(&pixels, 64, 48).unwrap() {
                assert!(det.x >= 0.0 && det.y >= 0.0);
                assert!(det.x + det.width <= 64.0 + f32::EPSILON);
                assert!(det.y + det.height <= 48.0 + f32::EPSILON);
                assert!((0.0..=1.0).contains(&det.confidence));
            }
        }
    }

    #[test]
    fn fail_every_trips_on_schedule() {
        let pixels = vec![7u8; 32 * 32 * 3];
        let mut backend = StubBackend::new(Some(3));

        assert!(backend.detect(&pixels, 32, 32).is_ok());
        assert!(backend.detect(&pixels, 32, 32).is_ok());
        assert!(backend.detect(&pixels, 32, 32).is_err());
        assert!(backend.detect(&pixels, 32, 32).is_ok());
    }
}
