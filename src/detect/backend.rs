use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// # Determinism
///
/// Backends MUST be deterministic: the same pixel content at the same
/// dimensions produces the same detections, in the same order. Consumers
/// rely on this to reproduce results when replaying a recording.
///
/// Implementations must treat the pixel slice as read-only and ephemeral,
/// and must not block on I/O inside `detect`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one RGB24 frame.
    ///
    /// Returns raw candidates; confidence thresholding and class filtering
    /// happen in the caller.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
