//! Object detection stage.
//!
//! This module is responsible for:
//! - Selecting a detector backend from the model selector
//! - Failing construction when the model cannot be loaded
//! - Applying the confidence threshold and class filter
//! - Degrading per-frame backend errors to an empty detection set
//!
//! It MUST NOT:
//! - Abort the pipeline when a single frame fails to run
//! - Mutate or retain the frames it inspects
//! - Produce different results for the same frame and settings

mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, Detections, ObjectClass};

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::source::stub_query_params;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Detector settings.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Model selector: `stub://detector` or a path to a local `.onnx` file.
    pub model: String,
    /// Width of the frames the detector will be fed.
    pub width: u32,
    /// Height of the frames the detector will be fed.
    pub height: u32,
    /// Minimum confidence for a detection to be kept.
    pub confidence_threshold: f32,
    /// When set, only detections of these classes are kept.
    pub class_filter: Option<Vec<ObjectClass>>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: "stub://detector".to_string(),
            width: 640,
            height: 480,
            confidence_threshold: 0.25,
            class_filter: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Detector
// ----------------------------------------------------------------------------

/// Runs a detector backend over frames and filters its output.
///
/// Construction fails with `ModelUnavailable` when the selected model cannot
/// be loaded. After that, `detect` never fails: a backend error on one frame
/// is logged and yields an empty detection set for that frame.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
    confidence_threshold: f32,
    class_filter: Option<Vec<ObjectClass>>,
}

// The backend trait object carries no Debug bound; print its name instead.
impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("backend", &self.backend.name())
            .field("confidence_threshold", &self.confidence_threshold)
            .field("class_filter", &self.class_filter)
            .finish()
    }
}

impl Detector {
    pub fn new(config: &DetectorConfig) -> Result<Self, PipelineError> {
        let mut backend = select_backend(config)?;
        backend
            .warm_up()
            .map_err(|err| PipelineError::ModelUnavailable(format!("{err:#}")))?;
        log::info!(
            "Detector: backend '{}' ready for model {}",
            backend.name(),
            config.model
        );

        let mut detector = Self {
            backend,
            confidence_threshold: 0.25,
            class_filter: config.class_filter.clone(),
        };
        detector.set_confidence_threshold(config.confidence_threshold);
        Ok(detector)
    }

    /// Run detection on one frame.
    ///
    /// The returned set is tagged with `frame.seq`. Backend failures degrade
    /// to an empty set; they never propagate.
    pub fn detect(&mut self, frame: &Frame) -> Detections {
        let raw = match self.backend.detect(frame.data(), frame.width, frame.height) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!(
                    "Detector: backend '{}' failed on frame {}: {err:#}",
                    self.backend.name(),
                    frame.seq
                );
                return Detections::empty(frame.seq);
            }
        };

        let items = raw
            .into_iter()
            .filter(|det| det.confidence >= self.confidence_threshold)
            .filter(|det| {
                self.class_filter
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(&det.class))
            })
            .collect();

        Detections {
            frame_seq: frame.seq,
            items,
        }
    }

    /// Update the confidence threshold. Out-of-range values are clamped to
    /// 0.0..=1.0; NaN is ignored.
    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        if threshold.is_nan() {
            log::warn!("Detector: ignoring NaN confidence threshold");
            return;
        }
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    /// Replace the class filter. `None` keeps every class.
    pub fn set_class_filter(&mut self, filter: Option<Vec<ObjectClass>>) {
        self.class_filter = filter;
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

fn select_backend(config: &DetectorConfig) -> Result<Box<dyn DetectorBackend>, PipelineError> {
    let model = config.model.trim();
    if model.is_empty() {
        return Err(PipelineError::ModelUnavailable(
            "model selector is empty".to_string(),
        ));
    }

    if let Some(rest) = model.strip_prefix("stub://") {
        let name = rest.split('?').next().unwrap_or(rest);
        if name != "detector" {
            return Err(PipelineError::ModelUnavailable(format!(
                "unknown stub model '{model}'"
            )));
        }
        let mut fail_every = None;
        for (key, value) in stub_query_params(model) {
            if key == "fail-every" {
                fail_every = value.parse::<u64>().ok();
            }
        }
        return Ok(Box::new(StubBackend::new(fail_every)));
    }

    #[cfg(feature = "backend-tract")]
    {
        let backend = TractBackend::new(model, config.width, config.height)
            .map_err(|err| PipelineError::ModelUnavailable(format!("{err:#}")))?;
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    Err(PipelineError::ModelUnavailable(format!(
        "loading model files such as {model} requires the backend-tract feature"
    )))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
