#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};

/// Tract-based backend for ONNX box detectors.
///
/// Loads a local model file and runs inference on RGB frames. The model is
/// expected to emit rows of `[x1, y1, x2, y2, confidence, class]` in pixel
/// coordinates of the input frame. No network I/O.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }

        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;

        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn parse_boxes(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let values: Vec<f32> = view.iter().copied().collect();
        if values.len() % 6 != 0 {
            return Err(anyhow!(
                "model output has {} values, expected rows of 6 (x1, y1, x2, y2, confidence, class)",
                values.len()
            ));
        }

        let mut detections = Vec::new();
        for row in values.chunks_exact(6) {
            let (x1, y1, x2, y2, confidence, class_idx) =
                (row[0], row[1], row[2], row[3], row[4], row[5]);
            if !confidence.is_finite() || confidence <= 0.0 {
                continue;
            }
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            detections.push(Detection {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence,
                class: class_from_index(class_idx),
            });
        }

        Ok(detections)
    }
}

fn class_from_index(raw: f32) -> ObjectClass {
    if !raw.is_finite() || raw < 0.0 {
        return ObjectClass::Unknown;
    }
    match raw.round() as u32 {
        0 => ObjectClass::Person,
        1 => ObjectClass::Vehicle,
        2 => ObjectClass::Animal,
        3 => ObjectClass::Package,
        _ => ObjectClass::Unknown,
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.parse_boxes(outputs)
    }

    /// Push one blank frame through the model so shape or dtype problems
    /// surface at construction instead of on the first live frame.
    fn warm_up(&mut self) -> Result<()> {
        let blank = vec![0u8; (self.width as usize) * (self.height as usize) * 3];
        let input = self.build_input(&blank, self.width, self.height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX warm-up inference failed")?;
        self.parse_boxes(outputs).map(|_| ())
    }
}
