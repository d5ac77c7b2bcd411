#![cfg(feature = "backend-tract")]

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::PipelineError;

/// Tract-based ONNX detection backend.
///
/// Loads a local model file once and runs inference on RGB8 images. Expects
/// a post-NMS output head of shape `[1, N, 6]` with rows
/// `(x_min, y_min, x_max, y_max, score, class_id)` in model-input
/// coordinates, the layout produced by detection models exported with NMS
/// fused for serving.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let model_path = model_path.as_ref();
        let unavailable = |reason: String| PipelineError::ModelUnavailable {
            model: model_path.display().to_string(),
            reason,
        };

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| unavailable(format!("failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .map_err(|e| unavailable(format!("failed to set input fact: {e}")))?
            .into_optimized()
            .map_err(|e| unavailable(format!("failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| unavailable(format!("failed to build runnable model: {e}")))?;

        Ok(Self {
            model,
            input_size,
            class_names,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor, PipelineError> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| inference_error("frame dimensions overflow".to_string()))?;
        if pixels.len() != expected_len {
            return Err(inference_error(format!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            )));
        }

        let image = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| inference_error("pixel buffer does not match dimensions".to_string()))?;
        let resized = image::imageops::resize(
            &image,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );

        let side = self.input_size as usize;
        let input =
            tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
                resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
            });
        Ok(input.into_tensor())
    }

    fn decode_output(
        &self,
        outputs: TVec<TValue>,
        source_width: u32,
        source_height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>, PipelineError> {
        let output = outputs
            .first()
            .ok_or_else(|| inference_error("model produced no outputs".to_string()))?;
        let rows = output
            .to_array_view::<f32>()
            .map_err(|e| inference_error(format!("model output tensor was not f32: {e}")))?;
        let shape = rows.shape().to_vec();
        if shape.len() != 3 || shape[2] < 6 {
            return Err(inference_error(format!(
                "unexpected output shape {shape:?}, expected [1, N, 6]"
            )));
        }

        // Scale from model-input coordinates back to the source image.
        let scale_x = source_width as f32 / self.input_size as f32;
        let scale_y = source_height as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for row in rows.index_axis(tract_ndarray::Axis(0), 0).outer_iter() {
            let score = row[4];
            if score < threshold {
                continue;
            }
            let class_id = row[5] as usize;
            let label = self
                .class_names
                .get(class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{class_id}"));
            let bbox = BoundingBox::new(
                row[0] * scale_x,
                row[1] * scale_y,
                row[2] * scale_x,
                row[3] * scale_y,
            );
            detections.push(Detection::new(label, score.clamp(0.0, 1.0), bbox));
        }
        Ok(detections)
    }
}

fn inference_error(reason: String) -> PipelineError {
    PipelineError::Inference {
        model: "tract".to_string(),
        reason,
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>, PipelineError> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| inference_error(format!("ONNX inference failed: {e}")))?;
        self.decode_output(outputs, width, height, threshold)
    }
}
