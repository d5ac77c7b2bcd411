use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::PipelineError;

/// Named handle on a loaded detector backend.
///
/// The adapter is the sole integration point with the underlying vision
/// model. It owns the two boundary concerns the rest of the pipeline relies
/// on: wall-clock timing measured around the backend call, and clamping of
/// reported confidences into [0, 1].
///
/// Cloning is cheap; clones share the backend. The backend is wrapped in
/// `Mutex` because `DetectorBackend::detect` takes `&mut self`.
#[derive(Clone)]
pub struct DetectorAdapter {
    model_name: String,
    backend: Arc<Mutex<dyn DetectorBackend>>,
}

impl DetectorAdapter {
    pub fn new<B: DetectorBackend + 'static>(model_name: impl Into<String>, backend: B) -> Self {
        Self {
            model_name: model_name.into(),
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Run detection, measuring wall-clock elapsed time around the backend
    /// invocation. The image is never mutated.
    pub fn detect(
        &self,
        image: &RgbImage,
        threshold: f32,
    ) -> Result<(Vec<Detection>, Duration), PipelineError> {
        let mut backend = self.backend.lock().map_err(|_| PipelineError::Inference {
            model: self.model_name.clone(),
            reason: "backend lock poisoned".to_string(),
        })?;

        let start = Instant::now();
        let result = backend.detect(image.as_raw(), image.width(), image.height(), threshold);
        let duration = start.elapsed();

        let mut detections = result.map_err(|e| e.with_model(&self.model_name))?;
        for detection in &mut detections {
            detection.confidence = detection.confidence.clamp(0.0, 1.0);
        }
        Ok((detections, duration))
    }
}
