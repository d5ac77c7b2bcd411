use crate::detect::result::Detection;
use crate::PipelineError;

/// Detector backend trait.
///
/// Each implementation wraps one loaded model. Backends receive a read-only
/// RGB8 pixel slice and must not retain it beyond the `detect` call. Model
/// weights are loaded once at construction and are read-only afterwards, so
/// a backend behind an adapter can be shared across invocations.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB8 image.
    ///
    /// Returns only detections whose model-reported confidence meets
    /// `threshold`, in the order the model produced them. Errors carry no
    /// model attribution; the adapter attaches its model name.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>, PipelineError>;
}
