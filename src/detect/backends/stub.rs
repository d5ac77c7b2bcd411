use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::PipelineError;

/// Scripted backend for tests and smoke runs.
///
/// Returns a fixed detection list filtered by the requested threshold, or an
/// injected failure. The shared call counter lets tests assert whether
/// inference was attempted at all.
pub struct StubBackend {
    script: Vec<Detection>,
    failure: Option<String>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new(script: Vec<Detection>) -> Self {
        Self {
            script,
            failure: None,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Backend whose every `detect` call fails with an inference error.
    pub fn failing(reason: impl Into<String>) -> Self {
        let mut stub = Self::new(Vec::new());
        stub.failure = Some(reason.into());
        stub
    }

    /// Sleep this long inside each `detect` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Shared counter incremented on every `detect` call.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        if let Some(reason) = &self.failure {
            return Err(PipelineError::Inference {
                model: self.name().to_string(),
                reason: reason.clone(),
            });
        }

        Ok(self
            .script
            .iter()
            .filter(|detection| detection.confidence >= threshold)
            .cloned()
            .collect())
    }
}
