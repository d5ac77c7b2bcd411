//! Multi-model fan-out over a single image.
//!
//! Each configured model runs independently against the same decoded image
//! and threshold. One model failing (or timing out in parallel mode) becomes
//! a degraded entry in the result; it never aborts or corrupts the other
//! models' runs. Result order is always the caller's model order, regardless
//! of completion order.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::detect::DetectorAdapter;
use crate::report::{DetectionReport, Taxonomy};
use crate::PipelineError;

/// How the comparator schedules per-model runs.
#[derive(Clone, Copy, Debug, Default)]
pub enum ExecutionMode {
    /// One model after another on the calling thread. The simplest correct
    /// default.
    #[default]
    Sequential,
    /// One thread per model. A model still running when `timeout` expires is
    /// reported as failed; the remaining models complete normally.
    Parallel { timeout: Option<Duration> },
}

/// Outcome of one model's run inside a comparison.
#[derive(Debug)]
pub enum ModelOutcome {
    Completed(DetectionReport),
    Failed {
        model_name: String,
        error: PipelineError,
    },
}

impl ModelOutcome {
    pub fn model_name(&self) -> &str {
        match self {
            ModelOutcome::Completed(report) => &report.model_name,
            ModelOutcome::Failed { model_name, .. } => model_name,
        }
    }

    pub fn report(&self) -> Option<&DetectionReport> {
        match self {
            ModelOutcome::Completed(report) => Some(report),
            ModelOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            ModelOutcome::Completed(_) => None,
            ModelOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ModelOutcome::Failed { .. })
    }
}

/// Per-model outcomes in the caller-specified model order.
#[derive(Debug, Default)]
pub struct ComparisonResult {
    outcomes: Vec<ModelOutcome>,
}

impl ComparisonResult {
    pub fn outcomes(&self) -> &[ModelOutcome] {
        &self.outcomes
    }

    pub fn get(&self, model_name: &str) -> Option<&ModelOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.model_name() == model_name)
    }

    /// Successful reports, still in model order.
    pub fn reports(&self) -> impl Iterator<Item = &DetectionReport> {
        self.outcomes.iter().filter_map(ModelOutcome::report)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.reports().count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }
}

/// Run every adapter against the same image and threshold.
pub fn compare(
    adapters: &[DetectorAdapter],
    image: &RgbImage,
    threshold: f32,
    taxonomy: &Taxonomy,
    mode: ExecutionMode,
) -> ComparisonResult {
    match mode {
        ExecutionMode::Sequential => compare_sequential(adapters, image, threshold, taxonomy),
        ExecutionMode::Parallel { timeout } => {
            compare_parallel(adapters, image, threshold, taxonomy, timeout)
        }
    }
}

fn compare_sequential(
    adapters: &[DetectorAdapter],
    image: &RgbImage,
    threshold: f32,
    taxonomy: &Taxonomy,
) -> ComparisonResult {
    let outcomes = adapters
        .iter()
        .map(|adapter| run_one(adapter, image, threshold, taxonomy))
        .collect();
    ComparisonResult { outcomes }
}

fn compare_parallel(
    adapters: &[DetectorAdapter],
    image: &RgbImage,
    threshold: f32,
    taxonomy: &Taxonomy,
    timeout: Option<Duration>,
) -> ComparisonResult {
    // Each worker gets its own Arc on an independent copy of the decoded
    // image; nothing mutates it.
    let image = Arc::new(image.clone());
    let taxonomy = Arc::new(taxonomy.clone());
    let (sender, receiver) = mpsc::channel();

    for (index, adapter) in adapters.iter().cloned().enumerate() {
        let sender = sender.clone();
        let image = Arc::clone(&image);
        let taxonomy = Arc::clone(&taxonomy);
        thread::spawn(move || {
            let outcome = run_one(&adapter, &image, threshold, &taxonomy);
            // The receiver may be gone after a timeout; that worker's result
            // is simply dropped.
            let _ = sender.send((index, outcome));
        });
    }
    drop(sender);

    let mut slots: Vec<Option<ModelOutcome>> = adapters.iter().map(|_| None).collect();
    let mut pending = adapters.len();

    match timeout {
        None => {
            while let Ok((index, outcome)) = receiver.recv() {
                slots[index] = Some(outcome);
            }
        }
        Some(timeout) => {
            let deadline = Instant::now() + timeout;
            while pending > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match receiver.recv_timeout(remaining) {
                    Ok((index, outcome)) => {
                        slots[index] = Some(outcome);
                        pending -= 1;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    let outcomes = slots
        .into_iter()
        .zip(adapters)
        .map(|(slot, adapter)| match slot {
            Some(outcome) => outcome,
            None => ModelOutcome::Failed {
                model_name: adapter.model_name().to_string(),
                error: PipelineError::Timeout {
                    model: adapter.model_name().to_string(),
                    waited_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                },
            },
        })
        .collect();
    ComparisonResult { outcomes }
}

fn run_one(
    adapter: &DetectorAdapter,
    image: &RgbImage,
    threshold: f32,
    taxonomy: &Taxonomy,
) -> ModelOutcome {
    let (detections, duration) = match adapter.detect(image, threshold) {
        Ok(run) => run,
        Err(error) => {
            log::warn!("model '{}' degraded: {}", adapter.model_name(), error);
            return ModelOutcome::Failed {
                model_name: adapter.model_name().to_string(),
                error,
            };
        }
    };
    match DetectionReport::build(
        adapter.model_name(),
        threshold,
        detections,
        duration,
        taxonomy,
    ) {
        Ok(report) => ModelOutcome::Completed(report),
        Err(error) => ModelOutcome::Failed {
            model_name: adapter.model_name().to_string(),
            error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};

    fn image() -> RgbImage {
        RgbImage::new(16, 16)
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(["helmet"], ["person"])
    }

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(0.0, 0.0, 8.0, 8.0))
    }

    fn adapters_with_middle_failure() -> Vec<DetectorAdapter> {
        vec![
            DetectorAdapter::new("m1", StubBackend::new(vec![det("helmet", 0.9)])),
            DetectorAdapter::new("m2", StubBackend::failing("bad tensor")),
            DetectorAdapter::new("m3", StubBackend::new(vec![det("person", 0.6)])),
        ]
    }

    #[test]
    fn one_failure_does_not_abort_the_others() {
        let adapters = adapters_with_middle_failure();
        let result = compare(
            &adapters,
            &image(),
            0.25,
            &taxonomy(),
            ExecutionMode::Sequential,
        );

        assert_eq!(result.len(), 3);
        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 1);

        let names: Vec<&str> = result.outcomes().iter().map(|o| o.model_name()).collect();
        assert_eq!(names, vec!["m1", "m2", "m3"]);

        assert!(result.outcomes()[0].report().is_some());
        assert!(result.outcomes()[2].report().is_some());
        match result.outcomes()[1].error() {
            Some(PipelineError::Inference { model, .. }) => assert_eq!(model, "m2"),
            other => panic!("expected inference failure, got {other:?}"),
        }
    }

    #[test]
    fn parallel_mode_preserves_model_order() {
        // Latencies inverted relative to order: completion order differs
        // from model order.
        let adapters = vec![
            DetectorAdapter::new(
                "slow",
                StubBackend::new(vec![det("helmet", 0.9)])
                    .with_latency(Duration::from_millis(60)),
            ),
            DetectorAdapter::new(
                "medium",
                StubBackend::new(vec![det("person", 0.8)])
                    .with_latency(Duration::from_millis(20)),
            ),
            DetectorAdapter::new("fast", StubBackend::new(vec![det("helmet", 0.7)])),
        ];
        let result = compare(
            &adapters,
            &image(),
            0.25,
            &taxonomy(),
            ExecutionMode::Parallel { timeout: None },
        );

        let names: Vec<&str> = result.outcomes().iter().map(|o| o.model_name()).collect();
        assert_eq!(names, vec!["slow", "medium", "fast"]);
        assert_eq!(result.success_count(), 3);
    }

    #[test]
    fn parallel_timeout_degrades_only_the_slow_model() {
        let adapters = vec![
            DetectorAdapter::new("fast", StubBackend::new(vec![det("helmet", 0.9)])),
            DetectorAdapter::new(
                "stuck",
                StubBackend::new(vec![]).with_latency(Duration::from_secs(5)),
            ),
        ];
        let result = compare(
            &adapters,
            &image(),
            0.25,
            &taxonomy(),
            ExecutionMode::Parallel {
                timeout: Some(Duration::from_millis(200)),
            },
        );

        assert_eq!(result.len(), 2);
        assert!(result.outcomes()[0].report().is_some());
        match result.outcomes()[1].error() {
            Some(PipelineError::Timeout { model, .. }) => assert_eq!(model, "stuck"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn lookup_by_model_name() {
        let adapters = adapters_with_middle_failure();
        let result = compare(
            &adapters,
            &image(),
            0.25,
            &taxonomy(),
            ExecutionMode::Sequential,
        );
        assert!(result.get("m3").is_some());
        assert!(result.get("missing").is_none());
    }
}
