//! Single-image, multi-model PPE detection and reporting pipeline.
//!
//! One uploaded image flows through five stages:
//!
//! 1. `upload`: size/format validation and RGB8 decoding
//! 2. `detect`: one adapter per configured model, each wrapping a
//!    substitutable `DetectorBackend`
//! 3. `report`: taxonomy and confidence-band annotation plus aggregate
//!    counts
//! 4. `compare`: fan-out across models with per-model failure isolation
//!    and order-preserving collection
//! 5. `export`: CSV tables and annotated images
//!
//! The detector adapter is the only integration point with the underlying
//! vision model. Everything downstream works against the fixed `Detection`
//! shape the adapter validates at its boundary, so swapping the real ONNX
//! backend for a scripted stub touches nothing else.
//!
//! The pipeline owns its data for the duration of one run; reports are
//! built once, read-only afterwards, and nothing is cached across runs
//! except the loaded model weights held by the adapters.

use image::RgbImage;
use thiserror::Error;

pub mod compare;
pub mod config;
pub mod detect;
pub mod export;
pub mod report;
pub mod upload;

pub use compare::{compare, ComparisonResult, ExecutionMode, ModelOutcome};
pub use config::{ModelSettings, PipelineConfig};
pub use detect::{
    load_adapters, BoundingBox, Detection, DetectorAdapter, DetectorBackend, ModelRegistry,
    StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use export::{annotate, to_csv, to_image_bytes, to_table, TableRow, TABLE_COLUMNS};
pub use report::{
    AnnotatedDetection, Category, ConfidenceBand, DetectionReport, Taxonomy, HIGH_CONFIDENCE,
    MEDIUM_CONFIDENCE,
};
pub use upload::{UploadFormat, UploadPolicy};

/// Pipeline error taxonomy.
///
/// Per-model errors (`ModelUnavailable`, `Inference`, `Timeout`) degrade
/// only that model's entry in a comparison; `Validation` aborts a run before
/// any inference; `Export` never invalidates an already-built report.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad upload: wrong type, too large, or unreadable bytes.
    #[error("upload rejected: {0}")]
    Validation(String),

    /// Model weights missing or unreadable at load time.
    #[error("model '{model}' unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    /// Model invocation failed on a specific image.
    #[error("inference failed on model '{model}': {reason}")]
    Inference { model: String, reason: String },

    /// Model invocation exceeded the configured per-model timeout.
    #[error("model '{model}' timed out after {waited_ms} ms")]
    Timeout { model: String, waited_ms: u64 },

    /// Serialization or encoding of an export artifact failed.
    #[error("export failed: {0}")]
    Export(String),

    /// Confidence score outside [0, 1]; a caller contract violation.
    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f32),
}

impl PipelineError {
    /// Replace the model attribution on per-model variants. Used by the
    /// adapter, which knows the configured model name while the backend
    /// does not.
    pub(crate) fn with_model(self, model_name: &str) -> Self {
        match self {
            PipelineError::ModelUnavailable { reason, .. } => PipelineError::ModelUnavailable {
                model: model_name.to_string(),
                reason,
            },
            PipelineError::Inference { reason, .. } => PipelineError::Inference {
                model: model_name.to_string(),
                reason,
            },
            PipelineError::Timeout { waited_ms, .. } => PipelineError::Timeout {
                model: model_name.to_string(),
                waited_ms,
            },
            other => other,
        }
    }
}

/// One pipeline instance: validated configuration plus the adapters loaded
/// for it. Explicitly constructed and dependency-injected; there is no
/// process-global model cache.
pub struct Pipeline {
    taxonomy: Taxonomy,
    policy: UploadPolicy,
    threshold: f32,
    registry: ModelRegistry,
    mode: ExecutionMode,
}

impl Pipeline {
    /// Build a pipeline from validated configuration and pre-loaded
    /// adapters. Fails when zero models are usable.
    pub fn new(config: &PipelineConfig, registry: ModelRegistry) -> Result<Self, PipelineError> {
        if registry.is_empty() {
            return Err(PipelineError::ModelUnavailable {
                model: "all".to_string(),
                reason: "no detector models could be loaded".to_string(),
            });
        }
        Ok(Self {
            taxonomy: config.taxonomy(),
            policy: UploadPolicy::new(config.max_upload_size_mb),
            threshold: config.confidence_threshold,
            registry,
            mode: ExecutionMode::Sequential,
        })
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Run the full pipeline on raw upload bytes with the configured
    /// threshold.
    pub fn run(&self, upload: &[u8]) -> Result<PipelineRun, PipelineError> {
        self.run_at(upload, self.threshold)
    }

    /// Run with a caller-supplied threshold override.
    pub fn run_with_threshold(
        &self,
        upload: &[u8],
        threshold: f32,
    ) -> Result<PipelineRun, PipelineError> {
        if !(config::MIN_CONFIDENCE_THRESHOLD..=config::MAX_CONFIDENCE_THRESHOLD)
            .contains(&threshold)
        {
            return Err(PipelineError::Validation(format!(
                "threshold {} outside [{}, {}]",
                threshold,
                config::MIN_CONFIDENCE_THRESHOLD,
                config::MAX_CONFIDENCE_THRESHOLD
            )));
        }
        self.run_at(upload, threshold)
    }

    fn run_at(&self, upload: &[u8], threshold: f32) -> Result<PipelineRun, PipelineError> {
        let image = self.policy.decode(upload)?;
        let comparison = compare::compare(
            self.registry.adapters(),
            &image,
            threshold,
            &self.taxonomy,
            self.mode,
        );
        Ok(PipelineRun { image, comparison })
    }
}

/// Artifacts of one pipeline run.
///
/// Reports stay usable even when a later export step fails; export errors
/// never roll anything back here.
pub struct PipelineRun {
    /// The decoded source image.
    pub image: RgbImage,
    /// Per-model outcomes in configuration order.
    pub comparison: ComparisonResult,
}

impl PipelineRun {
    /// Annotated copy of the source image for one model's report. `None`
    /// when the model is unknown or its run failed.
    pub fn annotated_for(&self, model_name: &str) -> Option<RgbImage> {
        self.comparison
            .get(model_name)
            .and_then(ModelOutcome::report)
            .map(|report| export::annotate(&self.image, &report.detections))
    }
}
