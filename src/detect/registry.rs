use anyhow::{anyhow, Result};

use crate::config::ModelSettings;
use crate::detect::adapter::DetectorAdapter;
use crate::PipelineError;

/// Ordered set of detector adapters.
///
/// Registration order is the comparison order, so this is a Vec with a
/// uniqueness check rather than a map. Model names are unique.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    adapters: Vec<DetectorAdapter>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Rejects duplicate model names.
    pub fn register(&mut self, adapter: DetectorAdapter) -> Result<()> {
        if self.get(adapter.model_name()).is_some() {
            return Err(anyhow!(
                "model '{}' already registered",
                adapter.model_name()
            ));
        }
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn get(&self, model_name: &str) -> Option<&DetectorAdapter> {
        self.adapters
            .iter()
            .find(|adapter| adapter.model_name() == model_name)
    }

    /// Adapters in registration order.
    pub fn adapters(&self) -> &[DetectorAdapter] {
        &self.adapters
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters
            .iter()
            .map(DetectorAdapter::model_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Load one adapter per configured model, preserving configuration order.
///
/// A model whose weights cannot be loaded becomes a `ModelUnavailable` entry
/// in the returned error list instead of aborting the rest; the caller
/// decides whether zero usable models is fatal.
pub fn load_adapters(models: &[ModelSettings]) -> (ModelRegistry, Vec<PipelineError>) {
    let mut registry = ModelRegistry::new();
    let mut failures = Vec::new();

    for settings in models {
        match load_backend(settings) {
            Ok(adapter) => {
                if let Err(e) = registry.register(adapter) {
                    failures.push(PipelineError::ModelUnavailable {
                        model: settings.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            Err(e) => failures.push(e),
        }
    }

    (registry, failures)
}

#[cfg(feature = "backend-tract")]
fn load_backend(settings: &ModelSettings) -> Result<DetectorAdapter, PipelineError> {
    use crate::detect::backends::TractBackend;

    let backend = TractBackend::load(
        &settings.weights,
        settings.input_size,
        settings.class_names.clone(),
    )
    .map_err(|e| e.with_model(&settings.name))?;
    Ok(DetectorAdapter::new(settings.name.clone(), backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_backend(settings: &ModelSettings) -> Result<DetectorAdapter, PipelineError> {
    Err(PipelineError::ModelUnavailable {
        model: settings.name.clone(),
        reason: "built without the backend-tract feature".to_string(),
    })
}
