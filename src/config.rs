//! Pipeline configuration.
//!
//! One explicit structure passed into the pipeline constructor; there is no
//! implicit global state. Loading order: optional TOML file (CLI flag or
//! `PPESCAN_CONFIG`), then environment overrides, then validation.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::report::Taxonomy;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const MIN_CONFIDENCE_THRESHOLD: f32 = 0.10;
pub const MAX_CONFIDENCE_THRESHOLD: f32 = 1.0;
pub const DEFAULT_MAX_UPLOAD_SIZE_MB: u64 = 10;
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;

// Default class sets for the SH-17 PPE domain the stock models are trained
// on. Operators override these per deployment.
const DEFAULT_PPE_CLASSES: &[&str] = &[
    "helmet",
    "safety-vest",
    "gloves",
    "safety-glasses",
    "face-mask",
    "ear-protection",
    "safety-boots",
];
const DEFAULT_NON_PPE_CLASSES: &[&str] = &["person", "head", "face", "hands", "foot"];

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    confidence_threshold: Option<f32>,
    max_upload_size_mb: Option<u64>,
    ppe_classes: Option<Vec<String>>,
    non_ppe_classes: Option<Vec<String>>,
    models: Option<Vec<ModelConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    name: String,
    weights: PathBuf,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
}

/// One configured detector model. List order is the comparison order.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub name: String,
    pub weights: PathBuf,
    pub input_size: u32,
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub confidence_threshold: f32,
    pub max_upload_size_mb: u64,
    pub ppe_classes: Vec<String>,
    pub non_ppe_classes: Vec<String>,
    pub models: Vec<ModelSettings>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load from the `PPESCAN_CONFIG` path when set, defaults otherwise,
    /// then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("PPESCAN_CONFIG").ok() {
            Some(path) => Self::read_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit config file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::read_file(path)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML configuration text. Defaults fill any omitted field.
    pub fn parse(raw: &str) -> Result<Self> {
        let file: PipelineConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid configuration: {}", e))?;
        Ok(Self::from_file(file))
    }

    fn read_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
        Self::parse(&raw).map_err(|e| anyhow!("config file {}: {}", path.display(), e))
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let models = file
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|model| ModelSettings {
                name: model.name,
                weights: model.weights,
                input_size: model.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
                class_names: model.class_names.unwrap_or_default(),
            })
            .collect();
        Self {
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            max_upload_size_mb: file.max_upload_size_mb.unwrap_or(DEFAULT_MAX_UPLOAD_SIZE_MB),
            ppe_classes: file
                .ppe_classes
                .unwrap_or_else(|| to_owned_list(DEFAULT_PPE_CLASSES)),
            non_ppe_classes: file
                .non_ppe_classes
                .unwrap_or_else(|| to_owned_list(DEFAULT_NON_PPE_CLASSES)),
            models,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(threshold) = std::env::var("PPESCAN_CONF_THRESHOLD") {
            self.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("PPESCAN_CONF_THRESHOLD must be a number"))?;
        }
        if let Ok(size) = std::env::var("PPESCAN_MAX_UPLOAD_MB") {
            self.max_upload_size_mb = size
                .parse()
                .map_err(|_| anyhow!("PPESCAN_MAX_UPLOAD_MB must be an integer number of MB"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CONFIDENCE_THRESHOLD..=MAX_CONFIDENCE_THRESHOLD)
            .contains(&self.confidence_threshold)
        {
            return Err(anyhow!(
                "confidence_threshold {} outside [{}, {}]",
                self.confidence_threshold,
                MIN_CONFIDENCE_THRESHOLD,
                MAX_CONFIDENCE_THRESHOLD
            ));
        }
        if self.max_upload_size_mb == 0 {
            return Err(anyhow!("max_upload_size_mb must be greater than zero"));
        }
        for (i, model) in self.models.iter().enumerate() {
            if model.name.trim().is_empty() {
                return Err(anyhow!("model #{} has an empty name", i + 1));
            }
            if self.models[..i].iter().any(|prev| prev.name == model.name) {
                return Err(anyhow!("duplicate model name '{}'", model.name));
            }
        }
        Ok(())
    }

    pub fn taxonomy(&self) -> Taxonomy {
        Taxonomy::new(&self.ppe_classes, &self.non_ppe_classes)
    }
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
