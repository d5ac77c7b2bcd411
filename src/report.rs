//! Normalized detection reports.
//!
//! Raw detections coming out of an adapter are annotated with a taxonomy
//! category and a qualitative confidence band, then aggregated into
//! per-category and per-class counts. Everything here is a pure, in-memory
//! transformation; a report is built once per (model, image, threshold) run
//! and read-only afterwards.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use crate::detect::Detection;
use crate::PipelineError;

/// Lower bound of the High band.
pub const HIGH_CONFIDENCE: f32 = 0.75;
/// Lower bound of the Medium band.
pub const MEDIUM_CONFIDENCE: f32 = 0.50;

/// Fixed taxonomy bucket for a detected class label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Ppe,
    NonPpe,
    Unknown,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Ppe => write!(f, "PPE"),
            Category::NonPpe => write!(f, "NonPPE"),
            Category::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Qualitative confidence bucket.
///
/// The three bands partition [0, 1]; each band is inclusive at its lower
/// bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// Band for a confidence in [0, 1].
    ///
    /// Callers are expected to pass scores already clamped by the detector
    /// adapter; anything outside the interval is a contract violation.
    pub fn of(confidence: f32) -> Result<Self, PipelineError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(PipelineError::InvalidConfidence(confidence));
        }
        Ok(if confidence >= HIGH_CONFIDENCE {
            ConfidenceBand::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        })
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceBand::High => write!(f, "High"),
            ConfidenceBand::Medium => write!(f, "Medium"),
            ConfidenceBand::Low => write!(f, "Low"),
        }
    }
}

/// Case-insensitive membership sets mapping class labels to categories.
///
/// The sets are fixed configuration data, not inferred from the model.
/// Labels in neither set classify as `Unknown`; a label configured into both
/// sets counts as PPE.
#[derive(Clone, Debug, Default)]
pub struct Taxonomy {
    ppe: HashSet<String>,
    non_ppe: HashSet<String>,
}

impl Taxonomy {
    pub fn new<I, J>(ppe_classes: I, non_ppe_classes: J) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        J: IntoIterator,
        J::Item: AsRef<str>,
    {
        Self {
            ppe: ppe_classes
                .into_iter()
                .map(|label| label.as_ref().to_lowercase())
                .collect(),
            non_ppe: non_ppe_classes
                .into_iter()
                .map(|label| label.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Total, deterministic classification of a label.
    pub fn classify(&self, label: &str) -> Category {
        let needle = label.to_lowercase();
        if self.ppe.contains(&needle) {
            Category::Ppe
        } else if self.non_ppe.contains(&needle) {
            Category::NonPpe
        } else {
            Category::Unknown
        }
    }
}

/// A detection plus its derived category and confidence band.
///
/// Created once at report-build time, never mutated afterwards.
#[derive(Clone, Debug)]
pub struct AnnotatedDetection {
    pub detection: Detection,
    pub category: Category,
    pub band: ConfidenceBand,
}

/// Normalized result of one (model, image, threshold) run.
#[derive(Clone, Debug)]
pub struct DetectionReport {
    pub model_name: String,
    pub threshold: f32,
    pub inference_duration: Duration,
    /// Annotated detections in adapter order.
    pub detections: Vec<AnnotatedDetection>,
    /// Per-category counts; values sum to `total()`.
    pub category_counts: BTreeMap<Category, usize>,
    /// Per-class-label counts; values sum to `total()`.
    pub class_counts: BTreeMap<String, usize>,
}

impl DetectionReport {
    /// Annotate and aggregate raw detections in a single order-preserving
    /// pass. An empty detection list yields a valid report with zero counts.
    pub fn build(
        model_name: impl Into<String>,
        threshold: f32,
        detections: Vec<Detection>,
        inference_duration: Duration,
        taxonomy: &Taxonomy,
    ) -> Result<Self, PipelineError> {
        let mut annotated = Vec::with_capacity(detections.len());
        let mut category_counts = BTreeMap::new();
        let mut class_counts = BTreeMap::new();

        for detection in detections {
            let category = taxonomy.classify(&detection.label);
            let band = ConfidenceBand::of(detection.confidence)?;
            *category_counts.entry(category).or_insert(0) += 1;
            *class_counts.entry(detection.label.clone()).or_insert(0) += 1;
            annotated.push(AnnotatedDetection {
                detection,
                category,
                band,
            });
        }

        Ok(Self {
            model_name: model_name.into(),
            threshold,
            inference_duration,
            detections: annotated,
            category_counts,
            class_counts,
        })
    }

    pub fn total(&self) -> usize {
        self.detections.len()
    }

    /// Estimated frames per second for this run. Zero when the measured
    /// duration was zero, never infinite.
    pub fn throughput_fps(&self) -> f64 {
        let secs = self.inference_duration.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(["helmet", "safety-vest"], ["person", "head"])
    }

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn bands_partition_the_unit_interval() -> Result<(), PipelineError> {
        assert_eq!(ConfidenceBand::of(0.0)?, ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::of(0.4999)?, ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::of(0.50)?, ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.7499)?, ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.75)?, ConfidenceBand::High);
        assert_eq!(ConfidenceBand::of(1.0)?, ConfidenceBand::High);
        Ok(())
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        assert!(ConfidenceBand::of(-0.01).is_err());
        assert!(ConfidenceBand::of(1.01).is_err());
    }

    #[test]
    fn classification_is_case_insensitive() {
        let taxonomy = taxonomy();
        assert_eq!(taxonomy.classify("Helmet"), Category::Ppe);
        assert_eq!(taxonomy.classify("helmet"), Category::Ppe);
        assert_eq!(taxonomy.classify("HELMET"), Category::Ppe);
        assert_eq!(taxonomy.classify("Person"), Category::NonPpe);
        assert_eq!(taxonomy.classify("forklift"), Category::Unknown);
    }

    #[test]
    fn counts_sum_to_total_detections() -> Result<(), PipelineError> {
        let detections = vec![
            det("helmet", 0.9),
            det("helmet", 0.6),
            det("person", 0.8),
            det("forklift", 0.3),
        ];
        let report = DetectionReport::build(
            "m1",
            0.25,
            detections,
            Duration::from_millis(40),
            &taxonomy(),
        )?;

        assert_eq!(report.total(), 4);
        assert_eq!(report.category_counts.values().sum::<usize>(), 4);
        assert_eq!(report.class_counts.values().sum::<usize>(), 4);
        assert_eq!(report.category_counts[&Category::Ppe], 2);
        assert_eq!(report.category_counts[&Category::NonPpe], 1);
        assert_eq!(report.category_counts[&Category::Unknown], 1);
        assert_eq!(report.class_counts["helmet"], 2);
        Ok(())
    }

    #[test]
    fn empty_detections_build_a_zero_report() -> Result<(), PipelineError> {
        let report =
            DetectionReport::build("m1", 0.25, Vec::new(), Duration::from_millis(5), &taxonomy())?;
        assert_eq!(report.total(), 0);
        assert!(report.category_counts.is_empty());
        assert!(report.class_counts.is_empty());
        Ok(())
    }

    #[test]
    fn report_preserves_adapter_order() -> Result<(), PipelineError> {
        let detections = vec![det("person", 0.8), det("helmet", 0.9)];
        let report =
            DetectionReport::build("m1", 0.25, detections, Duration::ZERO, &taxonomy())?;
        assert_eq!(report.detections[0].detection.label, "person");
        assert_eq!(report.detections[1].detection.label, "helmet");
        Ok(())
    }

    #[test]
    fn zero_duration_reports_zero_throughput() -> Result<(), PipelineError> {
        let report = DetectionReport::build("m1", 0.25, Vec::new(), Duration::ZERO, &taxonomy())?;
        assert_eq!(report.throughput_fps(), 0.0);

        let timed = DetectionReport::build(
            "m1",
            0.25,
            Vec::new(),
            Duration::from_millis(250),
            &taxonomy(),
        )?;
        assert!((timed.throughput_fps() - 4.0).abs() < 1e-9);
        Ok(())
    }
}
