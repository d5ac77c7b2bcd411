//! Export artifacts: detection tables, CSV, and annotated images.
//!
//! Exports are derived views over an already-built report. A failed export
//! never invalidates or rolls back the report it was derived from.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::report::{AnnotatedDetection, ConfidenceBand, DetectionReport};
use crate::PipelineError;

/// Fixed export column order.
pub const TABLE_COLUMNS: [&str; 4] = ["Category", "Class", "Confidence", "Level"];

const HIGH_COLOR: Rgb<u8> = Rgb([46, 204, 64]);
const MEDIUM_COLOR: Rgb<u8> = Rgb([255, 196, 0]);
const LOW_COLOR: Rgb<u8> = Rgb([255, 65, 54]);
const BOX_THICKNESS: u32 = 2;

/// One export row. Confidence is rounded to three decimals.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRow {
    pub category: String,
    pub class: String,
    pub confidence: f32,
    pub level: String,
}

/// Tabular view of a report, one row per detection in report order.
///
/// Idempotent: the same report always yields the same rows.
pub fn to_table(report: &DetectionReport) -> Vec<TableRow> {
    report
        .detections
        .iter()
        .map(|annotated| TableRow {
            category: annotated.category.to_string(),
            class: annotated.detection.label.clone(),
            confidence: round3(annotated.detection.confidence),
            level: annotated.band.to_string(),
        })
        .collect()
}

/// Render a report as CSV with the fixed header row. A report with zero
/// detections yields the header only.
pub fn to_csv(report: &DetectionReport) -> String {
    let mut out = String::new();
    out.push_str(&TABLE_COLUMNS.join(","));
    out.push('\n');
    for row in to_table(report) {
        out.push_str(&csv_field(&row.category));
        out.push(',');
        out.push_str(&csv_field(&row.class));
        out.push(',');
        out.push_str(&row.confidence.to_string());
        out.push(',');
        out.push_str(&csv_field(&row.level));
        out.push('\n');
    }
    out
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Draw one hollow box per detection on a copy of the source image, colored
/// by confidence band. Output dimensions always match the input.
pub fn annotate(image: &RgbImage, detections: &[AnnotatedDetection]) -> RgbImage {
    let mut canvas = image.clone();
    for annotated in detections {
        let color = match annotated.band {
            ConfidenceBand::High => HIGH_COLOR,
            ConfidenceBand::Medium => MEDIUM_COLOR,
            ConfidenceBand::Low => LOW_COLOR,
        };
        draw_box(&mut canvas, annotated, color);
    }
    canvas
}

fn draw_box(canvas: &mut RgbImage, annotated: &AnnotatedDetection, color: Rgb<u8>) {
    let bbox = &annotated.detection.bbox;
    let max_x = canvas.width().saturating_sub(1) as f32;
    let max_y = canvas.height().saturating_sub(1) as f32;

    let x_min = bbox.x_min.clamp(0.0, max_x) as i32;
    let y_min = bbox.y_min.clamp(0.0, max_y) as i32;
    let x_max = bbox.x_max.clamp(0.0, max_x) as i32;
    let y_max = bbox.y_max.clamp(0.0, max_y) as i32;
    let width = (x_max - x_min).max(0) as u32;
    let height = (y_max - y_min).max(0) as u32;
    if width == 0 || height == 0 {
        return;
    }

    for inset in 0..BOX_THICKNESS {
        let w = width.saturating_sub(2 * inset);
        let h = height.saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at(x_min + inset as i32, y_min + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Encode an image to JPEG or PNG bytes. Encoding may be lossy per format,
/// but the bytes always decode back to the same dimensions.
pub fn to_image_bytes(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, PipelineError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, format)
        .map_err(|e| PipelineError::Export(format!("image encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use crate::report::Taxonomy;
    use std::time::Duration;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(["helmet"], ["person"])
    }

    fn report_with(detections: Vec<Detection>) -> DetectionReport {
        DetectionReport::build(
            "m1",
            0.25,
            detections,
            Duration::from_millis(30),
            &taxonomy(),
        )
        .expect("build report")
    }

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(2.0, 2.0, 20.0, 20.0))
    }

    #[test]
    fn empty_report_yields_header_only_csv() {
        let csv = to_csv(&report_with(Vec::new()));
        assert_eq!(csv, "Category,Class,Confidence,Level\n");
    }

    #[test]
    fn rows_follow_report_order_with_fixed_columns() {
        let report = report_with(vec![det("helmet", 0.81), det("person", 0.40)]);
        let rows = to_table(&report);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category, "PPE");
        assert_eq!(rows[0].class, "helmet");
        assert_eq!(rows[0].confidence, 0.81);
        assert_eq!(rows[0].level, "High");
        assert_eq!(rows[1].category, "NonPPE");
        assert_eq!(rows[1].class, "person");
        assert_eq!(rows[1].confidence, 0.4);
        assert_eq!(rows[1].level, "Low");

        let csv = to_csv(&report);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Category,Class,Confidence,Level");
        assert_eq!(lines[1], "PPE,helmet,0.81,High");
        assert_eq!(lines[2], "NonPPE,person,0.4,Low");
    }

    #[test]
    fn to_table_is_idempotent() {
        let report = report_with(vec![det("helmet", 0.9), det("person", 0.3)]);
        assert_eq!(to_table(&report), to_table(&report));
        assert_eq!(to_csv(&report), to_csv(&report));
    }

    #[test]
    fn csv_escapes_embedded_delimiters_and_quotes() {
        let report = report_with(vec![det("vest, hi-vis \"class 2\"", 0.6)]);
        let csv = to_csv(&report);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "Unknown,\"vest, hi-vis \"\"class 2\"\"\",0.6,Medium");
    }

    #[test]
    fn annotation_preserves_dimensions() {
        let image = RgbImage::new(64, 48);
        let report = report_with(vec![det("helmet", 0.9)]);
        let annotated = annotate(&image, &report.detections);
        assert_eq!(annotated.dimensions(), (64, 48));
    }

    #[test]
    fn annotation_tolerates_out_of_bounds_boxes() {
        let image = RgbImage::new(10, 10);
        let oversized = Detection::new(
            "helmet",
            0.9,
            BoundingBox::new(-5.0, -5.0, 500.0, 500.0),
        );
        let report = report_with(vec![oversized]);
        let annotated = annotate(&image, &report.detections);
        assert_eq!(annotated.dimensions(), (10, 10));
    }

    #[test]
    fn encoded_image_round_trips_dimensions() -> Result<(), PipelineError> {
        let image = RgbImage::new(32, 24);
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let bytes = to_image_bytes(&image, format)?;
            let decoded = image::load_from_memory(&bytes).expect("decode exported image");
            assert_eq!(decoded.width(), 32);
            assert_eq!(decoded.height(), 24);
        }
        Ok(())
    }
}
