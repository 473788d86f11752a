//! Human-readable report text for each command.

use faceverify_core::{FaceMatches, FacialArea, SyncReport, VerifyResult};
use std::path::Path;

const RULE: &str = "--------------------------------";

fn capitalized_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn describe_area(area: &FacialArea) -> String {
    format!("x={} y={} w={} h={}", area.x, area.y, area.w, area.h)
}

/// One line per entry, each newline-terminated.
fn block(lines: &[String]) -> String {
    lines.iter().map(|line| format!("{line}\n")).collect()
}

pub fn verify_report(result: &VerifyResult) -> String {
    let verdict = if result.verified {
        "✅ The two images are of the same person."
    } else {
        "❌ The two images are NOT of the same person."
    };

    block(&[
        "--- Face Verification Result ---".to_string(),
        verdict.to_string(),
        format!("Verified: {}", capitalized_bool(result.verified)),
        format!("Distance: {:.4}", result.distance),
        format!("Threshold: {:.4}", result.threshold),
        format!("Model: {}", result.model),
        format!("Detector: {}", result.detector_backend),
        format!("Metric: {}", result.similarity_metric),
        RULE.to_string(),
    ])
}

pub fn find_report(results: &[FaceMatches], annotated: &Path) -> String {
    let mut lines = vec!["--- Face Search Result ---".to_string()];
    for (i, face) in results.iter().enumerate() {
        lines.push(format!("Face {} ({}):", i + 1, describe_area(&face.source)));
        if face.matches.is_empty() {
            lines.push("  No match found in the database.".to_string());
            continue;
        }
        lines.extend(face.matches.iter().map(|m| {
            format!(
                "  {}  distance {:.4}  confidence {:.1}%",
                m.identity, m.distance, m.confidence
            )
        }));
    }
    lines.push(format!("Annotated image saved to {}", annotated.display()));
    lines.push(RULE.to_string());
    block(&lines)
}

pub fn build_report(report: &SyncReport, cache: &Path) -> String {
    let status = if report.written { "written" } else { "up to date" };

    block(&[
        "--- Representation Cache ---".to_string(),
        format!("Images: {}", report.images),
        format!("Added: {}", report.added),
        format!("Replaced: {}", report.replaced),
        format!("Removed: {}", report.removed),
        format!("Unchanged: {}", report.unchanged),
        format!("Without face: {}", report.without_face),
        format!("Unreadable: {}", report.failed),
        format!("Cache: {} ({status})", cache.display()),
        RULE.to_string(),
    ])
}
