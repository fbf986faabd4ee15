//! Text renderings of a detection snapshot for terminal consumers.

use crate::detect::Detection;
use crate::overlay::label_text;
use crate::store::DetectionSnapshot;

pub const NO_OBJECTS: &str = "No objects detected";

/// One-line summary, e.g. `Detected 3 objects: 2 cup, 1 person`.
pub fn summary_line(snapshot: &DetectionSnapshot) -> String {
    if !snapshot.has_detections() {
        return NO_OBJECTS.to_string();
    }
    let counts: Vec<String> = snapshot
        .object_counts()
        .iter()
        .map(|(class, n)| format!("{} {}", n, class))
        .collect();
    format!(
        "Detected {} objects: {}",
        snapshot.detections().len(),
        counts.join(", ")
    )
}

/// One entry per detection: `cup (87%) Q5`.
pub fn detail_lines(detections: &[Detection]) -> Vec<String> {
    if detections.is_empty() {
        return vec![NO_OBJECTS.to_string()];
    }
    detections
        .iter()
        .map(|d| format!("{} Q{}", label_text(d), d.quadrant))
        .collect()
}
