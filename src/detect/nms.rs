use super::result::Detection;

/// Per-class greedy non-maximum suppression.
///
/// Keeps the highest-confidence box of each overlapping cluster; boxes of
/// different classes never suppress each other. Output is sorted by
/// descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id() == candidate.class_id()
                && kept.bbox().iou(candidate.bbox()) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
