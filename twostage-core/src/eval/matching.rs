//! Matching of predicted detections against ground-truth instances.

use serde::{Deserialize, Serialize};

/// IoU above which a detection/ground-truth pair counts as a match.
pub const MATCH_IOU_THRESHOLD: f32 = 0.5;

/// Axis-aligned box in corner form, serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, other: &Self) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    /// Intersection over union; 0 when the union is empty.
    pub fn iou(&self, other: &Self) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// A detector output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Regression-refined box, used for matching when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined: Option<BoundingBox>,
    pub class: usize,
    /// Non-positive confidence marks a non-candidate.
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class: usize, confidence: f32) -> Self {
        Self {
            bbox,
            refined: None,
            class,
            confidence,
        }
    }

    pub fn with_refined(mut self, refined: BoundingBox) -> Self {
        self.refined = Some(refined);
        self
    }

    /// Box compared against ground truth.
    pub fn match_box(&self) -> &BoundingBox {
        self.refined.as_ref().unwrap_or(&self.bbox)
    }

    pub fn is_candidate(&self) -> bool {
        self.confidence > 0.0
    }
}

/// An annotated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthInstance {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub class: usize,
}

impl GroundTruthInstance {
    pub fn new(bbox: BoundingBox, class: usize) -> Self {
        Self { bbox, class }
    }
}

/// Ground truth as delivered by a data source: either a bare instance or a
/// one/two element list whose first element is the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroundTruthEntry {
    Flat(GroundTruthInstance),
    Single((GroundTruthInstance,)),
    Pair((GroundTruthInstance, serde_json::Value)),
}

impl GroundTruthEntry {
    pub fn normalize(&self) -> &GroundTruthInstance {
        match self {
            Self::Flat(gt) | Self::Single((gt,)) | Self::Pair((gt, _)) => gt,
        }
    }
}

impl From<GroundTruthInstance> for GroundTruthEntry {
    fn from(gt: GroundTruthInstance) -> Self {
        Self::Flat(gt)
    }
}

/// True/false positive tally for one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResult {
    pub tp: usize,
    pub fp: usize,
    pub npos: usize,
}

/// Scores detections against ground truth by overlap and label agreement.
///
/// Every (detection, ground truth) pair above the IoU threshold contributes one
/// count, so a detection covering two objects is counted twice. There is no
/// one-to-one assignment.
#[derive(Debug, Clone, Copy)]
pub struct MatchClassifier {
    threshold: f32,
}

impl Default for MatchClassifier {
    fn default() -> Self {
        Self {
            threshold: MATCH_IOU_THRESHOLD,
        }
    }
}

impl MatchClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn classify(
        &self,
        detections: &[Detection],
        ground_truth: &[GroundTruthEntry],
    ) -> SampleResult {
        let ground_truth: Vec<&GroundTruthInstance> =
            ground_truth.iter().map(GroundTruthEntry::normalize).collect();
        let mut result = SampleResult {
            npos: ground_truth.len(),
            ..Default::default()
        };

        let candidates = detections.iter().filter(|d| d.is_candidate());
        for (det, gt) in candidates.flat_map(|d| ground_truth.iter().map(move |gt| (d, gt))) {
            if det.match_box().iou(&gt.bbox) > self.threshold {
                if det.class == gt.class {
                    result.tp += 1;
                } else {
                    result.fp += 1;
                }
            }
        }
        result
    }
}
