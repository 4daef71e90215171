//! Output contracts of the upstream perception models.
//!
//! Nothing in here runs a model: these are the shapes the pose estimator,
//! emotion model, object detector and the optional oriented-box / scene /
//! overlay / segmentation sources hand over for each frame. A source that is
//! absent or found nothing for a frame is simply an empty list.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::tracking::{BBox, TrackId, TrackedObject};

/// Per-emotion scores in [0,1], keyed by emotion name. Insertion order is kept
/// so that every "largest of" query breaks ties the same way on every run.
pub type EmotionScores = IndexMap<String, f32>;

/// Name of the highest-scoring emotion; earliest key wins ties
pub fn dominant_emotion(scores: &EmotionScores) -> Option<&str> {
    scores
        .iter()
        .fold(None, |best: Option<(&String, f32)>, (name, score)| match best {
            Some((_, best_score)) if best_score >= *score => best,
            _ => Some((name, *score)),
        })
        .map(|(name, _)| name.as_str())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PoseDetection {
    pub bbox: BBox,
    pub confidence: f32,
    /// COCO order, 17 entries; `[0., 0.]` means "not detected"
    pub keypoints: Vec<[f32; 2]>,
    #[serde(default)]
    pub keypoint_confidence: Option<Vec<f32>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BBox,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub emotions: Option<EmotionScores>,
}

fn default_confidence() -> f32 {
    1.0
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectCategory {
    Electronic,
    Furniture,
    Vehicle,
    Accessory,
    Sports,
    Animal,
    Food,
    #[default]
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetection {
    pub bbox: BBox,
    pub class_name: String,
    pub confidence: f32,
    #[serde(default)]
    pub category: ObjectCategory,
    #[serde(default)]
    pub anomaly_reason: Option<String>,
}

/// What an oriented box says about a subject's posture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationVerdict {
    Lying,
    Upright,
    Inconclusive,
}

/// Rotated detection box, as produced by an OBB detector
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrientedBox {
    pub class_name: String,
    pub confidence: f32,
    pub center: (f32, f32),
    /// (width, height) before rotation
    pub size: (f32, f32),
    /// Radians
    pub angle: f32,
}

impl OrientedBox {
    /// Axis-aligned box enclosing the rotated rectangle
    pub fn footprint(&self) -> BBox {
        let (w, h) = self.size;
        let (sin, cos) = self.angle.sin_cos();
        let half_w = (w / 2.) * cos.abs() + (h / 2.) * sin.abs();
        let half_h = (w / 2.) * sin.abs() + (h / 2.) * cos.abs();
        BBox::new(
            self.center.0 - half_w,
            self.center.1 - half_h,
            half_w * 2.,
            half_h * 2.,
        )
    }

    pub fn verdict(&self) -> OrientationVerdict {
        let (w, h) = self.size;
        let elongation = w.max(h) / (w.min(h) + 1e-6);
        if elongation <= 1.2 {
            return OrientationVerdict::Inconclusive;
        }

        let degrees = self.angle.to_degrees().abs() % 180.;
        if !(30. ..=150.).contains(&degrees) {
            OrientationVerdict::Lying
        } else if degrees > 60. && degrees < 120. {
            OrientationVerdict::Upright
        } else {
            OrientationVerdict::Inconclusive
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SceneContext {
    /// Mapped category such as "office", "home" or "outdoors"
    pub scene_type: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Text,
    Watermark,
    Timestamp,
    Logo,
    Subtitle,
    Banner,
    UiElement,
    /// Non-text graphic, e.g. a high-contrast corner logo
    Visual,
}

impl OverlayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayKind::Text => "text",
            OverlayKind::Watermark => "watermark",
            OverlayKind::Timestamp => "timestamp",
            OverlayKind::Logo => "logo",
            OverlayKind::Subtitle => "subtitle",
            OverlayKind::Banner => "banner",
            OverlayKind::UiElement => "ui_element",
            OverlayKind::Visual => "visual",
        }
    }
}

/// An overlay the upstream overlay/OCR stage already judged suspicious
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OverlayCandidate {
    pub kind: OverlayKind,
    /// Screen region, e.g. "top_left" or "bottom_center"
    pub zone: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<BBox>,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SilhouetteValidation {
    #[serde(default)]
    pub person_id: Option<TrackId>,
    pub bbox: BBox,
    pub is_valid_human: bool,
    pub aspect_ratio: f32,
    pub fill_ratio: f32,
    pub contour_complexity: f32,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Auxiliary per-frame signals that feed the contextual and debounced checks
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ContextSignal {
    Object(TrackedObject),
    Overlay(OverlayCandidate),
    Silhouette(SilhouetteValidation),
}

/// Everything the perception models produced for one frame
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameAnnotations {
    pub frame_number: u64,
    pub poses: Vec<PoseDetection>,
    pub faces: Vec<FaceDetection>,
    pub objects: Vec<ObjectDetection>,
    pub oriented: Vec<OrientedBox>,
    pub scene: Option<SceneContext>,
    pub overlays: Vec<OverlayCandidate>,
    pub silhouettes: Vec<SilhouetteValidation>,
}
