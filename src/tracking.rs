use serde::{Deserialize, Serialize};

use crate::{
    Point2D,
    perception::{EmotionScores, ObjectCategory},
};

pub type TrackId = u32;

/// Axis-aligned bounding box; `(x, y)` is the top-left corner, with y growing
/// downwards as in image coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        BBox {
            x,
            y,
            width,
            height,
        }
    }

    pub fn centroid(&self) -> Point2D {
        (self.x + self.width / 2., self.y + self.height / 2.)
    }

    pub fn max_dimension(&self) -> f32 {
        self.width.max(self.height)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.) * self.height.max(0.)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let ix = self.x.max(other.x);
        let iy = self.y.max(other.y);
        let iw = (self.x + self.width).min(other.x + other.width) - ix;
        let ih = (self.y + self.height).min(other.y + other.height) - iy;
        if iw <= 0. || ih <= 0. {
            return 0.;
        }
        let intersection = iw * ih;
        let union = self.area() + other.area() - intersection;
        if union > 0. { intersection / union } else { 0. }
    }
}

/// Each detector type gets its own id space
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TrackNamespace {
    Face,
    Person,
    Object,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub namespace: TrackNamespace,
    pub id: TrackId,
}

impl TrackRef {
    pub fn face(id: TrackId) -> Self {
        TrackRef {
            namespace: TrackNamespace::Face,
            id,
        }
    }

    pub fn person(id: TrackId) -> Self {
        TrackRef {
            namespace: TrackNamespace::Person,
            id,
        }
    }

    pub fn object(id: TrackId) -> Self {
        TrackRef {
            namespace: TrackNamespace::Object,
            id,
        }
    }
}

/// A face detection after identity assignment, with the emotion scores the
/// upstream emotion model produced for it (if any).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackedFace {
    pub id: TrackId,
    pub bbox: BBox,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotions: Option<EmotionScores>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TrackedObject {
    pub id: TrackId,
    pub class_name: String,
    pub confidence: f32,
    pub category: ObjectCategory,
    pub bbox: BBox,
    /// Set by the object detector when it considers the object out of place
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_reason: Option<String>,
}
