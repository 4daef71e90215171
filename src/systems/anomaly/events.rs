use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tracking::{BBox, TrackRef};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    SuddenMovement,
    EmotionSpike,
    UnusualActivity,
    ProlongedInactivity,
    VisualOverlay,
    SceneInconsistency,
    SuddenObjectAppear,
    SilhouetteAnomaly,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::SuddenMovement => "sudden_movement",
            AnomalyType::EmotionSpike => "emotion_spike",
            AnomalyType::UnusualActivity => "unusual_activity",
            AnomalyType::ProlongedInactivity => "prolonged_inactivity",
            AnomalyType::VisualOverlay => "visual_overlay",
            AnomalyType::SceneInconsistency => "scene_inconsistency",
            AnomalyType::SuddenObjectAppear => "sudden_object_appear",
            AnomalyType::SilhouetteAnomaly => "silhouette_anomaly",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEvent {
    pub anomaly_type: AnomalyType,
    /// Always within [0,1]
    pub severity: f32,
    /// Seconds since the start of the footage
    pub timestamp: f64,
    pub frame_number: u64,
    pub track: Option<TrackRef>,
    pub description: String,
    pub details: IndexMap<String, Value>,
    pub bbox: Option<BBox>,
}

impl AnomalyEvent {
    pub fn new(
        anomaly_type: AnomalyType,
        severity: f32,
        frame_number: u64,
        fps: f32,
        description: String,
    ) -> Self {
        debug_assert!(
            severity.is_finite(),
            "non-finite severity for {}",
            anomaly_type
        );
        let severity = if severity.is_finite() {
            severity.clamp(0., 1.)
        } else {
            0.
        };
        AnomalyEvent {
            anomaly_type,
            severity,
            timestamp: frame_number as f64 / fps as f64,
            frame_number,
            track: None,
            description,
            details: IndexMap::new(),
            bbox: None,
        }
    }

    pub fn with_track(mut self, track: TrackRef) -> Self {
        self.track = Some(track);
        self
    }

    pub fn with_bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(String::from(key), value.into());
        self
    }
}
