pub mod rules;
pub mod social;

use std::fmt;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    Point2D,
    engine_config::ActivityThresholds,
    perception::{OrientedBox, PoseDetection},
    tracking::{BBox, TrackId},
};

use super::{
    history::BoundedHistory,
    pose::{JointSet, instantaneous_velocity, windowed_velocity},
};
use rules::{ActivityRule, PoseContext, default_cascade, evaluate_cascade};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Standing,
    Sitting,
    Walking,
    Running,
    Lying,
    Waving,
    Pointing,
    Dancing,
    Crouching,
    ArmsRaised,
    Greeting,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Standing => "standing",
            Activity::Sitting => "sitting",
            Activity::Walking => "walking",
            Activity::Running => "running",
            Activity::Lying => "lying",
            Activity::Waving => "waving",
            Activity::Pointing => "pointing",
            Activity::Dancing => "dancing",
            Activity::Crouching => "crouching",
            Activity::ArmsRaised => "arms_raised",
            Activity::Greeting => "greeting",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One person's classified activity for one frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityObservation {
    pub track_id: TrackId,
    pub activity: Activity,
    /// Rule confidence multiplied by the detector's confidence
    pub confidence: f32,
    pub detection_confidence: f32,
    pub bbox: BBox,
    /// Centroid displacement since the previous frame, in pixels
    pub velocity: f32,
    #[serde(skip)]
    pub joints: Option<JointSet>,
}

struct TrackHistory {
    positions: BoundedHistory<Point2D>,
    poses: BoundedHistory<JointSet>,
}

impl TrackHistory {
    fn new(capacity: usize) -> Self {
        TrackHistory {
            positions: BoundedHistory::new(capacity),
            poses: BoundedHistory::new(capacity),
        }
    }
}

/// Per-person activity classification.
///
/// Nothing about the previous label is remembered: every call re-runs the
/// rule cascade over the current joints plus the track's bounded position
/// and pose histories.
pub struct ActivityClassifier {
    thresholds: ActivityThresholds,
    cascade: Vec<ActivityRule>,
    tracks: IndexMap<TrackId, TrackHistory>,
    empty_positions: BoundedHistory<Point2D>,
    empty_poses: BoundedHistory<JointSet>,
}

impl ActivityClassifier {
    pub fn new(thresholds: ActivityThresholds) -> Self {
        let cascade = default_cascade(&thresholds.confidence);
        ActivityClassifier {
            thresholds,
            cascade,
            tracks: IndexMap::new(),
            empty_positions: BoundedHistory::new(1),
            empty_poses: BoundedHistory::new(1),
        }
    }

    pub fn thresholds(&self) -> &ActivityThresholds {
        &self.thresholds
    }

    /// Append the latest centroid and pose to a track's history
    pub fn record(&mut self, track_id: TrackId, centroid: Point2D, joints: JointSet) {
        let capacity = self.thresholds.history_capacity;
        let track = self.tracks.entry(track_id).or_insert_with(|| {
            debug!("Start activity history for person #{}", track_id);
            TrackHistory::new(capacity)
        });
        track.positions.push(centroid);
        track.poses.push(joints);
    }

    /// Record a pose detection for `track_id`, then classify it. The returned
    /// confidence is scaled by the detection's own confidence.
    pub fn observe(
        &mut self,
        track_id: TrackId,
        detection: &PoseDetection,
        oriented: &[OrientedBox],
    ) -> ActivityObservation {
        let joints = JointSet::from_detection(detection, self.thresholds.min_joint_confidence);
        self.record(track_id, detection.bbox.centroid(), joints);

        let mut observation =
            self.classify_with_orientation(track_id, &joints, &detection.bbox, oriented);
        observation.detection_confidence = detection.confidence;
        observation.confidence *= detection.confidence;
        observation
    }

    pub fn classify_activity(
        &self,
        track_id: TrackId,
        joints: &JointSet,
        bbox: &BBox,
    ) -> ActivityObservation {
        self.classify_with_orientation(track_id, joints, bbox, &[])
    }

    /// Pure with respect to the classifier: reads the track's history as
    /// already recorded, changes nothing.
    pub fn classify_with_orientation(
        &self,
        track_id: TrackId,
        joints: &JointSet,
        bbox: &BBox,
        oriented: &[OrientedBox],
    ) -> ActivityObservation {
        let (positions, poses) = match self.tracks.get(&track_id) {
            Some(track) => (&track.positions, &track.poses),
            None => (&self.empty_positions, &self.empty_poses),
        };

        let context = PoseContext {
            joints,
            bbox,
            velocity: windowed_velocity(positions),
            poses,
            oriented,
            thresholds: &self.thresholds,
        };
        let (activity, confidence) = evaluate_cascade(&self.cascade, &context);

        ActivityObservation {
            track_id,
            activity,
            confidence,
            detection_confidence: 1.0,
            bbox: *bbox,
            velocity: instantaneous_velocity(positions),
            joints: Some(*joints),
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}
