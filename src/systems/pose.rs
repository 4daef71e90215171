//! Pose features: named nullable joints, velocities over a position history.

use serde::{Deserialize, Serialize};

use crate::{Point2D, geometry_utils::distance_points, perception::PoseDetection};

use super::history::BoundedHistory;

pub const JOINT_COUNT: usize = 17;

/// COCO keypoint order
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Joint {
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::Nose,
        Joint::LeftEye,
        Joint::RightEye,
        Joint::LeftEar,
        Joint::RightEar,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Up to 17 joints, each independently absent. Undetected joints are `None`,
/// never a zero-filled point.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct JointSet([Option<Point2D>; JOINT_COUNT]);

impl JointSet {
    /// Build from raw detector output. A joint is kept when its coordinates
    /// are not both zero and, if per-joint confidences are supplied, its
    /// confidence reaches `min_confidence`.
    pub fn from_raw(
        keypoints: &[[f32; 2]],
        confidence: Option<&[f32]>,
        min_confidence: f32,
    ) -> Self {
        let mut joints = [None; JOINT_COUNT];
        for (i, slot) in joints.iter_mut().enumerate() {
            let Some([x, y]) = keypoints.get(i).copied() else {
                continue;
            };
            if x == 0. && y == 0. {
                continue;
            }
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            if let Some(c) = confidence.and_then(|c| c.get(i)) {
                if *c < min_confidence {
                    continue;
                }
            }
            *slot = Some((x, y));
        }
        JointSet(joints)
    }

    pub fn from_detection(detection: &PoseDetection, min_confidence: f32) -> Self {
        JointSet::from_raw(
            &detection.keypoints,
            detection.keypoint_confidence.as_deref(),
            min_confidence,
        )
    }

    pub fn get(&self, joint: Joint) -> Option<Point2D> {
        self.0[joint.index()]
    }

    pub fn set(&mut self, joint: Joint, point: Option<Point2D>) {
        self.0[joint.index()] = point;
    }

    pub fn with(mut self, joint: Joint, point: Point2D) -> Self {
        self.set(joint, Some(point));
        self
    }

    pub fn has(&self, joint: Joint) -> bool {
        self.get(joint).is_some()
    }

    /// Midpoint of a left/right pair; falls back to whichever side is present
    pub fn pair_mid(&self, left: Joint, right: Joint) -> Option<Point2D> {
        match (self.get(left), self.get(right)) {
            (Some(l), Some(r)) => Some(((l.0 + r.0) / 2., (l.1 + r.1) / 2.)),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        }
    }

    pub fn shoulder_mid(&self) -> Option<Point2D> {
        self.pair_mid(Joint::LeftShoulder, Joint::RightShoulder)
    }

    pub fn hip_mid(&self) -> Option<Point2D> {
        self.pair_mid(Joint::LeftHip, Joint::RightHip)
    }

    pub fn knee_mid(&self) -> Option<Point2D> {
        self.pair_mid(Joint::LeftKnee, Joint::RightKnee)
    }

    pub fn ankle_mid(&self) -> Option<Point2D> {
        self.pair_mid(Joint::LeftAnkle, Joint::RightAnkle)
    }

    /// Torso spans (horizontal, vertical) between shoulder and hip midpoints
    pub fn torso_span(&self) -> Option<(f32, f32)> {
        let s = self.shoulder_mid()?;
        let h = self.hip_mid()?;
        Some(((s.0 - h.0).abs(), (s.1 - h.1).abs()))
    }

    /// Torso more vertical than horizontal
    pub fn is_upright(&self) -> bool {
        self.torso_span().map(|(dx, dy)| dy > dx).unwrap_or(false)
    }
}

/// Distance between the two most recent positions; 0 with fewer than two
pub fn instantaneous_velocity(positions: &BoundedHistory<Point2D>) -> f32 {
    match (positions.nth_back(0), positions.nth_back(1)) {
        (Some(latest), Some(previous)) => distance_points(latest, previous),
        _ => 0.,
    }
}

/// Mean of consecutive-pair distances over the whole window; 0 with fewer
/// than three positions
pub fn windowed_velocity(positions: &BoundedHistory<Point2D>) -> f32 {
    if positions.len() < 3 {
        return 0.;
    }
    let steps: Vec<f32> = positions
        .iter()
        .zip(positions.iter().skip(1))
        .map(|(a, b)| distance_points(a, b))
        .collect();
    steps.iter().sum::<f32>() / steps.len() as f32
}
