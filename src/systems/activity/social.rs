use log::debug;

use crate::{
    Point2D,
    engine_config::ActivityThresholds,
    geometry_utils::distance_points,
    systems::pose::{Joint, JointSet},
};

use super::{Activity, ActivityObservation};

/// Same-side wrists of two people meeting between them, e.g. a handshake
fn touching_wrists(
    a: &JointSet,
    b: &JointSet,
    t: &ActivityThresholds,
) -> Option<(Point2D, Point2D)> {
    [Joint::LeftWrist, Joint::RightWrist]
        .into_iter()
        .filter_map(|w| Some((a.get(w)?, b.get(w)?)))
        .find(|(wa, wb)| distance_points(wa, wb) < t.greeting_wrist_distance_max)
}

pub fn is_greeting(a: &JointSet, b: &JointSet, t: &ActivityThresholds) -> bool {
    if !a.is_upright() || !b.is_upright() {
        return false;
    }
    let (Some(shoulders_a), Some(shoulders_b)) = (a.shoulder_mid(), b.shoulder_mid()) else {
        return false;
    };
    let apart = distance_points(&shoulders_a, &shoulders_b);
    if apart <= t.greeting_shoulder_distance_min {
        return false;
    }
    let Some((wrist_a, wrist_b)) = touching_wrists(a, b, t) else {
        return false;
    };
    if (wrist_a.1 - wrist_b.1).abs() >= t.greeting_wrist_height_diff_max {
        return false;
    }

    // The hands must meet between the two people, not off to one side
    let wrists_mid = ((wrist_a.0 + wrist_b.0) / 2., (wrist_a.1 + wrist_b.1) / 2.);
    let people_mid = (
        (shoulders_a.0 + shoulders_b.0) / 2.,
        (shoulders_a.1 + shoulders_b.1) / 2.,
    );
    (wrists_mid.0 - people_mid.0).abs() < apart * t.greeting_midpoint_tolerance
}

/// Relabel every pair of people that appear to be greeting each other.
/// Runs after all of the frame's observations have been classified.
pub fn apply_greeting_override(observations: &mut [ActivityObservation], t: &ActivityThresholds) {
    let mut greeting = vec![false; observations.len()];

    for i in 0..observations.len() {
        for j in (i + 1)..observations.len() {
            let (a, b) = (&observations[i], &observations[j]);
            if a.activity == Activity::Lying || b.activity == Activity::Lying {
                continue;
            }
            let (Some(joints_a), Some(joints_b)) = (a.joints.as_ref(), b.joints.as_ref()) else {
                continue;
            };
            if is_greeting(joints_a, joints_b, t) {
                debug!("People #{} and #{} are greeting", a.track_id, b.track_id);
                greeting[i] = true;
                greeting[j] = true;
            }
        }
    }

    for (observation, _) in observations
        .iter_mut()
        .zip(greeting)
        .filter(|(_, is_greeting)| *is_greeting)
    {
        observation.activity = Activity::Greeting;
        observation.confidence = t.confidence.greeting * observation.detection_confidence;
    }
}
