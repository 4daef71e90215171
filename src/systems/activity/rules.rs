//! The ordered activity rule cascade.
//!
//! Each rule is a predicate over a [`PoseContext`]; the first rule that
//! matches decides the label. A rule whose joints are missing simply does not
//! match, so the cascade always falls through to the next one.

use crate::{
    Point2D,
    engine_config::{ActivityThresholds, RuleConfidences},
    geometry_utils::joint_angle,
    perception::{OrientationVerdict, OrientedBox},
    systems::{
        history::BoundedHistory,
        pose::{Joint, JointSet},
    },
    tracking::BBox,
};

use super::Activity;

/// Label used when no rule matches
pub const FALLBACK_ACTIVITY: Activity = Activity::Standing;

/// Everything a rule may look at for one person in one frame
pub struct PoseContext<'a> {
    pub joints: &'a JointSet,
    pub bbox: &'a BBox,
    /// Windowed average centroid velocity of the track
    pub velocity: f32,
    /// Pose history, the current pose being the latest entry
    pub poses: &'a BoundedHistory<JointSet>,
    pub oriented: &'a [OrientedBox],
    pub thresholds: &'a ActivityThresholds,
}

pub struct ActivityRule {
    pub name: &'static str,
    pub activity: Activity,
    pub confidence: f32,
    pub matches: fn(&PoseContext) -> bool,
}

impl ActivityRule {
    const fn new(
        name: &'static str,
        activity: Activity,
        confidence: f32,
        matches: fn(&PoseContext) -> bool,
    ) -> Self {
        ActivityRule {
            name,
            activity,
            confidence,
            matches,
        }
    }
}

pub fn default_cascade(c: &RuleConfidences) -> Vec<ActivityRule> {
    use Activity::*;
    vec![
        ActivityRule::new("lying", Lying, c.lying, is_lying),
        ActivityRule::new("running", Running, c.running, is_running),
        // Walking speed while clearly upright is more likely camera motion
        ActivityRule::new("upright_walking", Standing, c.upright_walking, is_upright_walking),
        ActivityRule::new("walking", Walking, c.walking, is_walking),
        ActivityRule::new("sitting", Sitting, c.sitting, is_sitting),
        ActivityRule::new("standing_clear", Standing, c.standing, is_standing_clear),
        ActivityRule::new("standing_frontal", Standing, c.standing_frontal, is_standing_frontal),
        ActivityRule::new("crouching", Crouching, c.crouching, is_crouching),
        ActivityRule::new("arms_raised", ArmsRaised, c.arms_raised, is_arms_raised),
        ActivityRule::new("waving", Waving, c.waving, is_waving),
        ActivityRule::new("pointing", Pointing, c.pointing, is_pointing),
        ActivityRule::new("dancing", Dancing, c.dancing, is_dancing),
    ]
}

pub fn evaluate_cascade(cascade: &[ActivityRule], ctx: &PoseContext) -> (Activity, f32) {
    cascade
        .iter()
        .find(|rule| (rule.matches)(ctx))
        .map(|rule| (rule.activity, rule.confidence))
        .unwrap_or((FALLBACK_ACTIVITY, ctx.thresholds.confidence.fallback))
}

// -------- LYING

/// Eyes level with each other and the nose below them: the face is upright,
/// so the body cannot be lying flat
fn face_is_vertical(joints: &JointSet, tolerance: f32) -> bool {
    match (
        joints.get(Joint::LeftEye),
        joints.get(Joint::RightEye),
        joints.get(Joint::Nose),
    ) {
        (Some(left), Some(right), Some(nose)) => {
            (left.1 - right.1).abs() < tolerance && nose.1 > left.1.max(right.1)
        }
        _ => false,
    }
}

/// Verdict of the best-overlapping oriented "person" box, if any overlaps enough
fn oriented_verdict(ctx: &PoseContext) -> Option<OrientationVerdict> {
    ctx.oriented
        .iter()
        .filter(|o| o.class_name == "person")
        .map(|o| (o.footprint().iou(ctx.bbox), o))
        .filter(|(iou, _)| *iou >= ctx.thresholds.oriented_match_iou)
        .fold(None, |best: Option<(f32, &OrientedBox)>, candidate| match best {
            Some((best_iou, _)) if best_iou >= candidate.0 => best,
            _ => Some(candidate),
        })
        .map(|(_, o)| o.verdict())
}

/// Torso evidence is always required. A matching oriented box can relax it
/// (lying) or rule it out (upright); an upright face rules out lying whatever
/// the box says.
fn is_lying(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    if face_is_vertical(ctx.joints, t.face_eye_level_tolerance) {
        return false;
    }
    let Some((dx, dy)) = ctx.joints.torso_span() else {
        return false;
    };

    match oriented_verdict(ctx) {
        Some(OrientationVerdict::Upright) => false,
        Some(OrientationVerdict::Lying) => dx > dy,
        _ => dx > dy * t.lying_horizontal_ratio && dx > t.lying_min_horizontal_dist,
    }
}

// -------- LOCOMOTION

fn is_running(ctx: &PoseContext) -> bool {
    ctx.velocity > ctx.thresholds.running_velocity
}

fn is_walking(ctx: &PoseContext) -> bool {
    ctx.velocity > ctx.thresholds.walking_velocity
}

fn legs_fully_extended(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    match (
        ctx.joints.hip_mid(),
        ctx.joints.knee_mid(),
        ctx.joints.ankle_mid(),
    ) {
        (Some(hip), Some(knee), Some(ankle)) => {
            knee.1 - hip.1 > t.standing_hip_knee_diff_min
                && ankle.1 - knee.1 > t.standing_knee_ankle_diff_min
        }
        _ => false,
    }
}

fn is_upright_walking(ctx: &PoseContext) -> bool {
    is_walking(ctx) && ctx.joints.is_upright() && legs_fully_extended(ctx)
}

// -------- SITTING / STANDING / CROUCHING

fn legs_occluded(joints: &JointSet) -> bool {
    !joints.has(Joint::LeftKnee)
        && !joints.has(Joint::RightKnee)
        && !joints.has(Joint::LeftAnkle)
        && !joints.has(Joint::RightAnkle)
}

fn is_sitting(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    let joints = ctx.joints;
    let (Some(hip), Some(shoulder)) = (joints.hip_mid(), joints.shoulder_mid()) else {
        return false;
    };

    // Seated at a desk: only the upper body is visible and it barely moves
    if legs_occluded(joints) {
        return ctx.velocity < t.sitting_max_velocity;
    }

    let Some(knee) = joints.knee_mid() else {
        return false;
    };
    let knee_drop = knee.1 - hip.1;
    let torso = (hip.1 - shoulder.1).abs();
    knee_drop.abs() < torso * t.sitting_torso_factor
        && knee_drop < t.sitting_knee_hip_diff_max
        && !is_crouching(ctx)
}

fn is_standing_clear(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    let joints = ctx.joints;
    let Some(hip) = joints.hip_mid() else {
        return false;
    };

    match (joints.knee_mid(), joints.ankle_mid()) {
        (Some(knee), Some(ankle)) => {
            knee.1 - hip.1 > t.standing_hip_knee_diff_min
                && ankle.1 - knee.1 > t.standing_knee_ankle_diff_min
        }
        (Some(knee), None) => knee.1 - hip.1 > t.standing_hip_knee_diff_min,
        (None, Some(ankle)) => ankle.1 - hip.1 > t.standing_hip_ankle_diff_min,
        (None, None) => false,
    }
}

/// Lowest visible knee or ankle
fn lowest_leg_point(joints: &JointSet) -> Option<Point2D> {
    [
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ]
    .iter()
    .filter_map(|j| joints.get(*j))
    .fold(None, |lowest: Option<Point2D>, p| match lowest {
        Some(l) if l.1 >= p.1 => Some(l),
        _ => Some(p),
    })
}

/// Weaker standing evidence for people facing the camera with partly hidden legs
fn is_standing_frontal(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    let joints = ctx.joints;
    let (Some(shoulder), Some(hip), Some(nose)) =
        (joints.shoulder_mid(), joints.hip_mid(), joints.get(Joint::Nose))
    else {
        return false;
    };
    let Some(leg) = lowest_leg_point(joints) else {
        return false;
    };

    let torso_dx = (shoulder.0 - hip.0).abs();
    let torso_dy = hip.1 - shoulder.1;
    let aspect = ctx.bbox.height / ctx.bbox.width.max(1.);

    torso_dy > t.frontal_shoulder_hip_min
        && torso_dy > torso_dx * t.frontal_torso_vertical_ratio
        && shoulder.1 - nose.1 > t.frontal_head_above_shoulders
        && aspect > t.frontal_bbox_aspect_ratio
        && leg.1 - hip.1 > t.frontal_leg_below_hip_min
        && !is_crouching(ctx)
}

fn is_crouching(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    let joints = ctx.joints;
    let (Some(hip), Some(knee), Some(ankle)) =
        (joints.hip_mid(), joints.knee_mid(), joints.ankle_mid())
    else {
        return false;
    };

    let hips_on_knees = knee.1 - hip.1 < t.crouching_hip_knee_diff;
    let ankles_below = ankle.1 > knee.1 + t.crouching_ankle_margin;
    let torso_compressed = match joints.shoulder_mid() {
        Some(shoulder) => {
            (hip.1 - shoulder.1) < (ankle.1 - hip.1) * t.crouching_torso_shank_ratio
        }
        None => true,
    };
    hips_on_knees && ankles_below && torso_compressed
}

// -------- ARMS

fn is_arms_raised(ctx: &PoseContext) -> bool {
    let joints = ctx.joints;
    let margin = ctx.thresholds.arms_raised_margin;
    match (
        joints.get(Joint::LeftWrist),
        joints.get(Joint::RightWrist),
        joints.get(Joint::Nose),
    ) {
        (Some(left), Some(right), Some(nose)) => {
            left.1 < nose.1 - margin && right.1 < nose.1 - margin
        }
        _ => false,
    }
}

/// (shoulder, elbow, wrist) for each side where all three are present
fn arms(joints: &JointSet) -> impl Iterator<Item = (Point2D, Point2D, Point2D)> + '_ {
    [
        (Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist),
        (Joint::RightShoulder, Joint::RightElbow, Joint::RightWrist),
    ]
    .into_iter()
    .filter_map(|(s, e, w)| Some((joints.get(s)?, joints.get(e)?, joints.get(w)?)))
}

fn is_waving(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    if ctx.velocity <= t.gesture_velocity {
        return false;
    }
    arms(ctx.joints).any(|(shoulder, elbow, wrist)| {
        let bend = joint_angle(&shoulder, &elbow, &wrist);
        wrist.1 < shoulder.1 - t.waving_hand_above_shoulder
            && bend > t.waving_elbow_angle_min
            && bend < t.waving_elbow_angle_max
    })
}

fn is_pointing(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    if ctx.velocity <= t.gesture_velocity {
        return false;
    }
    arms(ctx.joints).any(|(shoulder, elbow, wrist)| {
        joint_angle(&shoulder, &elbow, &wrist) > t.pointing_arm_angle_min
            && (wrist.0 - shoulder.0).abs() > t.pointing_horizontal_length
            && (wrist.1 - shoulder.1).abs() < t.pointing_vertical_variance
    })
}

// -------- DANCING

/// Mean |dx|+|dy| of each wrist against the same wrist in the previous
/// `window` poses (the current pose excluded)
fn recent_wrist_motion(ctx: &PoseContext) -> Option<f32> {
    let window = ctx.thresholds.dancing_window;
    let mut total = 0.;
    let mut count = 0;
    for previous in (1..=window).filter_map(|n| ctx.poses.nth_back(n)) {
        for wrist in [Joint::LeftWrist, Joint::RightWrist] {
            if let (Some(now), Some(then)) = (ctx.joints.get(wrist), previous.get(wrist)) {
                total += (now.0 - then.0).abs() + (now.1 - then.1).abs();
                count += 1;
            }
        }
    }
    if count > 0 {
        Some(total / count as f32)
    } else {
        None
    }
}

fn is_dancing(ctx: &PoseContext) -> bool {
    let t = ctx.thresholds;
    if ctx.poses.len() < t.dancing_min_history {
        return false;
    }
    let joints = ctx.joints;
    let (Some(left), Some(right), Some(hip)) = (
        joints.get(Joint::LeftWrist),
        joints.get(Joint::RightWrist),
        joints.hip_mid(),
    ) else {
        return false;
    };
    if left.1 > hip.1 || right.1 > hip.1 {
        return false;
    }

    match recent_wrist_motion(ctx) {
        Some(motion) => {
            motion > t.dancing_wrist_motion_min
                && motion < t.dancing_wrist_motion_max
                && ctx.velocity > t.dancing_velocity_min
                && ctx.velocity < t.dancing_velocity_max
        }
        None => false,
    }
}
