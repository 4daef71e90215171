use indexmap::IndexMap;
use log::{debug, info, warn};
use std::fs;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::tracking::BBox;

/// How far (in pixels) a centroid may drift between frames and still be
/// matched to an existing track
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum DriftLimit {
    Fixed { pixels: f32 },
    /// Multiple of the larger dimension of the incoming box
    ObjectScaled { factor: f32 },
}

impl DriftLimit {
    pub fn threshold_for(&self, bbox: &BBox) -> f32 {
        match self {
            DriftLimit::Fixed { pixels } => *pixels,
            DriftLimit::ObjectScaled { factor } => bbox.max_dimension() * factor,
        }
    }
}

/// Object classes that are expected, or out of place, for one scene type
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SceneRule {
    pub expected: Vec<String>,
    pub anomalous: Vec<String>,
}

impl SceneRule {
    fn from_lists(expected: &[&str], anomalous: &[&str]) -> Self {
        SceneRule {
            expected: expected.iter().map(|s| String::from(*s)).collect(),
            anomalous: anomalous.iter().map(|s| String::from(*s)).collect(),
        }
    }

    pub fn is_anomalous(&self, class_name: &str) -> bool {
        self.anomalous.iter().any(|c| c == class_name)
    }

    /// Classes listed as both expected and out of place
    pub fn contradictions(&self) -> Vec<&str> {
        self.expected
            .iter()
            .filter(|c| self.is_anomalous(c))
            .map(String::as_str)
            .collect()
    }
}

pub type SceneRuleMap = IndexMap<String, SceneRule>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityThresholds {
    /// Joints with a lower per-joint confidence are treated as not detected
    pub min_joint_confidence: f32,

    /// Capacity of each track's position and pose history
    pub history_capacity: usize,

    // -------- LYING
    /// Torso horizontal span must exceed this multiple of its vertical span
    pub lying_horizontal_ratio: f32,
    pub lying_min_horizontal_dist: f32,
    /// Eyes within this many pixels of each other vertically count as "level"
    pub face_eye_level_tolerance: f32,
    /// Minimum overlap for an oriented box to vouch for a person
    pub oriented_match_iou: f32,

    // -------- LOCOMOTION
    pub running_velocity: f32,
    pub walking_velocity: f32,
    /// Gestures are only considered above this velocity
    pub gesture_velocity: f32,

    // -------- SITTING / STANDING / CROUCHING
    pub sitting_max_velocity: f32,
    /// Knee-to-hip vertical drop must stay below this fraction of torso length
    pub sitting_torso_factor: f32,
    pub sitting_knee_hip_diff_max: f32,
    pub standing_hip_knee_diff_min: f32,
    pub standing_knee_ankle_diff_min: f32,
    pub standing_hip_ankle_diff_min: f32,
    pub frontal_shoulder_hip_min: f32,
    pub frontal_torso_vertical_ratio: f32,
    pub frontal_head_above_shoulders: f32,
    pub frontal_bbox_aspect_ratio: f32,
    pub frontal_leg_below_hip_min: f32,
    pub crouching_hip_knee_diff: f32,
    pub crouching_ankle_margin: f32,
    /// Upper torso counts as compressed below this fraction of the hip-to-ankle span
    pub crouching_torso_shank_ratio: f32,

    // -------- ARMS
    pub arms_raised_margin: f32,
    pub waving_hand_above_shoulder: f32,
    pub waving_elbow_angle_min: f32,
    pub waving_elbow_angle_max: f32,
    pub pointing_arm_angle_min: f32,
    pub pointing_horizontal_length: f32,
    pub pointing_vertical_variance: f32,

    // -------- DANCING
    pub dancing_min_history: usize,
    /// How many earlier poses the wrist motion is averaged over
    pub dancing_window: usize,
    pub dancing_wrist_motion_min: f32,
    pub dancing_wrist_motion_max: f32,
    pub dancing_velocity_min: f32,
    pub dancing_velocity_max: f32,

    // -------- GREETING
    pub greeting_wrist_distance_max: f32,
    pub greeting_shoulder_distance_min: f32,
    pub greeting_wrist_height_diff_max: f32,
    /// Allowed offset of the wrist midpoint from the pair midpoint, as a
    /// fraction of the shoulder distance
    pub greeting_midpoint_tolerance: f32,

    // -------- LABEL CONFIDENCES
    pub confidence: RuleConfidences,
}

/// Confidence reported with each label, before it is scaled by the
/// detection confidence
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleConfidences {
    pub lying: f32,
    pub running: f32,
    /// Walking speed with clearly extended legs, reported as standing
    pub upright_walking: f32,
    pub walking: f32,
    pub sitting: f32,
    pub standing: f32,
    pub standing_frontal: f32,
    pub crouching: f32,
    pub arms_raised: f32,
    pub waving: f32,
    pub pointing: f32,
    pub dancing: f32,
    pub greeting: f32,
    /// Nothing matched
    pub fallback: f32,
}

impl Default for RuleConfidences {
    fn default() -> Self {
        RuleConfidences {
            lying: 0.8,
            running: 0.8,
            upright_walking: 0.7,
            walking: 0.75,
            sitting: 0.75,
            standing: 0.75,
            standing_frontal: 0.65,
            crouching: 0.75,
            arms_raised: 0.85,
            waving: 0.8,
            pointing: 0.75,
            dancing: 0.8,
            greeting: 0.8,
            fallback: 0.6,
        }
    }
}

impl RuleConfidences {
    fn named(&self) -> [(&'static str, f32); 14] {
        [
            ("lying", self.lying),
            ("running", self.running),
            ("uprightWalking", self.upright_walking),
            ("walking", self.walking),
            ("sitting", self.sitting),
            ("standing", self.standing),
            ("standingFrontal", self.standing_frontal),
            ("crouching", self.crouching),
            ("armsRaised", self.arms_raised),
            ("waving", self.waving),
            ("pointing", self.pointing),
            ("dancing", self.dancing),
            ("greeting", self.greeting),
            ("fallback", self.fallback),
        ]
    }
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        ActivityThresholds {
            min_joint_confidence: 0.3,
            history_capacity: 10,
            lying_horizontal_ratio: 2.0,
            lying_min_horizontal_dist: 100.,
            face_eye_level_tolerance: 15.,
            oriented_match_iou: 0.3,
            running_velocity: 80.,
            walking_velocity: 25.,
            gesture_velocity: 5.,
            sitting_max_velocity: 15.,
            sitting_torso_factor: 0.5,
            sitting_knee_hip_diff_max: 80.,
            standing_hip_knee_diff_min: 50.,
            standing_knee_ankle_diff_min: 30.,
            standing_hip_ankle_diff_min: 100.,
            frontal_shoulder_hip_min: 40.,
            frontal_torso_vertical_ratio: 1.5,
            frontal_head_above_shoulders: 20.,
            frontal_bbox_aspect_ratio: 1.2,
            frontal_leg_below_hip_min: 20.,
            crouching_hip_knee_diff: 30.,
            crouching_ankle_margin: 10.,
            crouching_torso_shank_ratio: 0.8,
            arms_raised_margin: 20.,
            waving_hand_above_shoulder: 40.,
            waving_elbow_angle_min: 40.,
            waving_elbow_angle_max: 160.,
            pointing_arm_angle_min: 150.,
            pointing_horizontal_length: 80.,
            pointing_vertical_variance: 60.,
            dancing_min_history: 8,
            dancing_window: 5,
            dancing_wrist_motion_min: 15.,
            dancing_wrist_motion_max: 80.,
            dancing_velocity_min: 5.,
            dancing_velocity_max: 40.,
            greeting_wrist_distance_max: 60.,
            greeting_shoulder_distance_min: 150.,
            greeting_wrist_height_diff_max: 50.,
            greeting_midpoint_tolerance: 0.25,
            confidence: RuleConfidences::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AnomalyThresholds {
    // -------- MOVEMENT
    /// Absolute velocity floor (pixels/frame) for a sudden movement
    pub sudden_movement_threshold: f32,
    /// How many standard deviations above the baseline mean also count
    pub sudden_movement_sigma: f32,

    // -------- EMOTION
    pub emotion_change_threshold: f32,
    pub emotion_min_history: usize,

    // -------- INACTIVITY
    /// Consecutive absent frames before a single inactivity event
    pub inactivity_threshold: u32,

    // -------- ACTIVITY FREQUENCY
    pub activity_min_history: usize,
    pub activity_min_distinct_labels: usize,
    pub activity_rare_frequency: f32,

    // -------- HISTORIES & BASELINE
    pub metrics_capacity: usize,
    pub baseline_capacity: usize,
    /// Baseline statistics are only trusted once the buffer holds more samples than this
    pub baseline_min_samples: usize,
    pub baseline_std_floor: f32,

    // -------- PERSISTENCE GATE
    pub persistence_threshold: u32,
    pub persistence_max_gap: u64,
    /// Quantisation (pixels) for spatial gate keys
    pub spatial_bucket_size: f32,

    // -------- FIXED SEVERITIES
    pub scene_inconsistency_severity: f32,
    pub overlay_severity: f32,
    pub object_severity: f32,
    pub inactivity_severity: f32,
    pub unusual_activity_severity: f32,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        AnomalyThresholds {
            sudden_movement_threshold: 80.,
            sudden_movement_sigma: 3.0,
            emotion_change_threshold: 0.5,
            emotion_min_history: 3,
            inactivity_threshold: 90,
            activity_min_history: 10,
            activity_min_distinct_labels: 2,
            activity_rare_frequency: 0.05,
            metrics_capacity: 30,
            baseline_capacity: 1000,
            baseline_min_samples: 100,
            baseline_std_floor: 1.0,
            persistence_threshold: 3,
            persistence_max_gap: 30,
            spatial_bucket_size: 100.,
            scene_inconsistency_severity: 0.85,
            overlay_severity: 0.6,
            object_severity: 0.6,
            inactivity_severity: 0.4,
            unusual_activity_severity: 0.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Frame rate of the analysed footage; converts frame numbers to seconds
    pub fps: f32,

    /// Pose and object detections below this confidence are ignored
    pub min_detection_confidence: f32,

    // -------- IDENTITY TRACKING
    pub face_tracker: DriftLimit,
    pub person_tracker: DriftLimit,
    pub object_tracker: DriftLimit,

    // -------- RUNNER
    /// Emit a statistics snapshot every N frames...
    pub snapshot_every_frames: u64,
    /// ...or whenever this much wall-clock time has passed, whichever is first
    pub snapshot_interval_ms: u64,
    /// How long (ms) the paused worker sleeps between polls
    pub pause_poll_ms: u64,

    // -------- SCENE CONTEXT
    pub scene_rules: SceneRuleMap,

    pub activity: ActivityThresholds,
    pub anomaly: AnomalyThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            fps: 30.,
            min_detection_confidence: 0.5,
            face_tracker: DriftLimit::Fixed { pixels: 100. },
            person_tracker: DriftLimit::Fixed { pixels: 100. },
            object_tracker: DriftLimit::ObjectScaled { factor: 2.0 },
            snapshot_every_frames: 30,
            snapshot_interval_ms: 1000,
            pause_poll_ms: 100,
            scene_rules: default_scene_rules(),
            activity: ActivityThresholds::default(),
            anomaly: AnomalyThresholds::default(),
        }
    }
}

fn default_scene_rules() -> SceneRuleMap {
    let mut rules = IndexMap::new();
    rules.insert(
        String::from("office"),
        SceneRule::from_lists(
            &[
                "person",
                "chair",
                "laptop",
                "tv",
                "cell phone",
                "book",
                "keyboard",
                "mouse",
                "desk",
                "tie",
                "suit",
            ],
            &[
                "sports ball",
                "skateboard",
                "baseball bat",
                "bed",
                "toilet",
                "bicycle",
                "car",
                "motorcycle",
                "surfboard",
            ],
        ),
    );
    rules.insert(
        String::from("home"),
        SceneRule::from_lists(
            &[
                "person",
                "chair",
                "sofa",
                "tv",
                "bed",
                "refrigerator",
                "microwave",
                "cup",
                "bottle",
                "dining table",
                "sink",
                "toilet",
            ],
            &["bus", "truck", "traffic light", "fire hydrant", "airplane"],
        ),
    );
    rules.insert(
        String::from("outdoors"),
        SceneRule::from_lists(
            &[
                "person",
                "bicycle",
                "car",
                "dog",
                "bird",
                "umbrella",
                "bench",
                "bus",
                "truck",
                "airplane",
                "traffic light",
            ],
            &[
                "tv",
                "mouse",
                "keyboard",
                "microwave",
                "refrigerator",
                "couch",
                "bed",
                "sink",
            ],
        ),
    );
    rules
}

fn check_positive(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value <= 0. {
        bail!("{} must be a positive number, got {}", name, value);
    }
    Ok(())
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0. ..=1.).contains(&value) {
        bail!("{} must be within [0,1], got {}", name, value);
    }
    Ok(())
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("fps", self.fps)?;
        check_unit("minDetectionConfidence", self.min_detection_confidence)?;

        for (name, limit) in [
            ("faceTracker", &self.face_tracker),
            ("personTracker", &self.person_tracker),
            ("objectTracker", &self.object_tracker),
        ] {
            match limit {
                DriftLimit::Fixed { pixels } => check_positive(name, *pixels)?,
                DriftLimit::ObjectScaled { factor } => check_positive(name, *factor)?,
            }
        }

        let a = &self.activity;
        check_unit("activity.minJointConfidence", a.min_joint_confidence)?;
        check_unit("activity.orientedMatchIou", a.oriented_match_iou)?;
        if a.history_capacity < 3 {
            bail!(
                "activity.historyCapacity must hold at least 3 entries, got {}",
                a.history_capacity
            );
        }
        if a.walking_velocity >= a.running_velocity {
            bail!(
                "activity.walkingVelocity ({}) must be below activity.runningVelocity ({})",
                a.walking_velocity,
                a.running_velocity
            );
        }
        if a.dancing_window == 0 || a.dancing_window >= a.dancing_min_history {
            bail!(
                "activity.dancingWindow must be between 1 and dancingMinHistory - 1, got {}",
                a.dancing_window
            );
        }
        if a.dancing_min_history > a.history_capacity {
            warn!(
                "activity.dancingMinHistory ({}) exceeds historyCapacity ({}); \
                 dancing can never be detected",
                a.dancing_min_history, a.history_capacity
            );
        }
        if a.waving_elbow_angle_min > a.waving_elbow_angle_max {
            bail!("activity.wavingElbowAngleMin must not exceed wavingElbowAngleMax");
        }
        for (name, confidence) in a.confidence.named() {
            check_unit(&format!("activity.confidence.{}", name), confidence)?;
        }

        for (scene_type, rule) in &self.scene_rules {
            let contradictions = rule.contradictions();
            if !contradictions.is_empty() {
                bail!(
                    "sceneRules.{} lists {:?} as both expected and anomalous",
                    scene_type,
                    contradictions
                );
            }
        }

        let n = &self.anomaly;
        check_positive("anomaly.suddenMovementThreshold", n.sudden_movement_threshold)?;
        check_positive("anomaly.emotionChangeThreshold", n.emotion_change_threshold)?;
        check_positive("anomaly.baselineStdFloor", n.baseline_std_floor)?;
        check_positive("anomaly.spatialBucketSize", n.spatial_bucket_size)?;
        check_unit("anomaly.activityRareFrequency", n.activity_rare_frequency)?;
        if n.emotion_min_history < 2 {
            bail!("anomaly.emotionMinHistory must be at least 2");
        }
        if n.persistence_threshold == 0 {
            bail!("anomaly.persistenceThreshold must be at least 1");
        }
        if n.inactivity_threshold == 0 {
            bail!("anomaly.inactivityThreshold must be at least 1");
        }
        if n.metrics_capacity < n.activity_min_history.max(n.emotion_min_history) {
            warn!(
                "anomaly.metricsCapacity ({}) is smaller than the history some checks require",
                n.metrics_capacity
            );
        }
        for (name, severity) in [
            ("sceneInconsistencySeverity", n.scene_inconsistency_severity),
            ("overlaySeverity", n.overlay_severity),
            ("objectSeverity", n.object_severity),
            ("inactivitySeverity", n.inactivity_severity),
            ("unusualActivitySeverity", n.unusual_activity_severity),
        ] {
            check_unit(name, severity)?;
        }

        Ok(())
    }

    /// Replace this config with one packed as MessagePack
    pub fn parse_packed_config(&mut self, payload: &[u8]) -> Result<()> {
        match rmp_serde::from_slice::<EngineConfig>(payload) {
            Ok(config) => {
                config.validate()?;
                *self = config;
                Ok(())
            }
            Err(e) => Err(anyhow!("Failed to parse Config from message: {}", e)),
        }
    }

    pub fn write_config_to_file(&self, config_file_path: &str) -> Result<()> {
        debug!("Current state of config: {:?}", self);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, text)
            .with_context(|| format!("Error writing config to file {}", config_file_path))?;
        info!("Wrote config to file: {:?}", config_file_path);
        Ok(())
    }

}

pub fn load_config_from_file(config_file_path: &str) -> Result<EngineConfig> {
    let config = match fs::read_to_string(config_file_path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Engine config file not found at {}, will use defaults",
                &config_file_path
            );
            EngineConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to load Engine Config from {}", config_file_path)
            });
        }
        Ok(s) => {
            info!("Loaded Engine config OK from \"{}\"", config_file_path);
            let loaded = serde_json::from_str::<EngineConfig>(&s)
                .map_err(|e| anyhow!("Failed to parse config data: {}", e))?;
            debug!("Config parsed data from file: {:?}", &loaded);
            loaded
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.activity.running_velocity, 80.);
        assert_eq!(config.anomaly.persistence_threshold, 3);
        assert!(
            config
                .scene_rules
                .get("office")
                .map(|r| r.is_anomalous("skateboard"))
                .unwrap_or(false)
        );
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"fps": 25, "anomaly": {"inactivityThreshold": 10}}"#)
                .expect("should parse");
        assert_eq!(config.fps, 25.);
        assert_eq!(config.anomaly.inactivity_threshold, 10);
        assert_eq!(config.anomaly.persistence_max_gap, 30);
        assert_eq!(config.activity.walking_velocity, 25.);
    }

    #[test]
    fn test_validate_rejects_inverted_velocities() {
        let mut config = EngineConfig::default();
        config.activity.walking_velocity = 90.;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_contradictory_scene_rule() {
        let mut config = EngineConfig::default();
        if let Some(office) = config.scene_rules.get_mut("office") {
            office.anomalous.push(String::from("laptop"));
        }
        assert_eq!(
            config.scene_rules.get("office").map(|r| r.contradictions()),
            Some(vec!["laptop"])
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_confidence_above_one() {
        let mut config = EngineConfig::default();
        config.activity.confidence.greeting = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_drift_limits() {
        let bbox = BBox::new(0., 0., 30., 50.);
        assert_eq!(DriftLimit::Fixed { pixels: 100. }.threshold_for(&bbox), 100.);
        assert_eq!(
            DriftLimit::ObjectScaled { factor: 2.0 }.threshold_for(&bbox),
            100.
        );
    }

    #[test]
    fn test_packed_config_replaces_current() {
        let mut remote = EngineConfig::default();
        remote.fps = 12.;
        let packed = rmp_serde::to_vec_named(&remote).expect("pack");

        let mut config = EngineConfig::default();
        config.parse_packed_config(&packed).expect("parse");
        assert_eq!(config.fps, 12.);

        assert!(config.parse_packed_config(&[0xc1]).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config_from_file("/nonexistent/scenewatch/engine.json")
            .expect("missing file should fall back");
        assert_eq!(config, EngineConfig::default());
    }
}
