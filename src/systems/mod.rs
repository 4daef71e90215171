pub mod activity;
pub mod anomaly;
pub mod history;
pub mod identity;
pub mod pose;
pub mod statistics;

use activity::{ActivityClassifier, ActivityObservation, social::apply_greeting_override};
use anomaly::{AnomalyDetector, AnomalyEvent};
use anyhow::Result;
use identity::IdentityTracker;
use log::{debug, info};
use serde::Serialize;
use statistics::{RunStatistics, StatsSnapshot};

use crate::{
    engine_config::EngineConfig,
    perception::{ContextSignal, FrameAnnotations},
    tracking::{TrackNamespace, TrackedFace, TrackedObject},
};

/// Everything the engine concluded about one frame
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FrameAnalysis {
    pub frame_number: u64,
    pub timestamp: f64,
    pub faces: Vec<TrackedFace>,
    pub activities: Vec<ActivityObservation>,
    pub objects: Vec<TrackedObject>,
    pub anomalies: Vec<AnomalyEvent>,
}

/// The engine: owns every stateful component for one run
pub struct Systems {
    pub face_tracker: IdentityTracker,
    pub person_tracker: IdentityTracker,
    pub object_tracker: IdentityTracker,
    pub activity_classifier: ActivityClassifier,
    pub anomaly_detector: AnomalyDetector,
    pub statistics: RunStatistics,
    fps: f32,
    min_detection_confidence: f32,
}

impl Systems {
    pub fn new(config: &EngineConfig) -> Result<Systems> {
        config.validate()?;
        info!(
            "Engine ready at {} fps; detections below {} confidence are ignored",
            config.fps, config.min_detection_confidence
        );

        Ok(Systems {
            face_tracker: IdentityTracker::new(TrackNamespace::Face, config.face_tracker),
            person_tracker: IdentityTracker::new(TrackNamespace::Person, config.person_tracker),
            object_tracker: IdentityTracker::new(TrackNamespace::Object, config.object_tracker),
            activity_classifier: ActivityClassifier::new(config.activity.clone()),
            anomaly_detector: AnomalyDetector::new(
                config.anomaly.clone(),
                config.fps,
                config.scene_rules.clone(),
            ),
            statistics: RunStatistics::new(),
            fps: config.fps,
            min_detection_confidence: config.min_detection_confidence,
        })
    }

    /// Frames must arrive in order; each call mutates the per-run state
    pub fn process_frame(&mut self, frame: &FrameAnnotations) -> FrameAnalysis {
        let min_confidence = self.min_detection_confidence;

        let faces: Vec<TrackedFace> = frame
            .faces
            .iter()
            .filter(|f| f.confidence >= min_confidence)
            .map(|f| TrackedFace {
                id: self.face_tracker.assign(&f.bbox),
                bbox: f.bbox,
                confidence: f.confidence,
                emotions: f.emotions.clone(),
            })
            .collect();

        let mut activities: Vec<ActivityObservation> = Vec::with_capacity(frame.poses.len());
        for pose in frame.poses.iter().filter(|p| p.confidence >= min_confidence) {
            let id = self.person_tracker.assign(&pose.bbox);
            activities.push(self.activity_classifier.observe(id, pose, &frame.oriented));
        }
        apply_greeting_override(&mut activities, self.activity_classifier.thresholds());

        let objects: Vec<TrackedObject> = frame
            .objects
            .iter()
            .filter(|o| o.confidence >= min_confidence)
            .map(|o| TrackedObject {
                id: self.object_tracker.assign(&o.bbox),
                class_name: o.class_name.clone(),
                confidence: o.confidence,
                category: o.category,
                bbox: o.bbox,
                anomaly_reason: o.anomaly_reason.clone(),
            })
            .collect();

        let signals: Vec<ContextSignal> = objects
            .iter()
            .cloned()
            .map(ContextSignal::Object)
            .chain(frame.overlays.iter().cloned().map(ContextSignal::Overlay))
            .chain(frame.silhouettes.iter().cloned().map(ContextSignal::Silhouette))
            .collect();

        let anomalies = self.anomaly_detector.update_with_context(
            frame.frame_number,
            &faces,
            &activities,
            frame.scene.as_ref(),
            &signals,
        );

        debug!(
            "Frame {}: {} faces, {} people, {} objects, {} anomalies",
            frame.frame_number,
            faces.len(),
            activities.len(),
            objects.len(),
            anomalies.len()
        );

        let analysis = FrameAnalysis {
            frame_number: frame.frame_number,
            timestamp: frame.frame_number as f64 / self.fps as f64,
            faces,
            activities,
            objects,
            anomalies,
        };
        self.statistics.record(&analysis);
        analysis
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.statistics
            .snapshot(self.anomaly_detector.get_statistics())
    }

    /// Forget everything from the current run
    pub fn reset(&mut self) {
        info!(
            "Resetting engine state: {} faces, {} people, {} objects, {} activity tracks",
            self.face_tracker.known_count(),
            self.person_tracker.known_count(),
            self.object_tracker.known_count(),
            self.activity_classifier.track_count()
        );
        self.face_tracker.reset();
        self.person_tracker.reset();
        self.object_tracker.reset();
        self.activity_classifier.reset();
        self.anomaly_detector.reset();
        self.statistics.reset();
    }
}
