pub mod events;
pub mod metrics;
pub mod persistence;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info};
use serde::Serialize;

use crate::{
    engine_config::{AnomalyThresholds, SceneRuleMap},
    perception::{
        ContextSignal, EmotionScores, OverlayCandidate, SceneContext, SilhouetteValidation,
        dominant_emotion,
    },
    tracking::{BBox, TrackId, TrackRef, TrackedFace, TrackedObject},
};

use super::activity::{Activity, ActivityObservation};
pub use events::{AnomalyEvent, AnomalyType};
use metrics::{SubjectMetrics, VelocityBaseline};
use persistence::{PendingAnomaly, PendingAnomalyCache};

/// Aggregate view of everything the detector has seen since the last reset
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStatistics {
    pub total_frames: u64,
    pub total_anomalies: usize,
    pub anomalies_by_type: IndexMap<AnomalyType, usize>,
    pub average_severity: f32,
    pub subjects_tracked: usize,
    pub global_velocity_mean: f32,
    pub global_velocity_std: f32,
    /// Gated candidates seen but not yet confirmed
    pub pending_candidates: usize,
}

/// Frame-sequential behavioural and contextual anomaly detection.
///
/// Per-observation checks (emotion spike, sudden movement, unusual activity)
/// and the inactivity and scene checks report immediately; noisy auxiliary
/// signals (flagged objects, overlays, implausible silhouettes) are only
/// reported once they persist through the [`PendingAnomalyCache`].
pub struct AnomalyDetector {
    thresholds: AnomalyThresholds,
    fps: f32,
    scene_rules: SceneRuleMap,
    subjects: IndexMap<TrackRef, SubjectMetrics>,
    baseline: VelocityBaseline,
    pending: PendingAnomalyCache,
    /// (scene type, object) pairs already reported as out of place
    reported_scene_objects: IndexSet<(String, TrackId)>,
    last_frame: u64,
    anomalies_by_type: IndexMap<AnomalyType, usize>,
    severity_total: f64,
}

impl AnomalyDetector {
    pub fn new(thresholds: AnomalyThresholds, fps: f32, scene_rules: SceneRuleMap) -> Self {
        let baseline = VelocityBaseline::new(
            thresholds.baseline_capacity,
            thresholds.baseline_min_samples,
            thresholds.baseline_std_floor,
        );
        let pending = PendingAnomalyCache::new(
            thresholds.persistence_threshold,
            thresholds.persistence_max_gap,
        );
        AnomalyDetector {
            thresholds,
            fps,
            scene_rules,
            subjects: IndexMap::new(),
            baseline,
            pending,
            reported_scene_objects: IndexSet::new(),
            last_frame: 0,
            anomalies_by_type: IndexMap::new(),
            severity_total: 0.,
        }
    }

    /// Behavioural checks only
    pub fn update(
        &mut self,
        frame_number: u64,
        faces: &[TrackedFace],
        activities: &[ActivityObservation],
    ) -> Vec<AnomalyEvent> {
        self.update_with_context(frame_number, faces, activities, None, &[])
    }

    /// Behavioural checks followed by the scene and auxiliary-signal checks.
    ///
    /// Events come out in a fixed order: emotion spikes per face, then per
    /// activity observation its sudden-movement and unusual-activity events,
    /// then inactivity, scene inconsistencies, and finally any confirmed
    /// debounced signals.
    pub fn update_with_context(
        &mut self,
        frame_number: u64,
        faces: &[TrackedFace],
        activities: &[ActivityObservation],
        scene: Option<&SceneContext>,
        signals: &[ContextSignal],
    ) -> Vec<AnomalyEvent> {
        self.last_frame = frame_number;
        let mut anomalies = Vec::new();
        let mut seen: IndexSet<TrackRef> = IndexSet::new();

        for face in faces {
            let Some(scores) = face.emotions.as_ref() else {
                continue;
            };
            let subject = TrackRef::face(face.id);
            seen.insert(subject);
            let metrics = self.metrics_for(subject);
            metrics.positions.push(face.bbox.centroid());
            metrics.emotions.push(scores.clone());
            metrics.mark_seen(frame_number);

            if let Some(event) = self.check_emotion_spike(subject, frame_number) {
                anomalies.push(event.with_bbox(face.bbox));
            }
        }

        for observation in activities {
            let subject = TrackRef::person(observation.track_id);
            seen.insert(subject);
            let metrics = self.metrics_for(subject);
            metrics.positions.push(observation.bbox.centroid());
            metrics.activities.push(observation.activity);
            metrics.velocities.push(observation.velocity);
            metrics.mark_seen(frame_number);

            self.baseline.push(observation.velocity);

            if let Some(event) = self.check_sudden_movement(subject, observation, frame_number) {
                anomalies.push(event);
            }
            if let Some(event) = self.check_unusual_activity(subject, observation, frame_number) {
                anomalies.push(event);
            }
        }

        anomalies.extend(self.check_inactivity(&seen, frame_number));

        if let Some(scene) = scene {
            anomalies.extend(self.check_scene_consistency(scene, signals, frame_number));
        }

        for signal in signals {
            if let Some(event) = self.check_gated_signal(signal, frame_number) {
                anomalies.push(event);
            }
        }
        self.pending.prune(frame_number);

        for event in &anomalies {
            info!(
                "Frame {}: {} ({:.2}) {}",
                event.frame_number, event.anomaly_type, event.severity, event.description
            );
            *self.anomalies_by_type.entry(event.anomaly_type).or_insert(0) += 1;
            self.severity_total += event.severity as f64;
        }

        anomalies
    }

    fn metrics_for(&mut self, subject: TrackRef) -> &mut SubjectMetrics {
        let capacity = self.thresholds.metrics_capacity;
        self.subjects
            .entry(subject)
            .or_insert_with(|| SubjectMetrics::new(capacity))
    }

    fn event(
        &self,
        anomaly_type: AnomalyType,
        severity: f32,
        frame_number: u64,
        description: String,
    ) -> AnomalyEvent {
        AnomalyEvent::new(anomaly_type, severity, frame_number, self.fps, description)
    }

    // -------- BEHAVIOURAL CHECKS

    fn check_emotion_spike(&self, subject: TrackRef, frame_number: u64) -> Option<AnomalyEvent> {
        let t = &self.thresholds;
        let history = &self.subjects.get(&subject)?.emotions;
        if history.len() < t.emotion_min_history {
            return None;
        }
        let current = history.nth_back(0)?;
        let previous = history.nth_back(1)?;
        if current.is_empty() {
            return None;
        }

        let (change, emotion) = emotion_change(previous, current);
        if change <= t.emotion_change_threshold {
            return None;
        }

        Some(
            self.event(
                AnomalyType::EmotionSpike,
                (change / t.emotion_change_threshold).min(1.0),
                frame_number,
                format!("Sudden emotional change towards '{}'", emotion),
            )
            .with_track(subject)
            .with_detail("emotion", emotion)
            .with_detail("changeMagnitude", change)
            .with_detail("previousDominant", dominant_emotion(previous).unwrap_or_default())
            .with_detail("currentDominant", dominant_emotion(current).unwrap_or_default()),
        )
    }

    fn check_sudden_movement(
        &self,
        subject: TrackRef,
        observation: &ActivityObservation,
        frame_number: u64,
    ) -> Option<AnomalyEvent> {
        let t = &self.thresholds;
        let threshold = self
            .baseline
            .threshold(t.sudden_movement_threshold, t.sudden_movement_sigma);
        let velocity = observation.velocity;
        if velocity <= threshold {
            return None;
        }

        Some(
            self.event(
                AnomalyType::SuddenMovement,
                ((velocity - threshold) / threshold + 0.5).min(1.0),
                frame_number,
                format!("Sudden movement detected ({:.1} px/frame)", velocity),
            )
            .with_track(subject)
            .with_bbox(observation.bbox)
            .with_detail("velocity", velocity)
            .with_detail("threshold", threshold)
            .with_detail("activity", observation.activity.as_str()),
        )
    }

    fn check_unusual_activity(
        &self,
        subject: TrackRef,
        observation: &ActivityObservation,
        frame_number: u64,
    ) -> Option<AnomalyEvent> {
        let t = &self.thresholds;
        let history = &self.subjects.get(&subject)?.activities;
        if history.len() < t.activity_min_history {
            return None;
        }

        let distinct: IndexSet<Activity> = history.iter().copied().collect();
        if distinct.len() < t.activity_min_distinct_labels {
            return None;
        }

        // Frequencies over everything before the current sample
        let earlier = history.len() - 1;
        if earlier == 0 {
            return None;
        }
        let mut counts: IndexMap<Activity, usize> = IndexMap::new();
        for activity in history.iter().take(earlier) {
            *counts.entry(*activity).or_insert(0) += 1;
        }
        let current = observation.activity;
        let frequency = counts.get(&current).copied().unwrap_or(0) as f32 / earlier as f32;
        if frequency >= t.activity_rare_frequency {
            return None;
        }

        let usual = counts
            .iter()
            .fold(None, |best: Option<(Activity, usize)>, (a, n)| match best {
                Some((_, best_n)) if best_n >= *n => best,
                _ => Some((*a, *n)),
            })
            .map(|(a, _)| a)?;

        Some(
            self.event(
                AnomalyType::UnusualActivity,
                t.unusual_activity_severity,
                frame_number,
                format!("Unusual activity '{}' (usually '{}')", current, usual),
            )
            .with_track(subject)
            .with_bbox(observation.bbox)
            .with_detail("activity", current.as_str())
            .with_detail("frequency", frequency)
            .with_detail("usualActivity", usual.as_str()),
        )
    }

    fn check_inactivity(
        &mut self,
        seen: &IndexSet<TrackRef>,
        frame_number: u64,
    ) -> Vec<AnomalyEvent> {
        let threshold = self.thresholds.inactivity_threshold;
        let mut gone = Vec::new();
        for (subject, metrics) in self.subjects.iter_mut() {
            if seen.contains(subject) {
                continue;
            }
            metrics.frames_inactive = metrics.frames_inactive.saturating_add(1);
            if metrics.frames_inactive == threshold {
                gone.push((*subject, metrics.last_seen_frame));
            }
        }

        gone.into_iter()
            .map(|(subject, last_seen)| {
                self.event(
                    AnomalyType::ProlongedInactivity,
                    self.thresholds.inactivity_severity,
                    frame_number,
                    format!(
                        "{:?} #{} not seen for {} frames",
                        subject.namespace, subject.id, threshold
                    ),
                )
                .with_track(subject)
                .with_detail("lastSeenFrame", last_seen)
            })
            .collect()
    }

    // -------- CONTEXTUAL CHECKS

    /// Objects that do not belong in the current scene. Reported once per
    /// object track and scene type, without waiting for persistence.
    fn check_scene_consistency(
        &mut self,
        scene: &SceneContext,
        signals: &[ContextSignal],
        frame_number: u64,
    ) -> Vec<AnomalyEvent> {
        let Some(rule) = self.scene_rules.get(&scene.scene_type) else {
            return Vec::new();
        };

        let mut out_of_place: Vec<&TrackedObject> = signals
            .iter()
            .filter_map(|s| match s {
                ContextSignal::Object(object) => Some(object),
                _ => None,
            })
            .filter(|o| rule.is_anomalous(&o.class_name))
            .collect();
        out_of_place.retain(|o| {
            self.reported_scene_objects
                .insert((scene.scene_type.clone(), o.id))
        });

        out_of_place
            .into_iter()
            .map(|object| {
                self.event(
                    AnomalyType::SceneInconsistency,
                    self.thresholds.scene_inconsistency_severity,
                    frame_number,
                    format!(
                        "'{}' is out of place in a {} scene",
                        object.class_name, scene.scene_type
                    ),
                )
                .with_track(TrackRef::object(object.id))
                .with_bbox(object.bbox)
                .with_detail("sceneType", scene.scene_type.as_str())
                .with_detail("sceneConfidence", scene.confidence)
                .with_detail("object", object.class_name.as_str())
                .with_detail("objectConfidence", object.confidence)
            })
            .collect()
    }

    fn spatial_bucket(&self, bbox: &BBox) -> String {
        let (x, y) = bbox.centroid();
        let size = self.thresholds.spatial_bucket_size;
        format!("{}_{}", (x / size).floor() as i64, (y / size).floor() as i64)
    }

    fn check_gated_signal(
        &mut self,
        signal: &ContextSignal,
        frame_number: u64,
    ) -> Option<AnomalyEvent> {
        match signal {
            ContextSignal::Object(object) => self.gate_object(object, frame_number),
            ContextSignal::Overlay(overlay) => self.gate_overlay(overlay, frame_number),
            ContextSignal::Silhouette(silhouette) => self.gate_silhouette(silhouette, frame_number),
        }
    }

    fn gate_object(&mut self, object: &TrackedObject, frame_number: u64) -> Option<AnomalyEvent> {
        let reason = object.anomaly_reason.as_ref()?;
        let key = format!("object:{}:{}", object.class_name, self.spatial_bucket(&object.bbox));
        let confirmed = self.pending.observe(&key, frame_number)?;

        Some(
            self.gated_event(
                AnomalyType::SuddenObjectAppear,
                self.thresholds.object_severity,
                frame_number,
                format!("Suspicious {}: {}", object.class_name, reason),
                &key,
                &confirmed,
            )
            .with_track(TrackRef::object(object.id))
            .with_bbox(object.bbox)
            .with_detail("object", object.class_name.as_str())
            .with_detail("reason", reason.as_str())
            .with_detail("confidence", object.confidence),
        )
    }

    fn gate_overlay(
        &mut self,
        overlay: &OverlayCandidate,
        frame_number: u64,
    ) -> Option<AnomalyEvent> {
        let key = format!("visual_overlay:{}:{}", overlay.kind.as_str(), overlay.zone);
        let confirmed = self.pending.observe(&key, frame_number)?;

        let mut event = self
            .gated_event(
                AnomalyType::VisualOverlay,
                self.thresholds.overlay_severity,
                frame_number,
                format!("Overlay in {}: {}", overlay.zone, overlay.reason),
                &key,
                &confirmed,
            )
            .with_detail("kind", overlay.kind.as_str())
            .with_detail("zone", overlay.zone.as_str())
            .with_detail("confidence", overlay.confidence);
        if let Some(text) = &overlay.text {
            event = event.with_detail("text", text.as_str());
        }
        if let Some(bbox) = overlay.bbox {
            event = event.with_bbox(bbox);
        }
        Some(event)
    }

    fn gate_silhouette(
        &mut self,
        silhouette: &SilhouetteValidation,
        frame_number: u64,
    ) -> Option<AnomalyEvent> {
        if silhouette.is_valid_human {
            return None;
        }
        let key = format!("silhouette:{}", self.spatial_bucket(&silhouette.bbox));
        let confirmed = self.pending.observe(&key, frame_number)?;

        let severity = 0.5 + (1. - silhouette.fill_ratio.clamp(0., 1.)) * 0.3;
        let reason = silhouette.reason.as_deref().unwrap_or("implausible silhouette");
        let mut event = self
            .gated_event(
                AnomalyType::SilhouetteAnomaly,
                severity,
                frame_number,
                format!("Detection does not look human: {}", reason),
                &key,
                &confirmed,
            )
            .with_bbox(silhouette.bbox)
            .with_detail("fillRatio", silhouette.fill_ratio)
            .with_detail("aspectRatio", silhouette.aspect_ratio)
            .with_detail("contourComplexity", silhouette.contour_complexity);
        if let Some(id) = silhouette.person_id {
            event = event.with_track(TrackRef::person(id));
        }
        Some(event)
    }

    fn gated_event(
        &self,
        anomaly_type: AnomalyType,
        severity: f32,
        frame_number: u64,
        description: String,
        key: &str,
        confirmed: &PendingAnomaly,
    ) -> AnomalyEvent {
        debug!("Confirmed {} after {} sightings", key, confirmed.count);
        self.event(anomaly_type, severity, frame_number, description)
            .with_detail("persistenceKey", key)
            .with_detail("observations", confirmed.count)
            .with_detail("firstFrame", confirmed.first_frame)
    }

    // -------- STATE

    pub fn get_statistics(&self) -> DetectorStatistics {
        let total_anomalies = self.anomalies_by_type.values().sum();
        DetectorStatistics {
            total_frames: self.last_frame,
            total_anomalies,
            anomalies_by_type: self.anomalies_by_type.clone(),
            average_severity: if total_anomalies > 0 {
                (self.severity_total / total_anomalies as f64) as f32
            } else {
                0.
            },
            subjects_tracked: self.subjects.len(),
            global_velocity_mean: self.baseline.mean(),
            global_velocity_std: self.baseline.std(),
            pending_candidates: self.pending.len(),
        }
    }

    pub fn reset(&mut self) {
        debug!(
            "Detector reset; dropping {} subjects and {} baseline samples",
            self.subjects.len(),
            self.baseline.sample_count()
        );
        self.subjects.clear();
        self.baseline.reset();
        self.pending.clear();
        self.reported_scene_objects.clear();
        self.last_frame = 0;
        self.anomalies_by_type.clear();
        self.severity_total = 0.;
    }
}

/// Mean absolute change over the current emotion dimensions (missing earlier
/// scores count as 0), plus the dimension that changed most
fn emotion_change<'a>(previous: &EmotionScores, current: &'a EmotionScores) -> (f32, &'a str) {
    let mut total = 0.;
    let mut largest: Option<(&str, f32)> = None;
    for (emotion, score) in current {
        let delta = (score - previous.get(emotion).copied().unwrap_or(0.)).abs();
        total += delta;
        if largest.map(|(_, d)| delta > d).unwrap_or(true) {
            largest = Some((emotion.as_str(), delta));
        }
    }
    let change = total / current.len() as f32;
    (change, largest.map(|(e, _)| e).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine_config::EngineConfig,
        perception::{ObjectCategory, OverlayKind},
    };

    fn detector() -> AnomalyDetector {
        let config = EngineConfig::default();
        AnomalyDetector::new(config.anomaly, config.fps, config.scene_rules)
    }

    fn observation(id: TrackId, activity: Activity, velocity: f32) -> ActivityObservation {
        ActivityObservation {
            track_id: id,
            activity,
            confidence: 0.75,
            detection_confidence: 1.0,
            bbox: BBox::new(100., 100., 50., 150.),
            velocity,
            joints: None,
        }
    }

    fn face(id: TrackId, happy: f32, sad: f32) -> TrackedFace {
        let mut scores = EmotionScores::new();
        scores.insert(String::from("happy"), happy);
        scores.insert(String::from("sad"), sad);
        TrackedFace {
            id,
            bbox: BBox::new(0., 0., 40., 40.),
            confidence: 0.9,
            emotions: Some(scores),
        }
    }

    fn of_type(events: &[AnomalyEvent], anomaly_type: AnomalyType) -> usize {
        events.iter().filter(|e| e.anomaly_type == anomaly_type).count()
    }

    #[test]
    fn test_rare_activity_is_unusual() {
        let mut d = detector();
        for frame in 0..11 {
            let events = d.update(frame, &[], &[observation(1, Activity::Standing, 0.)]);
            assert!(events.is_empty());
        }
        let events = d.update(11, &[], &[observation(1, Activity::Dancing, 0.)]);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.anomaly_type, AnomalyType::UnusualActivity);
        assert_eq!(event.severity, 0.5);
        assert_eq!(event.details["usualActivity"], "standing");
        assert_eq!(event.track, Some(TrackRef::person(1)));
    }

    #[test]
    fn test_usual_activity_is_not_flagged() {
        let mut d = detector();
        for frame in 0..12 {
            let events = d.update(frame, &[], &[observation(1, Activity::Standing, 0.)]);
            assert!(events.is_empty());
        }
    }

    #[test]
    fn test_sudden_movement() {
        let mut d = detector();
        assert!(d.update(0, &[], &[observation(1, Activity::Running, 80.)]).is_empty());
        let events = d.update(1, &[], &[observation(1, Activity::Running, 120.)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].anomaly_type, AnomalyType::SuddenMovement);
        // (120 - 80) / 80 + 0.5
        assert!((events[0].severity - 1.0).abs() < 1e-6);

        let events = d.update(2, &[], &[observation(1, Activity::Running, 100.)]);
        assert!((events[0].severity - 0.75).abs() < 1e-6);
        assert_eq!(events[0].details["threshold"], 80.0);
    }

    #[test]
    fn test_sudden_movement_threshold_follows_warm_baseline() {
        let mut config = EngineConfig::default();
        config.anomaly.baseline_min_samples = 5;
        let mut d = AnomalyDetector::new(config.anomaly, config.fps, config.scene_rules);

        for frame in 0..20 {
            let velocity = if frame % 2 == 0 { 40. } else { 80. };
            let events = d.update(frame, &[], &[observation(1, Activity::Walking, velocity)]);
            assert!(events.is_empty());
        }

        // above the absolute threshold, but within 3 std of the warm baseline
        assert!(d.update(20, &[], &[observation(1, Activity::Walking, 100.)]).is_empty());
        let stats = d.get_statistics();
        assert!(stats.global_velocity_mean > 60. && stats.global_velocity_mean < 63.);
        assert!(stats.global_velocity_std > 20. && stats.global_velocity_std < 23.);

        let events = d.update(21, &[], &[observation(1, Activity::Walking, 300.)]);
        assert_eq!(of_type(&events, AnomalyType::SuddenMovement), 1);
        let threshold = events[0].details["threshold"].as_f64().expect("threshold") as f32;
        let stats = d.get_statistics();
        let expected = stats.global_velocity_mean + 3. * stats.global_velocity_std;
        assert!((threshold - expected).abs() < 1e-3);
        assert!(threshold > 200. && threshold < 300.);
    }

    #[test]
    fn test_emotion_spike_needs_history() {
        let mut d = detector();
        assert!(d.update(0, &[face(1, 0.9, 0.1)], &[]).is_empty());
        // a big swing on the second sample is not enough history yet
        assert!(d.update(1, &[face(1, 0.0, 1.0)], &[]).is_empty());

        let events = d.update(2, &[face(1, 0.9, 0.1)], &[]);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.anomaly_type, AnomalyType::EmotionSpike);
        assert_eq!(event.track, Some(TrackRef::face(1)));
        assert_eq!(event.details["emotion"], "happy");
        assert_eq!(event.details["previousDominant"], "sad");
        assert_eq!(event.details["currentDominant"], "happy");
        // change 0.9 / threshold 0.5
        assert_eq!(event.severity, 1.0);
        assert!(event.bbox.is_some());
    }

    #[test]
    fn test_small_emotion_drift_is_ignored() {
        let mut d = detector();
        for frame in 0..5 {
            let happy = 0.5 + frame as f32 * 0.05;
            assert!(d.update(frame, &[face(1, happy, 1. - happy)], &[]).is_empty());
        }
    }

    #[test]
    fn test_faces_without_emotions_are_not_tracked() {
        let mut d = detector();
        let mut f = face(1, 0.5, 0.5);
        f.emotions = None;
        d.update(0, &[f], &[]);
        assert_eq!(d.get_statistics().subjects_tracked, 0);
    }

    #[test]
    fn test_inactivity_is_reported_once() {
        let mut config = EngineConfig::default();
        config.anomaly.inactivity_threshold = 5;
        let mut d = AnomalyDetector::new(config.anomaly, config.fps, config.scene_rules);

        d.update(0, &[], &[observation(1, Activity::Standing, 0.)]);
        let mut reported = 0;
        for frame in 1..=5 {
            let events = d.update(frame, &[], &[]);
            reported += of_type(&events, AnomalyType::ProlongedInactivity);
            if frame < 5 {
                assert!(events.is_empty());
            }
        }
        assert_eq!(reported, 1);
        assert!(d.update(6, &[], &[]).is_empty());

        // seen again, then gone again: a new disappearance
        d.update(7, &[], &[observation(1, Activity::Standing, 0.)]);
        let events: Vec<AnomalyEvent> = (8..=12).flat_map(|f| d.update(f, &[], &[])).collect();
        assert_eq!(of_type(&events, AnomalyType::ProlongedInactivity), 1);
        assert_eq!(events[0].details["lastSeenFrame"], 7);
    }

    #[test]
    fn test_face_and_person_ids_do_not_collide() {
        let mut config = EngineConfig::default();
        config.anomaly.inactivity_threshold = 2;
        let mut d = AnomalyDetector::new(config.anomaly, config.fps, config.scene_rules);

        // face #1 keeps appearing while person #1 disappears
        d.update(0, &[face(1, 0.5, 0.5)], &[observation(1, Activity::Standing, 0.)]);
        d.update(1, &[face(1, 0.5, 0.5)], &[]);
        let events = d.update(2, &[face(1, 0.5, 0.5)], &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track, Some(TrackRef::person(1)));
    }

    fn flagged_object(id: TrackId, x: f32) -> ContextSignal {
        ContextSignal::Object(TrackedObject {
            id,
            class_name: String::from("knife"),
            confidence: 0.8,
            category: ObjectCategory::Other,
            bbox: BBox::new(x, 210., 30., 30.),
            anomaly_reason: Some(String::from("sudden appearance")),
        })
    }

    #[test]
    fn test_object_candidates_are_debounced() {
        let mut d = detector();
        assert!(d.update_with_context(0, &[], &[], None, &[flagged_object(1, 200.)]).is_empty());
        assert_eq!(d.get_statistics().pending_candidates, 1);
        assert!(d.update_with_context(5, &[], &[], None, &[flagged_object(1, 205.)]).is_empty());

        let events = d.update_with_context(9, &[], &[], None, &[flagged_object(1, 210.)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].anomaly_type, AnomalyType::SuddenObjectAppear);
        assert_eq!(events[0].details["observations"], 3);
        assert_eq!(events[0].details["firstFrame"], 0);
        assert_eq!(d.get_statistics().pending_candidates, 0);
    }

    #[test]
    fn test_unflagged_objects_never_enter_the_gate() {
        let mut d = detector();
        let mut signal = flagged_object(1, 200.);
        if let ContextSignal::Object(object) = &mut signal {
            object.anomaly_reason = None;
        }
        for frame in 0..5 {
            assert!(d.update_with_context(frame, &[], &[], None, &[signal.clone()]).is_empty());
        }
        assert_eq!(d.get_statistics().pending_candidates, 0);
    }

    #[test]
    fn test_overlay_needs_persistence_within_gap() {
        let mut d = detector();
        let overlay = ContextSignal::Overlay(OverlayCandidate {
            kind: OverlayKind::Watermark,
            zone: String::from("bottom_right"),
            text: Some(String::from("REC")),
            confidence: 0.7,
            bbox: None,
            reason: String::from("watermark in corner"),
        });
        d.update_with_context(0, &[], &[], None, &[overlay.clone()]);
        d.update_with_context(10, &[], &[], None, &[overlay.clone()]);
        // too late: count starts over
        assert!(d.update_with_context(50, &[], &[], None, &[overlay.clone()]).is_empty());
        assert!(d.update_with_context(51, &[], &[], None, &[overlay.clone()]).is_empty());
        let events = d.update_with_context(52, &[], &[], None, &[overlay]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].anomaly_type, AnomalyType::VisualOverlay);
        assert_eq!(events[0].details["text"], "REC");
        assert_eq!(events[0].details["persistenceKey"], "visual_overlay:watermark:bottom_right");
    }

    #[test]
    fn test_silhouette_severity_from_fill_ratio() {
        let mut d = detector();
        let silhouette = ContextSignal::Silhouette(SilhouetteValidation {
            person_id: Some(3),
            bbox: BBox::new(10., 10., 50., 150.),
            is_valid_human: false,
            aspect_ratio: 3.0,
            fill_ratio: 0.5,
            contour_complexity: 0.2,
            reason: None,
        });
        d.update_with_context(0, &[], &[], None, &[silhouette.clone()]);
        d.update_with_context(1, &[], &[], None, &[silhouette.clone()]);
        let events = d.update_with_context(2, &[], &[], None, &[silhouette]);
        assert_eq!(events.len(), 1);
        assert!((events[0].severity - 0.65).abs() < 1e-6);
        assert_eq!(events[0].track, Some(TrackRef::person(3)));
    }

    #[test]
    fn test_scene_inconsistency_is_immediate_and_once_per_object() {
        let mut d = detector();
        let office = SceneContext {
            scene_type: String::from("office"),
            confidence: 0.9,
        };
        let skateboard = ContextSignal::Object(TrackedObject {
            id: 4,
            class_name: String::from("skateboard"),
            confidence: 0.7,
            category: ObjectCategory::Sports,
            bbox: BBox::new(300., 300., 80., 30.),
            anomaly_reason: None,
        });
        let laptop = ContextSignal::Object(TrackedObject {
            id: 5,
            class_name: String::from("laptop"),
            confidence: 0.9,
            category: ObjectCategory::Electronic,
            bbox: BBox::new(100., 300., 80., 50.),
            anomaly_reason: None,
        });

        let signals = [skateboard, laptop];
        let events = d.update_with_context(0, &[], &[], Some(&office), &signals);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].anomaly_type, AnomalyType::SceneInconsistency);
        assert_eq!(events[0].severity, 0.85);
        assert_eq!(events[0].track, Some(TrackRef::object(4)));

        assert!(d.update_with_context(1, &[], &[], Some(&office), &signals).is_empty());

        let unknown = SceneContext {
            scene_type: String::from("spaceship"),
            confidence: 0.9,
        };
        assert!(d.update_with_context(2, &[], &[], Some(&unknown), &signals).is_empty());
    }

    #[test]
    fn test_event_order_within_a_frame() {
        let mut d = detector();
        for frame in 0..11 {
            d.update(frame, &[face(9, 0.9, 0.1)], &[observation(1, Activity::Standing, 0.)]);
        }
        let office = SceneContext {
            scene_type: String::from("office"),
            confidence: 0.9,
        };
        let bed = ContextSignal::Object(TrackedObject {
            id: 2,
            class_name: String::from("bed"),
            confidence: 0.7,
            category: ObjectCategory::Furniture,
            bbox: BBox::new(300., 300., 200., 100.),
            anomaly_reason: None,
        });
        let events = d.update_with_context(
            11,
            &[face(9, 0.0, 1.0)],
            &[observation(1, Activity::Dancing, 150.)],
            Some(&office),
            &[bed],
        );
        let order: Vec<AnomalyType> = events.iter().map(|e| e.anomaly_type).collect();
        assert_eq!(
            order,
            vec![
                AnomalyType::EmotionSpike,
                AnomalyType::SuddenMovement,
                AnomalyType::UnusualActivity,
                AnomalyType::SceneInconsistency,
            ]
        );
    }

    #[test]
    fn test_statistics_and_reset() {
        let mut d = detector();
        d.update(0, &[], &[observation(1, Activity::Running, 80.)]);
        d.update(1, &[], &[observation(1, Activity::Running, 100.)]);
        let stats = d.get_statistics();
        assert_eq!(stats.total_frames, 1);
        assert_eq!(stats.total_anomalies, 1);
        assert_eq!(stats.anomalies_by_type.get(&AnomalyType::SuddenMovement), Some(&1));
        assert!((stats.average_severity - 0.75).abs() < 1e-6);
        assert_eq!(stats.subjects_tracked, 1);

        d.reset();
        let stats = d.get_statistics();
        assert_eq!(stats.total_anomalies, 0);
        assert_eq!(stats.subjects_tracked, 0);
        assert_eq!(stats.global_velocity_std, 1.0);
    }

    #[test]
    fn test_replay_after_reset_is_identical() {
        type Frame = (u64, Vec<TrackedFace>, Vec<ActivityObservation>, Vec<ContextSignal>);
        let frames: Vec<Frame> = (0..40)
            .map(|f| {
                let activity = if f % 13 == 12 {
                    Activity::Waving
                } else {
                    Activity::Standing
                };
                let faces = if f < 20 {
                    vec![face(1, (f % 3) as f32 * 0.45, 0.1)]
                } else {
                    Vec::new()
                };
                let activities = if f < 30 {
                    vec![observation(1, activity, if f % 7 == 0 { 120. } else { 5. })]
                } else {
                    Vec::new()
                };
                (f, faces, activities, vec![flagged_object(1, 200.)])
            })
            .collect();

        let mut d = detector();
        let run = |d: &mut AnomalyDetector| -> String {
            let events: Vec<AnomalyEvent> = frames
                .iter()
                .flat_map(|(f, faces, activities, signals)| {
                    d.update_with_context(*f, faces, activities, None, signals)
                })
                .collect();
            assert!(!events.is_empty());
            serde_json::to_string(&events).expect("serialise")
        };
        let first = run(&mut d);
        d.reset();
        let second = run(&mut d);
        assert_eq!(first, second);
    }
}
