use std::time::{Duration, SystemTime};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::tracking::TrackId;

use super::{
    FrameAnalysis,
    activity::Activity,
    anomaly::{AnomalyType, DetectorStatistics},
};

/// Point-in-time copy of the run statistics; never shared with the engine
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub last_frame: u64,
    pub frames_processed: u64,
    pub unique_faces: usize,
    pub unique_people: usize,
    pub unique_objects: usize,
    pub activity_counts: IndexMap<Activity, u64>,
    pub anomaly_counts: IndexMap<AnomalyType, u64>,
    pub detector: DetectorStatistics,
}

/// Running totals over a whole run
#[derive(Default)]
pub struct RunStatistics {
    last_frame: u64,
    frames_processed: u64,
    faces: IndexSet<TrackId>,
    people: IndexSet<TrackId>,
    objects: IndexSet<TrackId>,
    activity_counts: IndexMap<Activity, u64>,
    anomaly_counts: IndexMap<AnomalyType, u64>,
}

impl RunStatistics {
    pub fn new() -> Self {
        RunStatistics::default()
    }

    pub fn record(&mut self, analysis: &FrameAnalysis) {
        self.last_frame = analysis.frame_number;
        self.frames_processed += 1;
        self.faces.extend(analysis.faces.iter().map(|f| f.id));
        self.people.extend(analysis.activities.iter().map(|a| a.track_id));
        self.objects.extend(analysis.objects.iter().map(|o| o.id));
        for observation in &analysis.activities {
            *self.activity_counts.entry(observation.activity).or_insert(0) += 1;
        }
        for event in &analysis.anomalies {
            *self.anomaly_counts.entry(event.anomaly_type).or_insert(0) += 1;
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn snapshot(&self, detector: DetectorStatistics) -> StatsSnapshot {
        StatsSnapshot {
            last_frame: self.last_frame,
            frames_processed: self.frames_processed,
            unique_faces: self.faces.len(),
            unique_people: self.people.len(),
            unique_objects: self.objects.len(),
            activity_counts: self.activity_counts.clone(),
            anomaly_counts: self.anomaly_counts.clone(),
            detector,
        }
    }

    pub fn reset(&mut self) {
        *self = RunStatistics::default();
    }
}

/// Decides when the next snapshot is due: after a number of frames or a
/// wall-clock interval, whichever comes first
pub struct SnapshotCadence {
    every_frames: u64,
    interval: Duration,
    frames_since: u64,
    last_updated: SystemTime,
}

impl SnapshotCadence {
    pub fn new(every_frames: u64, interval: Duration) -> Self {
        SnapshotCadence {
            every_frames,
            interval,
            frames_since: 0,
            last_updated: SystemTime::now(),
        }
    }

    pub fn get_elapsed(&self) -> Duration {
        self.last_updated.elapsed().unwrap_or_default()
    }

    pub fn reset_timer(&mut self) {
        self.frames_since = 0;
        self.last_updated = SystemTime::now();
    }

    /// Count one processed frame; true when a snapshot should be sent now
    pub fn tick(&mut self) -> bool {
        self.frames_since += 1;
        let due = (self.every_frames > 0 && self.frames_since >= self.every_frames)
            || (!self.interval.is_zero() && self.get_elapsed() >= self.interval);
        if due {
            self.reset_timer();
        }
        due
    }
}
