use crate::{
    Point2D, perception::EmotionScores, systems::activity::Activity,
    systems::history::BoundedHistory,
};

/// Rolling per-subject state used by the anomaly checks
pub struct SubjectMetrics {
    pub positions: BoundedHistory<Point2D>,
    pub emotions: BoundedHistory<EmotionScores>,
    pub activities: BoundedHistory<Activity>,
    pub velocities: BoundedHistory<f32>,
    pub last_seen_frame: u64,
    /// Consecutive frames this subject has not been observed
    pub frames_inactive: u32,
}

impl SubjectMetrics {
    pub fn new(capacity: usize) -> Self {
        SubjectMetrics {
            positions: BoundedHistory::new(capacity),
            emotions: BoundedHistory::new(capacity),
            activities: BoundedHistory::new(capacity),
            velocities: BoundedHistory::new(capacity),
            last_seen_frame: 0,
            frames_inactive: 0,
        }
    }

    pub fn mark_seen(&mut self, frame_number: u64) {
        self.last_seen_frame = frame_number;
        self.frames_inactive = 0;
    }
}

/// Mean and standard deviation over the most recent velocity samples, shared
/// by every subject. Until enough samples exist the mean stays at 0 and the
/// deviation at its floor.
pub struct VelocityBaseline {
    samples: BoundedHistory<f32>,
    min_samples: usize,
    std_floor: f32,
    mean: f32,
    std: f32,
}

impl VelocityBaseline {
    pub fn new(capacity: usize, min_samples: usize, std_floor: f32) -> Self {
        VelocityBaseline {
            samples: BoundedHistory::new(capacity),
            min_samples,
            std_floor,
            mean: 0.,
            std: std_floor,
        }
    }

    pub fn push(&mut self, velocity: f32) {
        self.samples.push(velocity);
        if self.samples.len() > self.min_samples {
            let n = self.samples.len() as f32;
            let mean = self.samples.iter().sum::<f32>() / n;
            let variance = self
                .samples
                .iter()
                .map(|v| (v - mean).powi(2))
                .sum::<f32>()
                / n;
            self.mean = mean;
            self.std = variance.sqrt().max(self.std_floor);
        }
    }

    pub fn mean(&self) -> f32 {
        self.mean
    }

    pub fn std(&self) -> f32 {
        self.std
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// The larger of an absolute floor and `mean + sigma * std`
    pub fn threshold(&self, absolute: f32, sigma: f32) -> f32 {
        absolute.max(self.mean + sigma * self.std)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.mean = 0.;
        self.std = self.std_floor;
    }
}
