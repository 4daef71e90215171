use indexmap::IndexMap;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAnomaly {
    pub count: u32,
    pub first_frame: u64,
    pub last_frame: u64,
}

/// Debounce for noisy per-frame candidates: a key is confirmed once it has
/// been seen `threshold` times with no gap longer than `max_gap` frames
/// between consecutive sightings. Confirmation removes the entry, so each
/// confirmation is reported exactly once.
pub struct PendingAnomalyCache {
    threshold: u32,
    max_gap: u64,
    pending: IndexMap<String, PendingAnomaly>,
}

impl PendingAnomalyCache {
    pub fn new(threshold: u32, max_gap: u64) -> Self {
        PendingAnomalyCache {
            threshold: threshold.max(1),
            max_gap,
            pending: IndexMap::new(),
        }
    }

    /// Count a sighting of `key`; returns the confirmed entry when this
    /// sighting reaches the threshold. Repeated sightings within the same
    /// frame count once.
    pub fn observe(&mut self, key: &str, frame_number: u64) -> Option<PendingAnomaly> {
        let entry = match self.pending.get_mut(key) {
            Some(entry) => {
                if entry.last_frame == frame_number {
                    return None;
                }
                if frame_number.saturating_sub(entry.last_frame) > self.max_gap {
                    debug!("Pending anomaly {} expired; restart count", key);
                    entry.count = 1;
                    entry.first_frame = frame_number;
                } else {
                    entry.count += 1;
                }
                entry.last_frame = frame_number;
                *entry
            }
            None => {
                let entry = PendingAnomaly {
                    count: 1,
                    first_frame: frame_number,
                    last_frame: frame_number,
                };
                self.pending.insert(String::from(key), entry);
                entry
            }
        };

        if entry.count >= self.threshold {
            self.pending.shift_remove(key);
            Some(entry)
        } else {
            debug!("Pending anomaly {} seen {}/{}", key, entry.count, self.threshold);
            None
        }
    }

    /// Drop entries that can no longer be continued
    pub fn prune(&mut self, frame_number: u64) {
        let max_gap = self.max_gap;
        self.pending
            .retain(|_, entry| frame_number.saturating_sub(entry.last_frame) <= max_gap);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
