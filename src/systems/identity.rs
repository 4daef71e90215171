use indexmap::IndexMap;
use log::debug;

use crate::{
    Point2D,
    engine_config::DriftLimit,
    geometry_utils::distance_points,
    tracking::{BBox, TrackId, TrackNamespace},
};

/// Greedy nearest-centroid identity assignment for one id namespace.
///
/// Ids start at 1, only ever grow, and are never handed to a second subject
/// during a run. Matching is frame-local: there is no global re-optimisation,
/// so two subjects crossing paths can swap ids.
pub struct IdentityTracker {
    namespace: TrackNamespace,
    drift_limit: DriftLimit,
    /// Last known centroid per id, kept in ascending id order
    known_centroids: IndexMap<TrackId, Point2D>,
    next_id: TrackId,
}

impl IdentityTracker {
    pub fn new(namespace: TrackNamespace, drift_limit: DriftLimit) -> Self {
        IdentityTracker {
            namespace,
            drift_limit,
            known_centroids: IndexMap::new(),
            next_id: 1,
        }
    }

    pub fn assign(&mut self, bbox: &BBox) -> TrackId {
        let centroid = bbox.centroid();
        let threshold = self.drift_limit.threshold_for(bbox);

        // Strict comparison keeps the lowest id on equal distances
        let closest = self
            .known_centroids
            .iter()
            .map(|(id, known)| (*id, distance_points(known, &centroid)))
            .filter(|(_id, d)| *d < threshold)
            .fold(None, |best: Option<(TrackId, f32)>, candidate| match best {
                Some((_, best_distance)) if best_distance <= candidate.1 => best,
                _ => Some(candidate),
            });

        let id = match closest {
            Some((id, _)) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                debug!(
                    "New {:?} track #{} at ({:.1}, {:.1})",
                    self.namespace, id, centroid.0, centroid.1
                );
                id
            }
        };

        self.known_centroids.insert(id, centroid);
        id
    }

    pub fn known_count(&self) -> usize {
        self.known_centroids.len()
    }

    pub fn reset(&mut self) {
        self.known_centroids.clear();
        self.next_id = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> IdentityTracker {
        IdentityTracker::new(TrackNamespace::Person, DriftLimit::Fixed { pixels: 100. })
    }

    #[test]
    fn test_small_steps_keep_the_same_id() {
        let mut t = tracker();
        let first = t.assign(&BBox::new(0., 0., 50., 100.));
        for step in 1..20 {
            let x = step as f32 * 40.;
            assert_eq!(t.assign(&BBox::new(x, 0., 50., 100.)), first);
        }
        assert_eq!(t.known_count(), 1);
    }

    #[test]
    fn test_jump_allocates_greater_id() {
        let mut t = tracker();
        let a = t.assign(&BBox::new(0., 0., 50., 100.));
        let b = t.assign(&BBox::new(500., 0., 50., 100.));
        assert!(b > a);
        // exactly at the threshold does not match
        let c = t.assign(&BBox::new(600., 0., 50., 100.));
        assert!(c > b);
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let mut t = tracker();
        let left = t.assign(&BBox::new(0., 0., 10., 10.));
        let right = t.assign(&BBox::new(120., 0., 10., 10.));
        assert!(left < right);
        // centroid at 65: both known centroids (5 and 125) are 60 away
        assert_eq!(t.assign(&BBox::new(60., 0., 10., 10.)), left);
    }

    #[test]
    fn test_object_scaled_threshold() {
        let mut t = IdentityTracker::new(
            TrackNamespace::Object,
            DriftLimit::ObjectScaled { factor: 2.0 },
        );
        let small = t.assign(&BBox::new(0., 0., 10., 10.));
        // 25px step is beyond 2x a 10px object
        assert_ne!(t.assign(&BBox::new(25., 0., 10., 10.)), small);
        let large = t.assign(&BBox::new(1000., 0., 100., 100.));
        assert_eq!(t.assign(&BBox::new(1150., 0., 100., 100.)), large);
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut t = tracker();
        t.assign(&BBox::new(0., 0., 10., 10.));
        t.assign(&BBox::new(500., 0., 10., 10.));
        t.reset();
        assert_eq!(t.known_count(), 0);
        assert_eq!(t.assign(&BBox::new(500., 0., 10., 10.)), 1);
    }
}
