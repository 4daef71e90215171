use nalgebra::Vector2;

use crate::Point2D;

/// Guards the angle computation against coincident points
const ANGLE_EPSILON: f32 = 1e-6;

pub fn distance_points(a: &Point2D, b: &Point2D) -> f32 {
    let (x1, y1) = *a;
    let (x2, y2) = *b;

    f32::sqrt(f32::powi(x1 - x2, 2) + f32::powi(y1 - y2, 2))
}

/// Return the angle (in degrees, range [0, 180]) at vertex `b` formed by the
/// segments b→a and b→c.
///
/// Coincident points never produce NaN: the normalised dot product is taken
/// over `|v1|·|v2| + ε` and clamped to [-1, 1] before the inverse cosine, so a
/// zero-length segment yields 90°.
pub fn joint_angle(a: &Point2D, b: &Point2D, c: &Point2D) -> f32 {
    let v1 = Vector2::new(a.0 - b.0, a.1 - b.1);
    let v2 = Vector2::new(c.0 - b.0, c.1 - b.1);

    let cos_angle = v1.dot(&v2) / (v1.magnitude() * v2.magnitude() + ANGLE_EPSILON);
    cos_angle.clamp(-1.0, 1.0).acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.1
    }

    #[test]
    fn test_joint_angle_cardinals() {
        assert!(close(joint_angle(&(1., 0.), &(0., 0.), &(0., 1.)), 90.));
        assert!(close(joint_angle(&(1., 0.), &(0., 0.), &(-1., 0.)), 180.));
        assert!(close(joint_angle(&(1., 0.), &(0., 0.), &(2., 0.)), 0.));
        assert!(close(joint_angle(&(1., 0.), &(0., 0.), &(1., 1.)), 45.));
    }

    #[test]
    fn test_joint_angle_coincident_points_is_finite() {
        let angle = joint_angle(&(5., 5.), &(5., 5.), &(10., 5.));
        assert!(angle.is_finite());
        assert!(close(angle, 90.));
    }

    #[test]
    fn test_distance_points() {
        assert_eq!(distance_points(&(0., 0.), &(3., 4.)), 5.);
        assert_eq!(distance_points(&(-2., 7.), &(-2., 7.)), 0.);
    }
}
