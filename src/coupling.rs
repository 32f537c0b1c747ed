use crate::contour::Shape;
use nalgebra as na;

/// Inward speed given to a vertex found inside a neighbouring contour.
pub const FEEDBACK_PUSH: f32 = 1.0;

/// Repulsion between two contours: every vertex lying inside `other` loses
/// the outward part of its accumulated force and is pushed back inward.
///
/// Returns the number of penetrating vertices.
pub fn repel<S: Shape + ?Sized>(
    points: &[na::Point2<f32>],
    normals: &[na::Vector2<f32>],
    forces: &mut [na::Vector2<f32>],
    other: &S,
) -> usize {
    let mut inside = 0;

    for ((p, n), f) in points.iter().zip(normals).zip(forces.iter_mut()) {
        if !other.contains(*p) {
            continue;
        }

        let outward = f.dot(n);
        if outward > 0.0 {
            *f -= n * outward;
        }

        *f -= n * FEEDBACK_PUSH;
        inside += 1;
    }

    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::Outline;

    #[test]
    fn only_penetrating_vertices_are_pushed() {
        let other = Outline::new(vec![
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(0.0, 10.0),
        ]);

        let points = [na::Point2::new(5.0, 5.0), na::Point2::new(20.0, 5.0)];
        let normals = [na::Vector2::new(1.0, 0.0), na::Vector2::new(1.0, 0.0)];
        let mut forces = [na::Vector2::new(0.5, 0.25), na::Vector2::new(0.5, 0.25)];

        let inside = repel(&points, &normals, &mut forces, &other);

        assert_eq!(inside, 1);
        assert_eq!(forces[0], na::Vector2::new(-FEEDBACK_PUSH, 0.25));
        assert_eq!(forces[1], na::Vector2::new(0.5, 0.25));
    }

    #[test]
    fn inward_force_is_kept() {
        let other = Outline::new(vec![
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(0.0, 10.0),
        ]);

        let points = [na::Point2::new(5.0, 5.0)];
        let normals = [na::Vector2::new(0.0, 1.0)];
        let mut forces = [na::Vector2::new(0.0, -2.0)];

        repel(&points, &normals, &mut forces, &other);
        assert_eq!(forces[0], na::Vector2::new(0.0, -2.0 - FEEDBACK_PUSH));
    }
}
