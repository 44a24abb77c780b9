use nalgebra::{Point3, Vector3};

/// Distances below this value are treated as degenerate.
pub const DISTANCE_EPSILON: f64 = 1e-9;

/// Computes the distance between two points and its gradient with respect to `a`.
///
/// The gradient with respect to `b` is the negation of the returned vector. For coincident
/// points the gradient direction is undefined; the unit x axis is used instead so callers
/// never divide by zero.
#[inline]
pub fn distance_and_gradient(a: &Point3<f64>, b: &Point3<f64>) -> (f64, Vector3<f64>) {
    let delta = a - b;
    let distance = delta.norm();
    if distance < DISTANCE_EPSILON {
        (distance, Vector3::x())
    } else {
        (distance, delta / distance)
    }
}

/// Unweighted centroid of a set of points, or `None` for an empty set.
pub fn centroid(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, point| acc + point.coords);
    Some(Point3::from(sum / points.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn gradient_points_from_b_to_a() {
        let (d, g) = distance_and_gradient(&Point3::new(3.0, 4.0, 0.0), &Point3::origin());
        assert!((d - 5.0).abs() < TOLERANCE);
        assert!((g - Vector3::new(0.6, 0.8, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn coincident_points_use_fixed_direction() {
        let p = Point3::new(1.0, 1.0, 1.0);
        let (d, g) = distance_and_gradient(&p, &p);
        assert_eq!(d, 0.0);
        assert_eq!(g, Vector3::x());
    }

    #[test]
    fn centroid_of_points() {
        let points = [Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 4.0, -2.0)];
        assert_eq!(centroid(&points), Some(Point3::new(1.0, 2.0, -1.0)));
        assert_eq!(centroid(&[]), None);
    }
}
