//! Bounding spheres for tile culling and distance ordering.

use glam::DVec3;

/// A bounding sphere in tile (model) space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    /// Center of the sphere.
    pub center: DVec3,
    /// Radius of the sphere.
    pub radius: f64,
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self {
            center: DVec3::ZERO,
            radius: 0.0,
        }
    }
}

impl BoundingSphere {
    /// Create a bounding sphere from center and radius.
    #[must_use]
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Fit a sphere enclosing every point.
    ///
    /// Runs Ritter's two-pass construction and compares it with the
    /// centroid-plus-farthest-point sphere, keeping whichever is tighter.
    /// Both candidates enclose every input point. An empty slice yields a
    /// zero sphere at the origin.
    #[must_use]
    pub fn from_points(points: &[DVec3]) -> Self {
        let Some(&first) = points.first() else {
            return Self::default();
        };

        let centroid = points.iter().copied().sum::<DVec3>() / points.len() as f64;
        let centroid_radius = points
            .iter()
            .map(|p| p.distance(centroid))
            .fold(0.0_f64, f64::max);

        let ritter = ritter_sphere(first, points);
        if ritter.radius < centroid_radius {
            ritter
        } else {
            Self::new(centroid, centroid_radius)
        }
    }

    /// Distance from `point` to the sphere surface. Negative inside the sphere.
    #[must_use]
    pub fn surface_distance(&self, point: DVec3) -> f64 {
        self.center.distance(point) - self.radius
    }

    /// Whether the point lies inside or on the sphere (with a small tolerance).
    #[must_use]
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.center.distance(point) <= self.radius * (1.0 + 1e-9) + 1e-12
    }
}

fn ritter_sphere(seed: DVec3, points: &[DVec3]) -> BoundingSphere {
    let farthest_from = |from: DVec3| {
        points
            .iter()
            .copied()
            .max_by(|a, b| a.distance_squared(from).total_cmp(&b.distance_squared(from)))
            .unwrap_or(from)
    };

    let a = farthest_from(seed);
    let b = farthest_from(a);
    let mut center = (a + b) * 0.5;
    let mut radius = a.distance(b) * 0.5;

    for &p in points {
        let d = p.distance(center);
        if d > radius {
            let grown = (radius + d) * 0.5;
            center += (p - center) * ((grown - radius) / d);
            radius = grown;
        }
    }

    BoundingSphere::new(center, radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_points_give_zero_sphere() {
        let s = BoundingSphere::from_points(&[]);
        assert_eq!(s.center, DVec3::ZERO);
        assert_eq!(s.radius, 0.0);
    }

    #[test]
    fn test_single_point() {
        let p = DVec3::new(1.0, 2.0, 3.0);
        let s = BoundingSphere::from_points(&[p]);
        assert!(s.contains_point(p));
        assert!(s.radius < 1e-12);
    }

    #[test]
    fn test_sphere_encloses_all_points() {
        let points = [
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(-1.0, 0.0, 0.0),
            DVec3::new(0.0, -1.0, 0.0),
            DVec3::new(0.0, 0.0, -1.0),
            DVec3::new(0.3, 0.4, -0.2),
        ];
        let s = BoundingSphere::from_points(&points);
        for p in points {
            assert!(s.contains_point(p), "{p:?} outside {s:?}");
        }
        assert!(s.radius <= 1.0 + 1e-9, "radius too loose: {}", s.radius);
    }

    #[test]
    fn test_surface_distance_sign() {
        let s = BoundingSphere::new(DVec3::ZERO, 2.0);
        assert!(s.surface_distance(DVec3::new(1.0, 0.0, 0.0)) < 0.0);
        assert!((s.surface_distance(DVec3::new(5.0, 0.0, 0.0)) - 3.0).abs() < 1e-12);
    }
}
