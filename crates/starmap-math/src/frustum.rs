//! View-frustum planes extracted from a world-view-projection matrix.
//!
//! Tiles are tested in their own model space, so the matrix handed in must
//! already include the world transform. Depth is expected in `[0, 1]` as
//! produced by [`glam::DMat4::perspective_rh`].

use glam::{DMat4, DVec3, DVec4};

use crate::BoundingSphere;

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// Result of a sphere-frustum test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intersection {
    /// Completely inside every plane.
    Inside,
    /// Completely behind at least one plane.
    Outside,
    /// Straddles one or more planes.
    Intersecting,
}

/// A plane with a unit inward normal: points with positive signed distance
/// are on the visible side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    /// Unit normal pointing into the frustum.
    pub normal: DVec3,
    /// Offset term: `normal.dot(p) + d` is the signed distance of `p`.
    pub d: f64,
}

impl Plane {
    fn from_coefficients(v: DVec4) -> Self {
        let normal = v.truncate();
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                d: v.w / len,
            }
        } else {
            Self { normal, d: v.w }
        }
    }

    /// Signed distance from the plane to `point`.
    #[must_use]
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.d
    }
}

/// Six inward-facing planes: left, right, bottom, top, near, far.
#[derive(Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Extract the planes with the Gribb-Hartmann method.
    #[must_use]
    pub fn from_view_projection(m: &DMat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut coefficients = [DVec4::ZERO; 6];
        coefficients[LEFT] = rows[3] + rows[0];
        coefficients[RIGHT] = rows[3] - rows[0];
        coefficients[BOTTOM] = rows[3] + rows[1];
        coefficients[TOP] = rows[3] - rows[1];
        coefficients[NEAR] = rows[2];
        coefficients[FAR] = rows[3] - rows[2];

        Self {
            planes: coefficients.map(Plane::from_coefficients),
        }
    }

    /// The six planes in left, right, bottom, top, near, far order.
    #[must_use]
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    /// Classify a sphere against the frustum.
    #[must_use]
    pub fn classify_sphere(&self, center: DVec3, radius: f64) -> Intersection {
        let mut straddles = false;
        for plane in &self.planes {
            let dist = plane.signed_distance(center);
            if dist < -radius {
                return Intersection::Outside;
            }
            if dist < radius {
                straddles = true;
            }
        }
        if straddles {
            Intersection::Intersecting
        } else {
            Intersection::Inside
        }
    }

    /// `true` unless the sphere lies entirely behind one of the planes.
    #[must_use]
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.classify_sphere(sphere.center, sphere.radius) != Intersection::Outside
    }
}
