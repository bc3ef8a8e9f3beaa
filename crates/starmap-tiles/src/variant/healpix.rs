//! HEALPix tiles in the nested scheme.
//!
//! The sphere is divided into 12 base faces; every order splits each pixel
//! into 2x2. A tile is one pixel at its order, addressed by face and in-face
//! `(ix, iy)`. Face coordinates map to the sphere with the standard
//! `xyf2loc` ring arithmetic.

use std::f64::consts::FRAC_PI_2;

use glam::DVec3;
use starmap_math::ra_dec_to_vector;

use super::{ProjectionGeometry, Surface, TileBounds, surface_bounds, surface_corners, surface_mesh};
use crate::{DemGrid, GeometryError, TileMesh};

/// Ring index of each face's southern-most corner, in units of `nside`.
const JRLL: [i32; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
/// Longitude index of each face centre, in units of 45 degrees.
const JPLL: [i32; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Spread the low 32 bits of `v` onto even bit positions.
fn spread_bits(v: u32) -> u64 {
    let mut x = u64::from(v);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Nested pixel index: `face * 4^order + interleave(ix, iy)`.
#[must_use]
pub fn nested_index(order: u32, face: u32, ix: u32, iy: u32) -> u64 {
    (u64::from(face) << (2 * order)) | spread_bits(ix) | (spread_bits(iy) << 1)
}

/// Unit vector of fractional face coordinates `(fx, fy)` in `[0, 1]`.
fn face_point(face: usize, fx: f64, fy: f64) -> DVec3 {
    let jr = f64::from(JRLL[face]) - fx - fy;
    let (nr, z) = if jr < 1.0 {
        (jr, 1.0 - jr * jr / 3.0)
    } else if jr > 3.0 {
        let nr = 4.0 - jr;
        (nr, nr * nr / 3.0 - 1.0)
    } else {
        (1.0, (2.0 - jr) * 2.0 / 3.0)
    };

    let mut tmp = f64::from(JPLL[face]) * nr + fx - fy;
    if tmp < 0.0 {
        tmp += 8.0;
    }
    if tmp >= 8.0 {
        tmp -= 8.0;
    }
    let phi = if nr < 1e-15 {
        0.0
    } else {
        0.5 * FRAC_PI_2 * tmp / nr
    };

    let dec = z.clamp(-1.0, 1.0).asin().to_degrees();
    ra_dec_to_vector(phi.to_degrees(), dec)
}

#[derive(Clone, Debug, PartialEq)]
pub struct HealpixGeometry {
    order: u32,
    face: u32,
    ix: u32,
    iy: u32,
}

impl HealpixGeometry {
    /// One of the 12 base faces.
    #[must_use]
    pub fn root(face: u32) -> Self {
        Self {
            order: 0,
            face: face.min(11),
            ix: 0,
            iy: 0,
        }
    }

    #[must_use]
    pub fn child(&self, x1: u32, y1: u32) -> Self {
        let (ix, iy) = self.child_address(x1, y1);
        Self {
            order: self.order + 1,
            face: self.face,
            ix,
            iy,
        }
    }

    #[must_use]
    pub fn face(&self) -> u32 {
        self.face
    }

    #[must_use]
    pub fn nested_index(&self) -> u64 {
        nested_index(self.order, self.face, self.ix, self.iy)
    }

    fn nside(&self) -> f64 {
        f64::from(1u32 << self.order.min(29))
    }
}

impl Surface for HealpixGeometry {
    fn point(&self, s: f64, t: f64) -> DVec3 {
        let nside = self.nside();
        face_point(
            self.face as usize,
            (f64::from(self.ix) + s) / nside,
            (f64::from(self.iy) + t) / nside,
        )
    }

    /// HiPS tiles store the pixel's `iy` axis across image columns and `ix`
    /// down image rows, both reversed.
    fn uv(&self, s: f64, t: f64) -> [f32; 2] {
        [(1.0 - t) as f32, (1.0 - s) as f32]
    }

    fn segments(&self) -> u32 {
        (16u32 >> self.order.min(2)).max(4)
    }
}

impl ProjectionGeometry for HealpixGeometry {
    fn corners(&self) -> [DVec3; 4] {
        surface_corners(self)
    }

    fn compute_bounds(&self) -> TileBounds {
        surface_bounds(self)
    }

    fn build_geometry(
        &self,
        dem: Option<&DemGrid>,
        mean_radius: f64,
    ) -> Result<TileMesh, GeometryError> {
        surface_mesh(self, dem, mean_radius)
    }

    fn child_address(&self, x1: u32, y1: u32) -> (u32, u32) {
        if self.order == 0 {
            (x1 & 1, y1 & 1)
        } else {
            (2 * self.ix + (x1 & 1), 2 * self.iy + (y1 & 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_index() {
        assert_eq!(nested_index(0, 5, 0, 0), 5);
        assert_eq!(nested_index(1, 0, 1, 0), 1);
        assert_eq!(nested_index(1, 0, 0, 1), 2);
        assert_eq!(nested_index(1, 2, 1, 1), 2 * 4 + 3);
        assert_eq!(nested_index(2, 0, 3, 0), 0b0101);
    }

    #[test]
    fn test_child_index_is_four_times_parent() {
        let face = HealpixGeometry::root(7);
        let a = face.child(1, 0);
        let b = a.child(0, 1);
        assert_eq!(a.nested_index(), 7 * 4 + 1);
        assert_eq!(b.nested_index(), a.nested_index() * 4 + 2);
    }

    #[test]
    fn test_face_corners() {
        // Face 4 (equatorial) has its north corner at fx = fy = 1 and its
        // centre on the equator at longitude 0.
        let centre = face_point(4, 0.5, 0.5);
        assert!((centre - DVec3::X).length() < 1e-12);
        let north = face_point(4, 1.0, 1.0);
        assert!((north.y - 2.0 / 3.0).abs() < 1e-12);
        // Polar face 0 reaches the pole at its top corner.
        let pole = face_point(0, 1.0, 1.0);
        assert!((pole - DVec3::Y).length() < 1e-12);
    }

    #[test]
    fn test_faces_tile_the_sphere() {
        let total: f64 = (0..12)
            .map(|f| {
                let tile = HealpixGeometry::root(f);
                let c = tile.compute_bounds().sphere.center;
                c.length()
            })
            .sum();
        // Every face centre lies well off the origin.
        assert!(total > 12.0 * 0.5);
    }

    #[test]
    fn test_segments_by_order() {
        let root = HealpixGeometry::root(0);
        assert_eq!(root.segments(), 16);
        assert_eq!(root.child(0, 0).segments(), 8);
        assert_eq!(root.child(0, 0).child(1, 1).segments(), 4);
    }

    #[test]
    fn test_texture_orientation() {
        let tile = HealpixGeometry::root(0);
        assert_eq!(tile.uv(0.0, 0.0), [1.0, 1.0]);
        assert_eq!(tile.uv(1.0, 0.0), [1.0, 0.0]);
    }
}
