//! TOAST (Tessellated Octahedral Adaptive Subdivision Transform) tiles.
//!
//! The whole sphere unfolds onto one square. Each tile carries a 3x3 control
//! grid of unit vectors; a child's grid is one quadrant of its parent's, with
//! edge and centre points at geodesic midpoints. The centre point bisects the
//! quadrant's diagonal, whose direction ("backslash" from top-left to
//! bottom-right, or "slash") alternates by quadrant at the root and is
//! inherited below that.

use glam::DVec3;
use starmap_math::geodesic_midpoint;

use super::{LatLngEdges, ProjectionGeometry, TileBounds, lattice_sphere};
use crate::{DemGrid, GeometryError, TileMesh};

/// Octahedral root grid, row-major. All four corners are the south pole.
const ROOT_GRID: [DVec3; 9] = [
    DVec3::new(0.0, -1.0, 0.0),
    DVec3::new(0.0, 0.0, -1.0),
    DVec3::new(0.0, -1.0, 0.0),
    DVec3::new(-1.0, 0.0, 0.0),
    DVec3::new(0.0, 1.0, 0.0),
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(0.0, -1.0, 0.0),
    DVec3::new(0.0, 0.0, 1.0),
    DVec3::new(0.0, -1.0, 0.0),
];

type Lattice = (u32, u32);

#[derive(Clone, Debug, PartialEq)]
pub struct ToastGeometry {
    level: u32,
    x: u32,
    y: u32,
    grid: [DVec3; 9],
    backslash: bool,
    /// Triangle bisection depth per quadrant.
    depth: u32,
}

impl ToastGeometry {
    #[must_use]
    pub fn root(dem: bool) -> Self {
        Self {
            level: 0,
            x: 0,
            y: 0,
            grid: ROOT_GRID,
            backslash: false,
            depth: Self::depth_for(0, dem),
        }
    }

    fn depth_for(level: u32, dem: bool) -> u32 {
        if level == 0 || dem { 3 } else { 2 }
    }

    /// Rebuild a tile's grid by descending from the root along its address bits.
    #[must_use]
    pub fn from_address(level: u32, x: u32, y: u32, dem: bool) -> Self {
        let mut tile = Self::root(dem);
        for bit in (0..level.min(31)).rev() {
            tile = tile.child((x >> bit) & 1, (y >> bit) & 1, dem);
        }
        tile
    }

    /// Child occupying quadrant `(x1, y1)`.
    #[must_use]
    pub fn child(&self, x1: u32, y1: u32, dem: bool) -> Self {
        let (x1, y1) = (x1 & 1, y1 & 1);
        let g = |c: u32, r: u32| self.grid[(c + 3 * r) as usize];
        let tl = g(x1, y1);
        let tr = g(x1 + 1, y1);
        let bl = g(x1, y1 + 1);
        let br = g(x1 + 1, y1 + 1);
        let backslash = self.quadrant_backslash(x1, y1);
        let center = if backslash {
            geodesic_midpoint(tl, br)
        } else {
            geodesic_midpoint(tr, bl)
        };
        let level = self.level + 1;
        Self {
            level,
            x: 2 * self.x + x1,
            y: 2 * self.y + y1,
            grid: [
                tl,
                geodesic_midpoint(tl, tr),
                tr,
                geodesic_midpoint(tl, bl),
                center,
                geodesic_midpoint(tr, br),
                bl,
                geodesic_midpoint(bl, br),
                br,
            ],
            backslash,
            depth: Self::depth_for(level, dem),
        }
    }

    /// Diagonal direction of quadrant `(qx, qy)`.
    fn quadrant_backslash(&self, qx: u32, qy: u32) -> bool {
        if self.level == 0 {
            (qx ^ qy) & 1 == 1
        } else {
            self.backslash
        }
    }

    #[must_use]
    pub fn grid(&self) -> &[DVec3; 9] {
        &self.grid
    }

    /// Same-level neighbours across the top, right, bottom and left edges.
    /// Edges on the border of the unfolded square have none.
    #[must_use]
    pub fn neighbors(&self) -> [Option<(u32, u32)>; 4] {
        let size = 1u64 << self.level.min(32);
        let (x, y) = (self.x, self.y);
        [
            y.checked_sub(1).map(|ny| (x, ny)),
            (u64::from(x) + 1 < size).then(|| (x + 1, y)),
            (u64::from(y) + 1 < size).then(|| (x, y + 1)),
            x.checked_sub(1).map(|nx| (nx, y)),
        ]
    }

    fn lattice_positions(&self) -> (u32, Vec<DVec3>, [Vec<[u32; 3]>; 4]) {
        let half = 1u32 << self.depth;
        let n = 2 * half;
        let stride = n + 1;
        let mut positions: Vec<Option<DVec3>> = vec![None; (stride * stride) as usize];
        for r in 0..3 {
            for c in 0..3 {
                positions[(r * half * stride + c * half) as usize] =
                    Some(self.grid[(c + 3 * r) as usize]);
            }
        }

        let mut quadrants: [Vec<[u32; 3]>; 4] = Default::default();
        for (q, out) in quadrants.iter_mut().enumerate() {
            let (qx, qy) = (q as u32 & 1, q as u32 >> 1);
            let tl = (qx * half, qy * half);
            let tr = (tl.0 + half, tl.1);
            let bl = (tl.0, tl.1 + half);
            let br = (tl.0 + half, tl.1 + half);
            let halves = if self.quadrant_backslash(qx, qy) {
                [[tl, tr, br], [tl, br, bl]]
            } else {
                [[tl, tr, bl], [tr, br, bl]]
            };
            for tri in halves {
                bisect(tri, self.depth, stride, &mut positions, out);
            }
        }

        let positions = positions.into_iter().map(Option::unwrap_or_default).collect();
        (n, positions, quadrants)
    }
}

/// Recursively split a lattice triangle into four, creating each edge
/// midpoint on first use.
fn bisect(
    tri: [Lattice; 3],
    depth: u32,
    stride: u32,
    positions: &mut [Option<DVec3>],
    out: &mut Vec<[u32; 3]>,
) {
    let index = |p: Lattice| (p.1 * stride + p.0) as usize;
    if depth == 0 {
        out.push(tri.map(|p| index(p) as u32));
        return;
    }
    let mut midpoint = |a: Lattice, b: Lattice| {
        let m = ((a.0 + b.0) / 2, (a.1 + b.1) / 2);
        if positions[index(m)].is_none() {
            let pa = positions[index(a)].unwrap_or_default();
            let pb = positions[index(b)].unwrap_or_default();
            positions[index(m)] = Some(geodesic_midpoint(pa, pb));
        }
        m
    };
    let [a, b, c] = tri;
    let ab = midpoint(a, b);
    let bc = midpoint(b, c);
    let ca = midpoint(c, a);
    for sub in [[a, ab, ca], [ab, b, bc], [ca, bc, c], [ab, bc, ca]] {
        bisect(sub, depth - 1, stride, positions, out);
    }
}

impl ProjectionGeometry for ToastGeometry {
    fn corners(&self) -> [DVec3; 4] {
        [self.grid[0], self.grid[2], self.grid[8], self.grid[6]]
    }

    fn compute_bounds(&self) -> TileBounds {
        TileBounds {
            corners: self.corners(),
            sphere: lattice_sphere(&self.grid, 3),
        }
    }

    fn build_geometry(
        &self,
        dem: Option<&DemGrid>,
        mean_radius: f64,
    ) -> Result<TileMesh, GeometryError> {
        let (n, positions, quadrants) = self.lattice_positions();
        let stride = n + 1;
        let uvs: Vec<[f32; 2]> = (0..stride * stride)
            .map(|k| [(k % stride) as f32 / n as f32, (k / stride) as f32 / n as f32])
            .collect();
        let mut mesh = TileMesh::from_lattice(n, &positions, &uvs, quadrants)?;
        if let Some(dem) = dem {
            mesh.displace(mean_radius, |i, j| {
                f64::from(dem.sample_unit(f64::from(i) / f64::from(n), f64::from(j) / f64::from(n)))
            });
        }
        Ok(mesh)
    }

    fn lat_lng_edges(&self) -> Option<LatLngEdges> {
        None
    }

    fn child_address(&self, x1: u32, y1: u32) -> (u32, u32) {
        (2 * self.x + (x1 & 1), 2 * self.y + (y1 & 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_diagonals_avoid_poles() {
        let root = ToastGeometry::root(false);
        // Quadrant (0,0) runs from the south pole (top-left) to the north
        // pole (bottom-right), so it must split along the other diagonal.
        assert!(!root.quadrant_backslash(0, 0));
        assert!(root.quadrant_backslash(1, 0));
        assert!(root.quadrant_backslash(0, 1));
        assert!(!root.quadrant_backslash(1, 1));
    }

    #[test]
    fn test_child_grid_on_unit_sphere() {
        let tile = ToastGeometry::from_address(3, 5, 2, false);
        assert_eq!((tile.level, tile.x, tile.y), (3, 5, 2));
        for p in tile.grid() {
            assert!((p.length() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_backslash_inherited_below_level_one() {
        let root = ToastGeometry::root(false);
        let a = root.child(1, 0, false);
        assert!(a.backslash);
        for q in 0..4 {
            assert_eq!(a.child(q & 1, q >> 1, false).backslash, a.backslash);
        }
        assert!(!root.child(1, 1, false).backslash);
    }

    #[test]
    fn test_child_shares_parent_edge() {
        let root = ToastGeometry::root(false);
        let parent = root.child(0, 1, false);
        let child = parent.child(1, 0, false);
        // Child top-left is parent's top-centre, child top-right is parent's top-right.
        assert_eq!(child.grid[0], parent.grid[1]);
        assert_eq!(child.grid[2], parent.grid[2]);
    }

    #[test]
    fn test_subdivision_depth() {
        let root = ToastGeometry::root(false);
        let mesh = root.build_geometry(None, 1.0).unwrap();
        assert_eq!(mesh.segments(), 16);
        assert_eq!(mesh.vertices().len(), 17 * 17);

        let child = root.child(0, 0, false).build_geometry(None, 1.0).unwrap();
        assert_eq!(child.segments(), 8);

        let dem_child = root.child(0, 0, true).build_geometry(None, 1.0).unwrap();
        assert_eq!(dem_child.segments(), 16);
    }

    #[test]
    fn test_mesh_vertices_on_sphere() {
        let tile = ToastGeometry::from_address(2, 1, 3, false);
        let mesh = tile.build_geometry(None, 1.0).unwrap();
        for v in mesh.vertices() {
            let len = glam::Vec3::from(v.position).length();
            assert!((len - 1.0).abs() < 1e-5);
        }
        let triangles: usize = (0..4).map(|q| mesh.triangle_count(q)).sum();
        assert_eq!(triangles, 2 * 8 * 8);
    }

    #[test]
    fn test_dem_displaces_outward() {
        let tile = ToastGeometry::from_address(1, 0, 0, true);
        let mut grid_bytes = Vec::new();
        for _ in 0..17 * 17 {
            grid_bytes.extend_from_slice(&1000.0f32.to_le_bytes());
        }
        let dem = DemGrid::from_le_bytes(&grid_bytes, 17).unwrap();
        let mesh = tile.build_geometry(Some(&dem), 1_000_000.0).unwrap();
        for v in mesh.vertices() {
            let len = glam::Vec3::from(v.position).length();
            assert!((len - 1.001).abs() < 1e-5);
        }
    }

    #[test]
    fn test_neighbors_stop_at_square_border() {
        let tile = ToastGeometry::from_address(2, 0, 3, false);
        assert_eq!(tile.neighbors(), [Some((0, 2)), Some((1, 3)), None, None]);
        assert_eq!(ToastGeometry::root(false).neighbors(), [None; 4]);
    }
}
