//! Tile meshes on a square vertex lattice.
//!
//! Every projection builds its mesh on an `(N + 1) x (N + 1)` lattice of
//! vertices, row-major with row 0 at the top of the tile. Triangles are kept
//! per quadrant so the traversal can draw any subset of a tile's four
//! quadrants. Index buffers for a quadrant are produced on demand for an
//! accommodation mask: edges whose neighbour is still drawn one level coarser
//! get their odd vertices folded onto the coarser edge, which removes
//! T-junction cracks along the seam.

use bytemuck::{Pod, Zeroable};
use glam::DVec3;

use crate::GeometryError;

/// Edge bits of an accommodation mask.
pub mod edge {
    pub const TOP: u8 = 1;
    pub const RIGHT: u8 = 2;
    pub const BOTTOM: u8 = 4;
    pub const LEFT: u8 = 8;
    /// All sixteen masks are valid.
    pub const ALL: u8 = TOP | RIGHT | BOTTOM | LEFT;
}

/// GPU vertex: position on the unit sphere and texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TileVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

const _: () = assert!(
    std::mem::size_of::<TileVertex>() == 20,
    "TileVertex must stay 5 packed floats"
);
static_assertions::const_assert_eq!(std::mem::align_of::<TileVertex>(), 4);

/// Triangles of a regular lattice, two per cell, split along the
/// top-left to bottom-right diagonal, grouped by quadrant.
///
/// Quadrant `q` covers cells with `x1 = q & 1`, `y1 = q >> 1` halves of the
/// lattice. `segments` must be even.
#[must_use]
pub fn grid_triangles(segments: u32) -> [Vec<[u32; 3]>; 4] {
    let stride = segments + 1;
    let half = segments / 2;
    let mut quadrants: [Vec<[u32; 3]>; 4] = Default::default();
    for j in 0..segments {
        for i in 0..segments {
            let q = usize::from(i >= half) + 2 * usize::from(j >= half);
            let tl = j * stride + i;
            let tr = tl + 1;
            let bl = tl + stride;
            let br = bl + 1;
            quadrants[q].push([tl, tr, br]);
            quadrants[q].push([tl, br, bl]);
        }
    }
    quadrants
}

/// CPU-side mesh of one tile.
#[derive(Clone, Debug)]
pub struct TileMesh {
    segments: u32,
    vertices: Vec<TileVertex>,
    quadrants: [Vec<[u16; 3]>; 4],
}

impl TileMesh {
    /// Assemble a mesh from lattice positions, texture coordinates and
    /// per-quadrant triangles indexing into the lattice.
    pub fn from_lattice(
        segments: u32,
        positions: &[DVec3],
        uvs: &[[f32; 2]],
        quadrants: [Vec<[u32; 3]>; 4],
    ) -> Result<Self, GeometryError> {
        if positions.len() != uvs.len() {
            return Err(GeometryError::AttributeMismatch {
                positions: positions.len(),
                uvs: uvs.len(),
            });
        }
        if positions.len() > usize::from(u16::MAX) + 1 {
            return Err(GeometryError::TooManyVertices {
                count: positions.len(),
            });
        }

        let vertices = positions
            .iter()
            .zip(uvs)
            .map(|(p, uv)| TileVertex {
                position: p.as_vec3().to_array(),
                uv: *uv,
            })
            .collect();

        // Fits: the vertex count was checked above.
        let quadrants = quadrants.map(|tris| {
            tris.into_iter()
                .map(|t| t.map(|i| i as u16))
                .collect::<Vec<_>>()
        });

        Ok(Self {
            segments,
            vertices,
            quadrants,
        })
    }

    /// Cells along one side of the lattice.
    #[must_use]
    pub fn segments(&self) -> u32 {
        self.segments
    }

    #[must_use]
    pub fn vertices(&self) -> &[TileVertex] {
        &self.vertices
    }

    #[must_use]
    pub fn triangle_count(&self, quadrant: usize) -> usize {
        self.quadrants.get(quadrant).map_or(0, Vec::len)
    }

    /// Flat 16-bit index list for one quadrant, stitched for `accommodation`.
    ///
    /// Mask 0 returns the quadrant's triangles unchanged.
    #[must_use]
    pub fn quadrant_indices(&self, quadrant: usize, accommodation: u8) -> Vec<u16> {
        let Some(tris) = self.quadrants.get(quadrant) else {
            return Vec::new();
        };
        let mask = accommodation & edge::ALL;
        let mut out = Vec::with_capacity(tris.len() * 3);
        for tri in tris {
            let [a, b, c] = tri.map(|i| self.fold_vertex(i, mask));
            if a == b || b == c || a == c {
                continue;
            }
            out.extend_from_slice(&[a, b, c]);
        }
        out
    }

    fn fold_vertex(&self, index: u16, mask: u8) -> u16 {
        if mask == 0 {
            return index;
        }
        let n = self.segments as u16;
        let stride = n + 1;
        let (i, j) = (index % stride, index / stride);

        let odd_i = i % 2 == 1;
        let odd_j = j % 2 == 1;
        if (mask & edge::TOP != 0 && j == 0 && odd_i) || (mask & edge::BOTTOM != 0 && j == n && odd_i)
        {
            index - 1
        } else if (mask & edge::LEFT != 0 && i == 0 && odd_j)
            || (mask & edge::RIGHT != 0 && i == n && odd_j)
        {
            index - stride
        } else {
            index
        }
    }

    /// Push every vertex outward by its elevation sample.
    ///
    /// `height_at(i, j)` returns metres above the mean radius for lattice
    /// column `i`, row `j`.
    pub fn displace(&mut self, mean_radius: f64, height_at: impl Fn(u32, u32) -> f64) {
        if mean_radius <= 0.0 {
            return;
        }
        let stride = self.segments + 1;
        for (idx, vertex) in self.vertices.iter_mut().enumerate() {
            let idx = idx as u32;
            let scale = 1.0 + height_at(idx % stride, idx / stride) / mean_radius;
            for c in &mut vertex.position {
                *c = (f64::from(*c) * scale) as f32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_mesh(segments: u32) -> TileMesh {
        let stride = segments + 1;
        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        for j in 0..stride {
            for i in 0..stride {
                positions.push(DVec3::new(f64::from(i), f64::from(j), 0.0));
                uvs.push([i as f32 / segments as f32, j as f32 / segments as f32]);
            }
        }
        TileMesh::from_lattice(segments, &positions, &uvs, grid_triangles(segments)).unwrap()
    }

    #[test]
    fn test_grid_quadrants_partition_cells() {
        let tris = grid_triangles(8);
        for q in &tris {
            assert_eq!(q.len(), 4 * 4 * 2);
        }
    }

    #[test]
    fn test_vertex_is_five_floats() {
        let v = TileVertex {
            position: [1.0, 2.0, 3.0],
            uv: [0.5, 0.25],
        };
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&v));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 0.5, 0.25]);
    }

    #[test]
    fn test_unstitched_indices_match_triangles() {
        let mesh = flat_mesh(4);
        let indices = mesh.quadrant_indices(0, 0);
        assert_eq!(indices.len(), mesh.triangle_count(0) * 3);
        assert!(mesh.quadrant_indices(7, 0).is_empty());
    }

    #[test]
    fn test_accommodated_edge_uses_only_even_vertices() {
        let mesh = flat_mesh(8);
        let stride = 9u16;
        for q in 0..2 {
            let indices = mesh.quadrant_indices(q, edge::TOP);
            for &idx in &indices {
                if idx / stride == 0 {
                    assert_eq!(idx % 2, 0, "odd top-edge vertex {idx} survived");
                }
            }
            assert!(indices.len() < mesh.triangle_count(q) * 3);
        }
    }

    #[test]
    fn test_accommodation_preserves_covered_area() {
        let mesh = flat_mesh(8);
        let area = |indices: &[u16]| -> f32 {
            indices
                .chunks(3)
                .map(|t| {
                    let p = |i: u16| {
                        let v = mesh.vertices()[i as usize].position;
                        glam::Vec2::new(v[0], v[1])
                    };
                    let (a, b, c) = (p(t[0]), p(t[1]), p(t[2]));
                    ((b - a).perp_dot(c - a) * 0.5).abs()
                })
                .sum()
        };
        for mask in 0..16u8 {
            let total: f32 = (0..4).map(|q| area(&mesh.quadrant_indices(q, mask))).sum();
            assert!((total - 64.0).abs() < 1e-3, "mask {mask}: area {total}");
        }
    }

    #[test]
    fn test_too_many_vertices() {
        let n = 256u32;
        let count = ((n + 1) * (n + 1)) as usize;
        let positions = vec![DVec3::ZERO; count];
        let uvs = vec![[0.0; 2]; count];
        let err = TileMesh::from_lattice(n, &positions, &uvs, grid_triangles(n)).unwrap_err();
        assert!(matches!(err, GeometryError::TooManyVertices { .. }));
    }

    #[test]
    fn test_displace_scales_radially() {
        let mut mesh = flat_mesh(2);
        mesh.displace(100.0, |_, _| 100.0);
        assert_eq!(mesh.vertices()[4].position, [2.0, 2.0, 0.0]);
    }
}
