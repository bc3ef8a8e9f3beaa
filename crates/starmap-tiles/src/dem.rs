//! Elevation sample grids.

use starmap_imageset::ProjectionType;

use crate::DecodeError;

/// Samples per side of an elevation tile for `projection`.
#[must_use]
pub fn dem_grid_size(projection: ProjectionType) -> usize {
    match projection {
        ProjectionType::Mercator => 33,
        _ => 17,
    }
}

/// Square grid of elevation samples in metres, row-major, row 0 at the top.
#[derive(Clone, Debug, PartialEq)]
pub struct DemGrid {
    size: usize,
    samples: Vec<f32>,
}

impl DemGrid {
    /// Grid of zeros.
    #[must_use]
    pub fn flat(size: usize) -> Self {
        Self {
            size,
            samples: vec![0.0; size * size],
        }
    }

    /// Decode `size * size` little-endian `f32` samples.
    pub fn from_le_bytes(bytes: &[u8], size: usize) -> Result<Self, DecodeError> {
        let expected = size * size * 4;
        if bytes.len() != expected {
            return Err(DecodeError::ElevationLength {
                expected,
                actual: bytes.len(),
            });
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { size, samples })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample at integer grid coordinates, clamped to the edge.
    #[must_use]
    pub fn at(&self, i: usize, j: usize) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let i = i.min(self.size - 1);
        let j = j.min(self.size - 1);
        self.samples[j * self.size + i]
    }

    /// Bilinear sample at fractional grid coordinates.
    #[must_use]
    pub fn sample(&self, gx: f64, gy: f64) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let max = (self.size - 1) as f64;
        let gx = gx.clamp(0.0, max);
        let gy = gy.clamp(0.0, max);
        let (x0, y0) = (gx.floor() as usize, gy.floor() as usize);
        let (fx, fy) = ((gx - x0 as f64) as f32, (gy - y0 as f64) as f32);
        let top = self.at(x0, y0) * (1.0 - fx) + self.at(x0 + 1, y0) * fx;
        let bottom = self.at(x0, y0 + 1) * (1.0 - fx) + self.at(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Sample at a fractional position across the tile, `s` and `t` in `[0, 1]`.
    #[must_use]
    pub fn sample_unit(&self, s: f64, t: f64) -> f32 {
        let max = self.size.saturating_sub(1) as f64;
        self.sample(s * max, t * max)
    }

    /// Child grid for `quadrant` (`qx + 2 * qy`), bilinearly down-sampled from
    /// the matching quarter of this grid.
    #[must_use]
    pub fn child_quadrant(&self, quadrant: u8) -> Self {
        let n = self.size;
        let qx = f64::from(quadrant & 1);
        let qy = f64::from((quadrant >> 1) & 1);
        let half = n.saturating_sub(1) as f64 / 2.0;
        let mut samples = Vec::with_capacity(n * n);
        for j in 0..n {
            for i in 0..n {
                samples.push(self.sample(qx * half + i as f64 / 2.0, qy * half + j as f64 / 2.0));
            }
        }
        Self { size: n, samples }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(size: usize) -> DemGrid {
        let bytes: Vec<u8> = (0..size * size)
            .flat_map(|k| ((k % size) as f32).to_le_bytes())
            .collect();
        DemGrid::from_le_bytes(&bytes, size).unwrap()
    }

    #[test]
    fn test_grid_sizes() {
        assert_eq!(dem_grid_size(ProjectionType::Mercator), 33);
        assert_eq!(dem_grid_size(ProjectionType::Toast), 17);
        assert_eq!(dem_grid_size(ProjectionType::Equirectangular), 17);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = DemGrid::from_le_bytes(&[0; 10], 17).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ElevationLength {
                expected: 1156,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_bilinear_midpoint() {
        let grid = ramp(17);
        assert!((grid.sample(2.5, 3.0) - 2.5).abs() < 1e-6);
        assert_eq!(grid.at(100, 100), 16.0);
    }

    #[test]
    fn test_child_quadrant_offsets() {
        let grid = ramp(17);
        let left = grid.child_quadrant(0);
        let right = grid.child_quadrant(1);
        // Left child spans parent columns 0..8, right child 8..16.
        assert_eq!(left.at(0, 0), 0.0);
        assert_eq!(left.at(16, 0), 8.0);
        assert_eq!(right.at(0, 5), 8.0);
        assert_eq!(right.at(16, 5), 16.0);
        assert!((right.at(1, 0) - 8.5).abs() < 1e-6);
    }

    #[test]
    fn test_flat_grid() {
        let grid = DemGrid::flat(33);
        assert_eq!(grid.samples().len(), 33 * 33);
        assert_eq!(grid.sample_unit(0.3, 0.7), 0.0);
    }
}
