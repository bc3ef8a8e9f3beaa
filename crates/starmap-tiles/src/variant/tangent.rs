//! Tangent-plane (gnomonic) tiles and single WCS-placed sky images.
//!
//! Both describe a rectangle on the plane tangent to the sphere at the
//! imageset centre. Plane coordinates are degrees of arc at the tangent point.

use glam::DVec3;
use starmap_imageset::{DataSetType, Imageset};
use starmap_math::TangentFrame;

use super::{
    ProjectionGeometry, Surface, TileBounds, quad_child, surface_bounds, surface_corners,
    surface_mesh,
};
use crate::{DemGrid, GeometryError, TileMesh};

#[derive(Clone, Debug, PartialEq)]
pub struct TangentGeometry {
    frame: TangentFrame,
    level: u32,
    x: u32,
    y: u32,
    /// Plane x of the tile's left edge.
    left: f64,
    /// Plane y of the tile's top edge.
    top: f64,
    /// Signed plane extent across the tile.
    width: f64,
    height: f64,
    /// Sky imagery is seen from inside the sphere, mirroring plane x.
    mirror_x: bool,
    bottoms_up: bool,
}

impl TangentGeometry {
    /// Tile of a tangent-plane pyramid.
    #[must_use]
    pub fn tangent(imageset: &Imageset, level: u32, x: u32, y: u32) -> Self {
        let base = imageset.base_tile_degrees;
        let deg = base / f64::from(1u32 << level.min(31));
        // Bottoms-up rows count from the bottom edge at offset_y - base.
        let top = if imageset.bottoms_up {
            imageset.offset_y - base + f64::from(y + 1) * deg
        } else {
            imageset.offset_y - f64::from(y) * deg
        };
        Self {
            frame: TangentFrame::new(imageset.center_y, imageset.center_x, imageset.rotation),
            level,
            x,
            y,
            left: f64::from(x) * deg - imageset.offset_x,
            top,
            width: deg,
            height: deg,
            mirror_x: imageset.data_set_type == DataSetType::Sky,
            bottoms_up: imageset.bottoms_up,
        }
    }

    /// The single tile of a sky image, or `None` without WCS placement.
    #[must_use]
    pub fn sky_image(imageset: &Imageset) -> Option<Self> {
        let wcs = imageset.wcs?;
        Some(Self {
            frame: TangentFrame::new(imageset.center_y, imageset.center_x, imageset.rotation),
            level: 0,
            x: 0,
            y: 0,
            left: -wcs.ref_x * wcs.scale_x_deg,
            top: wcs.ref_y * wcs.scale_y_deg,
            width: f64::from(wcs.width_px) * wcs.scale_x_deg,
            height: f64::from(wcs.height_px) * wcs.scale_y_deg,
            mirror_x: false,
            bottoms_up: false,
        })
    }
}

impl Surface for TangentGeometry {
    fn point(&self, s: f64, t: f64) -> DVec3 {
        let px = self.left + s * self.width;
        let px = if self.mirror_x { -px } else { px };
        self.frame.plane_to_sphere(px, self.top - t * self.height)
    }

    fn segments(&self) -> u32 {
        if self.level == 0 { 8 } else { 4 }
    }
}

impl ProjectionGeometry for TangentGeometry {
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
        quad_child(self.x, self.y, x1, y1, self.bottoms_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starmap_imageset::{ProjectionType, SkyImageWcs};
    use starmap_math::ra_dec_to_vector;

    #[test]
    fn test_centered_tile_contains_tangent_point() {
        let mut set = Imageset::new("m42", "http://x/{L}/{X}/{Y}", ProjectionType::Tangent);
        set.data_set_type = DataSetType::Earth;
        set.center_x = 83.8;
        set.center_y = -5.4;
        set.base_tile_degrees = 2.0;
        set.offset_x = 1.0;
        set.offset_y = 1.0;
        let tile = TangentGeometry::tangent(&set, 0, 0, 0);
        let centre = tile.point(0.5, 0.5);
        assert!((centre - ra_dec_to_vector(83.8, -5.4)).length() < 1e-12);
    }

    #[test]
    fn test_sky_tangent_mirrors_x() {
        let mut set = Imageset::new("t", "http://x", ProjectionType::Tangent);
        set.base_tile_degrees = 2.0;
        set.offset_y = 1.0;
        let sky = TangentGeometry::tangent(&set, 0, 0, 0);
        set.data_set_type = DataSetType::Planet;
        let planet = TangentGeometry::tangent(&set, 0, 0, 0);
        let a = sky.point(1.0, 0.5);
        let b = planet.point(1.0, 0.5);
        assert!((a.z + b.z).abs() < 1e-12);
    }

    #[test]
    fn test_bottoms_up_mirrors_rows_off_centre() {
        let mut set = Imageset::new("t", "http://x", ProjectionType::Tangent);
        set.base_tile_degrees = 2.0;
        set.offset_y = 0.5;
        let rows = 1u32 << 2;
        let down: Vec<_> = (0..rows).map(|y| TangentGeometry::tangent(&set, 2, 1, y)).collect();
        set.bottoms_up = true;
        for y in 0..rows {
            let up = TangentGeometry::tangent(&set, 2, 1, y);
            let same = &down[(rows - 1 - y) as usize];
            assert!((up.top - same.top).abs() < 1e-12);
            assert!((up.point(0.5, 0.5) - same.point(0.5, 0.5)).length() < 1e-12);
        }
    }

    #[test]
    fn test_sky_image_from_wcs() {
        let mut set = Imageset::new("m31", "http://x/m31.png", ProjectionType::SkyImage);
        assert!(TangentGeometry::sky_image(&set).is_none());
        set.center_x = 10.68;
        set.center_y = 41.27;
        set.wcs = Some(SkyImageWcs {
            width_px: 1000,
            height_px: 800,
            scale_x_deg: -0.001,
            scale_y_deg: 0.001,
            ref_x: 500.0,
            ref_y: 400.0,
        });
        let tile = TangentGeometry::sky_image(&set).unwrap();
        let centre = tile.point(0.5, 0.5);
        assert!((centre - ra_dec_to_vector(10.68, 41.27)).length() < 1e-12);
        let bounds = tile.compute_bounds();
        assert!(bounds.sphere.radius < 0.02);
    }
}
