//! Equirectangular (plate carrée) tiles.

use glam::DVec3;
use starmap_imageset::Imageset;
use starmap_math::lat_lng_to_vector;

use super::{
    LatLngEdges, ProjectionGeometry, Surface, TileBounds, level_segments, quad_child,
    surface_bounds, surface_corners, surface_mesh,
};
use crate::{DemGrid, GeometryError, TileMesh};

#[derive(Clone, Debug, PartialEq)]
pub struct EquirectGeometry {
    level: u32,
    x: u32,
    y: u32,
    tile_degrees: f64,
    lat_top: f64,
    lng_left: f64,
    bottoms_up: bool,
    dem: bool,
}

impl EquirectGeometry {
    #[must_use]
    pub fn new(imageset: &Imageset, level: u32, x: u32, y: u32) -> Self {
        let base = imageset.base_tile_degrees;
        let tile_degrees = base / f64::from(1u32 << level.min(31));
        let width_factor = f64::from(imageset.width_factor.max(1));
        let lat_top = if imageset.bottoms_up {
            -base / 2.0 + f64::from(y + 1) * tile_degrees + imageset.offset_y
        } else {
            base / 2.0 - f64::from(y) * tile_degrees + imageset.offset_y
        };
        Self {
            level,
            x,
            y,
            tile_degrees,
            lat_top,
            lng_left: f64::from(x) * tile_degrees - base / width_factor + imageset.offset_x,
            bottoms_up: imageset.bottoms_up,
            dem: imageset.is_dem_tiled(),
        }
    }
}

impl Surface for EquirectGeometry {
    fn point(&self, s: f64, t: f64) -> DVec3 {
        let lat = (self.lat_top - t * self.tile_degrees).clamp(-90.0, 90.0);
        lat_lng_to_vector(lat, self.lng_left + s * self.tile_degrees)
    }

    fn segments(&self) -> u32 {
        if self.dem { 16 } else { level_segments(self.level) }
    }
}

impl ProjectionGeometry for EquirectGeometry {
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

    fn lat_lng_edges(&self) -> Option<LatLngEdges> {
        Some(LatLngEdges {
            north: self.lat_top,
            south: self.lat_top - self.tile_degrees,
            west: self.lng_left,
            east: self.lng_left + self.tile_degrees,
        })
    }

    fn child_address(&self, x1: u32, y1: u32) -> (u32, u32) {
        quad_child(self.x, self.y, x1, y1, self.bottoms_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starmap_imageset::ProjectionType;

    fn planet() -> Imageset {
        let mut set = Imageset::new("mars", "http://x/{L}/{X}/{Y}", ProjectionType::Equirectangular);
        set.base_tile_degrees = 180.0;
        set.width_factor = 2;
        set
    }

    #[test]
    fn test_root_edges() {
        let set = planet();
        let e0 = EquirectGeometry::new(&set, 0, 0, 0).lat_lng_edges().unwrap();
        assert_eq!((e0.north, e0.south), (90.0, -90.0));
        assert_eq!((e0.west, e0.east), (-90.0, 90.0));
        let e1 = EquirectGeometry::new(&set, 0, 1, 0).lat_lng_edges().unwrap();
        assert_eq!((e1.west, e1.east), (90.0, 270.0));
    }

    #[test]
    fn test_rows_count_down_from_north() {
        let set = planet();
        let e = EquirectGeometry::new(&set, 2, 3, 1).lat_lng_edges().unwrap();
        assert_eq!(e.north, 45.0);
        assert_eq!(e.south, 0.0);
    }

    #[test]
    fn test_bottoms_up_rows_count_from_south() {
        let mut set = planet();
        set.bottoms_up = true;
        let g = EquirectGeometry::new(&set, 2, 0, 0);
        let e = g.lat_lng_edges().unwrap();
        assert_eq!((e.north, e.south), (-45.0, -90.0));
        // Top-left child quadrant is the northern (odd) row.
        assert_eq!(g.child_address(0, 0), (0, 1));
    }

    #[test]
    fn test_offsets_shift_tiles() {
        let mut set = planet();
        set.offset_x = 10.0;
        set.offset_y = -5.0;
        let e = EquirectGeometry::new(&set, 0, 0, 0).lat_lng_edges().unwrap();
        assert_eq!(e.west, -80.0);
        assert_eq!(e.north, 85.0);
    }
}
