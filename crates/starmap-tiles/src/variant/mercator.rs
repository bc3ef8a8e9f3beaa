//! Web Mercator slippy-map tiles.

use glam::DVec3;
use starmap_math::{MAX_MERCATOR_LAT, lat_lng_to_vector, mercator_lat};

use super::{
    LatLngEdges, ProjectionGeometry, Surface, TileBounds, level_segments, quad_child,
    surface_bounds, surface_corners, surface_mesh,
};
use crate::{DemGrid, GeometryError, TileMesh};

#[derive(Clone, Debug, PartialEq)]
pub struct MercatorGeometry {
    level: u32,
    x: u32,
    y: u32,
    dem: bool,
}

impl MercatorGeometry {
    #[must_use]
    pub fn new(level: u32, x: u32, y: u32, dem: bool) -> Self {
        Self { level, x, y, dem }
    }

    fn tiles_per_side(&self) -> f64 {
        f64::from(1u32 << self.level.min(31))
    }

    fn lat_at(&self, t: f64) -> f64 {
        mercator_lat((f64::from(self.y) + t) / self.tiles_per_side())
            .clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
    }

    fn lng_at(&self, s: f64) -> f64 {
        (f64::from(self.x) + s) / self.tiles_per_side() * 360.0 - 180.0
    }
}

impl Surface for MercatorGeometry {
    fn point(&self, s: f64, t: f64) -> DVec3 {
        lat_lng_to_vector(self.lat_at(t), self.lng_at(s))
    }

    fn segments(&self) -> u32 {
        if self.dem { 32 } else { level_segments(self.level) }
    }
}

impl ProjectionGeometry for MercatorGeometry {
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
            north: self.lat_at(0.0),
            south: self.lat_at(1.0),
            west: self.lng_at(0.0),
            east: self.lng_at(1.0),
        })
    }

    /// Slippy-map rows always count from the north.
    fn child_address(&self, x1: u32, y1: u32) -> (u32, u32) {
        quad_child(self.x, self.y, x1, y1, false)
    }
}
