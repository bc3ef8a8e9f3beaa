//! Projection-specific tile geometry.
//!
//! Each projection differs only in how a point of the tile's unit square maps
//! onto the sphere and in how the square is triangulated. [`TileVariant`]
//! picks the concrete geometry for an imageset's projection and forwards the
//! [`ProjectionGeometry`] operations to it.

mod equirect;
mod healpix;
mod mercator;
mod tangent;
mod toast;

use std::sync::{LazyLock, Mutex, PoisonError};

use glam::DVec3;
use rustc_hash::FxHashSet;
use starmap_imageset::{Imageset, ProjectionType};
use starmap_math::BoundingSphere;

use crate::{DemGrid, GeometryError, TileMesh, grid_triangles};

pub use equirect::EquirectGeometry;
pub use healpix::{HealpixGeometry, nested_index};
pub use mercator::MercatorGeometry;
pub use tangent::TangentGeometry;
pub use toast::ToastGeometry;

/// Corners and enclosing sphere of a tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileBounds {
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [DVec3; 4],
    pub sphere: BoundingSphere,
}

/// Geographic extent of a tile, degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatLngEdges {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// Operations every projection provides.
pub trait ProjectionGeometry {
    /// Corners in winding order, top-left first.
    fn corners(&self) -> [DVec3; 4];

    /// Corners plus a sphere enclosing the whole tile surface.
    ///
    /// Needs no downloaded data, so it runs at tile creation.
    fn compute_bounds(&self) -> TileBounds;

    /// Build the tile mesh, displaced by `dem` when given.
    fn build_geometry(
        &self,
        dem: Option<&DemGrid>,
        mean_radius: f64,
    ) -> Result<TileMesh, GeometryError>;

    fn lat_lng_edges(&self) -> Option<LatLngEdges> {
        None
    }

    /// Address of the child drawn in mesh quadrant `(x1, y1)`.
    fn child_address(&self, x1: u32, y1: u32) -> (u32, u32);
}

/// A projection that is a smooth map of the unit square onto the sphere.
///
/// `s` runs left to right and `t` top to bottom across the tile.
pub(crate) trait Surface {
    fn point(&self, s: f64, t: f64) -> DVec3;

    fn uv(&self, s: f64, t: f64) -> [f32; 2] {
        [s as f32, t as f32]
    }

    /// Cells per side of the mesh lattice; always even.
    fn segments(&self) -> u32;
}

const BOUNDS_SAMPLES: u32 = 4;

pub(crate) fn surface_corners(surface: &impl Surface) -> [DVec3; 4] {
    [
        surface.point(0.0, 0.0),
        surface.point(1.0, 0.0),
        surface.point(1.0, 1.0),
        surface.point(0.0, 1.0),
    ]
}

pub(crate) fn surface_bounds(surface: &impl Surface) -> TileBounds {
    let n = BOUNDS_SAMPLES;
    let mut points = Vec::with_capacity(((n + 1) * (n + 1)) as usize);
    for j in 0..=n {
        for i in 0..=n {
            points.push(surface.point(f64::from(i) / f64::from(n), f64::from(j) / f64::from(n)));
        }
    }
    TileBounds {
        corners: surface_corners(surface),
        sphere: lattice_sphere(&points, n + 1),
    }
}

/// Sphere around a square lattice of unit-sphere points, padded by the
/// largest arc sagitta between neighbouring samples so the curved surface
/// between them stays inside.
pub(crate) fn lattice_sphere(points: &[DVec3], stride: u32) -> BoundingSphere {
    let stride = stride as usize;
    let mut max_chord = 0.0_f64;
    for (k, p) in points.iter().enumerate() {
        let (i, j) = (k % stride, k / stride);
        let mut consider = |q: Option<&DVec3>| {
            if let Some(q) = q {
                max_chord = max_chord.max(p.distance(*q));
            }
        };
        if i + 1 < stride {
            consider(points.get(k + 1));
        }
        if j + 1 < points.len() / stride {
            consider(points.get(k + stride));
            if i + 1 < stride {
                consider(points.get(k + stride + 1));
            }
            if i > 0 {
                consider(points.get(k + stride - 1));
            }
        }
    }
    let half = (max_chord * 0.5).min(1.0);
    let sagitta = 1.0 - (1.0 - half * half).sqrt();
    let sphere = BoundingSphere::from_points(points);
    BoundingSphere::new(sphere.center, sphere.radius + sagitta)
}

pub(crate) fn surface_mesh(
    surface: &impl Surface,
    dem: Option<&DemGrid>,
    mean_radius: f64,
) -> Result<TileMesh, GeometryError> {
    let n = surface.segments();
    let stride = n + 1;
    let mut positions = Vec::with_capacity((stride * stride) as usize);
    let mut uvs = Vec::with_capacity(positions.capacity());
    for j in 0..stride {
        for i in 0..stride {
            let (s, t) = (f64::from(i) / f64::from(n), f64::from(j) / f64::from(n));
            positions.push(surface.point(s, t));
            uvs.push(surface.uv(s, t));
        }
    }
    let mut mesh = TileMesh::from_lattice(n, &positions, &uvs, grid_triangles(n))?;
    if let Some(dem) = dem {
        mesh.displace(mean_radius, |i, j| {
            f64::from(dem.sample_unit(f64::from(i) / f64::from(n), f64::from(j) / f64::from(n)))
        });
    }
    Ok(mesh)
}

/// Child address for pyramids whose rows may count from the south.
pub(crate) fn quad_child(x: u32, y: u32, x1: u32, y1: u32, bottoms_up: bool) -> (u32, u32) {
    let dy = if bottoms_up { 1 - (y1 & 1) } else { y1 & 1 };
    (2 * x + (x1 & 1), 2 * y + dy)
}

/// Grid density for lat/lng style tiles: dense near the root where tiles
/// span large arcs, four cells per side deep down.
pub(crate) fn level_segments(level: u32) -> u32 {
    (32u32 >> level.min(31)).clamp(4, 32)
}

/// Imageset ids already warned about having Plotted projection.
static PLOTTED_WARNED: LazyLock<Mutex<FxHashSet<String>>> = LazyLock::new(Mutex::default);

/// `true` the first time `id` is seen.
fn first_plotted_warning(id: &str) -> bool {
    let mut warned = PLOTTED_WARNED.lock().unwrap_or_else(PoisonError::into_inner);
    warned.insert(id.to_owned())
}

/// Concrete geometry of a tile, chosen by the imageset's projection.
#[derive(Clone, Debug)]
pub enum TileVariant {
    Toast(ToastGeometry),
    Healpix(HealpixGeometry),
    Mercator(MercatorGeometry),
    Equirectangular(EquirectGeometry),
    /// Tangent-plane pyramids and single WCS-placed sky images.
    Tangent(TangentGeometry),
}

impl TileVariant {
    /// Build the geometry for a tile of `imageset`.
    ///
    /// `parent` is the parent's geometry and the quadrant this tile occupies
    /// in it. Parent-relative projections derive their geometry from it; TOAST
    /// can also rebuild from the address alone. Returns `None` for projections
    /// with no tile geometry, and for HEALPix before its HiPS metadata is known.
    #[must_use]
    pub fn create(
        imageset: &Imageset,
        level: u32,
        x: u32,
        y: u32,
        parent: Option<(&TileVariant, u8)>,
    ) -> Option<Self> {
        let dem = imageset.is_dem_tiled();
        match imageset.projection {
            ProjectionType::Toast => Some(Self::Toast(match parent {
                Some((Self::Toast(p), q)) => p.child(u32::from(q & 1), u32::from(q >> 1), dem),
                _ => ToastGeometry::from_address(level, x, y, dem),
            })),
            ProjectionType::Healpix => {
                imageset.hips()?;
                match parent {
                    Some((Self::Healpix(p), q)) => Some(Self::Healpix(
                        p.child(u32::from(q & 1), u32::from(q >> 1)),
                    )),
                    _ if level == 0 && x < 12 => Some(Self::Healpix(HealpixGeometry::root(x))),
                    _ => {
                        tracing::debug!(
                            "HEALPix tile {}/{}/{} needs its parent face",
                            level,
                            x,
                            y
                        );
                        None
                    }
                }
            }
            ProjectionType::Mercator => {
                Some(Self::Mercator(MercatorGeometry::new(level, x, y, dem)))
            }
            ProjectionType::Equirectangular => Some(Self::Equirectangular(
                EquirectGeometry::new(imageset, level, x, y),
            )),
            ProjectionType::Tangent => {
                Some(Self::Tangent(TangentGeometry::tangent(imageset, level, x, y)))
            }
            ProjectionType::SkyImage => match TangentGeometry::sky_image(imageset) {
                Some(g) => Some(Self::Tangent(g)),
                None => {
                    tracing::warn!("Sky image '{}' has no WCS placement", imageset.name);
                    None
                }
            },
            ProjectionType::Plotted => {
                if first_plotted_warning(imageset.id()) {
                    tracing::warn!(
                        "Plotted imageset '{}' has no tile geometry; skipping",
                        imageset.name
                    );
                }
                None
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Toast(_) => "toast",
            Self::Healpix(_) => "healpix",
            Self::Mercator(_) => "mercator",
            Self::Equirectangular(_) => "equirectangular",
            Self::Tangent(_) => "tangent",
        }
    }

    /// Same-level edge neighbours (top, right, bottom, left) whose staleness
    /// selects the seam accommodation. Only TOAST stitches seams.
    #[must_use]
    pub fn seam_neighbors(&self) -> [Option<(u32, u32)>; 4] {
        match self {
            Self::Toast(t) => t.neighbors(),
            _ => [None; 4],
        }
    }
}

impl ProjectionGeometry for TileVariant {
    fn corners(&self) -> [DVec3; 4] {
        match self {
            Self::Toast(g) => g.corners(),
            Self::Healpix(g) => g.corners(),
            Self::Mercator(g) => g.corners(),
            Self::Equirectangular(g) => g.corners(),
            Self::Tangent(g) => g.corners(),
        }
    }

    fn compute_bounds(&self) -> TileBounds {
        match self {
            Self::Toast(g) => g.compute_bounds(),
            Self::Healpix(g) => g.compute_bounds(),
            Self::Mercator(g) => g.compute_bounds(),
            Self::Equirectangular(g) => g.compute_bounds(),
            Self::Tangent(g) => g.compute_bounds(),
        }
    }

    fn build_geometry(
        &self,
        dem: Option<&DemGrid>,
        mean_radius: f64,
    ) -> Result<TileMesh, GeometryError> {
        match self {
            Self::Toast(g) => g.build_geometry(dem, mean_radius),
            Self::Healpix(g) => g.build_geometry(dem, mean_radius),
            Self::Mercator(g) => g.build_geometry(dem, mean_radius),
            Self::Equirectangular(g) => g.build_geometry(dem, mean_radius),
            Self::Tangent(g) => g.build_geometry(dem, mean_radius),
        }
    }

    fn lat_lng_edges(&self) -> Option<LatLngEdges> {
        match self {
            Self::Mercator(g) => g.lat_lng_edges(),
            Self::Equirectangular(g) => g.lat_lng_edges(),
            _ => None,
        }
    }

    fn child_address(&self, x1: u32, y1: u32) -> (u32, u32) {
        match self {
            Self::Toast(g) => g.child_address(x1, y1),
            Self::Healpix(g) => g.child_address(x1, y1),
            Self::Mercator(g) => g.child_address(x1, y1),
            Self::Equirectangular(g) => g.child_address(x1, y1),
            Self::Tangent(g) => g.child_address(x1, y1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starmap_imageset::HipsProperties;

    #[test]
    fn test_factory_per_projection() {
        let toast = Imageset::dss();
        assert!(matches!(
            TileVariant::create(&toast, 0, 0, 0, None),
            Some(TileVariant::Toast(_))
        ));
        let osm = Imageset::openstreetmap();
        assert_eq!(
            TileVariant::create(&osm, 2, 1, 1, None).map(|v| v.name()),
            Some("mercator")
        );
    }

    #[test]
    fn test_plotted_has_no_geometry() {
        let set = Imageset::new("plot", "", ProjectionType::Plotted);
        assert!(TileVariant::create(&set, 0, 0, 0, None).is_none());
    }

    #[test]
    fn test_plotted_warning_once_per_imageset() {
        assert!(first_plotted_warning("plot-a"));
        assert!(!first_plotted_warning("plot-a"));
        assert!(first_plotted_warning("plot-b"));
    }

    #[test]
    fn test_healpix_waits_for_properties() {
        let set = Imageset::new("hips", "http://alasky/DSS2", ProjectionType::Healpix);
        assert!(TileVariant::create(&set, 0, 3, 0, None).is_none());
        set.set_hips(HipsProperties::parse("hips_order = 5").unwrap());
        let root = TileVariant::create(&set, 0, 3, 0, None).unwrap();
        assert!(TileVariant::create(&set, 1, 0, 0, None).is_none());
        assert!(TileVariant::create(&set, 1, 0, 0, Some((&root, 0))).is_some());
    }

    #[test]
    fn test_bounds_enclose_mesh() {
        let sets = [
            Imageset::dss(),
            Imageset::openstreetmap(),
            Imageset::new("eq", "http://x", ProjectionType::Equirectangular),
        ];
        for set in &sets {
            for &(level, x, y) in &[(0, 0, 0), (1, 1, 0), (2, 1, 2)] {
                let Some(v) = TileVariant::create(set, level, x, y, None) else {
                    continue;
                };
                let bounds = v.compute_bounds();
                let mesh = v.build_geometry(None, 1.0).unwrap();
                for vert in mesh.vertices() {
                    let p = DVec3::from(vert.position.map(f64::from));
                    assert!(
                        bounds.sphere.center.distance(p) <= bounds.sphere.radius + 1e-5,
                        "{} tile {level}/{x}/{y} vertex outside bounds",
                        v.name()
                    );
                }
            }
        }
    }

    #[test]
    fn test_quad_child_bottoms_up() {
        assert_eq!(quad_child(1, 1, 0, 0, false), (2, 2));
        assert_eq!(quad_child(1, 1, 0, 0, true), (2, 3));
        assert_eq!(quad_child(1, 1, 1, 1, true), (3, 2));
    }

    #[test]
    fn test_level_segments() {
        assert_eq!(level_segments(0), 32);
        assert_eq!(level_segments(2), 8);
        assert_eq!(level_segments(20), 4);
    }
}
