//! The imageset descriptor and its projection/data enums.

use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::{HipsProperties, ImagesetError};

/// How tile coordinates map onto the sphere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectionType {
    Mercator,
    Equirectangular,
    Tangent,
    Toast,
    SkyImage,
    /// Vector-plotted data; carries no tile geometry.
    Plotted,
    Healpix,
}

impl ProjectionType {
    /// Whether a tile's coordinates are only meaningful relative to its
    /// ancestors, so the ancestor path must be part of its identity.
    #[must_use]
    pub fn is_parent_relative(self) -> bool {
        matches!(self, Self::Toast | Self::Healpix)
    }

    /// Overlay projections are preferred by the download queue on ties.
    #[must_use]
    pub fn is_overlay(self) -> bool {
        matches!(self, Self::Tangent | Self::SkyImage)
    }
}

/// What body the imagery covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSetType {
    Earth,
    Planet,
    #[default]
    Sky,
    Panorama,
    SolarSystem,
}

/// Encoding of each tile payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    #[default]
    Png,
    Jpeg,
    /// Scientific sample blocks, decoded by an external FITS decoder.
    Fits,
}

impl FileType {
    /// Extension used in templated URLs, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Fits => "fits",
        }
    }
}

/// World-coordinate placement of a single untiled sky image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkyImageWcs {
    /// Image width in pixels.
    pub width_px: u32,
    /// Image height in pixels.
    pub height_px: u32,
    /// Degrees per pixel along image x. Negative when RA grows to the left.
    pub scale_x_deg: f64,
    /// Degrees per pixel along image y.
    pub scale_y_deg: f64,
    /// Reference pixel column sitting on the tangent point.
    pub ref_x: f64,
    /// Reference pixel row sitting on the tangent point.
    pub ref_y: f64,
}

/// Describes one tile pyramid.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Imageset {
    /// Display name; unique within a library.
    pub name: String,
    /// Explicit identity used in tile keys. Defaults to a hash of `url`.
    pub id: Option<String>,
    /// Tile URL template.
    pub url: String,
    /// Elevation tile URL template. Present only for DEM-tiled datasets.
    pub dem_url: Option<String>,
    pub projection: ProjectionType,
    pub data_set_type: DataSetType,
    /// Deepest level available.
    pub levels: u32,
    /// Levels above this one carry no imagery.
    pub base_level: u32,
    /// Angular size of a level-0 tile.
    pub base_tile_degrees: f64,
    /// Level-0 tiles across (equirectangular grids).
    pub width_factor: u32,
    pub offset_x: f64,
    pub offset_y: f64,
    /// Tangent point longitude / right ascension, degrees.
    pub center_x: f64,
    /// Tangent point latitude / declination, degrees.
    pub center_y: f64,
    /// Rotation of the tangent plane, degrees.
    pub rotation: f64,
    /// Tile rows count from the south.
    pub bottoms_up: bool,
    /// Character emitted for quadrants 0..3 in `{Q}` paths.
    pub quad_tree_map: String,
    /// Body radius used to scale elevation samples.
    pub mean_radius: f64,
    pub file_type: FileType,
    pub wcs: Option<SkyImageWcs>,

    #[serde(skip)]
    id_cache: OnceLock<String>,
    #[serde(skip)]
    hips: OnceLock<HipsProperties>,
}

impl Default for Imageset {
    fn default() -> Self {
        Self {
            name: String::new(),
            id: None,
            url: String::new(),
            dem_url: None,
            projection: ProjectionType::Toast,
            data_set_type: DataSetType::Sky,
            levels: 0,
            base_level: 0,
            base_tile_degrees: 180.0,
            width_factor: 2,
            offset_x: 0.0,
            offset_y: 0.0,
            center_x: 0.0,
            center_y: 0.0,
            rotation: 0.0,
            bottoms_up: false,
            quad_tree_map: "0123".to_string(),
            mean_radius: 6_371_000.0,
            file_type: FileType::Png,
            wcs: None,
            id_cache: OnceLock::new(),
            hips: OnceLock::new(),
        }
    }
}

impl Imageset {
    /// Minimal descriptor; remaining fields take their defaults.
    pub fn new(name: impl Into<String>, url: impl Into<String>, projection: ProjectionType) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            projection,
            ..Self::default()
        }
    }

    /// Digitized Sky Survey all-sky TOAST pyramid.
    #[must_use]
    pub fn dss() -> Self {
        Self {
            levels: 12,
            file_type: FileType::Png,
            ..Self::new(
                "dss",
                "http://cdn.worldwidetelescope.org/wwtweb/dss.aspx?q={1},{2},{3}",
                ProjectionType::Toast,
            )
        }
    }

    /// OpenStreetMap slippy tiles on the globe.
    #[must_use]
    pub fn openstreetmap() -> Self {
        Self {
            data_set_type: DataSetType::Earth,
            levels: 19,
            base_tile_degrees: 360.0,
            quad_tree_map: "0123".to_string(),
            ..Self::new(
                "osm",
                "https://tile.openstreetmap.org/{L}/{X}/{Y}.png",
                ProjectionType::Mercator,
            )
        }
    }

    /// Built-in imageset by short name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "dss" => Some(Self::dss()),
            "osm" => Some(Self::openstreetmap()),
            _ => None,
        }
    }

    /// Stable identity used as the first component of every tile key.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id_cache.get_or_init(|| match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let mut hasher = FxHasher::default();
                self.url.hash(&mut hasher);
                format!("{:016x}", hasher.finish())
            }
        })
    }

    /// Check invariants that loading cannot express through types.
    pub fn validate(&self) -> Result<(), ImagesetError> {
        if self.name.is_empty() {
            return Err(ImagesetError::MissingField {
                name: self.name.clone(),
                field: "name",
            });
        }
        if self.url.is_empty() && self.projection != ProjectionType::Plotted {
            return Err(ImagesetError::MissingField {
                name: self.name.clone(),
                field: "url",
            });
        }
        if self.quad_tree_map.chars().count() != 4 {
            return Err(ImagesetError::InvalidQuadTreeMap {
                name: self.name.clone(),
                map: self.quad_tree_map.clone(),
            });
        }
        if self.projection == ProjectionType::SkyImage && self.wcs.is_none() {
            return Err(ImagesetError::MissingField {
                name: self.name.clone(),
                field: "wcs",
            });
        }
        Ok(())
    }

    /// Whether tiles carry elevation grids that displace their geometry.
    #[must_use]
    pub fn is_dem_tiled(&self) -> bool {
        self.dem_url.is_some()
            && matches!(
                self.projection,
                ProjectionType::Toast | ProjectionType::Mercator | ProjectionType::Equirectangular
            )
    }

    /// Deepest level, taking HiPS metadata into account once known.
    #[must_use]
    pub fn max_level(&self) -> u32 {
        self.hips().map_or(self.levels, |h| h.max_order)
    }

    /// Shallowest level that carries imagery.
    #[must_use]
    pub fn min_level(&self) -> u32 {
        self.hips().map_or(self.base_level, |h| h.min_order)
    }

    /// HiPS metadata, once downloaded.
    #[must_use]
    pub fn hips(&self) -> Option<&HipsProperties> {
        self.hips.get()
    }

    /// Attach downloaded HiPS metadata. Returns `false` if already attached.
    pub fn set_hips(&self, properties: HipsProperties) -> bool {
        self.hips.set(properties).is_ok()
    }

    /// HEALPix dataset whose tiles are catalog rows instead of imagery.
    #[must_use]
    pub fn is_catalog(&self) -> bool {
        self.hips().is_some_and(|h| h.catalog)
    }

    /// URL of the HiPS `properties` file for HEALPix datasets.
    #[must_use]
    pub fn hips_properties_url(&self) -> String {
        format!("{}/properties", self.url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_relative_projections() {
        assert!(ProjectionType::Toast.is_parent_relative());
        assert!(ProjectionType::Healpix.is_parent_relative());
        assert!(!ProjectionType::Mercator.is_parent_relative());
        assert!(!ProjectionType::Equirectangular.is_parent_relative());
        assert!(ProjectionType::Tangent.is_overlay());
        assert!(ProjectionType::SkyImage.is_overlay());
        assert!(!ProjectionType::Toast.is_overlay());
    }

    #[test]
    fn test_id_defaults_to_url_hash() {
        let a = Imageset::new("a", "http://x/{L}/{X}/{Y}.png", ProjectionType::Mercator);
        let b = Imageset::new("b", "http://x/{L}/{X}/{Y}.png", ProjectionType::Mercator);
        let c = Imageset::new("c", "http://y/{L}/{X}/{Y}.png", ProjectionType::Mercator);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().len(), 16);
    }

    #[test]
    fn test_explicit_id_wins() {
        let mut set = Imageset::new("a", "http://x", ProjectionType::Toast);
        set.id = Some("dss2".to_string());
        assert_eq!(set.id(), "dss2");
    }

    #[test]
    fn test_validate_rejects_bad_quad_map() {
        let mut set = Imageset::dss();
        set.quad_tree_map = "012".to_string();
        assert!(matches!(
            set.validate(),
            Err(ImagesetError::InvalidQuadTreeMap { .. })
        ));
    }

    #[test]
    fn test_validate_sky_image_needs_wcs() {
        let set = Imageset::new("m31", "http://x/m31.png", ProjectionType::SkyImage);
        assert!(matches!(
            set.validate(),
            Err(ImagesetError::MissingField { field: "wcs", .. })
        ));
    }

    #[test]
    fn test_presets_validate() {
        for name in ["dss", "osm"] {
            let set = Imageset::preset(name).unwrap();
            set.validate().unwrap();
        }
        assert!(Imageset::preset("nope").is_none());
    }

    #[test]
    fn test_dem_tiled_only_for_surface_projections() {
        let mut set = Imageset::new("earth", "http://x", ProjectionType::Toast);
        assert!(!set.is_dem_tiled());
        set.dem_url = Some("http://dem/{L}/{X}/{Y}".to_string());
        assert!(set.is_dem_tiled());
        set.projection = ProjectionType::Tangent;
        assert!(!set.is_dem_tiled());
    }

    #[test]
    fn test_hips_overrides_levels_once() {
        let set = Imageset::new("hips", "http://alasky/DSS2", ProjectionType::Healpix);
        assert_eq!(set.max_level(), 0);
        let props = HipsProperties::parse("hips_order = 9\nhips_order_min = 2\n").unwrap();
        assert!(set.set_hips(props.clone()));
        assert!(!set.set_hips(props));
        assert_eq!(set.max_level(), 9);
        assert_eq!(set.min_level(), 2);
        assert_eq!(set.hips_properties_url(), "http://alasky/DSS2/properties");
    }
}
