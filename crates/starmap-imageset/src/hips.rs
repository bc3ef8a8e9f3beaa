//! HiPS `properties` metadata for HEALPix datasets.
//!
//! The file is a flat `key = value` list with `#` comments. Only the keys the
//! tile engine needs are kept.

use crate::ImagesetError;

/// Parsed HiPS metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct HipsProperties {
    /// Deepest HEALPix order (`hips_order`).
    pub max_order: u32,
    /// Shallowest order carrying tiles (`hips_order_min`).
    pub min_order: u32,
    /// Advertised tile encodings in preference order (`hips_tile_format`).
    pub tile_formats: Vec<String>,
    /// Coordinate frame (`hips_frame`).
    pub frame: String,
    /// Tile width in pixels (`hips_tile_width`).
    pub tile_width: u32,
    /// `dataproduct_type = catalog`: tiles are tab-separated rows.
    pub catalog: bool,
    pub title: Option<String>,
}

impl HipsProperties {
    /// Parse the body of a `properties` file.
    pub fn parse(text: &str) -> Result<Self, ImagesetError> {
        let mut max_order = None;
        let mut min_order = 0;
        let mut tile_formats = Vec::new();
        let mut frame = "equatorial".to_string();
        let mut tile_width = 512;
        let mut catalog = false;
        let mut title = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "hips_order" => max_order = Some(parse_u32("hips_order", value)?),
                "hips_order_min" => min_order = parse_u32("hips_order_min", value)?,
                "hips_tile_format" => {
                    tile_formats = value.split_whitespace().map(str::to_lowercase).collect();
                }
                "hips_frame" => frame = value.to_string(),
                "hips_tile_width" => tile_width = parse_u32("hips_tile_width", value)?,
                "dataproduct_type" => catalog = value.eq_ignore_ascii_case("catalog"),
                "obs_title" => title = Some(value.to_string()),
                _ => {}
            }
        }

        let max_order =
            max_order.ok_or_else(|| ImagesetError::HipsProperties("missing hips_order".into()))?;
        if tile_formats.is_empty() {
            tile_formats.push(if catalog { "tsv" } else { "jpeg" }.to_string());
        }

        Ok(Self {
            max_order,
            min_order: min_order.min(max_order),
            tile_formats,
            frame,
            tile_width,
            catalog,
            title,
        })
    }

    /// File extension to request tiles with.
    ///
    /// Catalogs always use `tsv`. FITS is chosen only when asked for and
    /// advertised; otherwise PNG beats JPEG when both are listed.
    #[must_use]
    pub fn tile_extension(&self, prefer_fits: bool) -> &'static str {
        let has = |f: &str| self.tile_formats.iter().any(|t| t == f);
        if self.catalog {
            "tsv"
        } else if prefer_fits && has("fits") {
            "fits"
        } else if has("png") {
            "png"
        } else if has("jpeg") || has("jpg") {
            "jpg"
        } else if has("fits") {
            "fits"
        } else {
            "jpg"
        }
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ImagesetError> {
    value
        .parse()
        .map_err(|_| ImagesetError::HipsProperties(format!("{key} = {value:?} is not an integer")))
}
