//! Error types for geometry construction, payload decoding and GPU uploads.

/// Why a tile mesh could not be built.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The mesh needs more vertices than a 16-bit index buffer can address.
    #[error("mesh needs {count} vertices, more than 16-bit indices allow")]
    TooManyVertices { count: usize },

    /// Position and texture coordinate arrays disagree in length.
    #[error("mesh has {positions} positions but {uvs} texture coordinates")]
    AttributeMismatch { positions: usize, uvs: usize },

    /// The projection has no geometry for this tile.
    #[error("projection {0} has no tile geometry")]
    Unsupported(&'static str),
}

/// A fetched resource that is recognised but cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    /// Elevation payload does not hold `size * size` little-endian floats.
    #[error("elevation tile has {actual} bytes, expected {expected}")]
    ElevationLength { expected: usize, actual: usize },

    /// FITS payload and no decoder configured.
    #[error("no FITS decoder configured")]
    NoFitsDecoder,

    /// The external FITS decoder rejected the payload.
    #[error("FITS decode failed: {0}")]
    Fits(String),

    /// A sample block's length does not match its dimensions.
    #[error("sample block is {actual} values, expected {width}x{height}")]
    SampleCount {
        width: u32,
        height: u32,
        actual: usize,
    },

    #[error("payload is not valid UTF-8: {0}")]
    Text(#[from] std::str::Utf8Error),

    #[error("catalog tile: {0}")]
    Catalog(String),

    #[error(transparent)]
    Properties(#[from] starmap_imageset::ImagesetError),
}

/// A GPU resource could not be created.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("upload of '{label}' failed: {source}")]
    Upload {
        label: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
