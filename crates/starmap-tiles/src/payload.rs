//! Decoding fetched bytes into tile payloads.
//!
//! Decoding runs on loader threads, so everything here is `Send` and free of
//! tile state. Images are converted to RGBA and resampled to power-of-two
//! dimensions; FITS sample blocks go through an externally supplied
//! [`FitsDecoder`].

use image::imageops::FilterType;
use starmap_imageset::HipsProperties;

use crate::{DecodeError, DemGrid};

/// Single-channel float samples produced by a FITS decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBlock {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<f32>,
}

/// Boundary to an external FITS reader.
pub trait FitsDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<SampleBlock, String>;
}

/// How a texture should be sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    /// Trilinear over a mip chain.
    LinearMipmap,
    /// Nearest texel, no mips.
    Nearest,
}

/// Decoded texture ready for upload.
#[derive(Clone, Debug, PartialEq)]
pub enum TexturePayload {
    /// 8-bit RGBA, power-of-two dimensions.
    Rgba8 {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    /// 32-bit float single channel.
    Float32 {
        width: u32,
        height: u32,
        samples: Vec<f32>,
    },
}

impl TexturePayload {
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Rgba8 { width, .. } | Self::Float32 { width, .. } => *width,
        }
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Rgba8 { height, .. } | Self::Float32 { height, .. } => *height,
        }
    }

    #[must_use]
    pub fn filter(&self) -> TextureFilter {
        match self {
            Self::Rgba8 { .. } => TextureFilter::LinearMipmap,
            Self::Float32 { .. } => TextureFilter::Nearest,
        }
    }

    /// Raw texel bytes in upload order.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Rgba8 { pixels, .. } => pixels,
            Self::Float32 { samples, .. } => bytemuck::cast_slice(samples),
        }
    }

    /// Wrap a FITS sample block.
    pub fn from_samples(block: SampleBlock) -> Result<Self, DecodeError> {
        let expected = block.width as usize * block.height as usize;
        if expected == 0 || block.samples.len() != expected {
            return Err(DecodeError::SampleCount {
                width: block.width,
                height: block.height,
                actual: block.samples.len(),
            });
        }
        Ok(Self::Float32 {
            width: block.width,
            height: block.height,
            samples: block.samples,
        })
    }
}

/// Decode PNG or JPEG bytes to RGBA, resampling to power-of-two dimensions.
pub fn decode_image(bytes: &[u8]) -> Result<TexturePayload, DecodeError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let (w, h) = rgba.dimensions();
    let (pw, ph) = (w.next_power_of_two(), h.next_power_of_two());
    let rgba = if (pw, ph) == (w, h) {
        rgba
    } else {
        tracing::trace!("Resampling {}x{} tile image to {}x{}", w, h, pw, ph);
        image::imageops::resize(&rgba, pw, ph, FilterType::Triangle)
    };
    Ok(TexturePayload::Rgba8 {
        width: pw,
        height: ph,
        pixels: rgba.into_raw(),
    })
}

/// Rows of a HiPS catalog tile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CatalogRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CatalogRows {
    /// Parse a tab-separated tile: `#` comment lines, one header line, then rows.
    pub fn parse_tsv(text: &str) -> Result<Self, DecodeError> {
        let mut lines = text
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'));
        let header = lines
            .next()
            .ok_or_else(|| DecodeError::Catalog("missing header line".into()))?;
        let columns: Vec<String> = header.split('\t').map(|c| c.trim().to_string()).collect();
        let rows = lines
            .map(|l| l.split('\t').map(|c| c.trim().to_string()).collect())
            .collect();
        Ok(Self { columns, rows })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What a request's bytes should be decoded as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadFormat {
    /// PNG or JPEG.
    Image,
    /// FITS sample block.
    Fits,
    /// Little-endian f32 grid with this many samples per side.
    Elevation { grid_size: usize },
    /// Tab-separated catalog rows.
    Catalog,
    /// HiPS `properties` file.
    HipsProperties,
}

/// Which tile payload a request fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Imagery or catalog rows.
    Texture,
    Elevation,
}

/// One fetch a tile needs.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestSpec {
    pub kind: RequestKind,
    pub url: String,
    pub format: PayloadFormat,
}

/// A decoded payload.
#[derive(Clone, Debug)]
pub enum Payload {
    Texture(TexturePayload),
    Elevation(DemGrid),
    Catalog(CatalogRows),
    HipsProperties(HipsProperties),
}

/// Decode `bytes` according to `format`.
pub fn decode_payload(
    format: PayloadFormat,
    bytes: &[u8],
    fits: Option<&dyn FitsDecoder>,
) -> Result<Payload, DecodeError> {
    match format {
        PayloadFormat::Image => decode_image(bytes).map(Payload::Texture),
        PayloadFormat::Fits => {
            let decoder = fits.ok_or(DecodeError::NoFitsDecoder)?;
            let block = decoder.decode(bytes).map_err(DecodeError::Fits)?;
            TexturePayload::from_samples(block).map(Payload::Texture)
        }
        PayloadFormat::Elevation { grid_size } => {
            DemGrid::from_le_bytes(bytes, grid_size).map(Payload::Elevation)
        }
        PayloadFormat::Catalog => {
            CatalogRows::parse_tsv(std::str::from_utf8(bytes)?).map(Payload::Catalog)
        }
        PayloadFormat::HipsProperties => {
            let props = HipsProperties::parse(std::str::from_utf8(bytes)?)?;
            Ok(Payload::HipsProperties(props))
        }
    }
}
