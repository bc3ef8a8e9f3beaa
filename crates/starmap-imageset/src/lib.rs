//! Imageset descriptors: what a tile pyramid is, where its tiles live, and
//! how tile URLs are built.
//!
//! An [`Imageset`] is immutable once loaded (apart from HiPS metadata that is
//! attached exactly once after download) and is shared between tiles through
//! an `Arc`.

mod error;
mod hips;
mod imageset;
mod library;
mod url;

pub use error::ImagesetError;
pub use hips::HipsProperties;
pub use imageset::{DataSetType, FileType, Imageset, ProjectionType, SkyImageWcs};
pub use library::ImagesetLibrary;
pub use url::{hips_tile_url, quad_key, server_id, tile_url};
