//! wgpu backend for tile drawing.
//!
//! [`WgpuTileRenderer`] implements [`starmap_tiles::TileRenderer`]: tiles
//! upload through it during traversal, it records their draws, and the
//! application encodes the frame into a render pass afterwards.

mod device;
mod error;
mod pipeline;
mod renderer;
mod texture;

pub use device::GpuContext;
pub use error::GpuError;
pub use pipeline::{DrawUniform, TilePipelines};
pub use renderer::{OffscreenTarget, WgpuTileRenderer};
pub use texture::{GpuTexture, TexturePool, mip_chain, mip_level_count};
