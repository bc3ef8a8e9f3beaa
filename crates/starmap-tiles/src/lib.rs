//! Tiles of a multi-resolution image pyramid and the geometry each projection
//! builds for them.
//!
//! A [`Tile`] is one node of the quad-tree. It carries its lifecycle flags,
//! bounding volume, decoded payloads and GPU handles, and delegates every
//! projection-specific decision to its [`TileVariant`]. Tiles never own each
//! other: parent and child links are [`TileKey`]s into a registry kept by the
//! cache.

mod context;
mod dem;
mod error;
mod key;
mod mesh;
mod payload;
mod render;
mod state;
mod tile;
pub mod variant;

pub use context::RenderContext;
pub use dem::{DemGrid, dem_grid_size};
pub use error::{DecodeError, GeometryError, RenderError};
pub use key::{QuadPath, TileKey};
pub use mesh::{TileMesh, TileVertex, edge, grid_triangles};
pub use payload::{
    CatalogRows, FitsDecoder, Payload, PayloadFormat, RequestKind, RequestSpec, SampleBlock,
    TextureFilter, TexturePayload, decode_image, decode_payload,
};
pub use render::{
    DrawCall, GpuResource, IndexBufferHandle, RecordingRenderer, TextureHandle, TileRenderer,
    VertexBufferHandle,
};
pub use state::{RenderPart, TileFlags, TileState};
pub use tile::Tile;
pub use variant::{LatLngEdges, ProjectionGeometry, TileBounds, TileVariant};
