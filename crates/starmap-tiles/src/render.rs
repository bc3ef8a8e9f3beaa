//! The contract between tiles and a rendering backend.
//!
//! Tiles never talk to a GPU API directly. They upload through a
//! [`TileRenderer`] and keep the opaque handles it returns; releasing those
//! handles is deferred by the cache to the end of the frame.

use rustc_hash::FxHashSet;

use crate::{RenderError, TexturePayload, TextureFilter, TileVertex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexBufferHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexBufferHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// A GPU resource awaiting release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GpuResource {
    Vertices(VertexBufferHandle),
    Indices(IndexBufferHandle),
    Texture(TextureHandle),
}

/// One indexed draw of a tile quadrant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    pub vertices: VertexBufferHandle,
    pub indices: IndexBufferHandle,
    pub index_count: u32,
    pub texture: TextureHandle,
    pub filter: TextureFilter,
    pub opacity: f32,
}

/// Backend that owns GPU buffers and textures for tiles.
pub trait TileRenderer {
    fn upload_vertices(
        &mut self,
        label: &str,
        vertices: &[TileVertex],
    ) -> Result<VertexBufferHandle, RenderError>;

    fn upload_indices(&mut self, label: &str, indices: &[u16])
    -> Result<IndexBufferHandle, RenderError>;

    fn upload_texture(
        &mut self,
        label: &str,
        texture: &TexturePayload,
    ) -> Result<TextureHandle, RenderError>;

    /// Queue a draw for the current frame.
    fn draw(&mut self, call: DrawCall);

    fn release(&mut self, resource: GpuResource);
}

/// Renderer that only records what it is asked to do.
///
/// Used by tests and by the headless demo.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    next_id: u64,
    live: FxHashSet<GpuResource>,
    /// Draws issued since the last [`take_draws`](Self::take_draws).
    pub draws: Vec<DrawCall>,
    pub uploaded_vertices: usize,
    pub uploaded_textures: usize,
    pub released: usize,
}

impl RecordingRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Resources uploaded and not yet released.
    #[must_use]
    pub fn live_resources(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_live(&self, resource: GpuResource) -> bool {
        self.live.contains(&resource)
    }

    pub fn take_draws(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.draws)
    }
}

impl TileRenderer for RecordingRenderer {
    fn upload_vertices(
        &mut self,
        _label: &str,
        vertices: &[TileVertex],
    ) -> Result<VertexBufferHandle, RenderError> {
        let handle = VertexBufferHandle(self.allocate());
        self.live.insert(GpuResource::Vertices(handle));
        self.uploaded_vertices += vertices.len();
        Ok(handle)
    }

    fn upload_indices(
        &mut self,
        _label: &str,
        _indices: &[u16],
    ) -> Result<IndexBufferHandle, RenderError> {
        let handle = IndexBufferHandle(self.allocate());
        self.live.insert(GpuResource::Indices(handle));
        Ok(handle)
    }

    fn upload_texture(
        &mut self,
        _label: &str,
        _texture: &TexturePayload,
    ) -> Result<TextureHandle, RenderError> {
        let handle = TextureHandle(self.allocate());
        self.live.insert(GpuResource::Texture(handle));
        self.uploaded_textures += 1;
        Ok(handle)
    }

    fn draw(&mut self, call: DrawCall) {
        self.draws.push(call);
    }

    fn release(&mut self, resource: GpuResource) {
        if self.live.remove(&resource) {
            self.released += 1;
        } else {
            tracing::warn!("Release of unknown resource {:?}", resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_tracks_live_resources() {
        let mut r = RecordingRenderer::new();
        let v = r.upload_vertices("v", &[TileVertex::default(); 3]).unwrap();
        let t = r
            .upload_texture(
                "t",
                &TexturePayload::Rgba8 {
                    width: 1,
                    height: 1,
                    pixels: vec![0; 4],
                },
            )
            .unwrap();
        assert_eq!(r.live_resources(), 2);
        assert_eq!(r.uploaded_vertices, 3);
        r.release(GpuResource::Vertices(v));
        assert!(!r.is_live(GpuResource::Vertices(v)));
        assert!(r.is_live(GpuResource::Texture(t)));
        r.release(GpuResource::Vertices(v));
        assert_eq!(r.released, 1);
    }
}
