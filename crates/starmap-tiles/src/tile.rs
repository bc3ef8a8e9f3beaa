//! The tile: one node of an imageset's quad-tree.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use starmap_imageset::{FileType, Imageset, ProjectionType, hips_tile_url, tile_url};
use starmap_math::{Frustum, max_edge_length_px};

use crate::{
    CatalogRows, DemGrid, DrawCall, GpuResource, IndexBufferHandle, LatLngEdges, Payload,
    PayloadFormat, ProjectionGeometry, QuadPath, RenderContext, RenderPart, RequestKind,
    RequestSpec, TextureFilter, TextureHandle, TexturePayload, TileBounds, TileFlags, TileKey,
    TileMesh, TileRenderer, TileState, TileVariant, VertexBufferHandle, dem_grid_size,
};

/// GPU residency of a tile.
#[derive(Debug)]
struct GpuTile {
    vertices: VertexBufferHandle,
    texture: TextureHandle,
    filter: TextureFilter,
    /// Index buffers by (accommodation mask, quadrant), created on first draw.
    indices: FxHashMap<(u8, u8), (IndexBufferHandle, u32)>,
}

impl GpuTile {
    fn resources(&self) -> impl Iterator<Item = GpuResource> + '_ {
        [
            GpuResource::Vertices(self.vertices),
            GpuResource::Texture(self.texture),
        ]
        .into_iter()
        .chain(
            self.indices
                .values()
                .map(|(handle, _)| GpuResource::Indices(*handle)),
        )
    }
}

/// A tile of an imageset pyramid.
///
/// Tiles are owned by the cache's registry and refer to each other by key.
/// All mutation happens on the frame thread.
#[derive(Debug)]
pub struct Tile {
    key: TileKey,
    imageset: Arc<Imageset>,
    level: u32,
    x: u32,
    y: u32,
    path: QuadPath,
    parent: Option<TileKey>,
    /// Lazily created children, indexed by mesh quadrant.
    pub children: [Option<TileKey>; 4],
    variant: TileVariant,
    bounds: TileBounds,
    pub flags: TileFlags,
    pub render_parts: [RenderPart; 4],
    pub in_view_frustum: bool,
    /// Value of the cache's access counter when last touched.
    pub access_count: u64,
    pub rendered_generation: u64,
    pub rendered_at_or_below_generation: u64,
    /// Epoch of the current request; completions carrying another are stale.
    epoch: u64,
    outstanding: u8,
    /// Above the imageset's minimum level: never fetches or draws.
    structural: bool,
    texture: Option<TexturePayload>,
    dem: Option<DemGrid>,
    catalog: Option<CatalogRows>,
    /// Catalog rows are currently in the sink.
    pub catalog_shown: bool,
    mesh: Option<TileMesh>,
    gpu: Option<GpuTile>,
}

impl Tile {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        key: TileKey,
        imageset: Arc<Imageset>,
        level: u32,
        x: u32,
        y: u32,
        path: QuadPath,
        parent: Option<TileKey>,
        variant: TileVariant,
    ) -> Self {
        let bounds = variant.compute_bounds();
        let structural = level < imageset.min_level();
        let mut flags = TileFlags {
            dem_tile: imageset.is_dem_tiled(),
            ..TileFlags::default()
        };
        if structural {
            flags.tex_ready = true;
            flags.dem_ready = true;
            flags.update_ready();
        }
        Self {
            key,
            imageset,
            level,
            x,
            y,
            path,
            parent,
            children: Default::default(),
            variant,
            bounds,
            flags,
            render_parts: [RenderPart::default(); 4],
            in_view_frustum: false,
            access_count: 0,
            rendered_generation: 0,
            rendered_at_or_below_generation: 0,
            epoch: 0,
            outstanding: 0,
            structural,
            texture: None,
            dem: None,
            catalog: None,
            catalog_shown: false,
            mesh: None,
            gpu: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    #[must_use]
    pub fn imageset(&self) -> &Arc<Imageset> {
        &self.imageset
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn x(&self) -> u32 {
        self.x
    }

    #[must_use]
    pub fn y(&self) -> u32 {
        self.y
    }

    #[must_use]
    pub fn path(&self) -> &QuadPath {
        &self.path
    }

    #[must_use]
    pub fn parent(&self) -> Option<&TileKey> {
        self.parent.as_ref()
    }

    pub fn detach_from_parent(&mut self) -> Option<TileKey> {
        self.parent.take()
    }

    /// Re-link to a parent that was evicted and rebuilt.
    pub fn attach_to_parent(&mut self, parent: TileKey) {
        self.parent = Some(parent);
    }

    /// Clear the child slot holding `child`, if any.
    pub fn remove_child(&mut self, child: &TileKey) {
        for slot in &mut self.children {
            if slot.as_ref() == Some(child) {
                *slot = None;
            }
        }
    }

    #[must_use]
    pub fn variant(&self) -> &TileVariant {
        &self.variant
    }

    #[must_use]
    pub fn bounds(&self) -> &TileBounds {
        &self.bounds
    }

    #[must_use]
    pub fn lat_lng_edges(&self) -> Option<LatLngEdges> {
        self.variant.lat_lng_edges()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn state(&self) -> TileState {
        self.flags.state()
    }

    #[must_use]
    pub fn is_structural(&self) -> bool {
        self.structural
    }

    #[must_use]
    pub fn dem(&self) -> Option<&DemGrid> {
        self.dem.as_ref()
    }

    #[must_use]
    pub fn catalog(&self) -> Option<&CatalogRows> {
        self.catalog.as_ref()
    }

    #[must_use]
    pub fn is_catalog(&self) -> bool {
        self.imageset.is_catalog()
    }

    #[must_use]
    pub fn has_gpu_resources(&self) -> bool {
        self.gpu.is_some()
    }

    /// Camera distance to the bounding sphere's surface.
    #[must_use]
    pub fn distance_to(&self, camera: glam::DVec3) -> f64 {
        self.bounds.sphere.surface_distance(camera)
    }

    /// Frustum test of the bounding sphere; records the result.
    pub fn is_tile_in_frustum(&mut self, frustum: &Frustum) -> bool {
        self.in_view_frustum = frustum.intersects_sphere(&self.bounds.sphere);
        self.in_view_frustum
    }

    /// Screen-space level-of-detail test: should this tile be drawn by its
    /// children instead?
    ///
    /// Levels 0 and 1 always refine, as does a tile with a corner behind the
    /// camera. Otherwise the longest projected edge must exceed the
    /// threshold.
    #[must_use]
    pub fn is_tile_big_enough(&self, ctx: &RenderContext) -> bool {
        if self.level <= 1 {
            return true;
        }
        match max_edge_length_px(&ctx.wvp, &self.bounds.corners, ctx.viewport) {
            Some(longest) => longest > ctx.lod_threshold_px,
            None => true,
        }
    }

    /// URL of the tile's imagery (or catalog rows).
    #[must_use]
    pub fn image_url(&self) -> String {
        let set = &self.imageset;
        match (&self.variant, set.hips()) {
            (TileVariant::Healpix(g), Some(hips)) => hips_tile_url(
                &set.url,
                self.level,
                g.nested_index(),
                hips.tile_extension(set.file_type == FileType::Fits),
            ),
            _ => tile_url(set, &set.url, self.level, self.x, self.y),
        }
    }

    /// URL of the tile's elevation grid, for elevation-tiled imagesets.
    #[must_use]
    pub fn dem_url(&self) -> Option<String> {
        if !self.flags.dem_tile {
            return None;
        }
        let template = self.imageset.dem_url.as_deref()?;
        Some(tile_url(&self.imageset, template, self.level, self.x, self.y))
    }

    fn texture_format(&self) -> PayloadFormat {
        let set = &self.imageset;
        if set.is_catalog() {
            return PayloadFormat::Catalog;
        }
        let fits = match set.hips() {
            Some(hips) if set.projection == ProjectionType::Healpix => {
                hips.tile_extension(set.file_type == FileType::Fits) == "fits"
            }
            _ => set.file_type == FileType::Fits,
        };
        if fits {
            PayloadFormat::Fits
        } else {
            PayloadFormat::Image
        }
    }

    /// Fetches this tile needs, without changing any state.
    #[must_use]
    pub fn request_specs(&self) -> Vec<RequestSpec> {
        if self.structural {
            return Vec::new();
        }
        let mut specs = Vec::with_capacity(2);
        if !self.flags.tex_ready {
            specs.push(RequestSpec {
                kind: RequestKind::Texture,
                url: self.image_url(),
                format: self.texture_format(),
            });
        }
        if !self.flags.dem_ready
            && let Some(url) = self.dem_url()
        {
            specs.push(RequestSpec {
                kind: RequestKind::Elevation,
                url,
                format: PayloadFormat::Elevation {
                    grid_size: dem_grid_size(self.imageset.projection),
                },
            });
        }
        specs
    }

    /// Mark the tile as downloading under `epoch` and return the fetches to
    /// issue. Completions must carry the same epoch to be accepted.
    pub fn begin_request(&mut self, epoch: u64) -> Vec<RequestSpec> {
        let specs = self.request_specs();
        self.epoch = epoch;
        self.outstanding = specs.len() as u8;
        self.flags.errored = false;
        self.flags.request_pending = true;
        self.flags.downloading = !specs.is_empty();
        tracing::debug!(
            "Requesting {} ({} fetches, epoch {})",
            self.key,
            specs.len(),
            self.epoch
        );
        specs
    }

    /// Whether a completion stamped with `epoch` still belongs to this tile.
    #[must_use]
    pub fn accepts(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.outstanding > 0
    }

    /// Store a decoded payload.
    pub fn apply_payload(&mut self, payload: Payload) {
        match payload {
            Payload::Texture(texture) => {
                self.texture = Some(texture);
                self.flags.tex_ready = true;
            }
            Payload::Elevation(grid) => {
                self.dem = Some(grid);
                self.flags.dem_ready = true;
            }
            Payload::Catalog(rows) => {
                self.catalog = Some(rows);
                self.flags.tex_ready = true;
            }
            Payload::HipsProperties(_) => {
                tracing::warn!("{} received imageset metadata as a tile payload", self.key);
            }
        }
        self.flags.update_ready();
    }

    /// Record a failed imagery fetch. The tile stays errored until evicted.
    pub fn apply_failure(&mut self) {
        self.flags.errored = true;
        self.flags.update_ready();
    }

    /// Count one finished fetch. Returns `true` when none remain outstanding.
    pub fn finish_request(&mut self) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 {
            self.flags.downloading = false;
        }
        self.flags.update_ready();
        self.outstanding == 0
    }

    /// Build and upload the mesh and texture if not done yet.
    ///
    /// Returns `false` when the tile is not ready, its elevation is missing,
    /// or geometry or upload fails; callers keep the tile queued.
    pub fn create_geometry(&mut self, renderer: &mut dyn TileRenderer) -> bool {
        if self.gpu.is_some() {
            return true;
        }
        if self.structural || !self.flags.ready_to_render || self.is_catalog() {
            return false;
        }
        if self.flags.dem_tile && self.dem.is_none() {
            return false;
        }
        let Some(texture) = self.texture.as_ref() else {
            return false;
        };

        let mesh = match self.mesh.take() {
            Some(mesh) => mesh,
            None => match self
                .variant
                .build_geometry(self.dem.as_ref(), self.imageset.mean_radius)
            {
                Ok(mesh) => mesh,
                Err(err) => {
                    tracing::warn!("Geometry for {} failed: {}", self.key, err);
                    return false;
                }
            },
        };

        let label = self.key.as_str();
        let vertices = match renderer.upload_vertices(label, mesh.vertices()) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!("Vertex upload for {} failed: {}", self.key, err);
                self.mesh = Some(mesh);
                return false;
            }
        };
        let texture_handle = match renderer.upload_texture(label, texture) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!("Texture upload for {} failed: {}", self.key, err);
                renderer.release(GpuResource::Vertices(vertices));
                self.mesh = Some(mesh);
                return false;
            }
        };

        self.gpu = Some(GpuTile {
            vertices,
            texture: texture_handle,
            filter: texture.filter(),
            indices: FxHashMap::default(),
        });
        self.texture = None;
        self.mesh = Some(mesh);
        self.flags.geometry_created = true;
        true
    }

    /// Draw one quadrant from this tile's own geometry.
    ///
    /// `accommodation` selects the seam-stitched index variant.
    pub fn render_part(
        &mut self,
        quadrant: u8,
        accommodation: u8,
        opacity: f32,
        renderer: &mut dyn TileRenderer,
    ) -> bool {
        let (Some(gpu), Some(mesh)) = (self.gpu.as_mut(), self.mesh.as_ref()) else {
            return false;
        };
        let slot = (accommodation, quadrant);
        let (indices, index_count) = match gpu.indices.get(&slot) {
            Some(entry) => *entry,
            None => {
                let list = mesh.quadrant_indices(usize::from(quadrant), accommodation);
                if list.is_empty() {
                    return false;
                }
                let label = format!("{}#{quadrant}/{accommodation}", self.key);
                match renderer.upload_indices(&label, &list) {
                    Ok(handle) => {
                        let entry = (handle, list.len() as u32);
                        gpu.indices.insert(slot, entry);
                        entry
                    }
                    Err(err) => {
                        tracing::warn!("Index upload for {} failed: {}", self.key, err);
                        return false;
                    }
                }
            }
        };
        renderer.draw(DrawCall {
            vertices: gpu.vertices,
            indices,
            index_count,
            texture: gpu.texture,
            filter: gpu.filter,
            opacity,
        });
        true
    }

    /// Drop payloads and geometry and return the GPU handles to release.
    ///
    /// Any in-flight completion becomes stale. Structural tiles stay ready.
    pub fn clean_up(&mut self) -> Vec<GpuResource> {
        let released = self
            .gpu
            .take()
            .map(|gpu| gpu.resources().collect())
            .unwrap_or_default();
        self.mesh = None;
        self.texture = None;
        self.dem = None;
        self.catalog = None;
        self.outstanding = 0;
        self.render_parts = [RenderPart::default(); 4];
        self.flags = TileFlags {
            dem_tile: self.flags.dem_tile,
            ..TileFlags::default()
        };
        if self.structural {
            self.flags.tex_ready = true;
            self.flags.dem_ready = true;
        }
        self.flags.update_ready();
        released
    }
}
