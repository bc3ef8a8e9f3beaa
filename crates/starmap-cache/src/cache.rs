//! Tile registry, download queue and eviction.

use std::cmp::Ordering;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use starmap_config::CacheConfig;
use starmap_imageset::{Imageset, ProjectionType};
use starmap_tiles::{
    DemGrid, GpuResource, Payload, PayloadFormat, QuadPath, RenderContext, RequestKind, Tile,
    TileKey, TileRenderer, TileVariant,
};

use crate::{
    CatalogSink, FetchOutcome, FetchRequest, FetchTarget, FrameStats, LoadError, ThreadedLoader,
    TileLoader,
};

/// Path of a tile reached without a parent: roots keep their own address.
fn address_path(level: u32, x: u32, y: u32) -> QuadPath {
    if level == 0 {
        QuadPath::root(x, y)
    } else {
        QuadPath::from_address(level, x, y)
    }
}

/// Download-queue bookkeeping of one tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueEntry {
    /// Request weight; grows while the traversal keeps asking, halves every
    /// frame otherwise.
    pub hits: u32,
}

/// Fetches issued for one tile under one epoch.
#[derive(Debug)]
struct Dispatch {
    key: TileKey,
    remaining: usize,
}

/// Owns every tile of every imageset drawn through it.
///
/// Independent caches may coexist; nothing here is global.
pub struct TileCache<L: TileLoader = ThreadedLoader> {
    pub(crate) config: CacheConfig,
    loader: L,
    pub(crate) tiles: FxHashMap<TileKey, Tile>,
    queue: FxHashMap<TileKey, QueueEntry>,
    imagesets: FxHashMap<String, Arc<Imageset>>,
    properties_requested: FxHashSet<String>,
    dispatches: FxHashMap<u64, Dispatch>,
    /// Never reset, so completions from before a `clear` cannot match.
    next_epoch: u64,
    pub(crate) generation: u64,
    access_counter: u64,
    open_threads: u32,
    /// Loader rejections, applied with the next drain.
    deferred: Vec<FetchOutcome>,
    pending_releases: Vec<GpuResource>,
    pub(crate) catalog_sink: Option<Box<dyn CatalogSink>>,
    pub(crate) frame: FrameStats,
    last_frame: FrameStats,
}

impl<L: TileLoader> TileCache<L> {
    pub fn new(config: CacheConfig, loader: L) -> Self {
        let open_threads = config.open_threads;
        Self {
            config,
            loader,
            tiles: FxHashMap::default(),
            queue: FxHashMap::default(),
            imagesets: FxHashMap::default(),
            properties_requested: FxHashSet::default(),
            dispatches: FxHashMap::default(),
            next_epoch: 1,
            generation: 1,
            access_counter: 0,
            open_threads,
            deferred: Vec::new(),
            pending_releases: Vec::new(),
            catalog_sink: None,
            frame: FrameStats::default(),
            last_frame: FrameStats::default(),
        }
    }

    pub fn set_catalog_sink(&mut self, sink: Box<dyn CatalogSink>) {
        self.catalog_sink = Some(sink);
    }

    /// Remember `imageset` so downloaded HiPS metadata can reach it.
    pub fn register_imageset(&mut self, imageset: &Arc<Imageset>) {
        self.imagesets
            .entry(imageset.id().to_string())
            .or_insert_with(|| Arc::clone(imageset));
    }

    #[must_use]
    pub fn loader(&self) -> &L {
        &self.loader
    }

    #[must_use]
    pub fn tile(&self, key: &TileKey) -> Option<&Tile> {
        self.tiles.get(key)
    }

    pub fn tile_mut(&mut self, key: &TileKey) -> Option<&mut Tile> {
        self.tiles.get_mut(key)
    }

    /// Registry size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn queue_entry(&self, key: &TileKey) -> Option<QueueEntry> {
        self.queue.get(key).copied()
    }

    /// Free download slots.
    #[must_use]
    pub fn open_threads(&self) -> u32 {
        self.open_threads
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Counters of the last finished frame.
    #[must_use]
    pub fn stats(&self) -> FrameStats {
        self.last_frame
    }

    fn take_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    pub(crate) fn touch(&mut self, key: &TileKey) -> Option<&mut Tile> {
        self.access_counter += 1;
        let tile = self.tiles.get_mut(key)?;
        tile.access_count = self.access_counter;
        tile.rendered_generation = self.generation;
        Some(tile)
    }

    /// Get or create the tile at `(level, x, y)`.
    ///
    /// `parent` names the parent tile and the mesh quadrant this tile fills;
    /// parent-relative projections derive both geometry and key from it.
    /// Returns `None` when the projection cannot produce the tile yet.
    pub fn get_tile(
        &mut self,
        imageset: &Arc<Imageset>,
        level: u32,
        x: u32,
        y: u32,
        parent: Option<(&TileKey, u8)>,
    ) -> Option<TileKey> {
        let path = match parent.and_then(|(p, q)| Some((self.tiles.get(p)?, q))) {
            Some((p, q)) => p.path().child(q),
            None => address_path(level, x, y),
        };
        let key = TileKey::new(imageset, level, x, y, &path);

        if self.tiles.contains_key(&key) {
            if let Some((parent_key, q)) = parent {
                self.link(parent_key, q, &key);
            }
            return Some(key);
        }

        let parent_variant = parent.and_then(|(p, q)| Some((self.tiles.get(p)?.variant(), q)));
        let Some(variant) = TileVariant::create(imageset, level, x, y, parent_variant) else {
            if imageset.projection == ProjectionType::Healpix && imageset.hips().is_none() {
                self.request_properties(imageset);
            }
            return None;
        };

        let mut tile = Tile::new(
            key.clone(),
            Arc::clone(imageset),
            level,
            x,
            y,
            path,
            parent.map(|(p, _)| p.clone()),
            variant,
        );
        self.access_counter += 1;
        tile.access_count = self.access_counter;
        tile.rendered_generation = self.generation;
        tracing::trace!("Created tile {}", key);
        self.tiles.insert(key.clone(), tile);
        if let Some((parent_key, q)) = parent {
            self.link(parent_key, q, &key);
        }
        Some(key)
    }

    fn link(&mut self, parent: &TileKey, quadrant: u8, child: &TileKey) {
        if let Some(p) = self.tiles.get_mut(parent) {
            p.children[usize::from(quadrant & 3)] = Some(child.clone());
        }
        if let Some(c) = self.tiles.get_mut(child)
            && c.parent().is_none()
        {
            c.attach_to_parent(parent.clone());
        }
    }

    /// Lookup without creation. `None` below the imageset's minimum level.
    #[must_use]
    pub fn get_cached_tile(
        &self,
        imageset: &Imageset,
        level: u32,
        x: u32,
        y: u32,
        path: Option<&QuadPath>,
    ) -> Option<&Tile> {
        if level < imageset.min_level() {
            return None;
        }
        let key = match path {
            Some(path) => TileKey::new(imageset, level, x, y, path),
            None => TileKey::new(imageset, level, x, y, &address_path(level, x, y)),
        };
        self.tiles.get(&key)
    }

    fn request_properties(&mut self, imageset: &Arc<Imageset>) {
        self.register_imageset(imageset);
        let id = imageset.id().to_string();
        if !self.properties_requested.insert(id.clone()) {
            return;
        }
        let request = FetchRequest {
            target: FetchTarget::Properties {
                imageset: id.clone(),
            },
            epoch: self.take_epoch(),
            url: imageset.hips_properties_url(),
            format: PayloadFormat::HipsProperties,
        };
        tracing::info!("Requesting HiPS properties for '{}'", imageset.name);
        if self.loader.submit(request).is_err() {
            // Try again on the next traversal.
            self.properties_requested.remove(&id);
        }
    }

    /// Ask for `key` to be downloaded. Repeated asks raise its weight.
    pub fn add_tile_to_queue(&mut self, key: &TileKey) {
        let Some(tile) = self.tiles.get(key) else {
            return;
        };
        if tile.flags.downloading || tile.flags.ready_to_render || tile.flags.errored {
            return;
        }
        let entry = self.queue.entry(key.clone()).or_default();
        entry.hits = entry.hits.saturating_add(self.config.request_hit_value);
    }

    /// Dispatch queued in-frustum tiles, nearest first, while slots remain.
    ///
    /// Ties in distance favour overlay projections over base imagery.
    pub fn process_queue(&mut self, ctx: &RenderContext) {
        let mut candidates: Vec<(f64, bool, TileKey)> = self
            .queue
            .keys()
            .filter_map(|key| {
                let tile = self.tiles.get(key)?;
                if !tile.in_view_frustum || tile.flags.request_pending || tile.flags.downloading {
                    return None;
                }
                Some((
                    tile.distance_to(ctx.camera_position),
                    !tile.imageset().projection.is_overlay(),
                    key.clone(),
                ))
            })
            .collect();
        candidates.sort_by(dispatch_order);

        for (_, _, key) in candidates {
            if self.open_threads == 0 {
                break;
            }
            if !self.dispatch(&key) {
                break;
            }
        }
        self.frame.queued = self.queue.len();
    }

    /// Start the fetches of one tile. Returns `false` once the loader stops
    /// accepting work.
    fn dispatch(&mut self, key: &TileKey) -> bool {
        let epoch = self.take_epoch();
        let Some(tile) = self.tiles.get_mut(key) else {
            self.queue.remove(key);
            return true;
        };
        let specs = tile.begin_request(epoch);
        if specs.is_empty() {
            tile.flags.request_pending = false;
            tile.flags.update_ready();
            self.queue.remove(key);
            return true;
        }

        self.open_threads -= 1;
        self.frame.dispatched += 1;
        self.dispatches.insert(
            epoch,
            Dispatch {
                key: key.clone(),
                remaining: specs.len(),
            },
        );

        let mut accepted = true;
        for spec in specs {
            let request = FetchRequest {
                target: FetchTarget::Tile {
                    key: key.clone(),
                    kind: spec.kind,
                },
                epoch,
                url: spec.url,
                format: spec.format,
            };
            if let Err(request) = self.loader.submit(request) {
                accepted = false;
                self.deferred.push(FetchOutcome {
                    request,
                    result: Err(LoadError::QueueFull),
                });
            }
        }
        accepted
    }

    /// Drop `key` from the download queue. `complete` also ends its pending
    /// request and frees its slot.
    pub fn remove_from_queue(&mut self, key: &TileKey, complete: bool) {
        self.queue.remove(key);
        if !complete {
            return;
        }
        if let Some(tile) = self.tiles.get_mut(key) {
            tile.flags.request_pending = false;
            tile.flags.update_ready();
        }
        self.release_slot();
    }

    fn release_slot(&mut self) {
        self.open_threads = (self.open_threads + 1).min(self.config.open_threads);
    }

    /// Age the queue: halve weights, drop faded or off-screen requests.
    ///
    /// In-flight fetches are left alone.
    pub fn decimate_queue(&mut self) {
        let tiles = &self.tiles;
        self.queue.retain(|key, entry| {
            let Some(tile) = tiles.get(key) else {
                return false;
            };
            if tile.flags.request_pending {
                return true;
            }
            entry.hits /= 2;
            entry.hits >= 2 && tile.in_view_frustum
        });
    }

    /// Evict least recently used tiles that have not been drawn lately.
    pub fn purge_lru(&mut self) {
        if self.tiles.len() < self.config.max_ready_to_render_size {
            return;
        }
        let horizon = self
            .generation
            .saturating_sub(self.config.staleness_generations);

        let mut ready = Vec::new();
        let mut not_ready = Vec::new();
        for (key, tile) in &self.tiles {
            let stale = tile.rendered_generation < horizon
                && tile.rendered_at_or_below_generation < horizon;
            if !stale || tile.flags.in_flight() {
                continue;
            }
            if tile.flags.ready_to_render {
                ready.push((tile.access_count, key.clone()));
            } else {
                not_ready.push((tile.access_count, key.clone()));
            }
        }

        let mut doomed = Vec::new();
        if ready.len() > self.config.max_ready_to_render_size {
            ready.sort();
            let excess = ready.len() - self.config.max_ready_to_render_size;
            doomed.extend(ready.into_iter().take(excess).map(|(_, key)| key));
        }
        if self.tiles.len() >= self.config.max_tile_cache_size
            && not_ready.len() > self.config.max_tile_cache_size
        {
            not_ready.sort();
            let excess = (not_ready.len() - self.config.max_tile_cache_size)
                .min(self.config.max_not_ready_purge);
            doomed.extend(not_ready.into_iter().take(excess).map(|(_, key)| key));
        }

        if !doomed.is_empty() {
            tracing::debug!(
                "Purging {} of {} tiles (generation {})",
                doomed.len(),
                self.tiles.len(),
                self.generation
            );
        }
        for key in &doomed {
            self.remove_tile(key);
        }
        self.frame.purged += doomed.len();
    }

    fn remove_tile(&mut self, key: &TileKey) {
        let Some(mut tile) = self.tiles.remove(key) else {
            return;
        };
        if let Some(parent) = tile.detach_from_parent()
            && let Some(p) = self.tiles.get_mut(&parent)
        {
            p.remove_child(key);
        }
        for child in tile.children.iter().flatten() {
            if let Some(c) = self.tiles.get_mut(child) {
                c.detach_from_parent();
            }
        }
        if tile.catalog_shown
            && let Some(sink) = self.catalog_sink.as_mut()
        {
            sink.remove_rows(key);
        }
        self.loader.cancel(key);
        self.pending_releases.extend(tile.clean_up());
        self.queue.remove(key);
    }

    /// Apply finished loads. Returns how many outcomes were processed.
    pub fn drain_completions(&mut self) -> usize {
        let mut outcomes = std::mem::take(&mut self.deferred);
        outcomes.extend(self.loader.drain());
        let count = outcomes.len();
        for outcome in outcomes {
            self.apply_outcome(outcome);
        }
        count
    }

    fn apply_outcome(&mut self, outcome: FetchOutcome) {
        let FetchOutcome { request, result } = outcome;
        let (key, kind) = match request.target {
            FetchTarget::Properties { imageset } => {
                self.apply_properties(&imageset, result);
                return;
            }
            FetchTarget::Tile { key, kind } => (key, kind),
        };

        let Some(dispatch) = self.dispatches.get_mut(&request.epoch) else {
            tracing::trace!("Dropping completion for {} from a cleared cache", key);
            return;
        };
        dispatch.remaining = dispatch.remaining.saturating_sub(1);
        let dispatch_done = dispatch.remaining == 0;

        let accepted = self
            .tiles
            .get(&key)
            .is_some_and(|tile| tile.accepts(request.epoch));
        if accepted {
            let fallback = match (&result, request.format) {
                (Err(_), PayloadFormat::Elevation { grid_size }) => {
                    Some(self.fallback_dem(&key, grid_size))
                }
                _ => None,
            };
            if let Some(tile) = self.tiles.get_mut(&key) {
                match result {
                    Ok(payload) => {
                        tile.apply_payload(payload);
                        self.frame.completed += 1;
                    }
                    Err(LoadError::QueueFull | LoadError::Cancelled) => {}
                    Err(err) => {
                        self.frame.failed += 1;
                        match (kind, fallback) {
                            (RequestKind::Elevation, Some(grid)) => {
                                tracing::debug!(
                                    "Elevation for {} unavailable ({}); using fallback",
                                    key,
                                    err
                                );
                                tile.apply_payload(Payload::Elevation(grid));
                            }
                            _ => {
                                tracing::warn!("Tile {} failed: {}", key, err);
                                tile.apply_failure();
                            }
                        }
                    }
                }
                tile.finish_request();
            }
        } else {
            tracing::trace!("Dropping stale completion for {}", key);
        }

        if dispatch_done {
            self.dispatches.remove(&request.epoch);
            let current = self
                .tiles
                .get(&key)
                .is_some_and(|tile| tile.epoch() == request.epoch);
            if current {
                self.remove_from_queue(&key, true);
            } else {
                self.release_slot();
            }
        }
    }

    /// Elevation to use when a tile's own grid cannot be fetched: the
    /// matching quarter of the parent's grid, or a flat one.
    fn fallback_dem(&self, key: &TileKey, grid_size: usize) -> DemGrid {
        self.tiles
            .get(key)
            .and_then(|tile| {
                let quadrant = tile.path().last_quadrant()?;
                let parent = self.tiles.get(tile.parent()?)?;
                let grid = parent.dem()?;
                (grid.size() == grid_size).then(|| grid.child_quadrant(quadrant))
            })
            .unwrap_or_else(|| DemGrid::flat(grid_size))
    }

    fn apply_properties(&mut self, id: &str, result: Result<Payload, LoadError>) {
        let Some(imageset) = self.imagesets.get(id) else {
            return;
        };
        match result {
            Ok(Payload::HipsProperties(properties)) => {
                tracing::info!(
                    "HiPS '{}': orders {}..={}, formats {:?}",
                    imageset.name,
                    properties.min_order,
                    properties.max_order,
                    properties.tile_formats
                );
                imageset.set_hips(properties);
            }
            Ok(_) => tracing::warn!("Unexpected payload for '{}' properties", imageset.name),
            Err(err) => {
                tracing::warn!("HiPS properties for '{}' failed: {}", imageset.name, err);
            }
        }
    }

    /// Release GPU handles of evicted tiles.
    pub fn flush_releases(&mut self, renderer: &mut dyn TileRenderer) {
        for resource in self.pending_releases.drain(..) {
            renderer.release(resource);
        }
    }

    /// Per-frame bookkeeping after all imagesets are drawn.
    pub fn end_frame(&mut self, ctx: &RenderContext, renderer: &mut dyn TileRenderer) {
        self.drain_completions();
        self.process_queue(ctx);
        self.purge_lru();
        self.decimate_queue();
        self.flush_releases(renderer);

        self.frame.generation = self.generation;
        self.frame.queued = self.queue.len();
        self.frame.registry_size = self.tiles.len();
        self.frame.ready_count = self
            .tiles
            .values()
            .filter(|t| t.flags.ready_to_render)
            .count();
        self.frame.open_threads = self.open_threads;
        self.last_frame = std::mem::take(&mut self.frame);
        self.generation += 1;
    }

    /// Drop every tile and release its GPU resources.
    ///
    /// Loads still in flight are discarded when they complete.
    pub fn clear(&mut self, renderer: &mut dyn TileRenderer) {
        let keys: Vec<TileKey> = self.tiles.keys().cloned().collect();
        for key in &keys {
            self.remove_tile(key);
        }
        self.queue.clear();
        self.dispatches.clear();
        self.deferred.clear();
        self.properties_requested.clear();
        self.open_threads = self.config.open_threads;
        self.flush_releases(renderer);
        tracing::info!("Tile cache cleared ({} tiles)", keys.len());
    }

    /// Clear and stop the loader.
    pub fn shutdown(&mut self, renderer: &mut dyn TileRenderer) {
        self.clear(renderer);
        self.loader.shutdown();
    }
}

/// Queue order: nearest first, overlays before base imagery at equal
/// distance, then key order for determinism.
fn dispatch_order(a: &(f64, bool, TileKey), b: &(f64, bool, TileKey)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then(a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchError, ManualLoader};
    use glam::DVec3;
    use starmap_math::Viewport;
    use starmap_tiles::{RecordingRenderer, TileState};
    use std::io::Cursor;

    pub(crate) fn png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn ctx_at(eye: DVec3) -> RenderContext {
        RenderContext::look_at(eye, DVec3::ZERO, DVec3::Y, 60.0, Viewport::new(800.0, 600.0), 300.0)
    }

    fn cache(config: CacheConfig) -> (TileCache<ManualLoader>, ManualLoader) {
        let loader = ManualLoader::new();
        (TileCache::new(config, loader.clone()), loader)
    }

    fn osm() -> Arc<Imageset> {
        Arc::new(Imageset::openstreetmap())
    }

    #[test]
    fn test_get_tile_is_get_or_create() {
        let (mut cache, _) = cache(CacheConfig::default());
        let set = osm();
        let a = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        let b = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_cached_tile(&set, 2, 1, 1, None).is_some());
        assert!(cache.get_cached_tile(&set, 3, 1, 1, None).is_none());
    }

    #[test]
    fn test_get_cached_tile_respects_min_level() {
        let (mut cache, _) = cache(CacheConfig::default());
        let mut set = Imageset::openstreetmap();
        set.base_level = 2;
        let set = Arc::new(set);
        cache.get_tile(&set, 1, 0, 0, None).unwrap();
        assert!(cache.get_cached_tile(&set, 1, 0, 0, None).is_none());
    }

    #[test]
    fn test_parent_relative_keys_follow_path() {
        let (mut cache, _) = cache(CacheConfig::default());
        let set = Arc::new(Imageset::dss());
        let root = cache.get_tile(&set, 0, 0, 0, None).unwrap();
        let child = cache.get_tile(&set, 1, 1, 0, Some((&root, 1))).unwrap();
        assert!(child.as_str().ends_with("\\0_0:1"));
        assert_eq!(cache.tile(&root).unwrap().children[1], Some(child.clone()));
        assert_eq!(cache.tile(&child).unwrap().parent(), Some(&root));
    }

    #[test]
    fn test_queue_weights_and_idempotence() {
        let (mut cache, _) = cache(CacheConfig::default());
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.add_tile_to_queue(&key);
        cache.add_tile_to_queue(&key);
        assert_eq!(cache.queue_len(), 1);
        assert_eq!(cache.queue_entry(&key).unwrap().hits, 512);
    }

    #[test]
    fn test_process_queue_dispatches_nearest_first() {
        let config = CacheConfig {
            open_threads: 2,
            ..CacheConfig::default()
        };
        let (mut cache, loader) = cache(config);
        let set = osm();
        let eye = DVec3::new(0.0, 0.0, 3.0);
        let ctx = ctx_at(eye);

        let mut keys = Vec::new();
        for (x, y) in [(0, 0), (1, 1), (2, 1), (3, 3)] {
            let key = cache.get_tile(&set, 2, x, y, None).unwrap();
            let tile = cache.tile_mut(&key).unwrap();
            tile.in_view_frustum = true;
            keys.push(key.clone());
            cache.add_tile_to_queue(&key);
        }
        cache.process_queue(&ctx);
        assert_eq!(cache.open_threads(), 0);

        let dispatched: Vec<f64> = loader
            .pending()
            .iter()
            .map(|r| cache.tile(r.tile_key().unwrap()).unwrap().distance_to(eye))
            .collect();
        assert_eq!(dispatched.len(), 2);
        assert!(dispatched[0] <= dispatched[1]);
        let nearest = keys
            .iter()
            .map(|k| cache.tile(k).unwrap().distance_to(eye))
            .fold(f64::INFINITY, f64::min);
        assert_eq!(dispatched[0], nearest);
    }

    #[test]
    fn test_dispatch_order_prefers_overlay_at_equal_distance() {
        let (mut cache, _) = cache(CacheConfig::default());
        let mut base = Imageset::openstreetmap();
        base.id = Some("a-base".into());
        let mut overlay = Imageset::new("m42", "http://x/{L}/{X}/{Y}", ProjectionType::Tangent);
        overlay.id = Some("z-overlay".into());
        overlay.base_tile_degrees = 2.0;
        let (base, overlay) = (Arc::new(base), Arc::new(overlay));

        let base_key = cache.get_tile(&base, 2, 1, 1, None).unwrap();
        let overlay_key = cache.get_tile(&overlay, 0, 0, 0, None).unwrap();
        assert!(base_key < overlay_key);

        let mut candidates = vec![
            (1.5, !base.projection.is_overlay(), base_key.clone()),
            (1.5, !overlay.projection.is_overlay(), overlay_key.clone()),
            (0.5, true, base_key.clone()),
        ];
        candidates.sort_by(dispatch_order);
        let order: Vec<_> = candidates.iter().map(|c| (c.0, c.2.clone())).collect();
        assert_eq!(
            order,
            vec![(0.5, base_key.clone()), (1.5, overlay_key), (1.5, base_key)]
        );
    }

    #[test]
    fn test_out_of_frustum_tiles_wait() {
        let (mut cache, loader) = cache(CacheConfig::default());
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.add_tile_to_queue(&key);
        cache.process_queue(&ctx_at(DVec3::new(0.0, 0.0, 3.0)));
        assert!(loader.pending().is_empty());
    }

    #[test]
    fn test_completion_makes_tile_ready_and_returns_slot() {
        let (mut cache, loader) = cache(CacheConfig::default());
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.tile_mut(&key).unwrap().in_view_frustum = true;
        cache.add_tile_to_queue(&key);
        cache.process_queue(&ctx_at(DVec3::new(0.0, 0.0, 3.0)));
        assert_eq!(cache.open_threads(), 7);
        assert_eq!(cache.tile(&key).unwrap().state(), TileState::Downloading);

        let request = loader.take_pending().remove(0);
        loader.complete(&request, &png());
        assert_eq!(cache.drain_completions(), 1);

        let tile = cache.tile(&key).unwrap();
        assert_eq!(tile.state(), TileState::Ready);
        assert!(!tile.flags.request_pending);
        assert_eq!(cache.open_threads(), 8);
        assert_eq!(cache.queue_len(), 0);
    }

    #[test]
    fn test_network_failure_marks_errored() {
        let (mut cache, loader) = cache(CacheConfig::default());
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.tile_mut(&key).unwrap().in_view_frustum = true;
        cache.add_tile_to_queue(&key);
        cache.process_queue(&ctx_at(DVec3::new(0.0, 0.0, 3.0)));
        let request = loader.take_pending().remove(0);
        loader.fail(
            &request,
            FetchError::Status {
                url: request.url.clone(),
                status: 500,
            },
        );
        cache.drain_completions();
        assert_eq!(cache.tile(&key).unwrap().state(), TileState::Errored);
        assert_eq!(cache.open_threads(), 8);
        // Errored tiles are not re-queued.
        cache.add_tile_to_queue(&key);
        assert_eq!(cache.queue_len(), 0);
    }

    #[test]
    fn test_missing_elevation_falls_back_to_flat() {
        let (mut cache, loader) = cache(CacheConfig::default());
        let mut set = Imageset::openstreetmap();
        set.dem_url = Some("https://dem/{L}/{X}/{Y}.bin".to_string());
        let set = Arc::new(set);
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.tile_mut(&key).unwrap().in_view_frustum = true;
        cache.add_tile_to_queue(&key);
        cache.process_queue(&ctx_at(DVec3::new(0.0, 0.0, 3.0)));

        for request in loader.take_pending() {
            match request.format {
                PayloadFormat::Elevation { .. } => loader.fail(
                    &request,
                    FetchError::Status {
                        url: request.url.clone(),
                        status: 404,
                    },
                ),
                _ => loader.complete(&request, &png()),
            }
        }
        cache.drain_completions();
        let tile = cache.tile(&key).unwrap();
        assert!(tile.flags.ready_to_render);
        assert_eq!(tile.dem().unwrap().size(), 33);
        assert!(tile.dem().unwrap().samples().iter().all(|h| *h == 0.0));
    }

    #[test]
    fn test_stale_completion_after_clear_is_dropped() {
        let (mut cache, loader) = cache(CacheConfig::default());
        let mut renderer = RecordingRenderer::new();
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.tile_mut(&key).unwrap().in_view_frustum = true;
        cache.add_tile_to_queue(&key);
        cache.process_queue(&ctx_at(DVec3::new(0.0, 0.0, 3.0)));
        let request = loader.take_pending().remove(0);

        cache.clear(&mut renderer);
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        loader.complete(&request, &png());
        cache.drain_completions();
        assert_eq!(cache.tile(&key).unwrap().state(), TileState::Created);
        assert_eq!(cache.open_threads(), 8);
    }

    #[test]
    fn test_loader_rejection_requeues_later() {
        let loader = ManualLoader::with_capacity(0);
        let mut cache = TileCache::new(CacheConfig::default(), loader);
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.tile_mut(&key).unwrap().in_view_frustum = true;
        cache.add_tile_to_queue(&key);
        cache.process_queue(&ctx_at(DVec3::new(0.0, 0.0, 3.0)));
        cache.drain_completions();
        let tile = cache.tile(&key).unwrap();
        assert_eq!(tile.state(), TileState::Created);
        assert!(!tile.flags.request_pending);
        assert_eq!(cache.open_threads(), 8);
    }

    #[test]
    fn test_decimate_queue_ages_out_requests() {
        let (mut cache, _) = cache(CacheConfig::default());
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        cache.tile_mut(&key).unwrap().in_view_frustum = true;
        cache.add_tile_to_queue(&key);
        for _ in 0..7 {
            cache.decimate_queue();
            assert_eq!(cache.queue_len(), 1);
        }
        cache.decimate_queue();
        assert_eq!(cache.queue_len(), 0);

        cache.add_tile_to_queue(&key);
        cache.tile_mut(&key).unwrap().in_view_frustum = false;
        cache.decimate_queue();
        assert_eq!(cache.queue_len(), 0);
        // The tile itself stays registered.
        assert_eq!(cache.len(), 1);
    }

    fn make_ready(cache: &mut TileCache<ManualLoader>, key: &TileKey) {
        let tile = cache.tile_mut(key).unwrap();
        tile.begin_request(u64::MAX);
        tile.apply_payload(starmap_tiles::decode_payload(PayloadFormat::Image, &png(), None).unwrap());
        tile.finish_request();
        tile.flags.request_pending = false;
    }

    #[test]
    fn test_purge_evicts_stale_ready_excess() {
        let config = CacheConfig {
            max_ready_to_render_size: 4,
            staleness_generations: 2,
            ..CacheConfig::default()
        };
        let (mut cache, _) = cache(config);
        let mut renderer = RecordingRenderer::new();
        let set = osm();
        let mut keys = Vec::new();
        for x in 0..8 {
            let key = cache.get_tile(&set, 3, x, 0, None).unwrap();
            make_ready(&mut cache, &key);
            keys.push(key);
        }
        let fresh = keys[7].clone();
        cache.generation = 10;
        cache.touch(&fresh);

        cache.purge_lru();
        // Seven stale ready tiles, four may stay.
        assert_eq!(cache.len(), 5);
        assert!(cache.tile(&fresh).is_some());
        // Oldest access goes first.
        assert!(cache.tile(&keys[0]).is_none());
        assert!(cache.tile(&keys[6]).is_some());
        cache.flush_releases(&mut renderer);
    }

    #[test]
    fn test_purge_spares_recent_and_in_flight() {
        let config = CacheConfig {
            max_ready_to_render_size: 0,
            staleness_generations: 2,
            ..CacheConfig::default()
        };
        let (mut cache, _) = cache(config);
        let set = osm();
        let a = cache.get_tile(&set, 3, 0, 0, None).unwrap();
        let b = cache.get_tile(&set, 3, 1, 0, None).unwrap();
        let c = cache.get_tile(&set, 3, 2, 0, None).unwrap();
        for key in [&a, &b, &c] {
            make_ready(&mut cache, key);
        }
        cache.generation = 10;
        cache.tile_mut(&b).unwrap().rendered_at_or_below_generation = 9;
        cache.tile_mut(&c).unwrap().flags.request_pending = true;
        cache.purge_lru();
        assert!(cache.tile(&a).is_none());
        assert!(cache.tile(&b).is_some());
        assert!(cache.tile(&c).is_some());
    }

    #[test]
    fn test_purge_caps_not_ready_evictions() {
        let config = CacheConfig {
            max_ready_to_render_size: 1,
            max_tile_cache_size: 4,
            max_not_ready_purge: 2,
            staleness_generations: 1,
            ..CacheConfig::default()
        };
        let (mut cache, _) = cache(config);
        let set = osm();
        for x in 0..10 {
            cache.get_tile(&set, 4, x, 0, None).unwrap();
        }
        cache.generation = 10;
        cache.purge_lru();
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_clear_releases_gpu_resources() {
        let (mut cache, _) = cache(CacheConfig::default());
        let mut renderer = RecordingRenderer::new();
        let set = osm();
        let key = cache.get_tile(&set, 2, 1, 1, None).unwrap();
        make_ready(&mut cache, &key);
        assert!(cache.tile_mut(&key).unwrap().create_geometry(&mut renderer));
        assert!(renderer.live_resources() > 0);
        cache.clear(&mut renderer);
        assert_eq!(renderer.live_resources(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_end_frame_snapshots_stats() {
        let (mut cache, _) = cache(CacheConfig::default());
        let mut renderer = RecordingRenderer::new();
        let ctx = ctx_at(DVec3::new(0.0, 0.0, 3.0));
        let set = osm();
        cache.get_tile(&set, 2, 1, 1, None).unwrap();
        let before = cache.generation();
        cache.end_frame(&ctx, &mut renderer);
        assert_eq!(cache.generation(), before + 1);
        let stats = cache.stats();
        assert_eq!(stats.generation, before);
        assert_eq!(stats.registry_size, 1);
        assert_eq!(stats.open_threads, 8);
    }
}
