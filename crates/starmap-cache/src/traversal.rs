//! Per-frame quad-tree walk: level-of-detail selection and drawing.
//!
//! Starting from an imageset's root tiles, every visible tile decides per
//! quadrant whether a child covers it or whether it draws that quadrant
//! itself. A tile that cannot draw yet reports so, and its parent keeps
//! drawing the area with coarser imagery.

use std::sync::Arc;

use starmap_imageset::{Imageset, ProjectionType};
use starmap_tiles::{
    ProjectionGeometry, QuadPath, RenderContext, RenderPart, TileKey, TileRenderer, edge,
};

use crate::{TileCache, TileLoader};

impl<L: TileLoader> TileCache<L> {
    /// Draw one imageset for the current frame.
    pub fn draw_imageset(
        &mut self,
        imageset: &Arc<Imageset>,
        ctx: &RenderContext,
        renderer: &mut dyn TileRenderer,
        opacity: f32,
    ) {
        self.register_imageset(imageset);
        for (x, y) in root_addresses(imageset) {
            let Some(key) = self.get_tile(imageset, 0, x, y, None) else {
                continue;
            };
            if !self.test_frustum(&key, ctx) {
                continue;
            }
            self.draw_tile(&key, ctx, renderer, opacity);
        }
    }

    /// Frustum-test a tile, withdrawing catalog rows of tiles that left.
    fn test_frustum(&mut self, key: &TileKey, ctx: &RenderContext) -> bool {
        let Some(tile) = self.tiles.get_mut(key) else {
            return false;
        };
        if tile.is_tile_in_frustum(&ctx.frustum) {
            self.frame.in_view += 1;
            return true;
        }
        self.withdraw_catalog(key);
        false
    }

    /// Remove catalog rows of `key` and everything below it.
    fn withdraw_catalog(&mut self, key: &TileKey) {
        let mut stack = vec![key.clone()];
        while let Some(current) = stack.pop() {
            let Some(tile) = self.tiles.get_mut(&current) else {
                continue;
            };
            if !tile.is_catalog() {
                return;
            }
            if tile.catalog_shown {
                tile.catalog_shown = false;
                if let Some(sink) = self.catalog_sink.as_mut() {
                    sink.remove_rows(&current);
                }
            }
            stack.extend(tile.children.iter().flatten().cloned());
        }
    }

    /// Draw `key` or its descendants. Returns `false` when the tile could
    /// not draw, so the caller covers its area.
    pub fn draw_tile(
        &mut self,
        key: &TileKey,
        ctx: &RenderContext,
        renderer: &mut dyn TileRenderer,
        opacity: f32,
    ) -> bool {
        let generation = self.generation;
        if !self.tiles.contains_key(key) {
            return false;
        }
        self.frame.touched += 1;
        let Some(tile) = self.touch(key) else {
            return false;
        };
        if tile.flags.errored {
            return false;
        }
        let structural = tile.is_structural();
        let catalog = tile.is_catalog();
        if !structural {
            if !tile.flags.ready_to_render {
                self.add_tile_to_queue(key);
                return false;
            }
            if !catalog && !tile.create_geometry(renderer) {
                return false;
            }
        }
        self.propagate_rendered(key, generation);

        let Some(tile) = self.tiles.get(key) else {
            return false;
        };
        let imageset = Arc::clone(tile.imageset());
        let level = tile.level();
        let mut target = [!structural; 4];

        if level < imageset.max_level() {
            for quadrant in 0..4u8 {
                let Some(tile) = self.tiles.get(key) else {
                    break;
                };
                let (x1, y1) = (u32::from(quadrant & 1), u32::from(quadrant >> 1));
                let (cx, cy) = tile.variant().child_address(x1, y1);
                let Some(child) =
                    self.get_tile(&imageset, level + 1, cx, cy, Some((key, quadrant)))
                else {
                    continue;
                };
                if !self.test_frustum(&child, ctx) {
                    target[usize::from(quadrant)] = false;
                    continue;
                }
                // A structural tile has nothing of its own to fall back on.
                let refine = structural
                    || self
                        .tiles
                        .get(&child)
                        .is_some_and(|c| c.is_structural() || c.is_tile_big_enough(ctx));
                if refine && self.draw_tile(&child, ctx, renderer, opacity) {
                    target[usize::from(quadrant)] = false;
                }
            }
        }

        if catalog {
            self.show_catalog(key);
            return true;
        }
        if structural {
            return true;
        }

        let mask = self.accommodation_mask(key, generation);
        let Some(tile) = self.tiles.get_mut(key) else {
            return false;
        };
        for (quadrant, wanted) in target.into_iter().enumerate() {
            let drawn = wanted && tile.render_part(quadrant as u8, mask, opacity, renderer);
            tile.render_parts[quadrant] = RenderPart {
                target_state: wanted,
                state: drawn,
            };
            if drawn {
                self.frame.drawn += 1;
            }
        }
        true
    }

    /// Mark `key` and its ancestors as drawn at or below this generation.
    fn propagate_rendered(&mut self, key: &TileKey, generation: u64) {
        let mut next = Some(key.clone());
        while let Some(current) = next {
            let Some(tile) = self.tiles.get_mut(&current) else {
                break;
            };
            if tile.rendered_at_or_below_generation == generation {
                break;
            }
            tile.rendered_at_or_below_generation = generation;
            next = tile.parent().cloned();
        }
    }

    /// Edges whose same-level neighbour is not current, so this tile must
    /// match the coarser geometry drawn there.
    fn accommodation_mask(&self, key: &TileKey, generation: u64) -> u8 {
        let Some(tile) = self.tiles.get(key) else {
            return 0;
        };
        let bits = [edge::TOP, edge::RIGHT, edge::BOTTOM, edge::LEFT];
        let mut mask = 0;
        for (neighbor, bit) in tile.variant().seam_neighbors().into_iter().zip(bits) {
            let Some((nx, ny)) = neighbor else {
                continue;
            };
            let level = tile.level();
            let path = QuadPath::from_address(level, nx, ny);
            let neighbor_key = TileKey::new(tile.imageset(), level, nx, ny, &path);
            let current = self.tiles.get(&neighbor_key).is_some_and(|n| {
                n.flags.ready_to_render && n.rendered_generation + 1 >= generation
            });
            if !current {
                mask |= bit;
            }
        }
        mask
    }

    fn show_catalog(&mut self, key: &TileKey) {
        let Some(tile) = self.tiles.get_mut(key) else {
            return;
        };
        if tile.catalog_shown {
            return;
        }
        let (Some(sink), Some(rows)) = (self.catalog_sink.as_mut(), tile.catalog()) else {
            return;
        };
        sink.add_rows(key, rows);
        tile.catalog_shown = true;
    }
}

/// Level-0 tiles of an imageset.
fn root_addresses(imageset: &Imageset) -> Vec<(u32, u32)> {
    match imageset.projection {
        ProjectionType::Equirectangular => {
            (0..imageset.width_factor.max(1)).map(|x| (x, 0)).collect()
        }
        ProjectionType::Healpix => (0..12).map(|face| (face, 0)).collect(),
        _ => vec![(0, 0)],
    }
}
