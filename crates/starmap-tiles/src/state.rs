//! Tile lifecycle flags and the state derived from them.

/// Coarse lifecycle state, derived from [`TileFlags`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TileState {
    /// Constructed; nothing requested yet.
    Created,
    /// At least one payload request is outstanding.
    Downloading,
    /// Everything needed to draw has arrived.
    Ready,
    /// A request failed; the tile stays errored until evicted.
    Errored,
}

/// Per-tile lifecycle flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileFlags {
    pub downloading: bool,
    pub ready_to_render: bool,
    pub tex_ready: bool,
    pub dem_ready: bool,
    pub errored: bool,
    pub request_pending: bool,
    pub geometry_created: bool,
    /// The dataset carries elevation for this tile.
    pub dem_tile: bool,
}

impl TileFlags {
    /// Recompute `ready_to_render` from the payload flags.
    ///
    /// Ready means texture present and, for elevation tiles, elevation present.
    pub fn update_ready(&mut self) {
        self.ready_to_render = !self.errored && self.tex_ready && (self.dem_ready || !self.dem_tile);
    }

    #[must_use]
    pub fn state(&self) -> TileState {
        if self.errored {
            TileState::Errored
        } else if self.ready_to_render {
            TileState::Ready
        } else if self.downloading || self.request_pending {
            TileState::Downloading
        } else {
            TileState::Created
        }
    }

    /// Whether eviction may touch this tile.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.downloading || self.request_pending
    }
}

/// Draw state of one quadrant of a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderPart {
    /// Drawn from this tile's own geometry this frame.
    pub target_state: bool,
    /// What was shown last frame.
    pub state: bool,
}
