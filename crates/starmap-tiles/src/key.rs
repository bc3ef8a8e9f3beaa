//! Tile identity.

use std::fmt;
use std::sync::Arc;

use starmap_imageset::Imageset;

/// Route from a root tile down to a descendant.
///
/// Each digit is the quadrant (`x1 + 2 * y1`, in the parent's mesh order) taken
/// at that level. Parent-relative projections fold this into the tile key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuadPath {
    root: (u32, u32),
    digits: Vec<u8>,
}

impl QuadPath {
    /// Path of a root tile.
    #[must_use]
    pub fn root(x: u32, y: u32) -> Self {
        Self {
            root: (x, y),
            digits: Vec::new(),
        }
    }

    /// Path of the child reached through `quadrant`.
    #[must_use]
    pub fn child(&self, quadrant: u8) -> Self {
        let mut digits = Vec::with_capacity(self.digits.len() + 1);
        digits.extend_from_slice(&self.digits);
        digits.push(quadrant & 3);
        Self {
            root: self.root,
            digits,
        }
    }

    /// Path of a tile in a single-root pyramid whose quadrants follow the
    /// address bits, most significant first.
    #[must_use]
    pub fn from_address(level: u32, x: u32, y: u32) -> Self {
        let digits = (0..level.min(32))
            .rev()
            .map(|bit| (((x >> bit) & 1) + 2 * ((y >> bit) & 1)) as u8)
            .collect();
        Self {
            root: (0, 0),
            digits,
        }
    }

    #[must_use]
    pub fn root_address(&self) -> (u32, u32) {
        self.root
    }

    #[must_use]
    pub fn digits(&self) -> &[u8] {
        &self.digits
    }

    /// Quadrant this tile occupies in its parent, if it has one.
    #[must_use]
    pub fn last_quadrant(&self) -> Option<u8> {
        self.digits.last().copied()
    }
}

impl fmt::Display for QuadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}:", self.root.0, self.root.1)?;
        for d in &self.digits {
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

/// Registry key of a tile: `{dataset}\{level}\{y}_{x}`, plus
/// `\{rootX}_{rootY}:{digits}` for parent-relative projections.
///
/// Cloning is a reference-count bump.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey(Arc<str>);

impl TileKey {
    #[must_use]
    pub fn new(imageset: &Imageset, level: u32, x: u32, y: u32, path: &QuadPath) -> Self {
        let mut key = format!("{}\\{level}\\{y}_{x}", imageset.id());
        if imageset.projection.is_parent_relative() {
            key.push('\\');
            key.push_str(&path.to_string());
        }
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
