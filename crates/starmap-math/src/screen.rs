//! Projection of tile corners into screen pixels for level-of-detail tests.

use glam::{DMat4, DVec2, DVec3};

/// Render target size in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Project a model-space point to pixel coordinates (origin top-left).
///
/// Returns `None` when the point is at or behind the eye plane.
#[must_use]
pub fn project_to_screen(wvp: &DMat4, point: DVec3, viewport: Viewport) -> Option<DVec2> {
    let clip = *wvp * point.extend(1.0);
    if clip.w <= 1e-12 {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    Some(DVec2::new(
        (ndc.x + 1.0) * 0.5 * viewport.width,
        (1.0 - ndc.y) * 0.5 * viewport.height,
    ))
}

/// Longest of the four edges of a quad, in pixels.
///
/// Corners are given in winding order. `None` if any corner is behind the eye.
#[must_use]
pub fn max_edge_length_px(wvp: &DMat4, corners: &[DVec3; 4], viewport: Viewport) -> Option<f64> {
    let mut screen = [DVec2::ZERO; 4];
    for (slot, corner) in screen.iter_mut().zip(corners) {
        *slot = project_to_screen(wvp, *corner, viewport)?;
    }
    let longest = (0..4)
        .map(|i| screen[i].distance(screen[(i + 1) % 4]))
        .fold(0.0_f64, f64::max);
    Some(longest)
}
